use crate::{
    error::InputError,
    types::Amount,
};
use primitive_types::U256;

pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";
const IPFS_SCHEME: &str = "ipfs://";

/// Rewrites `ipfs://<cid>` to `<gateway><cid>`; every other scheme passes through.
pub fn resolve_cover_uri(uri: &str, gateway: &str) -> String {
    match uri.strip_prefix(IPFS_SCHEME) {
        Some(path) => format!("{gateway}{path}"),
        None => uri.to_string(),
    }
}

/// Renders a smallest-unit amount with `decimals` fractional digits, trimming
/// trailing zeros (`1500000000000000000`, 18 -> `1.5`).
pub fn format_units(amount: Amount, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    // 10^decimals beyond U256 means every amount is a pure fraction.
    let (whole, fraction) = match U256::from(10u8).checked_pow(U256::from(decimals)) {
        Some(base) => (amount / base, amount % base),
        None => (U256::zero(), amount),
    };
    if fraction.is_zero() {
        return whole.to_string();
    }
    let padded = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    format!("{whole}.{}", padded.trim_end_matches('0'))
}

pub fn parse_units(raw: &str, decimals: u8) -> Result<Amount, InputError> {
    let malformed = |reason: &str| InputError::MalformedAmount {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = raw.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed("empty"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(malformed("not a decimal number"));
    }
    if fraction.len() > decimals as usize {
        return Err(malformed("too many fractional digits"));
    }
    let digits = format!(
        "{}{:0<width$}",
        if whole.is_empty() { "0" } else { whole },
        fraction,
        width = decimals as usize
    );
    U256::from_dec_str(&digits).map_err(|_| malformed("out of range"))
}

/// `0x1234...abcd`
pub fn short_hex(full: &str) -> String {
    if full.len() <= 10 {
        return full.to_string();
    }
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}
