use crate::{
    action::DEFAULT_EXPIRY,
    client::ClientSettings,
    decoder::{
        EventSchema,
        PACKET_CLAIMED_TOPIC,
        PACKET_CREATED_TOPIC,
    },
    eligibility::DEFAULT_DEBOUNCE,
    format::DEFAULT_IPFS_GATEWAY,
    list_sync::DEFAULT_PAGE_SIZE,
    types::Address,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use primitive_types::H256;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "~/.redpacket/config.json";
pub const DEFAULT_LOG_DIR: &str = "~/.redpacket/logs";
pub const DEFAULT_LOCAL_GATEWAY_URL: &str = "http://localhost:8080/";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Ledger gateway. Falls back to the latest deployment record.
    pub gateway_url: Option<String>,
    /// Wallet signing endpoint. Falls back to the gateway.
    pub wallet_url: Option<String>,
    /// Ledger contract. Falls back to the latest deployment record.
    pub ledger_address: Option<Address>,
    pub ipfs_gateway: String,
    pub page_size: u64,
    pub poll_interval_ms: u64,
    pub eligibility_debounce_ms: u64,
    pub receipt_poll_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub default_expiry_secs: u64,
    pub native_symbol: String,
    pub native_decimals: u8,
    pub created_topic: H256,
    pub claimed_topic: H256,
    pub log_dir: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            wallet_url: None,
            ledger_address: None,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval_ms: 5_000,
            eligibility_debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            receipt_poll_ms: 1_000,
            confirmation_timeout_secs: 120,
            default_expiry_secs: DEFAULT_EXPIRY.as_secs(),
            native_symbol: "MON".to_string(),
            native_decimals: 18,
            created_topic: PACKET_CREATED_TOPIC,
            claimed_topic: PACKET_CLAIMED_TOPIC,
            log_dir: DEFAULT_LOG_DIR.to_string(),
        }
    }
}

pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

impl ClientConfig {
    /// Reads `path`. A missing file yields the defaults unless `required` is set.
    pub fn load(path: impl AsRef<Path>, required: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() && !required {
            return Ok(Self::default());
        }
        let data = fs::read(path)
            .wrap_err_with(|| format!("Failed to read config at {}", path.display()))?;
        serde_json::from_slice(&data)
            .wrap_err_with(|| format!("Failed to parse config JSON at {}", path.display()))
    }

    pub fn load_from_cli(raw: Option<&str>) -> Result<Self> {
        match raw {
            Some(raw) => Self::load(expand_path(raw), true),
            None => Self::load(expand_path(DEFAULT_CONFIG_PATH), false),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        expand_path(&self.log_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn eligibility_debounce(&self) -> Duration {
        Duration::from_millis(self.eligibility_debounce_ms)
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms.max(1))
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn default_expiry(&self) -> Duration {
        Duration::from_secs(self.default_expiry_secs)
    }

    pub fn schema(&self, ledger: Address) -> EventSchema {
        EventSchema {
            ledger,
            created_topic: self.created_topic,
            claimed_topic: self.claimed_topic,
        }
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            page_size: self.page_size,
            ipfs_gateway: self.ipfs_gateway.clone(),
            native_symbol: self.native_symbol.clone(),
            native_decimals: self.native_decimals,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn load__partial_file_keeps_remaining_defaults() {
        // given
        let dir = std::env::temp_dir().join(format!("redpacket-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        fs::write(&path, r#"{ "page_size": 25, "native_symbol": "ETH" }"#).unwrap();

        // when
        let config = ClientConfig::load(&path, true).unwrap();

        // then
        assert_eq!(config.page_size, 25);
        assert_eq!(config.native_symbol, "ETH");
        assert_eq!(config.native_decimals, 18);
        assert_eq!(config.created_topic, PACKET_CREATED_TOPIC);
        assert_eq!(config.default_expiry(), Duration::from_secs(3_600));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load__missing_optional_file_is_default() {
        let config = ClientConfig::load("/nonexistent/redpacket.json", false).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(ClientConfig::load("/nonexistent/redpacket.json", true).is_err());
    }

    #[test]
    fn expand_path__resolves_home() {
        let expanded = expand_path("~/logs");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
