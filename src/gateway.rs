//! JSON-over-HTTP access to the ledger node and the wallet's signing endpoint.

use crate::{
    ledger::{
        ClaimSimulation,
        LedgerCall,
        LedgerTransport,
        ListCategory,
        PacketLedger,
        PacketPage,
        Receipt,
        SignedTransaction,
        TokenReader,
        WalletSigner,
    },
    types::{
        Address,
        Amount,
        Packet,
        PacketId,
        TxHash,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::time::Duration;
use tokio::time;
use tracing::{
    debug,
    warn,
};

#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub receipt_poll: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            receipt_poll: Duration::from_secs(1),
            confirmation_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    wallet_url: String,
    http: reqwest::Client,
    options: GatewayOptions,
}

#[derive(Deserialize)]
struct CountDto {
    count: u64,
}

#[derive(Deserialize)]
struct AllowanceDto {
    amount: Amount,
}

#[derive(Deserialize)]
struct ApprovedDto {
    approved: bool,
}

#[derive(Deserialize)]
struct SubmittedDto {
    hash: TxHash,
}

#[derive(Serialize)]
struct IdsBody<'a> {
    ids: &'a [PacketId],
}

#[derive(Serialize)]
struct TokensBody<'a> {
    tokens: &'a [Address],
}

#[derive(Serialize)]
struct ClaimerBody {
    claimer: Address,
}

#[derive(Serialize)]
struct SignBody<'a> {
    from: Address,
    call: &'a LedgerCall,
}

fn category_segment(category: ListCategory) -> &'static str {
    match category {
        ListCategory::Created => "created",
        ListCategory::Claimed => "claimed",
    }
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        wallet_url: Option<String>,
        options: GatewayOptions,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let wallet_url = wallet_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| base_url.clone());
        let http = reqwest::Client::builder()
            .build()
            .wrap_err("failed to build HTTP client for ledger gateway")?;
        Ok(Self {
            base_url,
            wallet_url,
            http,
            options,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Option<T>> {
        let res = request
            .send()
            .await
            .wrap_err_with(|| format!("gateway request failed: {what}"))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .wrap_err("failed to read gateway response body")?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(eyre!("gateway responded with {status} for {what}: {body}"));
        }
        let value = serde_json::from_slice(&bytes)
            .wrap_err_with(|| format!("invalid gateway payload for {what}"))?;
        Ok(Some(value))
    }

    async fn require<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        self.read(request, what)
            .await?
            .ok_or_else(|| eyre!("gateway has no {what}"))
    }
}

impl PacketLedger for HttpGateway {
    async fn packet(&self, id: PacketId) -> Result<Option<Packet>> {
        let url = self.url(&format!("packets/{id:#x}"));
        self.read(self.http.get(url), "packet").await
    }

    async fn packets(&self, ids: &[PacketId]) -> Result<Vec<Packet>> {
        let url = self.url("packets/batch");
        self.require(self.http.post(url).json(&IdsBody { ids }), "packet batch")
            .await
    }

    async fn user_packets(
        &self,
        actor: Address,
        category: ListCategory,
        offset: u64,
        limit: u64,
    ) -> Result<PacketPage> {
        let url = self.url(&format!(
            "users/{actor:#x}/{}",
            category_segment(category)
        ));
        let request = self
            .http
            .get(url)
            .query(&[("offset", offset), ("limit", limit)]);
        Ok(self
            .read(request, "user packet page")
            .await?
            .unwrap_or_default())
    }

    async fn total_packets(&self) -> Result<u64> {
        let url = self.url("packets/count");
        let dto: CountDto = self.require(self.http.get(url), "packet count").await?;
        Ok(dto.count)
    }

    async fn user_packet_count(&self, actor: Address, category: ListCategory) -> Result<u64> {
        let url = self.url(&format!(
            "users/{actor:#x}/{}/count",
            category_segment(category)
        ));
        let dto: Option<CountDto> = self.read(self.http.get(url), "user packet count").await?;
        Ok(dto.map_or(0, |dto| dto.count))
    }

    async fn simulate_claim(&self, id: PacketId, actor: Address) -> Result<ClaimSimulation> {
        let url = self.url(&format!("packets/{id:#x}/simulate-claim"));
        let request = self.http.post(url).json(&ClaimerBody { claimer: actor });
        self.require(request, "claim simulation").await
    }
}

impl TokenReader for HttpGateway {
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<Amount> {
        let url = self.url(&format!("tokens/{token:#x}/allowance"));
        let request = self.http.get(url).query(&[
            ("owner", format!("{owner:#x}")),
            ("spender", format!("{spender:#x}")),
        ]);
        let dto: AllowanceDto = self.require(request, "allowance").await?;
        Ok(dto.amount)
    }

    async fn is_approved_for_all(
        &self,
        token: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool> {
        let url = self.url(&format!("tokens/{token:#x}/approved-for-all"));
        let request = self.http.get(url).query(&[
            ("owner", format!("{owner:#x}")),
            ("operator", format!("{operator:#x}")),
        ]);
        let dto: ApprovedDto = self.require(request, "operator approval").await?;
        Ok(dto.approved)
    }

    async fn symbols(&self, tokens: &[Address]) -> Result<Vec<String>> {
        let url = self.url("tokens/symbols");
        self.require(self.http.post(url).json(&TokensBody { tokens }), "token symbols")
            .await
    }

    async fn decimals(&self, tokens: &[Address]) -> Result<Vec<u8>> {
        let url = self.url("tokens/decimals");
        self.require(self.http.post(url).json(&TokensBody { tokens }), "token decimals")
            .await
    }
}

impl WalletSigner for HttpGateway {
    async fn request_signature(
        &self,
        actor: Address,
        call: &LedgerCall,
    ) -> Result<SignedTransaction> {
        let url = format!("{}/sign", self.wallet_url);
        debug!(method = call.method_name(), "requesting wallet signature");
        let request = self.http.post(url).json(&SignBody { from: actor, call });
        let res = request.send().await.wrap_err("wallet request failed")?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .wrap_err("failed to read wallet response body")?;
        if status == StatusCode::FORBIDDEN {
            return Err(eyre!("signature request declined by wallet"));
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(eyre!("wallet responded with {status}: {body}"));
        }
        serde_json::from_slice(&bytes).wrap_err("invalid wallet signature payload")
    }
}

impl LedgerTransport for HttpGateway {
    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash> {
        let url = self.url("transactions");
        let dto: SubmittedDto = self
            .require(self.http.post(url).json(tx), "transaction submission")
            .await?;
        Ok(dto.hash)
    }

    /// Polls until the receipt exists. Transient errors are retried until the
    /// confirmation timeout runs out.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt> {
        let url = self.url(&format!("transactions/{hash:#x}/receipt"));
        let poll = async {
            let mut ticker = time::interval(self.options.receipt_poll);
            loop {
                ticker.tick().await;
                match self.read::<Receipt>(self.http.get(&url), "receipt").await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => debug!(hash = %format!("{hash:#x}"), "receipt pending"),
                    Err(err) => warn!(?err, "receipt poll failed, retrying"),
                }
            }
        };
        time::timeout(self.options.confirmation_timeout, poll)
            .await
            .map_err(|_| {
                eyre!(
                    "timed out after {:?} waiting for receipt of {hash:#x}",
                    self.options.confirmation_timeout
                )
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn new__normalizes_urls() {
        let gateway = HttpGateway::new(
            "http://localhost:8080/",
            None,
            GatewayOptions::default(),
        )
        .unwrap();
        assert_eq!(gateway.base_url(), "http://localhost:8080");
        assert_eq!(gateway.wallet_url, "http://localhost:8080");
        assert_eq!(
            gateway.url("/packets/count"),
            "http://localhost:8080/packets/count"
        );
    }

    #[test]
    fn new__keeps_separate_wallet_endpoint() {
        let gateway = HttpGateway::new(
            "http://node",
            Some("http://wallet/".to_string()),
            GatewayOptions::default(),
        )
        .unwrap();
        assert_eq!(gateway.wallet_url, "http://wallet");
    }

    #[tokio::test]
    async fn wait_for_receipt__times_out_against_unreachable_gateway() {
        let gateway = HttpGateway::new(
            "http://127.0.0.1:9",
            None,
            GatewayOptions {
                receipt_poll: Duration::from_millis(10),
                confirmation_timeout: Duration::from_millis(50),
            },
        )
        .unwrap();

        let result = gateway.wait_for_receipt(TxHash::repeat_byte(1)).await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("timed out"), "{message}");
    }
}
