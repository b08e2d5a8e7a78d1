use crate::types::Address;
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::ErrorKind,
    path::{
        Path,
        PathBuf,
    },
};

pub const REGISTRY_ROOT: &str = ".deployments";
const REGISTRY_FILE: &str = "ledgers.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Testnet,
    Local,
}

impl Network {
    fn slug(self) -> &'static str {
        match self {
            Network::Testnet => "test",
            Network::Local => "local",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Testnet => "Testnet",
            Network::Local => "Local",
        })
    }
}

/// One known ledger contract and the gateway that serves it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LedgerDeployment {
    pub recorded_at: DateTime<Utc>,
    pub ledger_address: Address,
    pub gateway_url: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Ledger deployments registered for one network. A missing file reads as empty.
#[derive(Debug)]
pub struct LedgerRegistry {
    network: Network,
    file: PathBuf,
}

impl LedgerRegistry {
    pub fn open(network: Network) -> Self {
        Self::under(REGISTRY_ROOT, network)
    }

    pub fn under(root: impl AsRef<Path>, network: Network) -> Self {
        let file = root.as_ref().join(network.slug()).join(REGISTRY_FILE);
        Self { network, file }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn entries(&self) -> Result<Vec<LedgerDeployment>> {
        let bytes = match fs::read(&self.file) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).wrap_err_with(|| {
                    format!("Failed to read {} ledger registry", self.network)
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).wrap_err_with(|| {
            format!("Malformed {} ledger registry at {}", self.network, self.file.display())
        })
    }

    /// The most recently recorded deployment, regardless of file order.
    pub fn latest(&self) -> Result<Option<LedgerDeployment>> {
        let entries = self.entries()?;
        Ok(entries.into_iter().max_by_key(|entry| entry.recorded_at))
    }

    pub fn register(
        &self,
        ledger_address: Address,
        gateway_url: impl Into<String>,
        label: Option<String>,
    ) -> Result<LedgerDeployment> {
        let entry = LedgerDeployment {
            recorded_at: Utc::now(),
            ledger_address,
            gateway_url: gateway_url.into(),
            label,
        };
        self.insert(entry.clone())?;
        Ok(entry)
    }

    pub fn insert(&self, entry: LedgerDeployment) -> Result<()> {
        let mut entries = self.entries()?;
        entries.push(entry);
        if let Some(dir) = self.file.parent() {
            fs::create_dir_all(dir)
                .wrap_err_with(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_vec_pretty(&entries)
            .wrap_err("Failed to encode ledger registry")?;
        fs::write(&self.file, json).wrap_err_with(|| {
            format!("Failed to write {} ledger registry", self.network)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use chrono::Duration;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "redpacket-registry-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn entries__missing_file_reads_as_empty() {
        let root = scratch("empty");
        let registry = LedgerRegistry::under(&root, Network::Local);
        assert!(registry.file().ends_with("local/ledgers.json"));
        assert!(registry.entries().unwrap().is_empty());
        assert_eq!(registry.latest().unwrap(), None);
        assert!(!root.exists());
    }

    #[test]
    fn latest__picks_most_recent_entry() {
        // given
        let root = scratch("latest");
        let registry = LedgerRegistry::under(&root, Network::Testnet);
        let newer = registry
            .register(Address::repeat_byte(2), "http://gw-2", None)
            .unwrap();
        registry
            .insert(LedgerDeployment {
                recorded_at: newer.recorded_at - Duration::hours(1),
                ledger_address: Address::repeat_byte(1),
                gateway_url: "http://gw-1".to_string(),
                label: Some("old".to_string()),
            })
            .unwrap();

        // when
        let latest = registry.latest().unwrap();

        // then
        assert_eq!(latest, Some(newer));
        assert_eq!(registry.entries().unwrap().len(), 2);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn entries__rejects_malformed_file() {
        let root = scratch("malformed");
        let registry = LedgerRegistry::under(&root, Network::Local);
        fs::create_dir_all(registry.file().parent().unwrap()).unwrap();
        fs::write(registry.file(), "{ not json").unwrap();

        let err = registry.entries().unwrap_err();

        assert!(format!("{err:#}").contains("Malformed Local ledger registry"));
        fs::remove_dir_all(&root).unwrap();
    }
}
