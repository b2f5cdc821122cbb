//! Runtime configuration read from `BALLOT_LEDGER_*` environment variables,
//! and the payload key lifecycle. A key is only generated for an empty ledger.

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::cipher::PayloadKey;
use crate::error::ConfigError;
use crate::tally::DEFAULT_TALLY_TTL;

pub const ENV_DATA: &str = "BALLOT_LEDGER_DATA";
pub const ENV_KEY: &str = "BALLOT_LEDGER_KEY";
pub const ENV_KEY_FILE: &str = "BALLOT_LEDGER_KEY_FILE";
pub const ENV_ADDR: &str = "BALLOT_LEDGER_ADDR";
pub const ENV_TALLY_TTL: &str = "BALLOT_LEDGER_TALLY_TTL_SECS";

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub data_path: PathBuf,
    /// Base64 key given directly; takes precedence over `key_path`.
    pub key: Option<String>,
    pub key_path: PathBuf,
    pub listen_addr: String,
    pub tally_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            data_path: PathBuf::from("blocks.jsonl"),
            key: None,
            key_path: PathBuf::from("payload.key"),
            listen_addr: "127.0.0.1:10040".to_string(),
            tally_ttl: DEFAULT_TALLY_TTL,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; unset names keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LedgerConfig::default();
        if let Some(path) = lookup(ENV_DATA) {
            config.data_path = PathBuf::from(path);
        }
        config.key = lookup(ENV_KEY).filter(|k| !k.trim().is_empty());
        if let Some(path) = lookup(ENV_KEY_FILE) {
            config.key_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_ADDR) {
            config.listen_addr = addr;
        }
        if let Some(ttl) = lookup(ENV_TALLY_TTL) {
            let secs = ttl.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                name: ENV_TALLY_TTL,
                reason: e.to_string(),
            })?;
            config.tally_ttl = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Resolves the payload key. A fresh key is generated and saved only
    /// when `ledger_len` is zero; otherwise existing ballots would become
    /// unreadable.
    pub fn load_key(&self, ledger_len: usize) -> Result<PayloadKey, ConfigError> {
        if let Some(encoded) = &self.key {
            return Ok(PayloadKey::from_base64(encoded)?);
        }

        if self.key_path.exists() {
            let mut contents = String::new();
            File::open(&self.key_path)?.read_to_string(&mut contents)?;
            return Ok(PayloadKey::from_base64(&contents)?);
        }

        if ledger_len > 0 {
            return Err(ConfigError::MissingKey {
                path: self.key_path.display().to_string(),
                blocks: ledger_len,
            });
        }

        warn!(
            "No payload key found, generating a new one at {}",
            self.key_path.display()
        );
        let key = PayloadKey::generate();
        save_key_to_file(&self.key_path, &key.to_base64())?;
        info!("Payload key saved");
        Ok(key)
    }
}

fn save_key_to_file(path: &Path, key: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    file.write_all(key.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.data_path, PathBuf::from("blocks.jsonl"));
        assert_eq!(config.listen_addr, "127.0.0.1:10040");
        assert_eq!(config.tally_ttl, Duration::from_secs(3600));
        assert!(config.key.is_none());
    }

    #[test]
    fn test_overrides_and_bad_ttl() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (ENV_DATA, "/tmp/ledger.jsonl"),
            (ENV_ADDR, "0.0.0.0:8080"),
            (ENV_TALLY_TTL, "60"),
        ]))
        .unwrap();
        assert_eq!(config.data_path, PathBuf::from("/tmp/ledger.jsonl"));
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.tally_ttl, Duration::from_secs(60));

        let err = LedgerConfig::from_lookup(lookup(&[(ENV_TALLY_TTL, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: ENV_TALLY_TTL, .. }));
    }

    #[test]
    fn test_key_generated_once_for_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            key_path: dir.path().join("keys/payload.key"),
            ..LedgerConfig::default()
        };

        let generated = config.load_key(0).unwrap();
        let reloaded = config.load_key(5).unwrap();
        assert_eq!(generated, reloaded);
    }

    #[test]
    fn test_missing_key_with_existing_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            key_path: dir.path().join("payload.key"),
            ..LedgerConfig::default()
        };
        assert!(matches!(
            config.load_key(3),
            Err(ConfigError::MissingKey { blocks: 3, .. })
        ));
        assert!(!config.key_path.exists());
    }

    #[test]
    fn test_explicit_key_wins() {
        let key = PayloadKey::generate();
        let config = LedgerConfig {
            key: Some(key.to_base64()),
            key_path: PathBuf::from("/nonexistent/payload.key"),
            ..LedgerConfig::default()
        };
        assert_eq!(config.load_key(10).unwrap(), key);
    }
}
