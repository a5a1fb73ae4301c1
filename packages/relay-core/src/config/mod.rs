use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Error;

const DEFAULT_POLL_INTERVAL: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: u64 = 5;
const DEFAULT_RPC_TIMEOUT: u64 = 15;
const DEFAULT_CONFIRMATION_TIMEOUT: u64 = 60;
const DEFAULT_GAS_LIMIT: u64 = 2_000_000;

/// Hex-encoded secp256k1 key. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(hex_key: impl Into<String>) -> Self {
        Self(hex_key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(***)")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    #[serde(default)]
    pub name: String,
    /// Expected chain id; discovered from the node when absent.
    #[serde(default)]
    pub chain_id: Option<u64>,
    pub rpc_url: String,
    pub registry_address: String,
    pub bridge_adapter_address: String,
    #[serde(default)]
    pub signing_key: SigningKey,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

impl ChainConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RelayerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Run both directions of a cycle at the same time.
    #[serde(default)]
    pub concurrent_directions: bool,
    /// Persist the dedup ledger to this file across restarts.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    /// Wake the poll loop early on registry events.
    #[serde(default)]
    pub event_wakeup: bool,
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            concurrent_directions: false,
            ledger_path: None,
            event_wakeup: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY
}

fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT
}

fn default_confirmation_timeout() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

impl Config {
    /// Loads a TOML (by `.toml` extension) or JSON config file.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    fn load_with<P, F>(config_path: P, lookup: F) -> Result<Self, Error>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let is_toml = path.extension().map_or(false, |ext| ext == "toml");
        let mut config: Config = if is_toml {
            toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        };

        config.fill_defaults(&lookup);
        config.validate()?;

        Ok(config)
    }

    /// Builds the config from `CHAIN_A_*`, `CHAIN_B_*` and relay variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayerConfig::default();
        let relayer = RelayerConfig {
            poll_interval: parse_var(&lookup, "POLLING_INTERVAL")?.unwrap_or(defaults.poll_interval),
            max_retries: parse_var(&lookup, "MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_delay: parse_var(&lookup, "RETRY_DELAY")?.unwrap_or(defaults.retry_delay),
            concurrent_directions: parse_var(&lookup, "RELAY_CONCURRENT_DIRECTIONS")?
                .unwrap_or(false),
            ledger_path: lookup("RELAY_LEDGER_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            event_wakeup: parse_var(&lookup, "RELAY_EVENT_WAKEUP")?.unwrap_or(false),
        };

        let mut config = Config {
            chain_a: chain_from_lookup(&lookup, "A")?,
            chain_b: chain_from_lookup(&lookup, "B")?,
            relayer,
        };
        config.fill_defaults(&lookup);
        config.validate()?;

        Ok(config)
    }

    fn fill_defaults<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (prefix, chain) in [("A", &mut self.chain_a), ("B", &mut self.chain_b)] {
            if chain.name.is_empty() {
                chain.name = prefix.to_string();
            }
            if chain.signing_key.is_empty() {
                if let Some(key) = lookup(&format!("CHAIN_{}_PRIVATE_KEY", prefix)) {
                    chain.signing_key = SigningKey::new(key);
                }
            }
        }
    }

    fn validate(&self) -> Result<(), Error> {
        for chain in [&self.chain_a, &self.chain_b] {
            if !chain.rpc_url.starts_with("http://") && !chain.rpc_url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "Invalid RPC URL for chain {}: {}",
                    chain.name, chain.rpc_url
                )));
            }
            validate_hex(&chain.registry_address, 20)
                .map_err(|e| Error::Config(format!("Invalid registry address for chain {}: {}", chain.name, e)))?;
            validate_hex(&chain.bridge_adapter_address, 20)
                .map_err(|e| Error::Config(format!("Invalid bridge adapter address for chain {}: {}", chain.name, e)))?;
            if chain.signing_key.is_empty() {
                return Err(Error::Config(format!("Missing signing key for chain {}", chain.name)));
            }
            validate_hex(chain.signing_key.expose(), 32)
                .map_err(|e| Error::Config(format!("Invalid signing key for chain {}: {}", chain.name, e)))?;
            if chain.gas_limit == 0 {
                return Err(Error::Config(format!("Gas limit for chain {} must be greater than 0", chain.name)));
            }
        }

        if let (Some(a), Some(b)) = (self.chain_a.chain_id, self.chain_b.chain_id) {
            if a == b {
                return Err(Error::Config(format!("Both chains are configured with chain id {}", a)));
            }
        }

        if self.relayer.poll_interval == 0 {
            return Err(Error::Config("Relayer poll interval must be greater than 0".to_string()));
        }
        if self.relayer.max_retries == 0 {
            return Err(Error::Config("Relayer max retries must be greater than 0".to_string()));
        }

        Ok(())
    }
}

fn chain_from_lookup<F>(lookup: &F, prefix: &str) -> Result<ChainConfig, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |suffix: &str| {
        let key = format!("CHAIN_{}_{}", prefix, suffix);
        lookup(&key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("Missing environment variable {}", key)))
    };
    let optional = |suffix: &str| parse_var(lookup, &format!("CHAIN_{}_{}", prefix, suffix));

    Ok(ChainConfig {
        name: lookup(&format!("CHAIN_{}_NAME", prefix)).unwrap_or_default(),
        chain_id: optional("CHAIN_ID")?,
        rpc_url: required("RPC_URL")?,
        registry_address: required("REGISTRY_ADDRESS")?,
        bridge_adapter_address: required("BRIDGE_ADAPTER_ADDRESS")?,
        signing_key: SigningKey::new(required("PRIVATE_KEY")?),
        rpc_timeout: optional("RPC_TIMEOUT")?.unwrap_or(DEFAULT_RPC_TIMEOUT),
        confirmation_timeout: optional("CONFIRMATION_TIMEOUT")?.unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT),
        gas_limit: optional("GAS_LIMIT")?.unwrap_or(DEFAULT_GAS_LIMIT),
    })
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", key, e))),
        _ => Ok(None),
    }
}

fn validate_hex(value: &str, expected_len: usize) -> Result<(), String> {
    let clean = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(clean).map_err(|e| e.to_string())?;
    if bytes.len() != expected_len {
        return Err(format!("expected {} bytes, got {}", expected_len, bytes.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const KEY_A: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KEY_B: &str = "8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";

    fn env() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        for (prefix, key, id) in [("A", KEY_A, "31337"), ("B", KEY_B, "31338")] {
            vars.insert(format!("CHAIN_{}_RPC_URL", prefix), "http://127.0.0.1:8545".to_string());
            vars.insert(format!("CHAIN_{}_CHAIN_ID", prefix), id.to_string());
            vars.insert(format!("CHAIN_{}_REGISTRY_ADDRESS", prefix), format!("0x{}", "11".repeat(20)));
            vars.insert(format!("CHAIN_{}_BRIDGE_ADAPTER_ADDRESS", prefix), format!("0x{}", "22".repeat(20)));
            vars.insert(format!("CHAIN_{}_PRIVATE_KEY", prefix), key.to_string());
        }
        vars
    }

    fn lookup(vars: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn env_config_uses_reference_defaults() {
        let vars = env();
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.relayer.poll_interval, 10);
        assert_eq!(config.relayer.max_retries, 3);
        assert_eq!(config.relayer.retry_delay, 5);
        assert!(!config.relayer.concurrent_directions);
        assert_eq!(config.chain_a.name, "A");
        assert_eq!(config.chain_b.chain_id, Some(31338));
        assert_eq!(config.chain_a.gas_limit, DEFAULT_GAS_LIMIT);
    }

    #[test]
    fn env_overrides_relay_timing() {
        let mut vars = env();
        vars.insert("POLLING_INTERVAL".into(), "2".into());
        vars.insert("MAX_RETRIES".into(), "7".into());
        vars.insert("RETRY_DELAY".into(), "1".into());
        vars.insert("RELAY_CONCURRENT_DIRECTIONS".into(), "true".into());
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.relayer.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.relayer.max_retries, 7);
        assert_eq!(config.relayer.retry_delay(), Duration::from_secs(1));
        assert!(config.relayer.concurrent_directions);
    }

    #[test]
    fn missing_registry_address_is_config_error() {
        let mut vars = env();
        vars.remove("CHAIN_B_REGISTRY_ADDRESS");
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("CHAIN_B_REGISTRY_ADDRESS")));
    }

    #[test]
    fn rejects_zero_retries_and_bad_numbers() {
        let mut vars = env();
        vars.insert("MAX_RETRIES".into(), "0".into());
        assert!(Config::from_lookup(lookup(&vars)).is_err());

        let mut vars = env();
        vars.insert("RETRY_DELAY".into(), "soon".into());
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn rejects_duplicate_chain_ids() {
        let mut vars = env();
        vars.insert("CHAIN_B_CHAIN_ID".into(), "31337".into());
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn rejects_short_signing_key() {
        let mut vars = env();
        vars.insert("CHAIN_A_PRIVATE_KEY".into(), "0xdeadbeef".into());
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("signing key"));
    }

    #[test]
    fn signing_key_is_redacted_in_debug() {
        let vars = env();
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(&KEY_B[..16]));
        assert!(rendered.contains("SigningKey(***)"));
    }

    #[test]
    fn loads_toml_file_with_keys_from_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[chain_a]
rpc_url = "http://localhost:8545"
registry_address = "0x{reg}"
bridge_adapter_address = "0x{adapter}"

[chain_b]
name = "sepolia"
chain_id = 11155111
rpc_url = "https://rpc.sepolia.org"
registry_address = "0x{reg}"
bridge_adapter_address = "0x{adapter}"
signing_key = "{key_b}"

[relayer]
poll_interval = 4
"#,
            reg = "ab".repeat(20),
            adapter = "cd".repeat(20),
            key_b = KEY_B,
        )
        .unwrap();

        let vars = env();
        let config = Config::load_with(file.path(), lookup(&vars)).unwrap();
        assert_eq!(config.chain_a.signing_key.expose(), KEY_A);
        assert_eq!(config.chain_b.name, "sepolia");
        assert_eq!(config.relayer.poll_interval, 4);
        assert_eq!(config.relayer.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let body = serde_json::json!({
            "chain_a": {
                "rpc_url": "http://localhost:8545",
                "registry_address": format!("0x{}", "ab".repeat(20)),
                "bridge_adapter_address": format!("0x{}", "cd".repeat(20)),
                "signing_key": KEY_A,
            },
            "chain_b": {
                "rpc_url": "http://localhost:9545",
                "registry_address": format!("0x{}", "ab".repeat(20)),
                "bridge_adapter_address": format!("0x{}", "cd".repeat(20)),
                "signing_key": KEY_B,
            },
            "relayer": { "max_retries": 5, "ledger_path": "/tmp/relayed.ids" }
        });
        write!(file, "{}", body).unwrap();

        let config = Config::load_with(file.path(), |_| None).unwrap();
        assert_eq!(config.relayer.max_retries, 5);
        assert_eq!(config.relayer.ledger_path, Some(PathBuf::from("/tmp/relayed.ids")));
        assert_eq!(config.chain_b.rpc_timeout(), Duration::from_secs(DEFAULT_RPC_TIMEOUT));
    }
}
