use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use crate::{
    config::ChainConfig,
    signer::TxSigner,
    types::{Confirmation, Identity},
    Error,
};
use super::abi::{keccak256, rlp_list, rlp_uint, trim_leading_zeros};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// EVM event log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxReceipt {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

/// JSON-RPC connection to one EVM chain plus the relayer's signing identity there.
pub struct EvmEndpoint {
    client: reqwest::Client,
    rpc_url: String,
    chain_id: u64,
    signer: TxSigner,
    gas_limit: u64,
    confirmation_timeout: Duration,
    request_id: AtomicU64,
    // Sends are serialized so pending-nonce reads never race.
    send_lock: Mutex<()>,
}

impl EvmEndpoint {
    /// Builds the endpoint and checks `eth_chainId` against the configured id.
    pub async fn connect(config: &ChainConfig) -> Result<Self, Error> {
        let signer = TxSigner::from_hex(config.signing_key.expose())?;
        let mut endpoint = Self::new(
            &config.rpc_url,
            config.chain_id.unwrap_or_default(),
            signer,
            config.rpc_timeout(),
        )?;
        endpoint.gas_limit = config.gas_limit;
        endpoint.confirmation_timeout = config.confirmation_timeout();

        let reported = endpoint.fetch_chain_id().await?;
        match config.chain_id {
            Some(expected) if expected != reported => {
                return Err(Error::Config(format!(
                    "Chain {} is configured with chain id {} but {} reports {}",
                    config.name, expected, config.rpc_url, reported
                )));
            }
            _ => endpoint.chain_id = reported,
        }

        info!(
            "Connected to chain {} (id {}) at {} as {}",
            config.name,
            endpoint.chain_id,
            config.rpc_url,
            endpoint.address()
        );
        Ok(endpoint)
    }

    pub fn new(rpc_url: &str, chain_id: u64, signer: TxSigner, rpc_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            chain_id,
            signer,
            gas_limit: 2_000_000,
            confirmation_timeout: Duration::from_secs(60),
            request_id: AtomicU64::new(1),
            send_lock: Mutex::new(()),
        })
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn address(&self) -> Identity {
        self.signer.address()
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Generic JSON-RPC call.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, Error> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response: serde_json::Value = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to send {} request to {}: {}", method, self.rpc_url, e)))?
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse {} response from {}: {}", method, self.rpc_url, e)))?;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(Error::Chain(format!(
                "JSON-RPC error from {} ({}): {} (code: {})",
                self.rpc_url, method, message, code
            )));
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Chain(format!("No result in {} response", method)))?;

        serde_json::from_value(result)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize {} result: {}", method, e)))
    }

    pub async fn fetch_chain_id(&self) -> Result<u64, Error> {
        let hex: String = self.request("eth_chainId", vec![]).await?;
        parse_quantity(&hex)
    }

    pub async fn block_number(&self) -> Result<u64, Error> {
        let hex: String = self.request("eth_blockNumber", vec![]).await?;
        parse_quantity(&hex)
    }

    /// Read-only `eth_call` against the latest block.
    pub async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
        let result: String = self
            .request(
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": to,
                        "data": format!("0x{}", hex::encode(data)),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await?;
        decode_hex(&result)
    }

    pub async fn get_logs(
        &self,
        address: &str,
        topics: Vec<String>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>, Error> {
        let filter = serde_json::json!({
            "address": address,
            // topic0 may be any of the given signatures
            "topics": [topics],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        self.request("eth_getLogs", vec![filter]).await
    }

    /// Signs and broadcasts a legacy EIP-155 transaction, then waits for its receipt.
    pub async fn send_transaction(&self, to: &str, calldata: &[u8]) -> Result<Confirmation, Error> {
        let _guard = self.send_lock.lock().await;

        let from = self.address().to_string();
        let nonce_hex: String = self
            .request(
                "eth_getTransactionCount",
                vec![serde_json::json!(from), serde_json::json!("pending")],
            )
            .await?;
        let nonce = parse_quantity(&nonce_hex)?;

        let gas_price_hex: String = self.request("eth_gasPrice", vec![]).await?;
        let gas_price = parse_quantity_u128(&gas_price_hex)?;

        let to_bytes = decode_hex(to)?;
        if to_bytes.len() != Identity::LEN {
            return Err(Error::Config(format!("Invalid contract address: {}", to)));
        }

        // [nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]
        let unsigned = rlp_list(&[
            rlp_uint(nonce as u128),
            rlp_uint(gas_price),
            rlp_uint(self.gas_limit as u128),
            to_bytes.clone(),
            Vec::new(),
            calldata.to_vec(),
            rlp_uint(self.chain_id as u128),
            Vec::new(),
            Vec::new(),
        ]);
        let signature = self.signer.sign_prehash(&keccak256(&unsigned))?;
        let v = signature.recovery_id as u128 + self.chain_id as u128 * 2 + 35;

        let signed = rlp_list(&[
            rlp_uint(nonce as u128),
            rlp_uint(gas_price),
            rlp_uint(self.gas_limit as u128),
            to_bytes,
            Vec::new(),
            calldata.to_vec(),
            rlp_uint(v),
            trim_leading_zeros(&signature.r),
            trim_leading_zeros(&signature.s),
        ]);

        debug!(
            "Sending raw tx on chain {}: nonce={}, gas_price={}, to={}",
            self.chain_id, nonce, gas_price, to
        );
        let tx_hash: String = self
            .request(
                "eth_sendRawTransaction",
                vec![serde_json::json!(format!("0x{}", hex::encode(&signed)))],
            )
            .await?;

        self.wait_for_receipt(&tx_hash).await
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Confirmation, Error> {
        let deadline = Instant::now() + self.confirmation_timeout;
        let mut last_error = None;
        loop {
            // The transaction is already broadcast; a failed lookup is not a failed send.
            let receipt: Option<TxReceipt> = match self
                .request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
                .await
            {
                Ok(receipt) => receipt,
                Err(e) => {
                    warn!("Receipt lookup for {} on chain {} failed: {}", tx_hash, self.chain_id, e);
                    last_error = Some(e);
                    None
                }
            };

            if let Some(receipt) = receipt {
                let block_number = receipt
                    .block_number
                    .as_deref()
                    .map(parse_quantity)
                    .transpose()?;
                return match receipt.status.as_deref() {
                    Some("0x1") => Ok(Confirmation {
                        tx_hash: tx_hash.to_string(),
                        block_number,
                    }),
                    status => Err(Error::Chain(format!(
                        "Transaction {} reverted with status {}",
                        tx_hash,
                        status.unwrap_or("unknown")
                    ))),
                };
            }

            if Instant::now() >= deadline {
                let cause = last_error.map(|e| format!(" (last error: {})", e)).unwrap_or_default();
                return Err(Error::Chain(format!(
                    "Timed out after {:?} waiting for receipt of {}{}",
                    self.confirmation_timeout, tx_hash, cause
                )));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

pub fn parse_quantity(hex_str: &str) -> Result<u64, Error> {
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(clean, 16)
        .map_err(|e| Error::Serialization(format!("Invalid hex quantity '{}': {}", hex_str, e)))
}

fn parse_quantity_u128(hex_str: &str) -> Result<u128, Error> {
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u128::from_str_radix(clean, 16)
        .map_err(|e| Error::Serialization(format!("Invalid hex quantity '{}': {}", hex_str, e)))
}

pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, Error> {
    let clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(clean).map_err(|e| Error::Serialization(format!("Invalid hex '{}': {}", hex_str, e)))
}
