use async_trait::async_trait;
use log::debug;
use primitive_types::U256;
use std::sync::Arc;
use crate::{
    events::{EventSource, RegistryEvent},
    types::{Message, MessageId, MessageStatus},
    Error,
};
use super::{
    abi::{self, Token},
    evm::{decode_hex, parse_quantity, EvmEndpoint, EvmLog},
    RegistryClient,
};

const GET_MESSAGES_BY_STATUS: &str = "getMessagesByStatus(uint8)";
const GET_MESSAGE: &str = "getMessage(bytes32)";
const UPDATE_MESSAGE_STATUS: &str = "updateMessageStatus(bytes32,uint8)";
const MESSAGE_REGISTERED: &str = "MessageRegistered(bytes32)";
const MESSAGE_STATUS_UPDATED: &str = "MessageStatusUpdated(bytes32,uint8)";

/// Propagation registry contract on an EVM chain.
pub struct EvmRegistryClient {
    endpoint: Arc<EvmEndpoint>,
    address: String,
}

impl EvmRegistryClient {
    pub fn new(endpoint: Arc<EvmEndpoint>, address: &str) -> Self {
        Self {
            endpoint,
            address: address.to_string(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl RegistryClient for EvmRegistryClient {
    fn chain_id(&self) -> u64 {
        self.endpoint.chain_id()
    }

    async fn list_by_status(&self, status: MessageStatus) -> Result<Vec<MessageId>, Error> {
        let calldata = abi::encode_call(GET_MESSAGES_BY_STATUS, &[Token::Uint(U256::from(status.code()))]);
        let output = self.endpoint.call(&self.address, &calldata).await?;
        abi::decode_message_ids(&output)
    }

    async fn fetch(&self, message_id: MessageId) -> Result<Message, Error> {
        let calldata = abi::encode_call(GET_MESSAGE, &[Token::FixedBytes(message_id.0)]);
        let output = self.endpoint.call(&self.address, &calldata).await?;
        let message = abi::decode_message(&output)?;

        // Unknown ids come back as a zeroed struct.
        if message.message_id.is_zero() || message.status == MessageStatus::None {
            return Err(Error::NotFound(message_id));
        }
        Ok(message)
    }

    async fn set_status(&self, message_id: MessageId, status: MessageStatus) -> Result<(), Error> {
        let calldata = abi::encode_call(
            UPDATE_MESSAGE_STATUS,
            &[Token::FixedBytes(message_id.0), Token::Uint(U256::from(status.code()))],
        );
        let confirmation = self
            .endpoint
            .send_transaction(&self.address, &calldata)
            .await
            .map_err(|e| Error::WriteRejected {
                message_id,
                reason: e.to_string(),
            })?;
        debug!(
            "Registry {} on chain {}: {} -> {} in {}",
            self.address,
            self.chain_id(),
            message_id,
            status,
            confirmation.tx_hash
        );
        Ok(())
    }
}

#[async_trait]
impl EventSource for EvmRegistryClient {
    fn label(&self) -> String {
        format!("registry {} on chain {}", self.address, self.endpoint.chain_id())
    }

    async fn latest_block(&self) -> Result<u64, Error> {
        self.endpoint.block_number().await
    }

    async fn events_between(&self, from_block: u64, to_block: u64) -> Result<Vec<RegistryEvent>, Error> {
        let logs = self
            .endpoint
            .get_logs(
                &self.address,
                vec![abi::event_topic(MESSAGE_REGISTERED), abi::event_topic(MESSAGE_STATUS_UPDATED)],
                from_block,
                to_block,
            )
            .await?;
        logs.iter().map(parse_registry_log).filter_map(Result::transpose).collect()
    }
}

/// Maps a registry log to a typed event; unrelated topics yield `None`.
fn parse_registry_log(log: &EvmLog) -> Result<Option<RegistryEvent>, Error> {
    let (Some(topic0), Some(topic1)) = (log.topics.first(), log.topics.get(1)) else {
        return Ok(None);
    };
    let message_id: MessageId = topic1.parse()?;
    let block_number = log.block_number.as_deref().map(parse_quantity).transpose()?;

    if *topic0 == abi::event_topic(MESSAGE_REGISTERED) {
        return Ok(Some(RegistryEvent::MessageRegistered { message_id, block_number }));
    }
    if *topic0 == abi::event_topic(MESSAGE_STATUS_UPDATED) {
        let data = decode_hex(&log.data)?;
        let status = MessageStatus::from_code(abi::AbiReader::new(&data).u8(0)?)?;
        return Ok(Some(RegistryEvent::StatusUpdated {
            message_id,
            status,
            block_number,
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::TxSigner;
    use crate::testing::{rpc_result, sample_message, DEV_KEY};
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    const REGISTRY: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    fn client(url: &str) -> EvmRegistryClient {
        let endpoint = EvmEndpoint::new(url, 31337, TxSigner::from_hex(DEV_KEY).unwrap(), Duration::from_secs(5))
            .unwrap()
            .with_confirmation_timeout(Duration::from_secs(2));
        EvmRegistryClient::new(Arc::new(endpoint), REGISTRY)
    }

    fn hex_body(bytes: &[u8]) -> String {
        rpc_result(json!(format!("0x{}", hex::encode(bytes))))
    }

    #[tokio::test]
    async fn list_by_status_encodes_status_argument() {
        let mut server = mockito::Server::new_async().await;
        let calldata = abi::encode_call(GET_MESSAGES_BY_STATUS, &[Token::Uint(U256::from(1u8))]);
        let mut ids = abi::encode(&[Token::Uint(U256::from(32u8))]);
        ids.extend(abi::encode(&[Token::Uint(U256::from(1u8)), Token::FixedBytes([4; 32])]));

        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_call",
                "params": [{"to": REGISTRY, "data": format!("0x{}", hex::encode(&calldata))}, "latest"]
            })))
            .with_body(hex_body(&ids))
            .create_async()
            .await;

        let listed = client(&server.url()).list_by_status(MessageStatus::Pending).await.unwrap();
        assert_eq!(listed, vec![MessageId([4; 32])]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_decodes_message() {
        let mut server = mockito::Server::new_async().await;
        let message = sample_message(MessageId([5; 32]), 10);
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_call"})))
            .with_body(hex_body(&abi::encode_message(&message)))
            .create_async()
            .await;

        let fetched = client(&server.url()).fetch(MessageId([5; 32])).await.unwrap();
        assert_eq!(fetched, message);
    }

    #[tokio::test]
    async fn fetch_of_zeroed_struct_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let mut empty = sample_message(MessageId([0; 32]), 0);
        empty.status = MessageStatus::None;
        empty.asset.clear();
        empty.metadata.clear();
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_call"})))
            .with_body(hex_body(&abi::encode_message(&empty)))
            .create_async()
            .await;

        let err = client(&server.url()).fetch(MessageId([6; 32])).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == MessageId([6; 32])));
    }

    #[tokio::test]
    async fn set_status_failure_is_write_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "caller is not a relayer"}}).to_string())
            .create_async()
            .await;

        let err = client(&server.url())
            .set_status(MessageId([7; 32]), MessageStatus::Processing)
            .await
            .unwrap_err();
        match err {
            Error::WriteRejected { message_id, reason } => {
                assert_eq!(message_id, MessageId([7; 32]));
                assert!(reason.contains("caller is not a relayer"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn parses_registry_logs() {
        let id = MessageId([8; 32]);
        let registered = EvmLog {
            address: REGISTRY.to_string(),
            topics: vec![abi::event_topic(MESSAGE_REGISTERED), id.to_string()],
            data: "0x".to_string(),
            block_number: Some("0x2a".to_string()),
            transaction_hash: None,
        };
        assert_eq!(
            parse_registry_log(&registered).unwrap(),
            Some(RegistryEvent::MessageRegistered { message_id: id, block_number: Some(42) })
        );

        let updated = EvmLog {
            topics: vec![abi::event_topic(MESSAGE_STATUS_UPDATED), id.to_string()],
            data: format!("0x{}", hex::encode(abi::encode(&[Token::Uint(U256::from(3u8))]))),
            ..registered.clone()
        };
        assert_eq!(
            parse_registry_log(&updated).unwrap(),
            Some(RegistryEvent::StatusUpdated {
                message_id: id,
                status: MessageStatus::Completed,
                block_number: Some(42),
            })
        );

        let unrelated = EvmLog {
            topics: vec![abi::event_topic("Transfer(address,address,uint256)"), id.to_string()],
            ..registered
        };
        assert_eq!(parse_registry_log(&unrelated).unwrap(), None);
    }
}
