use async_trait::async_trait;
use std::sync::Arc;
use crate::{
    types::{ChainIds, Confirmation, Submission},
    Error,
};
use super::{
    abi::{self, AbiReader, Token},
    evm::EvmEndpoint,
    BridgeAdapterClient,
};

const RECEIVE_MESSAGE: &str = "receiveMessage(bytes32,address,address,string,uint256,bytes)";
const LOCAL_CHAIN_ID: &str = "localChainId()";
const REMOTE_CHAIN_ID: &str = "remoteChainId()";

/// Message-receiving bridge adapter contract on an EVM chain.
pub struct EvmBridgeAdapterClient {
    endpoint: Arc<EvmEndpoint>,
    address: String,
}

impl EvmBridgeAdapterClient {
    pub fn new(endpoint: Arc<EvmEndpoint>, address: &str) -> Self {
        Self {
            endpoint,
            address: address.to_string(),
        }
    }

    async fn read_u64(&self, signature: &str) -> Result<u64, Error> {
        let output = self
            .endpoint
            .call(&self.address, &abi::encode_call(signature, &[]))
            .await?;
        AbiReader::new(&output).u64(0)
    }
}

pub fn encode_receive_message(submission: &Submission) -> Vec<u8> {
    abi::encode_call(
        RECEIVE_MESSAGE,
        &[
            Token::FixedBytes(submission.message_id.0),
            Token::Address(submission.from_identity),
            Token::Address(submission.to_identity),
            Token::String(submission.asset.clone()),
            Token::Uint(submission.amount),
            Token::Bytes(submission.data.clone()),
        ],
    )
}

#[async_trait]
impl BridgeAdapterClient for EvmBridgeAdapterClient {
    fn chain_id(&self) -> u64 {
        self.endpoint.chain_id()
    }

    async fn chain_ids(&self) -> Result<ChainIds, Error> {
        Ok(ChainIds {
            local: self.read_u64(LOCAL_CHAIN_ID).await?,
            remote: self.read_u64(REMOTE_CHAIN_ID).await?,
        })
    }

    async fn submit(&self, submission: &Submission) -> Result<Confirmation, Error> {
        self.endpoint
            .send_transaction(&self.address, &encode_receive_message(submission))
            .await
            .map_err(|e| Error::SubmissionFailed {
                message_id: submission.message_id,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::TxSigner;
    use crate::testing::{rpc_result, sample_message, DEV_KEY};
    use crate::types::MessageId;
    use mockito::Matcher;
    use primitive_types::U256;
    use serde_json::json;
    use std::time::Duration;

    const ADAPTER: &str = "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512";

    fn client(url: &str) -> EvmBridgeAdapterClient {
        let endpoint = EvmEndpoint::new(url, 31337, TxSigner::from_hex(DEV_KEY).unwrap(), Duration::from_secs(5))
            .unwrap()
            .with_confirmation_timeout(Duration::from_secs(1));
        EvmBridgeAdapterClient::new(Arc::new(endpoint), ADAPTER)
    }

    fn word(value: u64) -> String {
        rpc_result(json!(format!("0x{}", hex::encode(abi::encode(&[Token::Uint(U256::from(value))])))))
    }

    #[test]
    fn receive_message_calldata_layout() {
        let message = sample_message(MessageId([1; 32]), 10);
        let calldata = encode_receive_message(&Submission::from(&message));
        assert_eq!(&calldata[..4], &abi::selector(RECEIVE_MESSAGE));

        let reader = AbiReader::new(&calldata[4..]);
        assert_eq!(reader.fixed_bytes(0).unwrap(), [1; 32]);
        assert_eq!(reader.address(32).unwrap(), message.from_identity);
        assert_eq!(reader.address(64).unwrap(), message.to_identity);
        assert_eq!(reader.string(0, 96).unwrap(), "REP");
        assert_eq!(reader.uint(128).unwrap(), U256::from(10u64));
        assert_eq!(reader.dynamic_bytes(0, 160).unwrap(), message.metadata.as_bytes());
    }

    #[tokio::test]
    async fn reads_chain_id_pair() {
        let mut server = mockito::Server::new_async().await;
        let local = format!("\"data\":\"0x{}\"", hex::encode(abi::selector(LOCAL_CHAIN_ID)));
        let remote = format!("\"data\":\"0x{}\"", hex::encode(abi::selector(REMOTE_CHAIN_ID)));
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(local))
            .with_body(word(31337))
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(remote))
            .with_body(word(11155111))
            .create_async()
            .await;

        let ids = client(&server.url()).chain_ids().await.unwrap();
        assert_eq!(ids, ChainIds { local: 31337, remote: 11155111 });
    }

    #[tokio::test]
    async fn rpc_failure_is_submission_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let message = sample_message(MessageId([2; 32]), 1);
        let err = client(&server.url())
            .submit(&Submission::from(&message))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SubmissionFailed { message_id, .. } if message_id == MessageId([2; 32])));
    }
}
