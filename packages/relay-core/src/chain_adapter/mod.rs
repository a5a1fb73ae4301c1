use async_trait::async_trait;
use std::sync::Arc;
use crate::{
    config::ChainConfig,
    types::{ChainIds, Confirmation, Message, MessageId, MessageStatus, Submission},
    Error,
};

/// Typed access to one chain's propagation registry. Holds no retry policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Chain the registry lives on.
    fn chain_id(&self) -> u64;

    /// Identifiers currently in `status`, in registry order.
    async fn list_by_status(&self, status: MessageStatus) -> Result<Vec<MessageId>, Error>;

    /// Fails with `Error::NotFound` for unknown identifiers.
    async fn fetch(&self, message_id: MessageId) -> Result<Message, Error>;

    /// Returns once the transition is confirmed on-chain; `Error::WriteRejected` otherwise.
    async fn set_status(&self, message_id: MessageId, status: MessageStatus) -> Result<(), Error>;
}

/// Write access to the message-receiving contract of one chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeAdapterClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Chain-ID pair the adapter contract reports about itself.
    async fn chain_ids(&self) -> Result<ChainIds, Error>;

    /// Executes the message on this chain; `Error::SubmissionFailed` on RPC error,
    /// revert or confirmation timeout.
    async fn submit(&self, submission: &Submission) -> Result<Confirmation, Error>;
}

pub mod abi;
pub mod evm;
pub mod registry;
pub mod bridge;

pub use evm::EvmEndpoint;
pub use registry::EvmRegistryClient;
pub use bridge::EvmBridgeAdapterClient;

/// Clients for one configured chain, sharing a single endpoint.
pub struct ChainClients {
    pub name: String,
    pub endpoint: Arc<EvmEndpoint>,
    pub registry: Arc<EvmRegistryClient>,
    pub bridge: Arc<EvmBridgeAdapterClient>,
}

impl ChainClients {
    pub async fn connect(config: &ChainConfig) -> Result<Self, Error> {
        let endpoint = Arc::new(EvmEndpoint::connect(config).await?);
        let registry = Arc::new(EvmRegistryClient::new(endpoint.clone(), &config.registry_address));
        let bridge = Arc::new(EvmBridgeAdapterClient::new(endpoint.clone(), &config.bridge_adapter_address));

        Ok(Self {
            name: config.name.clone(),
            endpoint,
            registry,
            bridge,
        })
    }
}
