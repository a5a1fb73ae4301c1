pub mod config;
pub mod types;
pub mod chain_adapter;
pub mod signer;
pub mod events;
pub mod relayer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use types::{Identity, Message, MessageId, MessageStatus, RelayReport};
pub use relayer::{DedupLedger, DirectionalRelayTask, EngineState, RelayEngine, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Status write rejected for {message_id}: {reason}")]
    WriteRejected { message_id: MessageId, reason: String },

    #[error("Submission failed for {message_id}: {reason}")]
    SubmissionFailed { message_id: MessageId, reason: String },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Relay task panicked: {0}")]
    TaskPanicked(String),
}
