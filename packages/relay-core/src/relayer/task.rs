use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use crate::{
    chain_adapter::{BridgeAdapterClient, RegistryClient},
    config::RelayerConfig,
    types::{Confirmation, Message, MessageId, MessageStatus, RelayReport, Submission},
    Error,
};
use super::ledger::DedupLedger;

/// Submission attempts and spacing for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl From<&RelayerConfig> for RetryPolicy {
    fn from(config: &RelayerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

enum Outcome {
    Skipped,
    Completed,
    Failed,
}

/// Drains one source registry into one destination adapter.
pub struct DirectionalRelayTask {
    label: String,
    source: Arc<dyn RegistryClient>,
    destination: Arc<dyn BridgeAdapterClient>,
    ledger: Arc<DedupLedger>,
    policy: RetryPolicy,
}

impl DirectionalRelayTask {
    pub fn new(
        source: Arc<dyn RegistryClient>,
        destination: Arc<dyn BridgeAdapterClient>,
        ledger: Arc<DedupLedger>,
        policy: RetryPolicy,
    ) -> Self {
        let label = format!("{}->{}", source.chain_id(), destination.chain_id());
        Self {
            label,
            source,
            destination,
            ledger,
            policy,
        }
    }

    /// `<source chain id>-><destination chain id>`
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &Arc<dyn RegistryClient> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<dyn BridgeAdapterClient> {
        &self.destination
    }

    /// One pass over the source's pending messages. Only listing failures
    /// are returned; per-message failures are logged and counted.
    pub async fn run_cycle(&self) -> Result<RelayReport, Error> {
        let candidates = self.source.list_by_status(MessageStatus::Pending).await?;
        let mut report = RelayReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        info!("[{}] {} pending message(s)", self.label, candidates.len());
        for message_id in candidates {
            match self.relay_one(message_id).await {
                Outcome::Skipped => report.skipped += 1,
                Outcome::Completed => {
                    report.attempted += 1;
                    report.succeeded += 1;
                }
                Outcome::Failed => {
                    report.attempted += 1;
                    report.failed += 1;
                }
            }
        }

        info!(
            "[{}] cycle done: attempted={}, succeeded={}, failed={}, skipped={}",
            self.label, report.attempted, report.succeeded, report.failed, report.skipped
        );
        Ok(report)
    }

    async fn relay_one(&self, message_id: MessageId) -> Outcome {
        if self.ledger.contains(&message_id).await {
            info!("[{}] {} already relayed by this process, skipping", self.label, message_id);
            return Outcome::Skipped;
        }

        let message = match self.source.fetch(message_id).await {
            Ok(message) => message,
            Err(Error::NotFound(_)) => {
                warn!("[{}] {} listed as pending but not found, skipping", self.label, message_id);
                return Outcome::Skipped;
            }
            Err(e) => {
                error!("[{}] failed to fetch {}: {}", self.label, message_id, e);
                return Outcome::Skipped;
            }
        };
        if message.status != MessageStatus::Pending {
            info!("[{}] {} is now {}, skipping", self.label, message_id, message.status);
            return Outcome::Skipped;
        }

        if !self.transition(&message, MessageStatus::Processing).await {
            return Outcome::Skipped;
        }

        match self.submit_with_retries(&message).await {
            Ok(confirmation) => {
                info!(
                    "[{}] {} delivered in {} (block {:?})",
                    self.label, message_id, confirmation.tx_hash, confirmation.block_number
                );
                if let Err(e) = self.ledger.insert(message_id).await {
                    error!("[{}] failed to record {} in dedup ledger: {}", self.label, message_id, e);
                }
                let mut processing = message;
                processing.status = MessageStatus::Processing;
                self.transition(&processing, MessageStatus::Completed).await;
                Outcome::Completed
            }
            Err(e) => {
                error!(
                    "[{}] {} failed after {} attempt(s): {}",
                    self.label, message_id, self.policy.max_retries, e
                );
                let mut processing = message;
                processing.status = MessageStatus::Processing;
                self.transition(&processing, MessageStatus::Failed).await;
                Outcome::Failed
            }
        }
    }

    async fn submit_with_retries(&self, message: &Message) -> Result<Confirmation, Error> {
        let submission = Submission::from(message);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.destination.submit(&submission).await {
                Ok(confirmation) => return Ok(confirmation),
                Err(e) if attempt >= self.policy.max_retries => return Err(e),
                Err(e) => {
                    warn!(
                        "[{}] attempt {}/{} for {} failed, retrying in {:?}: {}",
                        self.label, attempt, self.policy.max_retries, message.message_id, self.policy.retry_delay, e
                    );
                    sleep(self.policy.retry_delay).await;
                }
            }
        }
    }

    /// Writes a forward status transition; false if the write failed.
    async fn transition(&self, message: &Message, next: MessageStatus) -> bool {
        debug_assert!(message.status.advances_to(next));
        match self.source.set_status(message.message_id, next).await {
            Ok(()) => {
                info!("[{}] {}: {} -> {}", self.label, message.message_id, message.status, next);
                true
            }
            Err(e) => {
                error!(
                    "[{}] failed to mark {} as {} (left {}): {}",
                    self.label, message.message_id, next, message.status, e
                );
                false
            }
        }
    }
}
