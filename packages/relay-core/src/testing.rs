//! In-memory chain fakes shared by unit tests.

use async_trait::async_trait;
use primitive_types::U256;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use crate::{
    chain_adapter::{BridgeAdapterClient, RegistryClient},
    types::{ChainIds, Confirmation, Identity, Message, MessageId, MessageStatus, Submission},
    Error,
};

/// Hardhat/anvil account #0.
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn rpc_result(result: serde_json::Value) -> String {
    serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

pub fn sample_message(message_id: MessageId, amount: u64) -> Message {
    Message {
        message_id,
        source_chain_id: 31337,
        destination_chain_id: 11155111,
        sender: Identity([0x11; 20]),
        from_identity: Identity([0x22; 20]),
        to_identity: Identity([0x33; 20]),
        asset: "REP".to_string(),
        amount: U256::from(amount),
        timestamp: 1_700_000_000,
        status: MessageStatus::Pending,
        metadata: "{\"reason\":\"review\"}".to_string(),
    }
}

#[derive(Default)]
struct RegistryState {
    order: Vec<MessageId>,
    messages: HashMap<MessageId, Message>,
    history: HashMap<MessageId, Vec<MessageStatus>>,
    forced_pending: Vec<MessageId>,
    rejected_writes: HashSet<(MessageId, MessageStatus)>,
    failing_fetches: HashSet<MessageId>,
    fail_listing: bool,
    list_calls: usize,
}

/// Registry that keeps every status it was moved through.
pub struct MemoryRegistry {
    chain_id: u64,
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            state: Mutex::new(RegistryState::default()),
        })
    }

    pub fn insert(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        let id = message.message_id;
        state.order.push(id);
        state.history.insert(id, vec![message.status]);
        state.messages.insert(id, message);
    }

    pub fn status(&self, message_id: MessageId) -> Option<MessageStatus> {
        self.state.lock().unwrap().messages.get(&message_id).map(|m| m.status)
    }

    pub fn history(&self, message_id: MessageId) -> Vec<MessageStatus> {
        self.state
            .lock()
            .unwrap()
            .history
            .get(&message_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Lists `message_id` as pending regardless of its stored status.
    pub fn force_pending_listing(&self, message_id: MessageId) {
        self.state.lock().unwrap().forced_pending.push(message_id);
    }

    pub fn reject_write(&self, message_id: MessageId, status: MessageStatus) {
        self.state.lock().unwrap().rejected_writes.insert((message_id, status));
    }

    pub fn fail_fetch(&self, message_id: MessageId) {
        self.state.lock().unwrap().failing_fetches.insert(message_id);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn assert_monotonic(&self) {
        let state = self.state.lock().unwrap();
        for (id, history) in &state.history {
            for pair in history.windows(2) {
                assert!(
                    pair[0].advances_to(pair[1]),
                    "{} moved {} -> {}",
                    id,
                    pair[0],
                    pair[1]
                );
            }
        }
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn list_by_status(&self, status: MessageStatus) -> Result<Vec<MessageId>, Error> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.fail_listing {
            return Err(Error::Network("registry unreachable".to_string()));
        }
        let mut ids: Vec<MessageId> = state
            .order
            .iter()
            .filter(|id| state.messages.get(id).map(|m| m.status) == Some(status))
            .copied()
            .collect();
        if status == MessageStatus::Pending {
            for id in &state.forced_pending {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        Ok(ids)
    }

    async fn fetch(&self, message_id: MessageId) -> Result<Message, Error> {
        let state = self.state.lock().unwrap();
        if state.failing_fetches.contains(&message_id) {
            return Err(Error::Network("fetch timed out".to_string()));
        }
        state.messages.get(&message_id).cloned().ok_or(Error::NotFound(message_id))
    }

    async fn set_status(&self, message_id: MessageId, status: MessageStatus) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.rejected_writes.contains(&(message_id, status)) {
            return Err(Error::WriteRejected {
                message_id,
                reason: "execution reverted".to_string(),
            });
        }
        let message = state.messages.get_mut(&message_id).ok_or(Error::NotFound(message_id))?;
        message.status = status;
        state.history.entry(message_id).or_default().push(status);
        Ok(())
    }
}

#[derive(Default)]
struct AdapterState {
    reported: Option<ChainIds>,
    fail_chain_ids: bool,
    remaining_failures: HashMap<MessageId, usize>,
    attempts: HashMap<MessageId, usize>,
    delivered: Vec<Submission>,
}

/// Adapter whose per-message failures are scripted up front.
pub struct ScriptedAdapter {
    chain_id: u64,
    state: Mutex<AdapterState>,
}

impl ScriptedAdapter {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            state: Mutex::new(AdapterState::default()),
        })
    }

    /// Fails the next `times` submissions of `message_id`.
    pub fn fail_times(&self, message_id: MessageId, times: usize) {
        self.state.lock().unwrap().remaining_failures.insert(message_id, times);
    }

    pub fn report_chain_ids(&self, local: u64, remote: u64) {
        self.state.lock().unwrap().reported = Some(ChainIds { local, remote });
    }

    pub fn fail_chain_ids(&self) {
        self.state.lock().unwrap().fail_chain_ids = true;
    }

    pub fn attempts(&self, message_id: MessageId) -> usize {
        self.state.lock().unwrap().attempts.get(&message_id).copied().unwrap_or(0)
    }

    /// Successful submissions in delivery order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().delivered.clone()
    }
}

#[async_trait]
impl BridgeAdapterClient for ScriptedAdapter {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn chain_ids(&self) -> Result<ChainIds, Error> {
        let state = self.state.lock().unwrap();
        if state.fail_chain_ids {
            return Err(Error::Network("adapter unreachable".to_string()));
        }
        Ok(state.reported.unwrap_or(ChainIds {
            local: self.chain_id,
            remote: 0,
        }))
    }

    async fn submit(&self, submission: &Submission) -> Result<Confirmation, Error> {
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(submission.message_id).or_default() += 1;
        if let Some(remaining) = state.remaining_failures.get_mut(&submission.message_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::SubmissionFailed {
                    message_id: submission.message_id,
                    reason: "execution reverted".to_string(),
                });
            }
        }
        state.delivered.push(submission.clone());
        Ok(Confirmation {
            tx_hash: format!("0x{}", hex::encode(submission.message_id.0)),
            block_number: Some(state.delivered.len() as u64),
        })
    }
}
