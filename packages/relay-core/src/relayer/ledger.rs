use log::info;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::{types::MessageId, Error};

/// Message ids this relayer has already delivered.
///
/// In-memory by default. When opened with a file, entries are loaded at
/// startup and every new entry is appended (one hex id per line) before
/// `insert` returns.
pub struct DedupLedger {
    path: Option<PathBuf>,
    inner: Mutex<LedgerState>,
}

struct LedgerState {
    relayed: HashSet<MessageId>,
    file: Option<File>,
}

impl DedupLedger {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(LedgerState {
                relayed: HashSet::new(),
                file: None,
            }),
        }
    }

    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let mut relayed = HashSet::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_no, line) in contents.lines().enumerate() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let id: MessageId = line.parse().map_err(|e| {
                        Error::Ledger(format!("{}:{}: {}", path.display(), line_no + 1, e))
                    })?;
                    relayed.insert(id);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Ledger(format!("Failed to read {}: {}", path.display(), e)));
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Ledger(format!("Failed to open {}: {}", path.display(), e)))?;

        info!("Dedup ledger {} loaded with {} relayed message(s)", path.display(), relayed.len());
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(LedgerState {
                relayed,
                file: Some(file),
            }),
        })
    }

    pub async fn contains(&self, message_id: &MessageId) -> bool {
        self.inner.lock().await.relayed.contains(message_id)
    }

    /// Records `message_id`; returns false if it was already present.
    pub async fn insert(&self, message_id: MessageId) -> Result<bool, Error> {
        let mut state = self.inner.lock().await;
        if state.relayed.contains(&message_id) {
            return Ok(false);
        }
        if let Some(file) = state.file.as_mut() {
            let line = format!("{}\n", message_id);
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| Error::Ledger(format!("Failed to append {}: {}", message_id, e)))?;
            file.sync_data()
                .await
                .map_err(|e| Error::Ledger(format!("Failed to sync ledger: {}", e)))?;
        }
        state.relayed.insert(message_id);
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.relayed.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}
