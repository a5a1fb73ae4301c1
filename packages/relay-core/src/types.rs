use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::Error;

/// Fixed-width byte identifier rendered as `0x`-prefixed lowercase hex.
macro_rules! hex_identifier {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    Error::Serialization(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let clean = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(clean)
                    .map_err(|e| Error::Serialization(format!("Invalid hex '{}': {}", s, e)))?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_identifier!(
    /// Registry primary key, unique per (source chain, nonce).
    MessageId,
    32
);

hex_identifier!(
    /// Address-like principal on one side of a transfer.
    Identity,
    20
);

/// Registry status codes, ordered along the relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MessageStatus {
    None = 0,
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

impl MessageStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Failed),
            other => Err(Error::Serialization(format!("Unknown message status code: {}", other))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal forward step from `self`.
    pub fn advances_to(self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

impl FromStr for MessageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Config(format!("Unknown message status: {}", other))),
        }
    }
}

/// A cross-chain transfer intent as recorded by a propagation registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub sender: Identity,
    pub from_identity: Identity,
    pub to_identity: Identity,
    pub asset: String,
    pub amount: U256,
    pub timestamp: u64,
    pub status: MessageStatus,
    pub metadata: String,
}

/// Arguments of a destination-side `receiveMessage` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub message_id: MessageId,
    pub from_identity: Identity,
    pub to_identity: Identity,
    pub asset: String,
    pub amount: U256,
    pub data: Vec<u8>,
}

impl From<&Message> for Submission {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.message_id,
            from_identity: message.from_identity,
            to_identity: message.to_identity,
            asset: message.asset.clone(),
            amount: message.amount,
            data: message.metadata.as_bytes().to_vec(),
        }
    }
}

/// On-chain confirmation of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// Chain-ID pair an adapter contract reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIds {
    pub local: u64,
    pub remote: u64,
}

/// Outcome counts of one directional relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RelayReport {
    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.skipped == 0
    }
}
