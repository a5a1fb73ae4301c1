//! Minimal Solidity ABI and RLP codec for the registry and adapter contracts.

use primitive_types::U256;
use sha3::{Digest, Keccak256};
use crate::{
    types::{Identity, Message, MessageId, MessageStatus},
    Error,
};

const WORD: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First four bytes of keccak256 of the function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// A single ABI argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    FixedBytes([u8; 32]),
    Address(Identity),
    Uint(U256),
    String(String),
    Bytes(Vec<u8>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_) | Token::Bytes(_))
    }

    fn head_word(&self) -> [u8; 32] {
        match self {
            Token::FixedBytes(bytes) => *bytes,
            Token::Address(identity) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(identity.as_bytes());
                word
            }
            Token::Uint(value) => u256_word(*value),
            Token::String(_) | Token::Bytes(_) => [0u8; 32],
        }
    }

    fn tail(&self) -> Vec<u8> {
        let data: &[u8] = match self {
            Token::String(s) => s.as_bytes(),
            Token::Bytes(b) => b,
            _ => return Vec::new(),
        };
        let mut out = u256_word(U256::from(data.len())).to_vec();
        out.extend_from_slice(data);
        let padding = (WORD - data.len() % WORD) % WORD;
        out.extend(std::iter::repeat(0u8).take(padding));
        out
    }
}

fn u256_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Head/tail encoding of a flat argument list.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&u256_word(U256::from(head_len + tail.len())));
            tail.extend(token.tail());
        } else {
            head.extend_from_slice(&token.head_word());
        }
    }

    head.extend(tail);
    head
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

/// Word-addressed reader over ABI-encoded return data.
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], Error> {
        let end = offset_add(offset, WORD)?;
        self.data.get(offset..end).ok_or_else(|| {
            Error::Serialization(format!(
                "ABI data too short: need {} bytes, have {}",
                end,
                self.data.len()
            ))
        })
    }

    pub fn uint(&self, offset: usize) -> Result<U256, Error> {
        Ok(U256::from_big_endian(self.word_at(offset)?))
    }

    pub fn u64(&self, offset: usize) -> Result<u64, Error> {
        let value = self.uint(offset)?;
        if value.bits() > 64 {
            return Err(Error::Serialization(format!("Value {} does not fit in u64", value)));
        }
        Ok(value.low_u64())
    }

    fn usize(&self, offset: usize) -> Result<usize, Error> {
        let value = self.u64(offset)?;
        usize::try_from(value)
            .map_err(|_| Error::Serialization(format!("Offset {} does not fit in usize", value)))
    }

    pub fn u8(&self, offset: usize) -> Result<u8, Error> {
        let value = self.u64(offset)?;
        u8::try_from(value).map_err(|_| Error::Serialization(format!("Value {} does not fit in u8", value)))
    }

    pub fn bool(&self, offset: usize) -> Result<bool, Error> {
        Ok(!self.uint(offset)?.is_zero())
    }

    pub fn fixed_bytes(&self, offset: usize) -> Result<[u8; 32], Error> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.word_at(offset)?);
        Ok(out)
    }

    pub fn address(&self, offset: usize) -> Result<Identity, Error> {
        Identity::from_slice(&self.word_at(offset)?[12..])
    }

    /// Dynamic bytes whose offset word sits at `head`, relative to `base`.
    pub fn dynamic_bytes(&self, base: usize, head: usize) -> Result<&'a [u8], Error> {
        let start = offset_add(base, self.usize(head)?)?;
        let len = self.usize(start)?;
        let data_start = offset_add(start, WORD)?;
        self.data.get(data_start..offset_add(data_start, len)?).ok_or_else(|| {
            Error::Serialization(format!("ABI dynamic value of {} bytes is truncated", len))
        })
    }

    pub fn string(&self, base: usize, head: usize) -> Result<String, Error> {
        let bytes = self.dynamic_bytes(base, head)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Serialization(format!("Invalid UTF-8 in ABI string: {}", e)))
    }

    pub fn fixed_bytes_array(&self, head: usize) -> Result<Vec<[u8; 32]>, Error> {
        let start = self.usize(head)?;
        let len = self.usize(start)?;
        // Reject lengths the data cannot hold before allocating.
        let needed = len
            .checked_mul(WORD)
            .and_then(|bytes| bytes.checked_add(start))
            .and_then(|bytes| bytes.checked_add(WORD))
            .ok_or_else(|| Error::Serialization(format!("ABI array length {} overflows", len)))?;
        if needed > self.data.len() {
            return Err(Error::Serialization(format!(
                "ABI array of {} elements is truncated: need {} bytes, have {}",
                len,
                needed,
                self.data.len()
            )));
        }
        (0..len)
            .map(|i| self.fixed_bytes(start + WORD * (i + 1)))
            .collect()
    }
}

fn offset_add(offset: usize, len: usize) -> Result<usize, Error> {
    offset
        .checked_add(len)
        .ok_or_else(|| Error::Serialization(format!("ABI offset overflow: {} + {}", offset, len)))
}

/// Decodes the return value of `getMessagesByStatus(uint8)`.
pub fn decode_message_ids(data: &[u8]) -> Result<Vec<MessageId>, Error> {
    // A `bytes32[]` return always carries an offset and a length.
    if data.is_empty() {
        return Err(Error::Chain(
            "Empty return data from getMessagesByStatus; is the registry address a deployed contract?".to_string(),
        ));
    }
    let reader = AbiReader::new(data);
    Ok(reader
        .fixed_bytes_array(0)?
        .into_iter()
        .map(MessageId)
        .collect())
}

/// Decodes the `Message` tuple returned by `getMessage(bytes32)`.
pub fn decode_message(data: &[u8]) -> Result<Message, Error> {
    let reader = AbiReader::new(data);
    // The tuple holds strings, so the return data starts with its offset.
    let base = reader.usize(0)?;
    let field = |index: usize| offset_add(base, index * WORD);

    Ok(Message {
        message_id: MessageId(reader.fixed_bytes(field(0)?)?),
        source_chain_id: reader.u64(field(1)?)?,
        destination_chain_id: reader.u64(field(2)?)?,
        sender: reader.address(field(3)?)?,
        from_identity: reader.address(field(4)?)?,
        to_identity: reader.address(field(5)?)?,
        asset: reader.string(base, field(6)?)?,
        amount: reader.uint(field(7)?)?,
        timestamp: reader.u64(field(8)?)?,
        status: MessageStatus::from_code(reader.u8(field(9)?)?)?,
        metadata: reader.string(base, field(10)?)?,
    })
}

/// Encodes a message the way the registry returns it; used by test fixtures.
#[cfg(test)]
pub fn encode_message(message: &Message) -> Vec<u8> {
    let tuple = encode(&[
        Token::FixedBytes(message.message_id.0),
        Token::Uint(U256::from(message.source_chain_id)),
        Token::Uint(U256::from(message.destination_chain_id)),
        Token::Address(message.sender),
        Token::Address(message.from_identity),
        Token::Address(message.to_identity),
        Token::String(message.asset.clone()),
        Token::Uint(message.amount),
        Token::Uint(U256::from(message.timestamp)),
        Token::Uint(U256::from(message.status.code())),
        Token::String(message.metadata.clone()),
    ]);
    let mut out = u256_word(U256::from(WORD)).to_vec();
    out.extend(tuple);
    out
}

// RLP for legacy transactions.

/// Big-endian bytes with no leading zeros (RLP integer form).
pub fn rlp_uint(value: u128) -> Vec<u8> {
    trim_leading_zeros(&value.to_be_bytes())
}

pub fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn rlp_length_prefix(len: usize, short_base: u8, long_base: u8) -> Vec<u8> {
    if len <= 55 {
        vec![short_base + len as u8]
    } else {
        let len_bytes = rlp_uint(len as u128);
        let mut out = vec![long_base + len_bytes.len() as u8];
        out.extend(len_bytes);
        out
    }
}

pub fn rlp_item(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return vec![data[0]];
    }
    let mut out = rlp_length_prefix(data.len(), 0x80, 0xb7);
    out.extend_from_slice(data);
    out
}

/// RLP list of raw byte-string items.
pub fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flat_map(|item| rlp_item(item)).collect();
    let mut out = rlp_length_prefix(payload.len(), 0xc0, 0xf7);
    out.extend(payload);
    out
}
