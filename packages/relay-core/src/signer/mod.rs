//! secp256k1 transaction signing for the relayer's chain identities.

use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};
use crate::{types::Identity, Error};

/// Recoverable ECDSA signature over a 32-byte prehash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 0 or 1.
    pub recovery_id: u8,
}

pub struct TxSigner {
    key: SigningKey,
    address: Identity,
}

impl TxSigner {
    pub fn from_hex(hex_key: &str) -> Result<Self, Error> {
        let clean = hex_key.trim();
        let clean = clean.strip_prefix("0x").unwrap_or(clean);
        let bytes = hex::decode(clean)
            .map_err(|e| Error::Signing(format!("Invalid signing key hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(Error::Signing(format!(
                "Invalid signing key length: expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| Error::Signing(format!("Failed to create ECDSA signing key: {}", e)))?;
        let address = derive_address(&key)?;
        Ok(Self { key, address })
    }

    /// keccak256(uncompressed_public_key)[12..32]
    pub fn address(&self) -> Identity {
        self.address
    }

    /// Signs a keccak256 transaction hash; no message prefix is applied.
    pub fn sign_prehash(&self, hash: &[u8; 32]) -> Result<RecoverableSignature, Error> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash)
            .map_err(|e| Error::Signing(format!("Failed to sign transaction hash: {}", e)))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

fn derive_address(key: &SigningKey) -> Result<Identity, Error> {
    let point = key.verifying_key().to_encoded_point(false);
    let public_key = point.as_bytes();
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(Error::Signing(
            "Invalid public key format: expected 65 bytes with 0x04 prefix".to_string(),
        ));
    }
    let hash = Keccak256::digest(&public_key[1..]);
    Identity::from_slice(&hash[12..32])
}
