//! BLS key material and the signing seam.
//!
//! The rest of the workspace treats key derivation and signing as an opaque
//! capability behind [`KeyService`]. The production implementation
//! ([`Eip2333KeyService`]) derives keys from a BIP-39 mnemonic along an
//! EIP-2334 path and signs with BLS12-381 (min-pk).

use std::fmt;

use alloy_primitives::{FixedBytes, B256};
use blst::min_pk::SecretKey;
use thiserror::Error;
use valops_types::{BlsPublicKey, BlsSignature};

/// Domain separation tag for consensus-layer BLS signatures.
const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// An opaque reference to a validator's signing/withdrawal key.
///
/// Holds the validated 32-byte scalar; the public key is computed once at
/// construction. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    secret: [u8; 32],
    pubkey: BlsPublicKey,
}

impl KeyMaterial {
    /// Wrap a raw 32-byte BLS secret key, validating the scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_bytes(bytes)
            .map_err(|e| KeyError::Derivation(format!("invalid secret key: {e:?}")))?;
        Ok(Self::from_secret_key(&secret_key))
    }

    /// Parse a hex-encoded secret key, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(s).map_err(|e| KeyError::Derivation(format!("invalid key hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    fn from_secret_key(secret_key: &SecretKey) -> Self {
        Self {
            secret: secret_key.to_bytes(),
            pubkey: FixedBytes::from(secret_key.sk_to_pk().to_bytes()),
        }
    }

    /// Compressed public key for this key material.
    pub fn public_key(&self) -> BlsPublicKey {
        self.pubkey
    }

    fn secret_key(&self) -> Result<SecretKey, KeyError> {
        // Validated at construction; re-checked here so signing surfaces a
        // typed error instead of panicking if the invariant is ever broken.
        SecretKey::from_bytes(&self.secret)
            .map_err(|e| KeyError::Signing(format!("corrupt key material: {e:?}")))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("pubkey", &self.pubkey)
            .finish_non_exhaustive()
    }
}

/// Key-material collaborator: derivation plus signing.
pub trait KeyService {
    fn derive_key(&self, mnemonic: &str, path: &str) -> Result<KeyMaterial, KeyError>;
    fn sign(&self, key: &KeyMaterial, signing_root: B256) -> Result<BlsSignature, KeyError>;
}

/// BIP-39 + EIP-2333/2334 key service backed by blst.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eip2333KeyService;

impl KeyService for Eip2333KeyService {
    fn derive_key(&self, mnemonic: &str, path: &str) -> Result<KeyMaterial, KeyError> {
        let mnemonic = bip39::Mnemonic::parse(mnemonic)
            .map_err(|e| KeyError::Derivation(format!("invalid mnemonic: {e}")))?;
        let seed = mnemonic.to_seed("");

        let mut key = SecretKey::derive_master_eip2333(&seed)
            .map_err(|e| KeyError::Derivation(format!("master key derivation: {e:?}")))?;
        for index in parse_path(path)? {
            key = key.derive_child_eip2333(index);
        }
        Ok(KeyMaterial::from_secret_key(&key))
    }

    fn sign(&self, key: &KeyMaterial, signing_root: B256) -> Result<BlsSignature, KeyError> {
        let secret_key = key.secret_key()?;
        let signature = secret_key.sign(signing_root.as_slice(), BLS_DST, &[]);
        Ok(FixedBytes::from(signature.to_bytes()))
    }
}

/// The EIP-2334 validator signing-key path for a derivation index.
pub fn validator_path(index: u32) -> String {
    format!("m/12381/3600/{index}/0/0")
}

/// Parse an EIP-2334 path such as `m/12381/3600/0/0/0` into child indices.
fn parse_path(path: &str) -> Result<Vec<u32>, KeyError> {
    let mut parts = path.trim().split('/');
    if parts.next() != Some("m") {
        return Err(KeyError::Derivation(format!(
            "path {path:?} must start with \"m/\""
        )));
    }
    let mut indices = Vec::new();
    for part in parts {
        let index: u32 = part
            .parse()
            .map_err(|e| KeyError::Derivation(format!("path component {part:?}: {e}")))?;
        indices.push(index);
    }
    if indices.is_empty() {
        return Err(KeyError::Derivation(format!("path {path:?} has no components")));
    }
    Ok(indices)
}
