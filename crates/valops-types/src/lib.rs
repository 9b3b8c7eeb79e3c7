//! Shared types for the valops workspace.
//!
//! This crate provides the consensus-layer message types the rest of the
//! workspace builds, fuzzes, signs, and submits:
//!
//! - [`operation`] — voluntary exits, BLS-to-execution changes, deposits,
//!   and their signed envelopes
//! - [`domain`] — signing domains and hash-tree-root plumbing
//! - [`context`] — the per-run fork/genesis/epoch context and its overrides
//! - [`submission`] — per-attempt submission outcomes

pub mod context;
pub mod domain;
pub mod operation;
pub mod submission;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::FixedBytes;

pub use context::{ContextOverrides, OperationContext};
pub use domain::{
    compute_domain, SignedRoot, SigningData, DOMAIN_BLS_TO_EXECUTION_CHANGE, DOMAIN_DEPOSIT,
    DOMAIN_VOLUNTARY_EXIT,
};
pub use operation::{
    BlsToExecutionChange, DepositData, DepositMessage, OperationKind, SignedBlsToExecutionChange,
    SignedOperation, SignedVoluntaryExit, UnsignedOperation, VoluntaryExit,
};
pub use submission::{Outcome, SubmissionResult};

/// Compressed BLS public key.
pub type BlsPublicKey = FixedBytes<48>;

/// Compressed BLS signature.
pub type BlsSignature = FixedBytes<96>;

/// Four-byte fork version.
pub type ForkVersion = FixedBytes<4>;

/// Fixed consensus slot duration.
pub const SLOT_DURATION: Duration = Duration::from_secs(12);

/// Slots per epoch on mainnet.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Epoch sentinel for "never".
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// A validator reference as supplied on the command line: either an index
/// or a compressed public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorId {
    Index(u64),
    PublicKey(BlsPublicKey),
}

impl FromStr for ValidatorId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex_part) = s.strip_prefix("0x") {
            let bytes = hex::decode(hex_part).map_err(|e| format!("invalid pubkey hex: {e}"))?;
            if bytes.len() != 48 {
                return Err(format!("pubkey must be 48 bytes, got {}", bytes.len()));
            }
            Ok(ValidatorId::PublicKey(FixedBytes::from_slice(&bytes)))
        } else {
            s.parse::<u64>()
                .map(ValidatorId::Index)
                .map_err(|e| format!("invalid validator index: {e}"))
        }
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorId::Index(i) => write!(f, "{i}"),
            ValidatorId::PublicKey(pk) => write!(f, "{pk}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_id_from_index() {
        assert_eq!("12345".parse::<ValidatorId>(), Ok(ValidatorId::Index(12345)));
    }

    #[test]
    fn test_validator_id_from_pubkey() {
        let hex = format!("0x{}", "ab".repeat(48));
        match hex.parse::<ValidatorId>() {
            Ok(ValidatorId::PublicKey(pk)) => assert_eq!(pk[0], 0xab),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_validator_id_rejects_short_pubkey() {
        assert!("0xabcd".parse::<ValidatorId>().is_err());
        assert!("not-a-validator".parse::<ValidatorId>().is_err());
    }
}
