//! Signing domains and signing roots.
//!
//! A signature over a consensus message commits to a domain that mixes the
//! message type with the chain's fork version and genesis validators root,
//! binding the signature to one chain and one protocol version.

use alloy_primitives::B256;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use crate::ForkVersion;

/// Domain type for deposits.
pub const DOMAIN_DEPOSIT: [u8; 4] = [0x03, 0x00, 0x00, 0x00];

/// Domain type for voluntary exits.
pub const DOMAIN_VOLUNTARY_EXIT: [u8; 4] = [0x04, 0x00, 0x00, 0x00];

/// Domain type for BLS-to-execution credential changes.
pub const DOMAIN_BLS_TO_EXECUTION_CHANGE: [u8; 4] = [0x0a, 0x00, 0x00, 0x00];

#[derive(Debug, Clone, TreeHash)]
struct ForkData {
    current_version: ForkVersion,
    genesis_validators_root: B256,
}

/// Message/domain pair whose hash tree root is the value actually signed.
#[derive(Debug, Clone, PartialEq, TreeHash)]
pub struct SigningData {
    pub object_root: B256,
    pub domain: B256,
}

/// Compute the 32-byte signing domain for a message type.
///
/// `domain = domain_type || fork_data_root(fork_version, genesis_validators_root)[..28]`.
/// Deposits pass a zero genesis validators root, binding them to the fork
/// version alone.
pub fn compute_domain(
    domain_type: [u8; 4],
    fork_version: ForkVersion,
    genesis_validators_root: B256,
) -> B256 {
    let fork_data_root = ForkData {
        current_version: fork_version,
        genesis_validators_root,
    }
    .tree_hash_root();

    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&domain_type);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    B256::from(domain)
}

/// Hash-tree-rootable messages that are signed under a domain.
pub trait SignedRoot: TreeHash {
    fn signing_root(&self, domain: B256) -> B256 {
        SigningData {
            object_root: self.tree_hash_root(),
            domain,
        }
        .tree_hash_root()
    }
}
