//! Validator lifecycle messages and their signed envelopes.
//!
//! JSON shapes follow the beacon API conventions: fixed byte arrays are
//! `0x`-prefixed hex, integers are decimal strings.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tree_hash_derive::TreeHash;

use crate::domain::SignedRoot;
use crate::{BlsPublicKey, BlsSignature};

/// The message kinds this tool produces, in the fixed order the per-slot
/// scheduler runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    CredentialChange,
    Deposit,
    Exit,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CredentialChange => "credential change",
            OperationKind::Deposit => "deposit",
            OperationKind::Exit => "exit",
        }
    }
}

/// A voluntary exit message for a validator at a given epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TreeHash)]
pub struct VoluntaryExit {
    #[serde(with = "serde_utils::quoted_u64")]
    pub epoch: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub validator_index: u64,
}

impl SignedRoot for VoluntaryExit {}

/// A change of withdrawal credentials from key-based to execution-address-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TreeHash)]
pub struct BlsToExecutionChange {
    #[serde(with = "serde_utils::quoted_u64")]
    pub validator_index: u64,
    pub from_bls_pubkey: BlsPublicKey,
    pub to_execution_address: Address,
}

impl SignedRoot for BlsToExecutionChange {}

/// The signed-over portion of a deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TreeHash)]
pub struct DepositMessage {
    pub pubkey: BlsPublicKey,
    pub withdrawal_credentials: B256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub amount: u64,
}

impl SignedRoot for DepositMessage {}

/// Deposit data as consumed by the deposit contract; the signature is
/// embedded rather than enveloped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TreeHash)]
pub struct DepositData {
    pub pubkey: BlsPublicKey,
    pub withdrawal_credentials: B256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub amount: u64,
    pub signature: BlsSignature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: BlsSignature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedBlsToExecutionChange {
    pub message: BlsToExecutionChange,
    pub signature: BlsSignature,
}

/// An unsigned operation, created fresh per submission attempt.
///
/// Never mutated once signing begins; the fuzz engine produces a new value
/// rather than mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsignedOperation {
    CredentialChange(BlsToExecutionChange),
    Exit(VoluntaryExit),
    Deposit(DepositMessage),
}

impl UnsignedOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            UnsignedOperation::CredentialChange(_) => OperationKind::CredentialChange,
            UnsignedOperation::Exit(_) => OperationKind::Exit,
            UnsignedOperation::Deposit(_) => OperationKind::Deposit,
        }
    }

    /// Attach a signature, producing the signed envelope for this kind.
    pub fn into_signed(self, signature: BlsSignature) -> SignedOperation {
        match self {
            UnsignedOperation::CredentialChange(message) => {
                SignedOperation::CredentialChange(SignedBlsToExecutionChange { message, signature })
            }
            UnsignedOperation::Exit(message) => {
                SignedOperation::Exit(SignedVoluntaryExit { message, signature })
            }
            UnsignedOperation::Deposit(message) => SignedOperation::Deposit(DepositData {
                pubkey: message.pubkey,
                withdrawal_credentials: message.withdrawal_credentials,
                amount: message.amount,
                signature,
            }),
        }
    }
}

/// A signed operation. Immutable; serialized or submitted exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignedOperation {
    CredentialChange(SignedBlsToExecutionChange),
    Exit(SignedVoluntaryExit),
    Deposit(DepositData),
}

impl SignedOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            SignedOperation::CredentialChange(_) => OperationKind::CredentialChange,
            SignedOperation::Exit(_) => OperationKind::Exit,
            SignedOperation::Deposit(_) => OperationKind::Deposit,
        }
    }
}
