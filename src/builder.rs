//! Operation construction: a resolved identity plus signing context plus
//! per-kind parameters becomes an unsigned operation.
//!
//! Building is pure. No signing, no network, no clock.

use alloy_primitives::{Address, B256};
use sha2::{Digest, Sha256};
use thiserror::Error;

use valops_types::{
    BlsToExecutionChange, DepositMessage, OperationContext, OperationKind, UnsignedOperation,
    VoluntaryExit,
};

use crate::resolver::ValidatorHandle;

/// Standard deposit amount for a full validator, in gwei.
pub const DEFAULT_DEPOSIT_GWEI: u64 = 32_000_000_000;

/// Where a credential change should point the withdrawal credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialTarget {
    /// An explicit execution-layer address.
    Address(Address),
    /// A key reference; the target address is derived from the key's
    /// compressed pubkey as the last 20 bytes of its SHA-256 digest.
    AccountKey(valops_types::BlsPublicKey),
}

impl CredentialTarget {
    pub fn to_address(&self) -> Address {
        match self {
            CredentialTarget::Address(addr) => *addr,
            CredentialTarget::AccountKey(pubkey) => {
                let digest = Sha256::digest(pubkey.as_slice());
                Address::from_slice(&digest[12..])
            }
        }
    }
}

/// Destination credentials for a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositCredentials {
    /// A full 32-byte credentials value, used as-is.
    Explicit(B256),
    /// An execution address, encoded as 0x01-prefixed credentials.
    ExecutionAddress(Address),
}

impl DepositCredentials {
    pub fn to_credentials(&self) -> B256 {
        match self {
            DepositCredentials::Explicit(value) => *value,
            DepositCredentials::ExecutionAddress(addr) => {
                let mut out = [0u8; 32];
                out[0] = 0x01;
                out[12..].copy_from_slice(addr.as_slice());
                B256::from(out)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositParams {
    pub amount_gwei: u64,
    pub credentials: DepositCredentials,
}

/// Per-kind parameters the identity and context do not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraParams {
    /// Explicit credential-change target address, if given.
    pub withdrawal_address: Option<Address>,
    /// Key-reference credential-change target, if given.
    pub withdrawal_key: Option<valops_types::BlsPublicKey>,
    /// Exit epoch; negative means "current epoch from context".
    pub exit_epoch: i64,
    pub deposit: Option<DepositParams>,
}

impl Default for ExtraParams {
    fn default() -> Self {
        Self {
            withdrawal_address: None,
            withdrawal_key: None,
            exit_epoch: -1,
            deposit: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("exactly one of a withdrawal address or a withdrawal key must be supplied")]
    AmbiguousCredentialTarget,
    #[error("deposit requires an amount and destination credentials")]
    MissingDepositParams,
}

/// Build an unsigned operation of the requested kind.
pub fn build(
    kind: OperationKind,
    handle: &ValidatorHandle,
    ctx: &OperationContext,
    extra: &ExtraParams,
) -> Result<UnsignedOperation, BuildError> {
    match kind {
        OperationKind::CredentialChange => {
            let target = credential_target(extra)?;
            Ok(UnsignedOperation::CredentialChange(BlsToExecutionChange {
                validator_index: handle.index,
                // The resolved key is the withdrawal key being rotated away from.
                from_bls_pubkey: handle.key.public_key(),
                to_execution_address: target.to_address(),
            }))
        }
        OperationKind::Exit => {
            let epoch = if extra.exit_epoch < 0 {
                ctx.epoch
            } else {
                extra.exit_epoch as u64
            };
            Ok(UnsignedOperation::Exit(VoluntaryExit {
                epoch,
                validator_index: handle.index,
            }))
        }
        OperationKind::Deposit => {
            let params = extra.deposit.as_ref().ok_or(BuildError::MissingDepositParams)?;
            Ok(UnsignedOperation::Deposit(DepositMessage {
                pubkey: handle.key.public_key(),
                withdrawal_credentials: params.credentials.to_credentials(),
                amount: params.amount_gwei,
            }))
        }
    }
}

fn credential_target(extra: &ExtraParams) -> Result<CredentialTarget, BuildError> {
    match (extra.withdrawal_address, extra.withdrawal_key) {
        (Some(addr), None) => Ok(CredentialTarget::Address(addr)),
        (None, Some(key)) => Ok(CredentialTarget::AccountKey(key)),
        _ => Err(BuildError::AmbiguousCredentialTarget),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::FixedBytes;
    use valops_keys::KeyMaterial;

    const PRIVKEY: &str = "0x263dbd792f5b1be47ed85f8938c0f29586af0b3ffda9b6ffa6af9f7b0e6d5ec2";

    fn handle() -> ValidatorHandle {
        let key = KeyMaterial::from_hex(PRIVKEY).unwrap();
        ValidatorHandle {
            index: 7,
            pubkey: key.public_key(),
            key,
        }
    }

    fn ctx() -> OperationContext {
        OperationContext {
            fork_version: FixedBytes::from([4, 0, 0, 0]),
            genesis_validators_root: B256::repeat_byte(0x11),
            epoch: 200_000,
        }
    }

    #[test]
    fn test_exit_uses_context_epoch_when_unset() {
        let op = build(OperationKind::Exit, &handle(), &ctx(), &ExtraParams::default()).unwrap();
        match op {
            UnsignedOperation::Exit(exit) => {
                assert_eq!(exit.epoch, 200_000);
                assert_eq!(exit.validator_index, 7);
            }
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[test]
    fn test_exit_explicit_epoch() {
        let extra = ExtraParams {
            exit_epoch: 123,
            ..Default::default()
        };
        let op = build(OperationKind::Exit, &handle(), &ctx(), &extra).unwrap();
        assert!(matches!(op, UnsignedOperation::Exit(e) if e.epoch == 123));
    }

    #[test]
    fn test_credential_change_explicit_address() {
        let addr = Address::repeat_byte(0xaa);
        let extra = ExtraParams {
            withdrawal_address: Some(addr),
            ..Default::default()
        };
        let op = build(OperationKind::CredentialChange, &handle(), &ctx(), &extra).unwrap();
        match op {
            UnsignedOperation::CredentialChange(change) => {
                assert_eq!(change.to_execution_address, addr);
                assert_eq!(change.from_bls_pubkey, handle().key.public_key());
                assert_eq!(change.validator_index, 7);
            }
            other => panic!("expected credential change, got {other:?}"),
        }
    }

    #[test]
    fn test_credential_change_key_target_derives_address() {
        let target_key = FixedBytes::<48>::repeat_byte(0x42);
        let extra = ExtraParams {
            withdrawal_key: Some(target_key),
            ..Default::default()
        };
        let op = build(OperationKind::CredentialChange, &handle(), &ctx(), &extra).unwrap();
        let expected = {
            let digest = Sha256::digest(target_key.as_slice());
            Address::from_slice(&digest[12..])
        };
        assert!(
            matches!(op, UnsignedOperation::CredentialChange(c) if c.to_execution_address == expected)
        );
    }

    #[test]
    fn test_credential_target_must_be_unambiguous() {
        for extra in [
            ExtraParams::default(),
            ExtraParams {
                withdrawal_address: Some(Address::ZERO),
                withdrawal_key: Some(FixedBytes::ZERO),
                ..Default::default()
            },
        ] {
            let err = build(OperationKind::CredentialChange, &handle(), &ctx(), &extra).unwrap_err();
            assert_eq!(err, BuildError::AmbiguousCredentialTarget);
        }
    }

    #[test]
    fn test_deposit_address_credentials() {
        let addr = Address::repeat_byte(0x55);
        let extra = ExtraParams {
            deposit: Some(DepositParams {
                amount_gwei: DEFAULT_DEPOSIT_GWEI,
                credentials: DepositCredentials::ExecutionAddress(addr),
            }),
            ..Default::default()
        };
        let op = build(OperationKind::Deposit, &handle(), &ctx(), &extra).unwrap();
        match op {
            UnsignedOperation::Deposit(deposit) => {
                assert_eq!(deposit.amount, 32_000_000_000);
                assert_eq!(deposit.withdrawal_credentials[0], 0x01);
                assert_eq!(&deposit.withdrawal_credentials[1..12], &[0u8; 11]);
                assert_eq!(&deposit.withdrawal_credentials[12..], addr.as_slice());
            }
            other => panic!("expected deposit, got {other:?}"),
        }
    }

    #[test]
    fn test_deposit_requires_params() {
        let err =
            build(OperationKind::Deposit, &handle(), &ctx(), &ExtraParams::default()).unwrap_err();
        assert_eq!(err, BuildError::MissingDepositParams);
    }

    #[test]
    fn test_build_is_deterministic() {
        let extra = ExtraParams {
            withdrawal_address: Some(Address::repeat_byte(0x01)),
            ..Default::default()
        };
        let a = build(OperationKind::CredentialChange, &handle(), &ctx(), &extra).unwrap();
        let b = build(OperationKind::CredentialChange, &handle(), &ctx(), &extra).unwrap();
        assert_eq!(a, b);
    }
}
