//! Fork/genesis/epoch context for signing and building operations.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::ForkVersion;

/// The chain context an operation is built and signed against.
///
/// Immutable per pipeline run; refreshed each scheduler round unless fully
/// overridden.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationContext {
    pub fork_version: ForkVersion,
    pub genesis_validators_root: B256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub epoch: u64,
}

/// Explicit per-field overrides of the fetched context. An override always
/// wins over the fetched value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContextOverrides {
    pub fork_version: Option<ForkVersion>,
    pub genesis_validators_root: Option<B256>,
    pub epoch: Option<u64>,
}

impl ContextOverrides {
    /// Apply the overrides on top of a fetched context.
    pub fn apply(&self, fetched: OperationContext) -> OperationContext {
        OperationContext {
            fork_version: self.fork_version.unwrap_or(fetched.fork_version),
            genesis_validators_root: self
                .genesis_validators_root
                .unwrap_or(fetched.genesis_validators_root),
            epoch: self.epoch.unwrap_or(fetched.epoch),
        }
    }

    /// If every field is overridden no fetch is needed at all.
    pub fn complete(&self) -> Option<OperationContext> {
        Some(OperationContext {
            fork_version: self.fork_version?,
            genesis_validators_root: self.genesis_validators_root?,
            epoch: self.epoch?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fork_version.is_none()
            && self.genesis_validators_root.is_none()
            && self.epoch.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::FixedBytes;

    fn fetched() -> OperationContext {
        OperationContext {
            fork_version: FixedBytes::from([4, 0, 0, 0]),
            genesis_validators_root: B256::repeat_byte(0x42),
            epoch: 1000,
        }
    }

    #[test]
    fn test_empty_overrides_keep_fetched() {
        let ctx = ContextOverrides::default().apply(fetched());
        assert_eq!(ctx, fetched());
    }

    #[test]
    fn test_override_wins() {
        let overrides = ContextOverrides {
            epoch: Some(42),
            ..Default::default()
        };
        let ctx = overrides.apply(fetched());
        assert_eq!(ctx.epoch, 42);
        assert_eq!(ctx.fork_version, fetched().fork_version);
    }

    #[test]
    fn test_complete_requires_all_fields() {
        let partial = ContextOverrides {
            epoch: Some(1),
            ..Default::default()
        };
        assert!(partial.complete().is_none());

        let full = ContextOverrides {
            fork_version: Some(FixedBytes::ZERO),
            genesis_validators_root: Some(B256::ZERO),
            epoch: Some(1),
        };
        assert!(full.complete().is_some());
    }
}
