//! Offline preparation: capture chain context (and referenced validators)
//! while connected, then serve it back later as a [`ChainView`] with no node
//! in reach.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use valops_transport::{ChainView, TransportError, ValidatorInfo};
use valops_types::{BlsPublicKey, ContextOverrides, ForkVersion, OperationContext, ValidatorId};

use alloy_primitives::B256;

pub const OFFLINE_PREPARATION_FILENAME: &str = "offline-preparation.json";

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed preparation file: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreparationValidator {
    #[serde(with = "serde_utils::quoted_u64")]
    index: u64,
    pubkey: BlsPublicKey,
    withdrawal_credentials: B256,
}

/// On-disk schema of the preparation file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreparationFile {
    fork_version: ForkVersion,
    genesis_validators_root: B256,
    #[serde(with = "serde_utils::quoted_u64")]
    epoch: u64,
    validators: Vec<PreparationValidator>,
}

/// Write the preparation file for later offline use. Returns the marker line
/// to print on success.
pub fn prepare(
    ctx: &OperationContext,
    validators: &[ValidatorInfo],
    dir: &Path,
) -> Result<String, OfflineError> {
    let file = PreparationFile {
        fork_version: ctx.fork_version,
        genesis_validators_root: ctx.genesis_validators_root,
        epoch: ctx.epoch,
        validators: validators
            .iter()
            .map(|v| PreparationValidator {
                index: v.index,
                pubkey: v.pubkey,
                withdrawal_credentials: v.withdrawal_credentials,
            })
            .collect(),
    };
    let path = dir.join(OFFLINE_PREPARATION_FILENAME);
    let write_err = |source: std::io::Error| OfflineError::Write {
        path: path.display().to_string(),
        source,
    };

    let payload = serde_json::to_vec_pretty(&file)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&payload).map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;
    debug!(validators = file.validators.len(), "wrote preparation file");
    Ok(format!("{OFFLINE_PREPARATION_FILENAME} generated"))
}

/// A [`ChainView`] served from a previously written preparation file.
/// Validators not captured at preparation time resolve to not-found.
#[derive(Debug, Clone)]
pub struct OfflineView {
    ctx: OperationContext,
    validators: Vec<ValidatorInfo>,
}

impl OfflineView {
    /// Load `offline-preparation.json` from `dir`, applying any explicit
    /// context overrides on top of the captured context.
    pub fn load(dir: &Path, overrides: &ContextOverrides) -> Result<Self, OfflineError> {
        let path = dir.join(OFFLINE_PREPARATION_FILENAME);
        let text = fs::read_to_string(&path).map_err(|source| OfflineError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: PreparationFile = serde_json::from_str(&text)?;
        Ok(Self {
            ctx: overrides.apply(OperationContext {
                fork_version: file.fork_version,
                genesis_validators_root: file.genesis_validators_root,
                epoch: file.epoch,
            }),
            validators: file
                .validators
                .into_iter()
                .map(|v| ValidatorInfo {
                    index: v.index,
                    pubkey: v.pubkey,
                    withdrawal_credentials: v.withdrawal_credentials,
                })
                .collect(),
        })
    }
}

impl ChainView for OfflineView {
    fn fetch_context(&self) -> Result<OperationContext, TransportError> {
        Ok(self.ctx)
    }

    fn validator(&self, id: &ValidatorId) -> Result<Option<ValidatorInfo>, TransportError> {
        let found = self.validators.iter().find(|v| match id {
            ValidatorId::Index(i) => v.index == *i,
            ValidatorId::PublicKey(pk) => v.pubkey == *pk,
        });
        Ok(found.cloned())
    }
}
