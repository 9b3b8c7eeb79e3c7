//! Signing and dispatch: turn an unsigned operation into a signed one, then
//! route it to exactly one sink.
//!
//! Mode precedence: offline artifacts win over JSON serialization, which wins
//! over live broadcast. JSON and offline modes never touch the network.

use std::io::Write;
use std::path::{Path, PathBuf};

use alloy_primitives::B256;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use valops_keys::{KeyError, KeyService};
use valops_transport::Broadcaster;
use valops_types::{
    compute_domain, OperationContext, OperationKind, SignedOperation, SignedRoot,
    SubmissionResult, UnsignedOperation, DOMAIN_BLS_TO_EXECUTION_CHANGE, DOMAIN_DEPOSIT,
    DOMAIN_VOLUNTARY_EXIT,
};

use crate::resolver::ValidatorHandle;

pub const CREDENTIALS_OPERATIONS_FILENAME: &str = "change-operations.json";
pub const EXIT_OPERATIONS_FILENAME: &str = "exit-operations.json";
pub const DEPOSIT_DATA_FILENAME: &str = "deposit-data.json";

/// Output routing for signed operations.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Serialize to JSON text instead of broadcasting.
    pub json: bool,
    /// Write a local artifact file instead of broadcasting.
    pub offline: bool,
    /// Directory artifacts are written to.
    pub artifact_dir: PathBuf,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            json: false,
            offline: false,
            artifact_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Signing failed. Fatal for the current validator's work; the operation
    /// is never emitted half-signed.
    #[error("signing failed: {0}")]
    Signing(#[source] KeyError),
    #[error("serialize operation: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write artifact {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Artifact filename for an operation kind.
pub fn artifact_filename(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::CredentialChange => CREDENTIALS_OPERATIONS_FILENAME,
        OperationKind::Exit => EXIT_OPERATIONS_FILENAME,
        OperationKind::Deposit => DEPOSIT_DATA_FILENAME,
    }
}

/// The signing root for an operation under the given context.
///
/// Exits and credential changes sign over the current fork and genesis
/// validators root; deposits use the deposit domain with a zero root so the
/// signature is valid before genesis.
pub fn signing_root_for(op: &UnsignedOperation, ctx: &OperationContext) -> B256 {
    match op {
        UnsignedOperation::Exit(exit) => exit.signing_root(compute_domain(
            DOMAIN_VOLUNTARY_EXIT,
            ctx.fork_version,
            ctx.genesis_validators_root,
        )),
        UnsignedOperation::CredentialChange(change) => change.signing_root(compute_domain(
            DOMAIN_BLS_TO_EXECUTION_CHANGE,
            ctx.fork_version,
            ctx.genesis_validators_root,
        )),
        UnsignedOperation::Deposit(deposit) => deposit.signing_root(compute_domain(
            DOMAIN_DEPOSIT,
            ctx.fork_version,
            B256::ZERO,
        )),
    }
}

/// Sign the operation and route it per the options.
///
/// Transport failures are data, not errors: they come back inside the
/// [`SubmissionResult`] so a scheduler round can report and continue. Only
/// signing and local-IO faults surface as `Err`.
pub fn finalize<K, B>(
    op: UnsignedOperation,
    handle: &ValidatorHandle,
    ctx: &OperationContext,
    opts: &DispatchOptions,
    keys: &K,
    broadcaster: &B,
) -> Result<(SignedOperation, SubmissionResult), DispatchError>
where
    K: KeyService + ?Sized,
    B: Broadcaster + ?Sized,
{
    let kind = op.kind();
    let root = signing_root_for(&op, ctx);
    let signature = keys
        .sign(&handle.key, root)
        .map_err(DispatchError::Signing)?;
    let signed = op.into_signed(signature);
    debug!(kind = kind.as_str(), validator = handle.index, "signed operation");

    let result = if opts.offline {
        let filename = artifact_filename(kind);
        write_artifact(&opts.artifact_dir, filename, &signed)?;
        SubmissionResult::success(format!("{filename} generated"))
    } else if opts.json {
        SubmissionResult::success(serde_json::to_string(&signed)?)
    } else {
        broadcast(&signed, broadcaster)
    };
    Ok((signed, result))
}

/// Broadcast a signed operation, mapping node refusals and connectivity
/// faults onto submission outcomes.
pub fn broadcast<B>(signed: &SignedOperation, broadcaster: &B) -> SubmissionResult
where
    B: Broadcaster + ?Sized,
{
    match broadcaster.submit(signed) {
        Ok(()) => SubmissionResult::success(format!("{} submitted", signed.kind().as_str())),
        Err(e) if e.is_rejection() => SubmissionResult::rejected(e.to_string()),
        Err(e) => SubmissionResult::transport_error(e.to_string()),
    }
}

/// Load a pre-signed operation for passthrough broadcast: inline JSON as
/// produced by JSON mode, or, when the value is empty, the kind's artifact
/// file from a previous offline run.
pub fn load_signed_operation(
    kind: OperationKind,
    source: &str,
    dir: &Path,
) -> Result<SignedOperation, DispatchError> {
    let text = if source.trim().is_empty() {
        let path = dir.join(artifact_filename(kind));
        std::fs::read_to_string(&path).map_err(|e| DispatchError::Artifact {
            path: path.display().to_string(),
            source: e,
        })?
    } else {
        source.to_string()
    };
    Ok(match kind {
        OperationKind::CredentialChange => {
            SignedOperation::CredentialChange(serde_json::from_str(&text)?)
        }
        OperationKind::Exit => SignedOperation::Exit(serde_json::from_str(&text)?),
        OperationKind::Deposit => SignedOperation::Deposit(serde_json::from_str(&text)?),
    })
}

/// Write one signed operation as a single JSON artifact. The write is atomic:
/// a temp file in the same directory is persisted over the final name.
fn write_artifact(
    dir: &Path,
    filename: &str,
    signed: &SignedOperation,
) -> Result<(), DispatchError> {
    let path = dir.join(filename);
    let payload = serde_json::to_vec_pretty(signed)?;
    let artifact_err = |source: std::io::Error| DispatchError::Artifact {
        path: path.display().to_string(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(artifact_err)?;
    tmp.write_all(&payload).map_err(artifact_err)?;
    tmp.persist(&path).map_err(|e| artifact_err(e.error))?;
    Ok(())
}
