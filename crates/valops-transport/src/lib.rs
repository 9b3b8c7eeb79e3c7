//! Beacon-node transport: context fetch, validator lookup, and broadcast.
//!
//! The pipelines in the root crate depend only on the [`ChainView`] and
//! [`Broadcaster`] traits; [`BeaconClient`] implements both over the standard
//! beacon HTTP API with bounded timeouts.

use std::time::Duration;

use alloy_primitives::{FixedBytes, B256};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use valops_types::{
    BlsPublicKey, ContextOverrides, OperationContext, SignedOperation, ValidatorId,
    SLOTS_PER_EPOCH,
};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("http {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("network: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// True when the node actively refused the payload rather than being
    /// unreachable.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Http { status, .. } if (400..500).contains(status))
    }
}

/// On-chain validator record, as much of it as the pipelines need.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorInfo {
    pub index: u64,
    pub pubkey: BlsPublicKey,
    pub withdrawal_credentials: B256,
}

/// Read-only view of the chain: signing context and validator lookup.
pub trait ChainView {
    fn fetch_context(&self) -> Result<OperationContext, TransportError>;
    fn validator(&self, id: &ValidatorId) -> Result<Option<ValidatorInfo>, TransportError>;
}

/// Submission capability for signed operations.
pub trait Broadcaster {
    fn submit(&self, op: &SignedOperation) -> Result<(), TransportError>;
}

impl<T: ChainView + ?Sized> ChainView for Box<T> {
    fn fetch_context(&self) -> Result<OperationContext, TransportError> {
        (**self).fetch_context()
    }

    fn validator(&self, id: &ValidatorId) -> Result<Option<ValidatorInfo>, TransportError> {
        (**self).validator(id)
    }
}

impl<T: Broadcaster + ?Sized> Broadcaster for Box<T> {
    fn submit(&self, op: &SignedOperation) -> Result<(), TransportError> {
        (**self).submit(op)
    }
}

/// A [`ChainView`] with explicit context overrides layered on top. When every
/// field is overridden the inner view is never asked for context at all.
pub struct WithOverrides<V> {
    inner: V,
    overrides: ContextOverrides,
}

impl<V> WithOverrides<V> {
    pub fn new(inner: V, overrides: ContextOverrides) -> Self {
        Self { inner, overrides }
    }
}

impl<V: ChainView> ChainView for WithOverrides<V> {
    fn fetch_context(&self) -> Result<OperationContext, TransportError> {
        if let Some(ctx) = self.overrides.complete() {
            return Ok(ctx);
        }
        Ok(self.overrides.apply(self.inner.fetch_context()?))
    }

    fn validator(&self, id: &ValidatorId) -> Result<Option<ValidatorInfo>, TransportError> {
        self.inner.validator(id)
    }
}

/// Blocking beacon API client.
#[derive(Clone)]
pub struct BeaconClient {
    base: String,
    agent: ureq::Agent,
}

impl BeaconClient {
    pub fn new(base: &str, timeout: Duration) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(timeout)
                .timeout_connect(Duration::from_secs(5))
                .build(),
        }
    }

    fn get(&self, path: &str) -> Result<Value, TransportError> {
        let url = format!("{}{path}", self.base);
        debug!(%url, "beacon GET");
        let response = self.agent.get(&url).call().map_err(map_ureq_error)?;
        response
            .into_json::<Value>()
            .map_err(|e| TransportError::InvalidResponse(format!("{path}: {e}")))
    }

    fn post(&self, path: &str, body: &Value) -> Result<(), TransportError> {
        let url = format!("{}{path}", self.base);
        debug!(%url, "beacon POST");
        self.agent
            .post(&url)
            .send_json(body)
            .map_err(map_ureq_error)?;
        Ok(())
    }
}

impl ChainView for BeaconClient {
    fn fetch_context(&self) -> Result<OperationContext, TransportError> {
        let genesis = self.get("/eth/v1/beacon/genesis")?;
        let fork = self.get("/eth/v1/beacon/states/head/fork")?;
        let header = self.get("/eth/v1/beacon/headers/head")?;
        context_from_responses(&genesis, &fork, &header)
    }

    fn validator(&self, id: &ValidatorId) -> Result<Option<ValidatorInfo>, TransportError> {
        let path = format!("/eth/v1/beacon/states/head/validators/{id}");
        match self.get(&path) {
            Ok(value) => Ok(Some(validator_from_response(&value)?)),
            Err(TransportError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Broadcaster for BeaconClient {
    fn submit(&self, op: &SignedOperation) -> Result<(), TransportError> {
        let body = serde_json::to_value(op)
            .map_err(|e| TransportError::InvalidResponse(format!("serialize operation: {e}")))?;
        match op {
            // The pool endpoint takes a batch of credential changes.
            SignedOperation::CredentialChange(_) => {
                self.post(endpoint_for(op), &Value::Array(vec![body]))
            }
            SignedOperation::Exit(_) | SignedOperation::Deposit(_) => {
                self.post(endpoint_for(op), &body)
            }
        }
    }
}

/// Pool endpoint for a signed operation.
///
/// Deposits use the pool-style path served by test-harness nodes; production
/// deposits go through the execution-layer contract and are out of scope here.
pub fn endpoint_for(op: &SignedOperation) -> &'static str {
    match op {
        SignedOperation::CredentialChange(_) => "/eth/v1/beacon/pool/bls_to_execution_changes",
        SignedOperation::Exit(_) => "/eth/v1/beacon/pool/voluntary_exits",
        SignedOperation::Deposit(_) => "/eth/v1/beacon/pool/deposits",
    }
}

fn map_ureq_error(e: ureq::Error) -> TransportError {
    match e {
        ureq::Error::Status(status, response) => TransportError::Http {
            status,
            detail: response
                .into_string()
                .unwrap_or_else(|_| String::from("<unreadable body>")),
        },
        ureq::Error::Transport(t) => TransportError::Network(t.to_string()),
    }
}

fn context_from_responses(
    genesis: &Value,
    fork: &Value,
    header: &Value,
) -> Result<OperationContext, TransportError> {
    let genesis_validators_root =
        parse_b256(str_at(genesis, &["data", "genesis_validators_root"])?)?;
    let fork_version = parse_fork_version(str_at(fork, &["data", "current_version"])?)?;
    let slot: u64 = str_at(header, &["data", "header", "message", "slot"])?
        .parse()
        .map_err(|e| TransportError::InvalidResponse(format!("head slot: {e}")))?;

    Ok(OperationContext {
        fork_version,
        genesis_validators_root,
        epoch: slot / SLOTS_PER_EPOCH,
    })
}

fn validator_from_response(value: &Value) -> Result<ValidatorInfo, TransportError> {
    let index: u64 = str_at(value, &["data", "index"])?
        .parse()
        .map_err(|e| TransportError::InvalidResponse(format!("validator index: {e}")))?;
    let pubkey_hex = str_at(value, &["data", "validator", "pubkey"])?;
    let creds = parse_b256(str_at(value, &["data", "validator", "withdrawal_credentials"])?)?;

    let bytes = decode_hex(pubkey_hex)?;
    if bytes.len() != 48 {
        return Err(TransportError::InvalidResponse(format!(
            "pubkey must be 48 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(ValidatorInfo {
        index,
        pubkey: FixedBytes::from_slice(&bytes),
        withdrawal_credentials: creds,
    })
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, TransportError> {
    let mut current = value;
    for key in path {
        current = current.get(key).ok_or_else(|| {
            TransportError::InvalidResponse(format!("missing field {}", path.join(".")))
        })?;
    }
    current.as_str().ok_or_else(|| {
        TransportError::InvalidResponse(format!("field {} is not a string", path.join(".")))
    })
}

fn decode_hex(s: &str) -> Result<Vec<u8>, TransportError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| TransportError::InvalidResponse(format!("hex: {e}")))
}

fn parse_b256(s: &str) -> Result<B256, TransportError> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 32 {
        return Err(TransportError::InvalidResponse(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_fork_version(s: &str) -> Result<FixedBytes<4>, TransportError> {
    let bytes = decode_hex(s)?;
    if bytes.len() != 4 {
        return Err(TransportError::InvalidResponse(format!(
            "fork version must be 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(FixedBytes::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use valops_types::{SignedVoluntaryExit, VoluntaryExit};

    #[test]
    fn test_context_from_responses() {
        let genesis = json!({"data": {
            "genesis_time": "1606824023",
            "genesis_validators_root": format!("0x{}", "4b".repeat(32)),
            "genesis_fork_version": "0x00000000",
        }});
        let fork = json!({"data": {
            "previous_version": "0x03000000",
            "current_version": "0x04000000",
            "epoch": "194048"
        }});
        let header = json!({"data": {"header": {"message": {"slot": "6400137"}}}});

        let ctx = context_from_responses(&genesis, &fork, &header).unwrap();
        assert_eq!(ctx.fork_version, FixedBytes::from([4, 0, 0, 0]));
        assert_eq!(ctx.genesis_validators_root, B256::repeat_byte(0x4b));
        assert_eq!(ctx.epoch, 6400137 / 32);
    }

    #[test]
    fn test_validator_from_response() {
        let value = json!({"data": {
            "index": "12345",
            "status": "active_ongoing",
            "validator": {
                "pubkey": format!("0x{}", "ab".repeat(48)),
                "withdrawal_credentials": format!("0x00{}", "cd".repeat(31)),
            }
        }});
        let info = validator_from_response(&value).unwrap();
        assert_eq!(info.index, 12345);
        assert_eq!(info.pubkey[0], 0xab);
        assert_eq!(info.withdrawal_credentials[0], 0x00);
    }

    #[test]
    fn test_missing_field_is_invalid_response() {
        let err = context_from_responses(&json!({}), &json!({}), &json!({})).unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[test]
    fn test_endpoint_per_kind() {
        let exit = SignedOperation::Exit(SignedVoluntaryExit {
            message: VoluntaryExit {
                epoch: 0,
                validator_index: 0,
            },
            signature: FixedBytes::ZERO,
        });
        assert_eq!(endpoint_for(&exit), "/eth/v1/beacon/pool/voluntary_exits");
    }

    #[test]
    fn test_with_overrides_short_circuits_complete_context() {
        struct Unreachable;
        impl ChainView for Unreachable {
            fn fetch_context(&self) -> Result<OperationContext, TransportError> {
                Err(TransportError::Network("down".into()))
            }
            fn validator(
                &self,
                _: &ValidatorId,
            ) -> Result<Option<ValidatorInfo>, TransportError> {
                Ok(None)
            }
        }

        let full = ContextOverrides {
            fork_version: Some(FixedBytes::from([4, 0, 0, 0])),
            genesis_validators_root: Some(B256::repeat_byte(0x42)),
            epoch: Some(7),
        };
        let view = WithOverrides::new(Unreachable, full);
        assert_eq!(view.fetch_context().unwrap().epoch, 7);

        let partial = ContextOverrides {
            epoch: Some(7),
            ..Default::default()
        };
        let view = WithOverrides::new(Unreachable, partial);
        assert!(view.fetch_context().is_err());
    }

    #[test]
    fn test_rejection_classification() {
        let rejected = TransportError::Http {
            status: 400,
            detail: String::new(),
        };
        let server = TransportError::Http {
            status: 503,
            detail: String::new(),
        };
        assert!(rejected.is_rejection());
        assert!(!server.is_rejection());
        assert!(!TransportError::Network(String::new()).is_rejection());
    }
}
