//! Identity resolution: turn one of several mutually-exclusive input
//! combinations into a canonical [`ValidatorHandle`].
//!
//! Strategies are selected by an explicit priority-ordered match over the
//! provided inputs, never by runtime flag inspection. The mnemonic-only
//! strategy resolves to a lazy scan over derivation indices rather than a
//! single handle.

use thiserror::Error;

use valops_keys::{validator_path, KeyError, KeyMaterial, KeyService};
use valops_transport::{ChainView, ValidatorInfo};
use valops_types::{BlsPublicKey, ValidatorId};

/// Upper bound when searching a mnemonic for the key matching a known
/// validator pubkey.
const KEY_SEARCH_LIMIT: u32 = 1024;

/// Consecutive lookup failures after which a handle scan gives up. Keeps a
/// scan against an unreachable node from spinning forever, one HTTP timeout
/// per derivation index.
const SCAN_FAILURE_LIMIT: u32 = 3;

/// Raw identity inputs as bound from the command line.
#[derive(Debug, Clone, Default)]
pub struct ResolverInputs {
    pub validator: Option<String>,
    pub account: Option<String>,
    pub withdrawal_account: Option<String>,
    pub mnemonic: Option<String>,
    pub path: Option<String>,
    pub private_key: Option<String>,
}

/// The resolution strategy, one per valid input combination.
#[derive(Debug, Clone, PartialEq)]
pub enum InputMode {
    ValidatorPrivateKey {
        validator: ValidatorId,
        private_key: String,
    },
    AccountWithdrawal {
        account: ValidatorId,
        withdrawal_key: String,
    },
    MnemonicPath {
        mnemonic: String,
        path: String,
    },
    MnemonicValidator {
        mnemonic: String,
        validator: ValidatorId,
    },
    MnemonicPrivateKey {
        mnemonic: String,
        private_key: String,
    },
    MnemonicScan {
        mnemonic: String,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no identity inputs provided")]
    NoInputProvided,
    #[error("ambiguous or incomplete identity inputs: {0}")]
    AmbiguousOrIncompleteInput(String),
    #[error("validator not found: {0}")]
    ValidatorNotFound(String),
    #[error(transparent)]
    KeyDerivationFailed(#[from] KeyError),
}

/// A validator identity with its signing key material. Immutable once
/// resolved; safe to reuse across scheduler rounds.
#[derive(Debug, Clone)]
pub struct ValidatorHandle {
    pub index: u64,
    pub pubkey: BlsPublicKey,
    pub key: KeyMaterial,
}

/// Outcome of resolution: a single handle, or a lazy scan of handles for the
/// mnemonic batch strategies.
pub enum Resolution<'a, K: ?Sized, V: ?Sized> {
    Single(ValidatorHandle),
    Scan(HandleScan<'a, K, V>),
}

impl<'a, K, V> Resolution<'a, K, V>
where
    K: KeyService + ?Sized,
    V: ChainView + ?Sized,
{
    /// Drain the resolution into concrete handles, skipping per-validator
    /// lookup failures in batch mode (reported through `on_skip`).
    pub fn collect_handles(
        self,
        mut on_skip: impl FnMut(&ResolveError),
    ) -> Vec<ValidatorHandle> {
        match self {
            Resolution::Single(handle) => vec![handle],
            Resolution::Scan(scan) => scan
                .filter_map(|item| match item {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        on_skip(&e);
                        None
                    }
                })
                .collect(),
        }
    }
}

/// Pick the strategy for the given inputs.
///
/// Priority order, first complete strategy wins:
/// validator+private-key > account+withdrawal-account > mnemonic+path >
/// mnemonic+validator > mnemonic+private-key > mnemonic alone.
pub fn select_mode(inputs: &ResolverInputs) -> Result<InputMode, ResolveError> {
    let validator = parse_optional_id(inputs.validator.as_deref(), "--validator")?;
    let account = parse_optional_id(inputs.account.as_deref(), "--account")?;

    if let (Some(validator), Some(private_key)) = (validator, &inputs.private_key) {
        return Ok(InputMode::ValidatorPrivateKey {
            validator,
            private_key: private_key.clone(),
        });
    }
    if let (Some(account), Some(withdrawal_key)) = (account, &inputs.withdrawal_account) {
        return Ok(InputMode::AccountWithdrawal {
            account,
            withdrawal_key: withdrawal_key.clone(),
        });
    }
    if let Some(mnemonic) = &inputs.mnemonic {
        if let Some(path) = &inputs.path {
            return Ok(InputMode::MnemonicPath {
                mnemonic: mnemonic.clone(),
                path: path.clone(),
            });
        }
        if let Some(validator) = validator {
            return Ok(InputMode::MnemonicValidator {
                mnemonic: mnemonic.clone(),
                validator,
            });
        }
        if let Some(private_key) = &inputs.private_key {
            return Ok(InputMode::MnemonicPrivateKey {
                mnemonic: mnemonic.clone(),
                private_key: private_key.clone(),
            });
        }
        return Ok(InputMode::MnemonicScan {
            mnemonic: mnemonic.clone(),
        });
    }

    if inputs.validator.is_none()
        && inputs.account.is_none()
        && inputs.withdrawal_account.is_none()
        && inputs.path.is_none()
        && inputs.private_key.is_none()
    {
        return Err(ResolveError::NoInputProvided);
    }
    Err(ResolveError::AmbiguousOrIncompleteInput(
        "inputs do not form a complete strategy; see --help for valid combinations".to_string(),
    ))
}

/// Resolve inputs into a handle (or handle scan) using the key-derivation and
/// chain-lookup collaborators. Pure apart from those capabilities.
pub fn resolve<'a, K, V>(
    inputs: &ResolverInputs,
    keys: &'a K,
    view: &'a V,
) -> Result<Resolution<'a, K, V>, ResolveError>
where
    K: KeyService + ?Sized,
    V: ChainView + ?Sized,
{
    match select_mode(inputs)? {
        InputMode::ValidatorPrivateKey {
            validator,
            private_key,
        } => {
            let key = KeyMaterial::from_hex(&private_key)?;
            let info = lookup(view, &validator)?;
            Ok(Resolution::Single(handle_from(info, key)))
        }
        InputMode::AccountWithdrawal {
            account,
            withdrawal_key,
        } => {
            let key = KeyMaterial::from_hex(&withdrawal_key)?;
            let info = lookup(view, &account)?;
            Ok(Resolution::Single(handle_from(info, key)))
        }
        InputMode::MnemonicPath { mnemonic, path } => {
            let key = keys.derive_key(&mnemonic, &path)?;
            let info = lookup(view, &ValidatorId::PublicKey(key.public_key()))?;
            Ok(Resolution::Single(handle_from(info, key)))
        }
        InputMode::MnemonicValidator {
            mnemonic,
            validator,
        } => {
            let info = lookup(view, &validator)?;
            let key = search_mnemonic_for_pubkey(keys, &mnemonic, info.pubkey)?;
            Ok(Resolution::Single(handle_from(info, key)))
        }
        InputMode::MnemonicPrivateKey {
            mnemonic,
            private_key,
        } => {
            let key = KeyMaterial::from_hex(&private_key)?;
            Ok(Resolution::Scan(HandleScan::new(
                keys,
                view,
                mnemonic,
                Some(key),
            )))
        }
        InputMode::MnemonicScan { mnemonic } => {
            Ok(Resolution::Scan(HandleScan::new(keys, view, mnemonic, None)))
        }
    }
}

/// Lazy scan over the validators derivable from a mnemonic.
///
/// Yields one handle per derivation index along `m/12381/3600/{i}/0/0`,
/// stopping at the first index with no on-chain validator (the standard
/// derivation-gap convention). Lookup failures are yielded as errors so the
/// caller can skip and continue; after [`SCAN_FAILURE_LIMIT`] consecutive
/// failures the scan ends rather than probing an unreachable node forever.
pub struct HandleScan<'a, K: ?Sized, V: ?Sized> {
    keys: &'a K,
    view: &'a V,
    mnemonic: String,
    fixed_key: Option<KeyMaterial>,
    next_index: u32,
    consecutive_failures: u32,
    done: bool,
}

impl<'a, K, V> HandleScan<'a, K, V>
where
    K: KeyService + ?Sized,
    V: ChainView + ?Sized,
{
    fn new(keys: &'a K, view: &'a V, mnemonic: String, fixed_key: Option<KeyMaterial>) -> Self {
        Self {
            keys,
            view,
            mnemonic,
            fixed_key,
            next_index: 0,
            consecutive_failures: 0,
            done: false,
        }
    }

    /// Derivation index the next call will examine. Restart a scan by
    /// resolving again; scans hold no other state.
    pub fn position(&self) -> u32 {
        self.next_index
    }
}

impl<K, V> Iterator for HandleScan<'_, K, V>
where
    K: KeyService + ?Sized,
    V: ChainView + ?Sized,
{
    type Item = Result<ValidatorHandle, ResolveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let key = match self.keys.derive_key(&self.mnemonic, &validator_path(index)) {
            Ok(key) => key,
            Err(e) => {
                // Derivation faults are not per-validator conditions; end the scan.
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        match self.view.validator(&ValidatorId::PublicKey(key.public_key())) {
            Ok(Some(info)) => {
                self.consecutive_failures = 0;
                let key = self.fixed_key.clone().unwrap_or(key);
                Some(Ok(handle_from(info, key)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= SCAN_FAILURE_LIMIT {
                    self.done = true;
                }
                Some(Err(ResolveError::ValidatorNotFound(format!(
                    "derivation index {index}: {e}"
                ))))
            }
        }
    }
}

fn handle_from(info: ValidatorInfo, key: KeyMaterial) -> ValidatorHandle {
    ValidatorHandle {
        index: info.index,
        pubkey: info.pubkey,
        key,
    }
}

fn lookup<V>(view: &V, id: &ValidatorId) -> Result<ValidatorInfo, ResolveError>
where
    V: ChainView + ?Sized,
{
    view.validator(id)
        .map_err(|e| ResolveError::ValidatorNotFound(format!("{id}: {e}")))?
        .ok_or_else(|| ResolveError::ValidatorNotFound(id.to_string()))
}

fn search_mnemonic_for_pubkey<K>(
    keys: &K,
    mnemonic: &str,
    pubkey: BlsPublicKey,
) -> Result<KeyMaterial, ResolveError>
where
    K: KeyService + ?Sized,
{
    for index in 0..KEY_SEARCH_LIMIT {
        let key = keys.derive_key(mnemonic, &validator_path(index))?;
        if key.public_key() == pubkey {
            return Ok(key);
        }
    }
    Err(ResolveError::KeyDerivationFailed(KeyError::Derivation(
        format!("no key within the first {KEY_SEARCH_LIMIT} derivation indices matches {pubkey}"),
    )))
}

fn parse_optional_id(
    value: Option<&str>,
    flag: &str,
) -> Result<Option<ValidatorId>, ResolveError> {
    match value {
        None => Ok(None),
        Some(s) => s
            .parse::<ValidatorId>()
            .map(Some)
            .map_err(|e| ResolveError::AmbiguousOrIncompleteInput(format!("{flag}: {e}"))),
    }
}
