//! Command-line surface.

use clap::{Parser, Subcommand, ValueEnum};

use alloy_primitives::{Address, B256};
use valops_types::{BlsPublicKey, ContextOverrides, ForkVersion};

use crate::builder::{
    DepositCredentials, DepositParams, ExtraParams, DEFAULT_DEPOSIT_GWEI,
};
use crate::fuzz::{FuzzDimension, FuzzSpec};
use crate::resolver::ResolverInputs;

#[derive(Debug, Parser)]
#[command(name = "valops", version, about = "Generate, fuzz, sign, and submit validator lifecycle messages")]
pub struct Args {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Args)]
pub struct CommonArgs {
    /// Beacon node HTTP endpoint
    #[arg(long, default_value = "http://localhost:5052", global = true)]
    pub connection: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 10, global = true)]
    pub timeout: u64,

    /// BIP-39 mnemonic for key derivation
    #[arg(long, global = true)]
    pub mnemonic: Option<String>,

    /// Explicit EIP-2334 derivation path (requires --mnemonic)
    #[arg(long, global = true)]
    pub path: Option<String>,

    /// Validator reference: an index or a 0x-prefixed pubkey
    #[arg(long, global = true)]
    pub validator: Option<String>,

    /// Account reference: an index or a 0x-prefixed pubkey
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Hex-encoded withdrawal private key for the account
    #[arg(long, global = true)]
    pub withdrawal_account: Option<String>,

    /// Hex-encoded private key
    #[arg(long, global = true)]
    pub private_key: Option<String>,

    /// Print signed operations as JSON instead of broadcasting
    #[arg(long, global = true)]
    pub json: bool,

    /// Write artifact files instead of broadcasting; reads chain context from
    /// offline-preparation.json
    #[arg(long, global = true)]
    pub offline: bool,

    /// Fetch chain context and write offline-preparation.json, then exit
    #[arg(long, global = true)]
    pub prepare_offline: bool,

    /// Suppress non-error output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Override the fork version (0x-prefixed 4-byte hex)
    #[arg(long, global = true)]
    pub fork_version: Option<String>,

    /// Override the genesis validators root (0x-prefixed 32-byte hex)
    #[arg(long, global = true)]
    pub genesis_validators_root: Option<String>,

    /// Override the current epoch
    #[arg(long, global = true)]
    pub current_epoch: Option<u64>,

    /// Corrupt operations before signing
    #[arg(long, global = true)]
    pub fuzz: bool,

    /// Fuzz intensity; 0 leaves operations untouched
    #[arg(long, default_value_t = 5, global = true)]
    pub fuzziness: u32,

    /// Fuzz dimension
    #[arg(long, value_enum, default_value_t = FuzzDimensionArg::Field, global = true)]
    pub fuzz_dimension: FuzzDimensionArg,

    /// Seed for deterministic fuzzing
    #[arg(long, default_value_t = 0, global = true)]
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FuzzDimensionArg {
    Field,
    Boundary,
    Structural,
}

impl From<FuzzDimensionArg> for FuzzDimension {
    fn from(arg: FuzzDimensionArg) -> Self {
        match arg {
            FuzzDimensionArg::Field => FuzzDimension::FieldCorruption,
            FuzzDimensionArg::Boundary => FuzzDimension::BoundaryValue,
            FuzzDimensionArg::Structural => FuzzDimension::Structural,
        }
    }
}

/// Parameters an operation may need beyond the identity and context.
#[derive(Debug, Clone, clap::Args)]
pub struct OperationArgs {
    /// Execution address for new withdrawal credentials (credential changes)
    /// or deposit credentials
    #[arg(long)]
    pub withdrawal_address: Option<String>,

    /// 0x-prefixed 48-byte pubkey whose derived address receives withdrawals
    #[arg(long)]
    pub withdrawal_key: Option<String>,

    /// Exit epoch; defaults to the current epoch
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub epoch: i64,

    /// Deposit amount in gwei
    #[arg(long, default_value_t = DEFAULT_DEPOSIT_GWEI)]
    pub amount: u64,

    /// Explicit 32-byte deposit withdrawal credentials
    #[arg(long)]
    pub withdrawal_credentials: Option<String>,

    /// Broadcast a pre-signed operation (JSON as produced by --json) instead
    /// of building one; with no value, reads the kind's artifact file
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    pub signed_operation: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate and submit a withdrawal credentials change
    Credentials(OperationArgs),
    /// Generate and submit a voluntary exit
    Exit(OperationArgs),
    /// Generate and submit a deposit
    Deposit(OperationArgs),
    /// Run submission rounds on the 12-second slot cadence
    OnSlot {
        #[command(flatten)]
        operation: OperationArgs,

        /// Attempts per enabled kind per round
        #[arg(long, short = 'n', default_value_t = 4)]
        count: u64,

        /// Include credential changes in each round
        #[arg(long)]
        bls: bool,

        /// Include deposits in each round
        #[arg(long)]
        deposit: bool,

        /// Include exits in each round
        #[arg(long)]
        exit: bool,
    },
}

impl Args {
    /// Cross-flag checks that clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.common.offline && self.common.prepare_offline {
            return Err("--offline and --prepare-offline are mutually exclusive".to_string());
        }
        if self.common.path.is_some() && self.common.mnemonic.is_none() {
            return Err("--path requires --mnemonic".to_string());
        }
        if let Command::OnSlot {
            operation,
            bls,
            deposit,
            exit,
            ..
        } = &self.command
        {
            if !bls && !deposit && !exit {
                return Err(
                    "on-slot requires at least one of --bls, --deposit, --exit".to_string()
                );
            }
            if operation.signed_operation.is_some() {
                return Err("--signed-operation only applies to one-shot commands".to_string());
            }
        }
        Ok(())
    }
}

impl CommonArgs {
    pub fn resolver_inputs(&self) -> ResolverInputs {
        ResolverInputs {
            validator: self.validator.clone(),
            account: self.account.clone(),
            withdrawal_account: self.withdrawal_account.clone(),
            mnemonic: self.mnemonic.clone(),
            path: self.path.clone(),
            private_key: self.private_key.clone(),
        }
    }

    pub fn context_overrides(&self) -> Result<ContextOverrides, String> {
        Ok(ContextOverrides {
            fork_version: self
                .fork_version
                .as_deref()
                .map(|s| parse_fixed::<4>(s, "--fork-version"))
                .transpose()?
                .map(ForkVersion::from),
            genesis_validators_root: self
                .genesis_validators_root
                .as_deref()
                .map(|s| parse_fixed::<32>(s, "--genesis-validators-root"))
                .transpose()?
                .map(B256::from),
            epoch: self.current_epoch,
        })
    }

    /// The fuzz spec in force: identity unless --fuzz was given.
    pub fn fuzz_spec(&self) -> FuzzSpec {
        if self.fuzz {
            FuzzSpec {
                dimension: self.fuzz_dimension.into(),
                intensity: self.fuzziness,
            }
        } else {
            FuzzSpec::none()
        }
    }
}

impl OperationArgs {
    pub fn extra_params(&self) -> Result<ExtraParams, String> {
        let withdrawal_address = self
            .withdrawal_address
            .as_deref()
            .map(|s| parse_fixed::<20>(s, "--withdrawal-address"))
            .transpose()?
            .map(Address::from);
        let withdrawal_key = self
            .withdrawal_key
            .as_deref()
            .map(|s| parse_fixed::<48>(s, "--withdrawal-key"))
            .transpose()?
            .map(BlsPublicKey::from);

        let credentials = match (
            self.withdrawal_credentials.as_deref(),
            withdrawal_address,
        ) {
            (Some(creds), _) => Some(DepositCredentials::Explicit(B256::from(parse_fixed::<32>(
                creds,
                "--withdrawal-credentials",
            )?))),
            (None, Some(addr)) => Some(DepositCredentials::ExecutionAddress(addr)),
            (None, None) => None,
        };

        Ok(ExtraParams {
            withdrawal_address,
            withdrawal_key,
            exit_epoch: self.epoch,
            deposit: credentials.map(|credentials| DepositParams {
                amount_gwei: self.amount,
                credentials,
            }),
        })
    }
}

fn parse_fixed<const N: usize>(s: &str, flag: &str) -> Result<[u8; N], String> {
    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_part).map_err(|e| format!("{flag}: invalid hex: {e}"))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| format!("{flag}: expected {N} bytes, got {len}"))
}
