use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::{warn, Level};

use valops::args::{Args, Command, OperationArgs};
use valops::builder::build;
use valops::dispatch::{broadcast, finalize, load_signed_operation, DispatchOptions};
use valops::fuzz::{fuzz_attempt, FuzzRng, FuzzSpec};
use valops::offline::{self, OfflineView};
use valops::resolver::{self, ResolveError, ValidatorHandle};
use valops::scheduler::{RoundConfig, SlotScheduler};

use valops_keys::{Eip2333KeyService, KeyService};
use valops_transport::{BeaconClient, Broadcaster, ChainView, WithOverrides};
use valops_types::{ContextOverrides, OperationKind, ValidatorId};

fn main() -> Result<()> {
    let args = Args::parse();
    args.validate().map_err(|e| anyhow!(e))?;
    init_tracing(&args);
    run(args)
}

fn init_tracing(args: &Args) {
    let level = if args.common.quiet {
        Level::ERROR
    } else if args.common.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(args: Args) -> Result<()> {
    let overrides = args.common.context_overrides().map_err(|e| anyhow!(e))?;
    let keys = Eip2333KeyService;
    let client = BeaconClient::new(
        &args.common.connection,
        Duration::from_secs(args.common.timeout),
    );

    if args.common.prepare_offline {
        return prepare_offline(&args, &keys, &client, &overrides);
    }

    // Pre-signed passthrough: broadcast as-is, no identity or context needed.
    if let Some((kind, operation)) = one_shot_kind(&args.command) {
        if let Some(source) = &operation.signed_operation {
            let signed = load_signed_operation(kind, source, Path::new("."))?;
            let result = broadcast(&signed, &client);
            if !args.common.quiet {
                println!("{result}");
            }
            if !result.is_success() {
                bail!("{result}");
            }
            return Ok(());
        }
    }

    let base: Box<dyn ChainView> = if args.common.offline {
        Box::new(
            OfflineView::load(Path::new("."), &overrides)
                .context("loading offline preparation")?,
        )
    } else {
        Box::new(client.clone())
    };
    let view = WithOverrides::new(base, overrides);

    let inputs = args.common.resolver_inputs();
    let handles = resolver::resolve(&inputs, &keys, &view)
        .context("resolving validator identity")?
        .collect_handles(|e| warn!("skipping validator: {e}"));
    if handles.is_empty() {
        bail!("no validators resolved");
    }

    let opts = DispatchOptions {
        json: args.common.json,
        offline: args.common.offline,
        artifact_dir: PathBuf::from("."),
    };
    let fuzz_spec = args.common.fuzz_spec();

    match &args.command {
        Command::Credentials(operation) => one_shot(
            OperationKind::CredentialChange,
            operation,
            &args,
            handles,
            &view,
            &keys,
            &client,
            &opts,
            fuzz_spec,
        ),
        Command::Exit(operation) => one_shot(
            OperationKind::Exit,
            operation,
            &args,
            handles,
            &view,
            &keys,
            &client,
            &opts,
            fuzz_spec,
        ),
        Command::Deposit(operation) => one_shot(
            OperationKind::Deposit,
            operation,
            &args,
            handles,
            &view,
            &keys,
            &client,
            &opts,
            fuzz_spec,
        ),
        Command::OnSlot {
            operation,
            count,
            bls,
            deposit,
            exit,
        } => {
            let extra = operation.extra_params().map_err(|e| anyhow!(e))?;
            let config = RoundConfig {
                repeats: *count,
                credential_changes: *bls,
                deposits: *deposit,
                exits: *exit,
                fuzz: fuzz_spec,
                seed: args.common.seed,
            };
            let mut scheduler =
                SlotScheduler::new(config, extra, opts, handles, &keys, &view, &client);
            scheduler.run()
        }
    }
}

fn one_shot_kind(command: &Command) -> Option<(OperationKind, &OperationArgs)> {
    match command {
        Command::Credentials(operation) => Some((OperationKind::CredentialChange, operation)),
        Command::Exit(operation) => Some((OperationKind::Exit, operation)),
        Command::Deposit(operation) => Some((OperationKind::Deposit, operation)),
        Command::OnSlot { .. } => None,
    }
}

/// Run one operation kind once per resolved validator.
#[allow(clippy::too_many_arguments)]
fn one_shot<K, V, B>(
    kind: OperationKind,
    operation: &OperationArgs,
    args: &Args,
    handles: Vec<ValidatorHandle>,
    view: &V,
    keys: &K,
    broadcaster: &B,
    opts: &DispatchOptions,
    fuzz_spec: FuzzSpec,
) -> Result<()>
where
    K: KeyService,
    V: ChainView,
    B: Broadcaster,
{
    let extra = operation.extra_params().map_err(|e| anyhow!(e))?;
    let ctx = view.fetch_context().context("fetching chain context")?;
    let mut rng = FuzzRng::new(args.common.seed);

    let mut failures = 0usize;
    for handle in &handles {
        let op = build(kind, handle, &ctx, &extra)?;
        let (op, attempt_ctx) = fuzz_attempt(&op, &ctx, &fuzz_spec, &mut rng);
        let (_, result) = finalize(op, handle, &attempt_ctx, opts, keys, broadcaster)?;
        if !result.is_success() {
            failures += 1;
        }
        if !args.common.quiet {
            println!("{result}");
        }
    }
    if failures > 0 {
        bail!("{failures} of {} submissions failed", handles.len());
    }
    Ok(())
}

/// Capture chain context (and any validators the identity inputs reference)
/// into the offline preparation file.
fn prepare_offline(
    args: &Args,
    keys: &Eip2333KeyService,
    client: &BeaconClient,
    overrides: &ContextOverrides,
) -> Result<()> {
    let ctx = match overrides.complete() {
        Some(ctx) => ctx,
        None => overrides.apply(client.fetch_context().context("fetching chain context")?),
    };

    let mut validators = Vec::new();
    match resolver::resolve(&args.common.resolver_inputs(), keys, client) {
        Ok(resolution) => {
            for handle in resolution.collect_handles(|e| warn!("skipping validator: {e}")) {
                if let Some(info) = client.validator(&ValidatorId::Index(handle.index))? {
                    validators.push(info);
                }
            }
        }
        // Preparing with no identity inputs still captures the context.
        Err(ResolveError::NoInputProvided) => {}
        Err(e) => return Err(e.into()),
    }

    let marker = offline::prepare(&ctx, &validators, Path::new("."))?;
    if !args.common.quiet {
        println!("{marker}");
    }
    Ok(())
}
