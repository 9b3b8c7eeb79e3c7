//! Per-slot scheduling: run submission rounds on the 12-second slot cadence.
//!
//! Each round refreshes context, then runs the enabled pipelines in a fixed
//! kind order (credential changes, deposits, exits), `repeats` attempts per
//! validator per kind. Attempts are isolated: one failure is counted and
//! logged, and the round carries on.

use std::thread;
use std::time::Instant;

use tracing::{error, info, warn};

use valops_keys::KeyService;
use valops_transport::{Broadcaster, ChainView};
use valops_types::{OperationKind, Outcome, SLOT_DURATION};

use crate::builder::{build, ExtraParams};
use crate::dispatch::{finalize, DispatchError, DispatchOptions};
use crate::fuzz::{fuzz_attempt, FuzzRng, FuzzSpec};
use crate::resolver::ValidatorHandle;

const KIND_ORDER: [OperationKind; 3] = [
    OperationKind::CredentialChange,
    OperationKind::Deposit,
    OperationKind::Exit,
];

/// What a round does: which kinds run, how many attempts each, and whether
/// operations pass through the fuzz engine first.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Attempts per validator per enabled kind, per round.
    pub repeats: u64,
    pub credential_changes: bool,
    pub deposits: bool,
    pub exits: bool,
    /// Identity spec means the regular (non-fuzzing) path.
    pub fuzz: FuzzSpec,
    pub seed: u64,
}

impl RoundConfig {
    fn enabled(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::CredentialChange => self.credential_changes,
            OperationKind::Deposit => self.deposits,
            OperationKind::Exit => self.exits,
        }
    }
}

/// Counters accumulated across rounds. Observable state lives here and only
/// here; attempts never share mutable state with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub rounds: u64,
    pub attempts: u64,
    pub successes: u64,
    pub rejections: u64,
    pub transport_errors: u64,
    pub build_failures: u64,
    pub signing_failures: u64,
    pub context_failures: u64,
}

/// Drives rounds against a fixed set of already-resolved validators.
pub struct SlotScheduler<'a, K: ?Sized, V: ?Sized, B: ?Sized> {
    config: RoundConfig,
    extra: ExtraParams,
    opts: DispatchOptions,
    handles: Vec<ValidatorHandle>,
    keys: &'a K,
    view: &'a V,
    broadcaster: &'a B,
    rng: FuzzRng,
    stats: RoundStats,
}

impl<'a, K, V, B> SlotScheduler<'a, K, V, B>
where
    K: KeyService + ?Sized,
    V: ChainView + ?Sized,
    B: Broadcaster + ?Sized,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RoundConfig,
        extra: ExtraParams,
        opts: DispatchOptions,
        handles: Vec<ValidatorHandle>,
        keys: &'a K,
        view: &'a V,
        broadcaster: &'a B,
    ) -> Self {
        let rng = FuzzRng::new(config.seed);
        Self {
            config,
            extra,
            opts,
            handles,
            keys,
            view,
            broadcaster,
            rng,
            stats: RoundStats::default(),
        }
    }

    pub fn stats(&self) -> &RoundStats {
        &self.stats
    }

    /// Run one round: refresh context, then attempt every enabled kind for
    /// every validator. A signing failure retires the affected validator for
    /// the rest of the round only.
    pub fn run_round(&mut self) {
        self.stats.rounds += 1;
        let ctx = match self.view.fetch_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                self.stats.context_failures += 1;
                warn!(round = self.stats.rounds, "context fetch failed: {e}");
                return;
            }
        };
        if self.config.fuzz.is_identity() {
            info!(round = self.stats.rounds, epoch = ctx.epoch, "round start");
        } else {
            info!(
                round = self.stats.rounds,
                epoch = ctx.epoch,
                intensity = self.config.fuzz.intensity,
                "fuzzing round start"
            );
        }

        let mut retired = vec![false; self.handles.len()];
        for kind in KIND_ORDER {
            if !self.config.enabled(kind) {
                continue;
            }
            for (slot, handle) in self.handles.iter().enumerate() {
                if retired[slot] {
                    continue;
                }
                for _ in 0..self.config.repeats {
                    self.stats.attempts += 1;
                    let op = match build(kind, handle, &ctx, &self.extra) {
                        Ok(op) => op,
                        Err(e) => {
                            self.stats.build_failures += 1;
                            warn!(kind = kind.as_str(), validator = handle.index, "build failed: {e}");
                            continue;
                        }
                    };
                    let (op, attempt_ctx) =
                        fuzz_attempt(&op, &ctx, &self.config.fuzz, &mut self.rng);
                    match finalize(op, handle, &attempt_ctx, &self.opts, self.keys, self.broadcaster)
                    {
                        Ok((_, result)) => match result.outcome {
                            Outcome::Success => self.stats.successes += 1,
                            Outcome::Rejected => {
                                self.stats.rejections += 1;
                                warn!(
                                    kind = kind.as_str(),
                                    validator = handle.index,
                                    "node rejected operation: {}",
                                    result.detail
                                );
                            }
                            Outcome::TransportError => {
                                self.stats.transport_errors += 1;
                                warn!(
                                    kind = kind.as_str(),
                                    validator = handle.index,
                                    "submission failed: {}",
                                    result.detail
                                );
                            }
                        },
                        Err(DispatchError::Signing(e)) => {
                            self.stats.signing_failures += 1;
                            retired[slot] = true;
                            error!(
                                kind = kind.as_str(),
                                validator = handle.index,
                                "signing failed, retiring validator for this round: {e}"
                            );
                            break;
                        }
                        Err(e) => {
                            self.stats.signing_failures += 1;
                            error!(kind = kind.as_str(), validator = handle.index, "dispatch failed: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Run rounds forever on the slot cadence: each round starts 12 seconds
    /// after the previous round started, or immediately if the round overran.
    pub fn run(&mut self) -> ! {
        loop {
            let started = Instant::now();
            self.run_round();
            let elapsed = started.elapsed();
            if let Some(remaining) = SLOT_DURATION.checked_sub(elapsed) {
                thread::sleep(remaining);
            } else {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "round overran the slot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, FixedBytes, B256};
    use std::cell::RefCell;
    use valops_keys::{Eip2333KeyService, KeyMaterial};
    use valops_transport::{TransportError, ValidatorInfo};
    use valops_types::{
        OperationContext, SignedOperation, ValidatorId,
    };

    use crate::builder::{DepositCredentials, DepositParams, DEFAULT_DEPOSIT_GWEI};
    use crate::fuzz::FuzzDimension;

    const PRIVKEY: &str = "0x263dbd792f5b1be47ed85f8938c0f29586af0b3ffda9b6ffa6af9f7b0e6d5ec2";

    struct StaticView {
        fail_context: bool,
    }

    impl ChainView for StaticView {
        fn fetch_context(&self) -> Result<OperationContext, TransportError> {
            if self.fail_context {
                return Err(TransportError::Network("down".into()));
            }
            Ok(OperationContext {
                fork_version: FixedBytes::from([4, 0, 0, 0]),
                genesis_validators_root: B256::repeat_byte(0x42),
                epoch: 100,
            })
        }

        fn validator(&self, _: &ValidatorId) -> Result<Option<ValidatorInfo>, TransportError> {
            Ok(None)
        }
    }

    /// Counts submissions per kind; optionally fails the nth exit submission.
    #[derive(Default)]
    struct ScriptedBroadcaster {
        counts: RefCell<[u64; 3]>,
        fail_exit_number: Option<u64>,
        exits_seen: RefCell<u64>,
    }

    impl Broadcaster for ScriptedBroadcaster {
        fn submit(&self, op: &SignedOperation) -> Result<(), TransportError> {
            let idx = match op {
                SignedOperation::CredentialChange(_) => 0,
                SignedOperation::Deposit(_) => 1,
                SignedOperation::Exit(_) => 2,
            };
            self.counts.borrow_mut()[idx] += 1;
            if let SignedOperation::Exit(_) = op {
                let mut seen = self.exits_seen.borrow_mut();
                *seen += 1;
                if Some(*seen) == self.fail_exit_number {
                    return Err(TransportError::Network("injected outage".into()));
                }
            }
            Ok(())
        }
    }

    fn handle() -> ValidatorHandle {
        let key = KeyMaterial::from_hex(PRIVKEY).unwrap();
        ValidatorHandle {
            index: 7,
            pubkey: key.public_key(),
            key,
        }
    }

    fn extra() -> ExtraParams {
        ExtraParams {
            withdrawal_address: Some(Address::repeat_byte(0xaa)),
            deposit: Some(DepositParams {
                amount_gwei: DEFAULT_DEPOSIT_GWEI,
                credentials: DepositCredentials::ExecutionAddress(Address::repeat_byte(0xbb)),
            }),
            ..Default::default()
        }
    }

    fn config(repeats: u64, fuzz: FuzzSpec) -> RoundConfig {
        RoundConfig {
            repeats,
            credential_changes: true,
            deposits: true,
            exits: true,
            fuzz,
            seed: 1,
        }
    }

    #[test]
    fn test_round_runs_each_kind_n_times() {
        let view = StaticView { fail_context: false };
        let broadcaster = ScriptedBroadcaster::default();
        let mut scheduler = SlotScheduler::new(
            config(4, FuzzSpec::none()),
            extra(),
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();

        assert_eq!(*broadcaster.counts.borrow(), [4, 4, 4]);
        let stats = scheduler.stats();
        assert_eq!(stats.rounds, 1);
        assert_eq!(stats.attempts, 12);
        assert_eq!(stats.successes, 12);
        assert_eq!(stats.transport_errors, 0);
    }

    #[test]
    fn test_transport_failure_does_not_stop_the_round() {
        let view = StaticView { fail_context: false };
        let broadcaster = ScriptedBroadcaster {
            fail_exit_number: Some(2),
            ..Default::default()
        };
        let mut scheduler = SlotScheduler::new(
            config(4, FuzzSpec::none()),
            extra(),
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();

        // All 12 attempts still happen; exactly one is a transport error.
        assert_eq!(*broadcaster.counts.borrow(), [4, 4, 4]);
        let stats = scheduler.stats();
        assert_eq!(stats.attempts, 12);
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.successes, 11);
    }

    #[test]
    fn test_context_failure_skips_round() {
        let view = StaticView { fail_context: true };
        let broadcaster = ScriptedBroadcaster::default();
        let mut scheduler = SlotScheduler::new(
            config(4, FuzzSpec::none()),
            extra(),
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();

        assert_eq!(*broadcaster.counts.borrow(), [0, 0, 0]);
        assert_eq!(scheduler.stats().context_failures, 1);
        assert_eq!(scheduler.stats().attempts, 0);
    }

    #[test]
    fn test_disabled_kinds_are_skipped() {
        let view = StaticView { fail_context: false };
        let broadcaster = ScriptedBroadcaster::default();
        let mut cfg = config(2, FuzzSpec::none());
        cfg.credential_changes = false;
        cfg.deposits = false;
        let mut scheduler = SlotScheduler::new(
            cfg,
            extra(),
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();

        assert_eq!(*broadcaster.counts.borrow(), [0, 0, 2]);
    }

    #[test]
    fn test_build_failure_is_isolated() {
        // No credential target makes every credential-change build fail; the
        // remaining repeats and the other kinds still run.
        let view = StaticView { fail_context: false };
        let broadcaster = ScriptedBroadcaster::default();
        let mut params = extra();
        params.withdrawal_address = None;
        let mut scheduler = SlotScheduler::new(
            config(3, FuzzSpec::none()),
            params,
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();

        assert_eq!(*broadcaster.counts.borrow(), [0, 3, 3]);
        assert_eq!(scheduler.stats().build_failures, 3);
        assert_eq!(scheduler.stats().attempts, 9);
    }

    #[test]
    fn test_fuzzing_round_still_submits() {
        let view = StaticView { fail_context: false };
        let broadcaster = ScriptedBroadcaster::default();
        let spec = FuzzSpec {
            dimension: FuzzDimension::FieldCorruption,
            intensity: 5,
        };
        let mut scheduler = SlotScheduler::new(
            config(2, spec),
            extra(),
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();
        assert_eq!(*broadcaster.counts.borrow(), [2, 2, 2]);
    }

    #[test]
    fn test_multiple_rounds_accumulate_stats() {
        let view = StaticView { fail_context: false };
        let broadcaster = ScriptedBroadcaster::default();
        let mut scheduler = SlotScheduler::new(
            config(1, FuzzSpec::none()),
            extra(),
            DispatchOptions::default(),
            vec![handle()],
            &Eip2333KeyService,
            &view,
            &broadcaster,
        );
        scheduler.run_round();
        scheduler.run_round();
        assert_eq!(scheduler.stats().rounds, 2);
        assert_eq!(scheduler.stats().attempts, 6);
    }
}
