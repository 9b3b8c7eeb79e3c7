//! Deterministic corruption of otherwise-valid operations.
//!
//! A [`FuzzSpec`] names one corruption dimension and an intensity; applying it
//! with a seeded [`FuzzRng`] corrupts exactly one field of the operation.
//! Intensity zero is the identity. Compound corruption is explicit chaining of
//! single-field applications, never an implicit multi-field pass.

use valops_types::{OperationContext, UnsignedOperation};

/// Intensity at or above which numeric corruption snaps to boundary values
/// regardless of dimension.
pub const BOUNDARY_INTENSITY: u32 = 10;

/// What aspect of the operation to corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzDimension {
    /// Perturb a field's value while keeping its shape.
    FieldCorruption,
    /// Snap a field to an extreme value (zero or type maximum).
    BoundaryValue,
    /// Replace a field with a structurally degenerate value (all zeroes).
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuzzSpec {
    pub dimension: FuzzDimension,
    pub intensity: u32,
}

impl FuzzSpec {
    /// The no-op spec; applying it returns the operation unchanged.
    pub const fn none() -> Self {
        Self {
            dimension: FuzzDimension::FieldCorruption,
            intensity: 0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.intensity == 0
    }
}

impl Default for FuzzSpec {
    fn default() -> Self {
        Self::none()
    }
}

/// Splitmix64 stream. Small, seedable, and stable across platforms; the same
/// seed always yields the same corruption sequence.
#[derive(Debug, Clone)]
pub struct FuzzRng {
    state: u64,
}

impl FuzzRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9e37_79b9_7f4a_7c15,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn pick(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Corrupt exactly one field of the operation.
///
/// The input is never mutated; a fresh operation is returned. With
/// `spec.intensity == 0` the result equals the input.
pub fn fuzz(op: &UnsignedOperation, spec: &FuzzSpec, rng: &mut FuzzRng) -> UnsignedOperation {
    if spec.is_identity() {
        return op.clone();
    }
    match op {
        UnsignedOperation::Exit(exit) => {
            let mut exit = exit.clone();
            match rng.pick(2) {
                0 => exit.epoch = corrupt_u64(exit.epoch, spec, rng),
                _ => exit.validator_index = corrupt_u64(exit.validator_index, spec, rng),
            }
            UnsignedOperation::Exit(exit)
        }
        UnsignedOperation::CredentialChange(change) => {
            let mut change = change.clone();
            match rng.pick(3) {
                0 => change.validator_index = corrupt_u64(change.validator_index, spec, rng),
                1 => corrupt_bytes(change.from_bls_pubkey.as_mut_slice(), spec, rng),
                _ => corrupt_bytes(change.to_execution_address.as_mut_slice(), spec, rng),
            }
            UnsignedOperation::CredentialChange(change)
        }
        UnsignedOperation::Deposit(deposit) => {
            let mut deposit = deposit.clone();
            match rng.pick(3) {
                0 => deposit.amount = corrupt_u64(deposit.amount, spec, rng),
                1 => corrupt_bytes(deposit.withdrawal_credentials.as_mut_slice(), spec, rng),
                _ => corrupt_bytes(deposit.pubkey.as_mut_slice(), spec, rng),
            }
            UnsignedOperation::Deposit(deposit)
        }
    }
}

/// Corrupt the signing context itself, producing signatures over the wrong
/// domain. Composes with [`fuzz`] for compound corruption.
pub fn fuzz_context(
    ctx: &OperationContext,
    spec: &FuzzSpec,
    rng: &mut FuzzRng,
) -> OperationContext {
    if spec.is_identity() {
        return *ctx;
    }
    let mut fork = ctx.fork_version;
    corrupt_bytes(fork.as_mut_slice(), spec, rng);
    OperationContext {
        fork_version: fork,
        ..*ctx
    }
}

/// Fuzz one aspect of a submission attempt: a field of the operation, or the
/// signing context's fork version. The signature domain is one candidate
/// alongside the operation's own fields, so a corrupted attempt is still
/// exactly one corruption.
pub fn fuzz_attempt(
    op: &UnsignedOperation,
    ctx: &OperationContext,
    spec: &FuzzSpec,
    rng: &mut FuzzRng,
) -> (UnsignedOperation, OperationContext) {
    if spec.is_identity() {
        return (op.clone(), *ctx);
    }
    if rng.pick(4) == 0 {
        (op.clone(), fuzz_context(ctx, spec, rng))
    } else {
        (fuzz(op, spec, rng), *ctx)
    }
}

fn corrupt_u64(value: u64, spec: &FuzzSpec, rng: &mut FuzzRng) -> u64 {
    match spec.dimension {
        FuzzDimension::Structural => 0,
        FuzzDimension::BoundaryValue => boundary_u64(rng),
        FuzzDimension::FieldCorruption => {
            if spec.intensity >= BOUNDARY_INTENSITY {
                return boundary_u64(rng);
            }
            // Perturbation magnitude grows with intensity: one decimal order
            // per step.
            let scale = 10u64.pow(spec.intensity.saturating_sub(1).min(18));
            let delta = (rng.next_u64() % 9 + 1).wrapping_mul(scale);
            if rng.next_u64() % 2 == 0 {
                value.wrapping_add(delta)
            } else {
                value.wrapping_sub(delta)
            }
        }
    }
}

fn boundary_u64(rng: &mut FuzzRng) -> u64 {
    if rng.next_u64() % 2 == 0 {
        u64::MAX
    } else {
        0
    }
}

fn corrupt_bytes(bytes: &mut [u8], spec: &FuzzSpec, rng: &mut FuzzRng) {
    match spec.dimension {
        FuzzDimension::Structural => bytes.fill(0),
        FuzzDimension::BoundaryValue => {
            let fill = if rng.next_u64() % 2 == 0 { 0xff } else { 0x00 };
            bytes.fill(fill);
        }
        FuzzDimension::FieldCorruption => {
            if spec.intensity >= BOUNDARY_INTENSITY {
                bytes.fill(0xff);
                return;
            }
            // Flip up to `intensity` bytes; odd xor masks guarantee each
            // touched byte changes.
            let flips = (spec.intensity as usize).min(bytes.len()).max(1);
            for _ in 0..flips {
                let pos = rng.pick(bytes.len());
                bytes[pos] ^= (rng.next_u64() as u8) | 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, FixedBytes, B256};
    use valops_types::{BlsToExecutionChange, DepositMessage, VoluntaryExit};

    fn exit_op() -> UnsignedOperation {
        UnsignedOperation::Exit(VoluntaryExit {
            epoch: 194_048,
            validator_index: 12_345,
        })
    }

    fn change_op() -> UnsignedOperation {
        UnsignedOperation::CredentialChange(BlsToExecutionChange {
            validator_index: 7,
            from_bls_pubkey: FixedBytes::repeat_byte(0xaa),
            to_execution_address: Address::repeat_byte(0xbb),
        })
    }

    fn deposit_op() -> UnsignedOperation {
        UnsignedOperation::Deposit(DepositMessage {
            pubkey: FixedBytes::repeat_byte(0x01),
            withdrawal_credentials: B256::repeat_byte(0x02),
            amount: 32_000_000_000,
        })
    }

    fn field_spec(intensity: u32) -> FuzzSpec {
        FuzzSpec {
            dimension: FuzzDimension::FieldCorruption,
            intensity,
        }
    }

    #[test]
    fn test_intensity_zero_is_identity() {
        let mut rng = FuzzRng::new(1);
        for op in [exit_op(), change_op(), deposit_op()] {
            assert_eq!(fuzz(&op, &FuzzSpec::none(), &mut rng), op);
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        for seed in [0, 1, 0xdead_beef] {
            let a = fuzz(&exit_op(), &field_spec(5), &mut FuzzRng::new(seed));
            let b = fuzz(&exit_op(), &field_spec(5), &mut FuzzRng::new(seed));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let outputs: Vec<_> = (0..16)
            .map(|seed| fuzz(&change_op(), &field_spec(5), &mut FuzzRng::new(seed)))
            .collect();
        let distinct = outputs
            .iter()
            .filter(|op| outputs.first() != Some(op))
            .count();
        assert!(distinct > 0, "all 16 seeds produced identical corruption");
    }

    #[test]
    fn test_exactly_one_field_changes() {
        for seed in 0..32 {
            let mut rng = FuzzRng::new(seed);
            let original = exit_op();
            let fuzzed = fuzz(&original, &field_spec(3), &mut rng);
            let (UnsignedOperation::Exit(a), UnsignedOperation::Exit(b)) = (&original, &fuzzed)
            else {
                panic!("kind changed under fuzzing");
            };
            let changed = usize::from(a.epoch != b.epoch)
                + usize::from(a.validator_index != b.validator_index);
            assert_eq!(changed, 1, "seed {seed}: expected one corrupted field");
        }
    }

    #[test]
    fn test_kind_is_preserved() {
        let mut rng = FuzzRng::new(9);
        for op in [exit_op(), change_op(), deposit_op()] {
            for dimension in [
                FuzzDimension::FieldCorruption,
                FuzzDimension::BoundaryValue,
                FuzzDimension::Structural,
            ] {
                let spec = FuzzSpec {
                    dimension,
                    intensity: 5,
                };
                assert_eq!(fuzz(&op, &spec, &mut rng).kind(), op.kind());
            }
        }
    }

    #[test]
    fn test_magnitude_grows_with_intensity() {
        // Fixed rng stream per intensity so only the scale varies.
        let value = 1_000_000u64;
        let low = corrupt_u64(value, &field_spec(1), &mut FuzzRng::new(7));
        let high = corrupt_u64(value, &field_spec(6), &mut FuzzRng::new(7));
        assert!(low.abs_diff(value) < high.abs_diff(value));
    }

    #[test]
    fn test_high_intensity_snaps_to_boundary() {
        for seed in 0..16 {
            let out = corrupt_u64(5, &field_spec(BOUNDARY_INTENSITY), &mut FuzzRng::new(seed));
            assert!(out == 0 || out == u64::MAX);
        }
    }

    #[test]
    fn test_structural_zeroes_bytes() {
        let spec = FuzzSpec {
            dimension: FuzzDimension::Structural,
            intensity: 5,
        };
        let mut rng = FuzzRng::new(3);
        match fuzz(&deposit_op(), &spec, &mut rng) {
            UnsignedOperation::Deposit(d) => {
                // Whichever field was hit is degenerate.
                assert!(
                    d.amount == 0
                        || d.withdrawal_credentials == B256::ZERO
                        || d.pubkey == FixedBytes::ZERO
                );
            }
            other => panic!("kind changed: {other:?}"),
        }
    }

    #[test]
    fn test_fuzz_context_corrupts_fork_version() {
        let ctx = OperationContext {
            fork_version: FixedBytes::from([4, 0, 0, 0]),
            genesis_validators_root: B256::repeat_byte(0x11),
            epoch: 10,
        };
        let mut rng = FuzzRng::new(1);
        let fuzzed = fuzz_context(&ctx, &field_spec(2), &mut rng);
        assert_ne!(fuzzed.fork_version, ctx.fork_version);
        assert_eq!(fuzzed.genesis_validators_root, ctx.genesis_validators_root);
        assert_eq!(fuzzed.epoch, ctx.epoch);

        assert_eq!(fuzz_context(&ctx, &FuzzSpec::none(), &mut rng), ctx);
    }

    #[test]
    fn test_fuzz_attempt_corrupts_exactly_one_aspect() {
        let ctx = OperationContext {
            fork_version: FixedBytes::from([4, 0, 0, 0]),
            genesis_validators_root: B256::repeat_byte(0x11),
            epoch: 10,
        };
        let mut op_hits = 0;
        let mut ctx_hits = 0;
        for seed in 0..64 {
            let mut rng = FuzzRng::new(seed);
            let (fuzzed_op, fuzzed_ctx) = fuzz_attempt(&exit_op(), &ctx, &field_spec(3), &mut rng);
            let op_changed = fuzzed_op != exit_op();
            let ctx_changed = fuzzed_ctx != ctx;
            assert!(op_changed ^ ctx_changed, "seed {seed}: expected one corruption");
            if op_changed {
                op_hits += 1;
            } else {
                ctx_hits += 1;
            }
        }
        // Both candidates are reachable.
        assert!(op_hits > 0 && ctx_hits > 0);
    }

    #[test]
    fn test_fuzz_attempt_identity_and_determinism() {
        let ctx = OperationContext {
            fork_version: FixedBytes::from([4, 0, 0, 0]),
            genesis_validators_root: B256::repeat_byte(0x11),
            epoch: 10,
        };
        let mut rng = FuzzRng::new(5);
        assert_eq!(
            fuzz_attempt(&exit_op(), &ctx, &FuzzSpec::none(), &mut rng),
            (exit_op(), ctx)
        );

        let a = fuzz_attempt(&exit_op(), &ctx, &field_spec(5), &mut FuzzRng::new(7));
        let b = fuzz_attempt(&exit_op(), &ctx, &field_spec(5), &mut FuzzRng::new(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nonzero_intensity_changes_something() {
        for seed in 0..32 {
            let mut rng = FuzzRng::new(seed);
            let fuzzed = fuzz(&deposit_op(), &field_spec(1), &mut rng);
            assert!(fuzzed != deposit_op(), "seed {seed} was a no-op");
        }
    }
}
