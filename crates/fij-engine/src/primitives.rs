//! Injection Primitives: descendant enumeration, process/thread/register/bit
//! selection, quiescence, and the register/memory mutation itself.
//!
//! Grounded on `fij/core/processes.c`, `bitflip_ops.c`, `fij_regs.c`. Every
//! function here is a free function over explicit arguments rather than a
//! method on [`crate::controller::EngineSession`] — the session only owns
//! the bookkeeping (descendants cache, restore record, result draft); the
//! actual bit-flip logic has no need of the session's locks while it runs.

use fij_core::{Architecture, FijError, InjectionPolicy, RestoreRecord};
use fij_ptrace::QuiesceGuard;
use nix::unistd::Pid;
use rand::Rng;

/// One register or memory mutation actually performed.
#[derive(Debug, Clone)]
pub struct InjectionOutcome {
    /// `true` if this outcome mutated memory, `false` for a register.
    pub memory_flip: bool,
    /// Index into the descendant list of the process that was mutated.
    pub pid_idx: usize,
    /// Index into the thread list of the thread that was mutated
    /// (register flips only; `0` for memory).
    pub thread_idx: usize,
    /// Thread-group id of the mutated process.
    pub target_tgid: Pid,
    /// Virtual address mutated, for memory flips.
    pub target_address: u64,
    /// Value before the flip (register: zero-extended register value;
    /// memory: the single byte).
    pub target_before: u64,
    /// Value after the flip.
    pub target_after: u64,
    /// Register name, for register flips.
    pub register_name: String,
    /// Restore bookkeeping for a file-backed memory mutation.
    pub restore: Option<RestoreRecord>,
}

/// Picks whether this injection targets memory or a register, honoring
/// the policy's hard overrides before falling back to the weighted draw.
///
/// `only_mem` and an explicit `target_reg` are deterministic overrides:
/// they must force `memory_flip == 1`/`== 0` respectively for *all*
/// inputs, not merely "most of the time", so they are checked before the
/// Bernoulli draw rather than folded into its weighting.
pub fn choose_target_type(policy: &InjectionPolicy, rng: &mut impl Rng) -> bool {
    if policy.target_reg.is_some() {
        return false;
    }
    if policy.only_mem {
        return true;
    }
    unbiased_mod(rng, 1u64 + policy.weight_mem as u64) != 0
}

/// Draws a uniform value in `[0, modulus)` by rejection sampling against a
/// raw random `u64`, per spec §4.5 ("unbiased via rejection sampling
/// against the raw random word modulo `1 + weight_mem`"): `u64::MAX + 1`
/// is not generally a multiple of `modulus`, so a plain `rng % modulus`
/// over-represents the low buckets by the size of that incomplete final
/// bucket. Values falling in it are discarded and redrawn.
fn unbiased_mod(rng: &mut impl Rng, modulus: u64) -> u64 {
    if modulus <= 1 {
        return 0;
    }
    let limit = u64::MAX - (u64::MAX % modulus);
    loop {
        let draw = rng.random::<u64>();
        if draw < limit {
            return draw % modulus;
        }
    }
}

/// Selects the process to inject into: the policy's explicit
/// `process_index` if in range, else a uniform-random descendant.
pub fn choose_process(
    descendants: &[Pid],
    policy: &InjectionPolicy,
    rng: &mut impl Rng,
) -> Result<(usize, Pid), FijError> {
    if descendants.is_empty() {
        return Err(FijError::NotFound);
    }
    let idx = match policy.process_index {
        Some(idx) if idx < descendants.len() => idx,
        Some(_) => return Err(FijError::InvalidArgument("process_index out of range")),
        None => rng.random_range(0..descendants.len()),
    };
    Ok((idx, descendants[idx]))
}

/// Selects the eligible thread to inject into within `tgid`.
pub fn choose_thread(
    threads: &[Pid],
    policy: &InjectionPolicy,
    rng: &mut impl Rng,
) -> Result<(usize, Pid), FijError> {
    if threads.is_empty() {
        return Err(FijError::NotFound);
    }
    let idx = match policy.thread_index {
        Some(idx) if idx < threads.len() => idx,
        Some(_) => return Err(FijError::InvalidArgument("thread_index out of range")),
        None => rng.random_range(0..threads.len()),
    };
    Ok((idx, threads[idx]))
}

/// Resolves the bit to flip, honoring an explicit `reg_bit` if present
/// (validated against `width`) or drawing uniformly otherwise. The
/// uniform-random fallback applies identically whether the delay is
/// nondeterministic or probe-gated.
pub fn choose_bit(explicit: Option<u8>, width: u8, rng: &mut impl Rng) -> Result<u8, FijError> {
    match explicit {
        Some(bit) if bit < width => Ok(bit),
        Some(_) => Err(FijError::InvalidArgument("reg_bit out of range for register width")),
        None => Ok(rng.random_range(0..width)),
    }
}

/// Flips one bit of a register belonging to `tid`.
///
/// Grounded on `fij_regs.c`'s `fij_flip_register_bit`: resolve the
/// register id to `(offset, width)`, read the frame, XOR, write back.
pub fn flip_register<A: Architecture>(
    tid: Pid,
    reg: Option<u32>,
    explicit_bit: Option<u8>,
    rng: &mut impl Rng,
) -> Result<(A::RegisterId, u8, u64, u64), FijError> {
    let reg_id = match reg {
        Some(raw) => A::RegisterId::try_from(raw)
            .map_err(|_| FijError::InvalidArgument("unknown register id for this architecture"))?,
        None => {
            let gprs = A::general_purpose_registers();
            gprs[rng.random_range(0..gprs.len())]
        }
    };

    let view = A::resolve(reg_id).ok_or(FijError::InvalidArgument("register not resolvable"))?;
    let bit = choose_bit(explicit_bit, view.width, rng)?;

    let mut frame = fij_ptrace::get_regs::<A::Frame>(tid)?;
    let before = A::read(&frame, reg_id)?;
    let after = before ^ (1u64 << bit);
    A::write(&mut frame, reg_id, after)?;
    fij_ptrace::set_regs(tid, &frame)?;

    Ok((reg_id, bit, before, after))
}

/// Flips one random bit of one random byte within a non-`VM_IO`/`VM_PFNMAP`
/// VMA of `pid`'s address space.
///
/// Grounded on `bitflip_ops.c`'s `fij_flip_memory_bit`: enumerate VMAs,
/// exclude device/PFN-backed regions, pick a byte, XOR a bit, force-write
/// it back through ptrace (breaking COW on a private file-backed page the
/// way `get_user_pages(..., FOLL_FORCE)` does in the kernel).
pub fn flip_memory(pid: Pid, rng: &mut impl Rng) -> Result<(u64, u64, u64, Option<RestoreRecord>), FijError> {
    let vmas: Vec<_> = fij_ptrace::vmas(pid)?
        .into_iter()
        .filter(|vma| !vma.io_or_pfnmap && vma.end > vma.start)
        .collect();

    if vmas.is_empty() {
        return Err(FijError::NotFound);
    }

    let vma = &vmas[rng.random_range(0..vmas.len())];
    let span = vma.end - vma.start;
    let va = vma.start + rng.random_range(0..span);

    let before = fij_ptrace::read_byte(pid, va)?;
    let bit = rng.random_range(0..8u8);
    let after = before ^ (1u8 << bit);
    fij_ptrace::write_byte_forced(pid, va, after)?;

    let restore = vma.path.is_some().then(|| RestoreRecord {
        address: va,
        page_offset: (va % page_size()) as usize,
        original_byte: before,
        active: true,
    });

    Ok((va, before as u64, after as u64, restore))
}

fn page_size() -> u64 {
    // SAFETY: `sysconf(_SC_PAGESIZE)` has no failure mode on Linux.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
}

/// Performs exactly one injection (or one per eligible thread, for
/// `all_threads`), returning every outcome actually produced and the
/// first error observed along the way: the first error is reported, but
/// every eligible thread is still attempted and the group is still
/// resumed.
pub fn flip_one_random_target<A: Architecture>(
    root_tgid: Pid,
    policy: &InjectionPolicy,
) -> (Vec<InjectionOutcome>, Option<FijError>) {
    let mut rng = rand::rng();

    let descendants = match fij_ptrace::descendants(root_tgid) {
        Ok(d) => d,
        Err(err) => return (Vec::new(), Some(err)),
    };
    let (pid_idx, tgid) = match choose_process(&descendants, policy, &mut rng) {
        Ok(pair) => pair,
        Err(err) => return (Vec::new(), Some(err)),
    };

    let memory = choose_target_type(policy, &mut rng);

    if !policy.all_threads {
        let outcome = flip_single::<A>(tgid, pid_idx, policy, memory, &mut rng);
        return match outcome {
            Ok(outcome) => (vec![outcome], None),
            Err(err) => (Vec::new(), Some(err)),
        };
    }

    flip_all_threads::<A>(tgid, pid_idx, policy, memory, &mut rng)
}

fn flip_single<A: Architecture>(
    tgid: Pid,
    pid_idx: usize,
    policy: &InjectionPolicy,
    memory: bool,
    rng: &mut impl Rng,
) -> Result<InjectionOutcome, FijError> {
    let threads = fij_ptrace::thread_ids(tgid)?;
    let (thread_idx, tid) = choose_thread(&threads, policy, rng)?;

    let _quiesce = QuiesceGuard::acquire(tgid, tid)?;

    if memory {
        let (address, before, after, restore) = flip_memory(tgid, rng)?;
        Ok(InjectionOutcome {
            memory_flip: true,
            pid_idx,
            thread_idx,
            target_tgid: tgid,
            target_address: address,
            target_before: before,
            target_after: after,
            register_name: String::new(),
            restore,
        })
    } else {
        let (reg_id, _bit, before, after) = flip_register::<A>(tid, policy.target_reg, policy.reg_bit, rng)?;
        Ok(InjectionOutcome {
            memory_flip: false,
            pid_idx,
            thread_idx,
            target_tgid: tgid,
            target_address: 0,
            target_before: before,
            target_after: after,
            register_name: A::register_name(reg_id).to_string(),
            restore: None,
        })
    }
}

fn flip_all_threads<A: Architecture>(
    tgid: Pid,
    pid_idx: usize,
    policy: &InjectionPolicy,
    memory: bool,
    rng: &mut impl Rng,
) -> (Vec<InjectionOutcome>, Option<FijError>) {
    let threads = match fij_ptrace::thread_ids(tgid) {
        Ok(t) => t,
        Err(err) => return (Vec::new(), Some(err)),
    };
    if threads.is_empty() {
        return (Vec::new(), Some(FijError::NotFound));
    }

    let _quiesce = match QuiesceGuard::acquire(tgid, threads[0]) {
        Ok(guard) => guard,
        Err(err) => return (Vec::new(), Some(err)),
    };

    let mut outcomes = Vec::new();
    let mut first_error = None;

    if memory {
        match flip_memory(tgid, rng) {
            Ok((address, before, after, restore)) => outcomes.push(InjectionOutcome {
                memory_flip: true,
                pid_idx,
                thread_idx: 0,
                target_tgid: tgid,
                target_address: address,
                target_before: before,
                target_after: after,
                register_name: String::new(),
                restore,
            }),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
        return (outcomes, first_error);
    }

    for (thread_idx, &tid) in threads.iter().enumerate() {
        if let Err(err) = fij_ptrace::wait_until_stopped(tid) {
            if first_error.is_none() {
                first_error = Some(err);
            }
            continue;
        }

        match flip_register::<A>(tid, policy.target_reg, policy.reg_bit, rng) {
            Ok((reg_id, _bit, before, after)) => {
                tracing::debug!(thread = tid.as_raw(), register = A::register_name(reg_id), "flipped bit for all_threads mode");
                outcomes.push(InjectionOutcome {
                    memory_flip: false,
                    pid_idx,
                    thread_idx,
                    target_tgid: tgid,
                    target_address: 0,
                    target_before: before,
                    target_after: after,
                    register_name: A::register_name(reg_id).to_string(),
                    restore: None,
                });
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    (outcomes, first_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fij_core::InjectionPolicy;
    use rand::{rngs::StdRng, SeedableRng};

    fn base_policy() -> InjectionPolicy {
        InjectionPolicy {
            weight_mem: 0,
            only_mem: false,
            target_reg: None,
            reg_bit: None,
            target_pc: None,
            min_delay_ms: 0,
            max_delay_ms: 0,
            thread_index: None,
            all_threads: false,
            process_index: None,
            no_injection: false,
        }
    }

    #[test]
    fn only_mem_always_selects_memory() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = InjectionPolicy {
            only_mem: true,
            ..base_policy()
        };
        for _ in 0..100 {
            assert!(choose_target_type(&policy, &mut rng));
        }
    }

    #[test]
    fn unbiased_mod_never_returns_a_value_outside_the_modulus() {
        let mut rng = StdRng::seed_from_u64(42);
        for modulus in [1u64, 2, 3, 7, 100] {
            for _ in 0..1000 {
                assert!(unbiased_mod(&mut rng, modulus) < modulus.max(1));
            }
        }
    }

    #[test]
    fn unbiased_mod_visits_every_bucket_of_a_small_modulus() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut seen = [false; 5];
        for _ in 0..2000 {
            seen[unbiased_mod(&mut rng, 5) as usize] = true;
        }
        assert!(seen.iter().all(|&hit| hit), "every bucket should be reachable");
    }

    #[test]
    fn explicit_target_reg_always_selects_register() {
        let mut rng = StdRng::seed_from_u64(11);
        let policy = InjectionPolicy {
            only_mem: true, // would force memory if not overridden by target_reg
            target_reg: Some(0),
            ..base_policy()
        };
        for _ in 0..100 {
            assert!(!choose_target_type(&policy, &mut rng));
        }
    }

    #[test]
    fn zero_weight_mem_always_selects_register() {
        let mut rng = StdRng::seed_from_u64(3);
        let policy = base_policy();
        for _ in 0..100 {
            assert!(!choose_target_type(&policy, &mut rng));
        }
    }

    #[test]
    fn choose_bit_rejects_out_of_range_explicit_bit() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(choose_bit(Some(64), 32, &mut rng).is_err());
        assert!(choose_bit(Some(31), 32, &mut rng).is_ok());
    }

    #[test]
    fn choose_process_rejects_out_of_range_index() {
        let mut rng = StdRng::seed_from_u64(1);
        let descendants = vec![Pid::from_raw(100), Pid::from_raw(101)];
        let policy = InjectionPolicy {
            process_index: Some(5),
            ..base_policy()
        };
        assert!(matches!(
            choose_process(&descendants, &policy, &mut rng),
            Err(FijError::InvalidArgument(_))
        ));
    }
}
