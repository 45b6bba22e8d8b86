//! Partitioning of one flow program across N worker cores.
//!
//! Split-safe variables are rewritten per core with a phase offset and a
//! step multiplier: core *i* of *N* starts *i* positions into the original
//! sequence and then strides by *N*, so the cores together visit every
//! position exactly once and never the same one twice. Programs with no
//! split-safe variable fall back to cloning the whole compiled state
//! identically to every core, which stays correct but gives up per-core
//! statistical independence.

use tracing::{debug, warn};

use crate::{
    instruction::Instruction,
    program::{StreamVm, VmError},
    runtime::{peek_forward, CompiledVm},
};

/// Sanity ceiling for per-stream cache-size requests.
pub const MAX_CACHE_SIZE: u16 = 10_000;

/// Per-core seed decorrelation for the split path. Identical template seeds
/// must not produce identical random sequences on different cores.
fn mangle_seed(seed: u64, core: u64) -> u64 {
    seed.wrapping_mul(((core + 1).wrapping_mul(514_229)) & 0xffff_ffff)
}

/// Splits [`StreamVm`] templates across a fixed number of worker cores.
#[derive(Debug, Clone, Copy)]
pub struct VmSplitter {
    cores: u8,
}

impl VmSplitter {
    /// A splitter for `cores` destination cores. Zero cores is a caller
    /// error, rejected before any splitting work begins.
    pub fn new(cores: u8) -> Result<Self, VmError> {
        if cores == 0 {
            return Err(VmError::ZeroCores);
        }
        Ok(Self { cores })
    }

    pub fn cores(&self) -> u8 {
        self.cores
    }

    /// Compiles `template` once per core, rewriting split-safe variables
    /// with the core's phase offset and step multiplier. Returns one
    /// [`CompiledVm`] per core, index = core id.
    pub fn split(&self, template: &StreamVm, seed: u64) -> Result<Vec<CompiledVm>, VmError> {
        if template.cache_size() > MAX_CACHE_SIZE {
            return Err(VmError::CacheTooLarge {
                requested: template.cache_size(),
                ceiling: MAX_CACHE_SIZE,
            });
        }

        let cache_shares = split_cache_size(template.cache_size(), self.cores);

        if !template.is_splittable() {
            return self.clone_to_all_cores(template, seed, &cache_shares);
        }

        // validate the whole template up front; its materialized state is
        // discarded, every core gets its own rewritten clone instead
        template.compile(seed)?;

        let n = self.cores as u64;
        let mut clones = Vec::with_capacity(self.cores as usize);
        for core in 0..self.cores {
            let mut per_core = template.clone();
            rewrite_for_core(&mut per_core, core as u64, n);

            let mut compiled = per_core.compile(mangle_seed(seed, core as u64))?;
            compiled.set_cache_size(cache_shares[core as usize]);
            clones.push(compiled);
        }

        debug!(cores = self.cores, "split stream program by phase/stride");
        Ok(clones)
    }

    /// Whole-program fallback: compile once, clone the materialized state
    /// identically to every core. Correct, but every core emits the same
    /// value sequence.
    fn clone_to_all_cores(
        &self,
        template: &StreamVm,
        seed: u64,
        cache_shares: &[u16],
    ) -> Result<Vec<CompiledVm>, VmError> {
        debug!(cores = self.cores, "no split-safe variable, cloning whole program to all cores");
        let compiled = template.compile(seed)?;

        let clones = cache_shares
            .iter()
            .map(|&share| {
                let mut clone = compiled.clone();
                clone.set_cache_size(share);
                clone
            })
            .collect();
        Ok(clones)
    }
}

/// Phase-shifts every split-safe variable `core` positions into its
/// sequence and multiplies its step by `n`.
fn rewrite_for_core(vm: &mut StreamVm, core: u64, n: u64) {
    for ins in vm.instructions_mut() {
        let Instruction::Var(var) = ins else { continue };
        if !var.is_split_safe() {
            continue;
        }

        var.init = peek_forward(var, core);
        let range = var.range();
        let stride = ((var.step as u128 * n as u128) % range as u128) as u64;
        // a stride that reduces to 0 pins the core to one position; the
        // full range expresses that without tripping the zero-step check
        var.step = if stride == 0 { range } else { stride };
    }
}

/// Divides a cache-size request across `cores`, remainder first: core 0
/// onward each take one extra unit until the remainder runs out. A request
/// too small to give every core a share becomes a minimum of 1 per core,
/// silently growing the total.
pub fn split_cache_size(size: u16, cores: u8) -> Vec<u16> {
    let n = cores as u16;
    let base = size / n;
    let remainder = size % n;

    if base == 0 && size > 0 {
        warn!(requested = size, cores, "cache smaller than core count, giving every core 1");
        return vec![1; cores as usize];
    }

    (0..n).map(|core| if core < remainder { base + 1 } else { base }).collect()
}
