use rand::{rngs::SmallRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::instruction::{Endianness, FlowVar, ValueSize, VarOp, WriteField};

/// Steps `cur` forward through `[min, max]`, wrapping at the top. The wrap
/// consumes one step. `step` must be smaller than the range size.
pub(crate) fn inc_mod(min: u64, max: u64, cur: u64, step: u64) -> u64 {
    let left = max - cur;
    if step <= left {
        cur + step
    } else {
        min + (step - left - 1)
    }
}

/// Steps `cur` backward through `[min, max]`, wrapping at the bottom.
pub(crate) fn dec_mod(min: u64, max: u64, cur: u64, step: u64) -> u64 {
    let left = cur - min;
    if step <= left {
        cur - step
    } else {
        max - (step - left - 1)
    }
}

/// Position `skip` updates ahead of `init` in the variable's own direction.
/// Used to phase-shift per-core clones; random variables have no sequence
/// to walk.
pub(crate) fn peek_forward(var: &FlowVar, skip: u64) -> u64 {
    if var.op == VarOp::Random {
        return var.init;
    }
    let range = var.range();
    let step = ((var.step as u128 * skip as u128) % range as u128) as u64;
    match var.op {
        VarOp::Inc => inc_mod(var.min, var.max, var.init, step),
        VarOp::Dec => dec_mod(var.min, var.max, var.init, step),
        VarOp::Random => unreachable!(),
    }
}

#[derive(Debug, Clone)]
struct VarState {
    op: VarOp,
    min: u64,
    max: u64,
    /// Step reduced modulo the range size; 0 means the update is a no-op.
    step: u64,
    value: u64,
}

impl VarState {
    fn new(var: &FlowVar) -> Self {
        // materialize one update behind the initial value, so the first
        // executed update lands exactly on it
        let (step, value) = match var.op {
            VarOp::Inc => {
                let step = (var.step as u128 % var.range() as u128) as u64;
                (step, dec_mod(var.min, var.max, var.init, step))
            }
            VarOp::Dec => {
                let step = (var.step as u128 % var.range() as u128) as u64;
                (step, inc_mod(var.min, var.max, var.init, step))
            }
            VarOp::Random => (0, var.init),
        };
        Self { op: var.op, min: var.min, max: var.max, step, value }
    }

    fn advance(&mut self, rng: &mut SmallRng) {
        self.value = match self.op {
            VarOp::Inc => inc_mod(self.min, self.max, self.value, self.step),
            VarOp::Dec => dec_mod(self.min, self.max, self.value, self.step),
            VarOp::Random => rng.gen_range(self.min..=self.max),
        };
    }
}

#[derive(Debug, Clone)]
struct ResolvedWrite {
    slot: usize,
    offset: usize,
    add_value: i64,
    endianness: Endianness,
    size: ValueSize,
}

/// The runnable form of a [`StreamVm`](crate::StreamVm), owned exclusively
/// by one core.
///
/// Each clone carries its own variable state and its own RNG, so cores
/// never coordinate at send time. `Clone` reproduces the state bit for bit,
/// which is exactly what the whole-program fallback path wants.
#[derive(Debug, Clone)]
pub struct CompiledVm {
    symbols: FxHashMap<String, usize>,
    vars: Vec<VarState>,
    writes: Vec<ResolvedWrite>,
    rng: SmallRng,
    cache_size: u16,
}

impl CompiledVm {
    pub(crate) fn build(
        symbols: FxHashMap<String, usize>,
        vars: &[&FlowVar],
        writes: &[(usize, &WriteField)],
        seed: u64,
        cache_size: u16,
    ) -> Self {
        let states = vars.iter().map(|v| VarState::new(v)).collect();
        let writes = writes
            .iter()
            .map(|&(slot, w)| ResolvedWrite {
                slot,
                offset: w.pkt_offset as usize,
                add_value: w.add_value,
                endianness: w.endianness,
                // a field is written at the width its variable was declared
                size: vars[slot].size,
            })
            .collect();

        Self { symbols, vars: states, writes, rng: SmallRng::seed_from_u64(seed), cache_size }
    }

    /// Runs one round of variable updates followed by all field writes.
    /// The packet buffer must be at least [`required_len`](Self::required_len)
    /// bytes.
    pub fn execute(&mut self, pkt: &mut [u8]) {
        self.advance();
        self.write_fields(pkt);
    }

    /// Runs every variable update once, without touching a packet.
    pub fn advance(&mut self) {
        for var in &mut self.vars {
            var.advance(&mut self.rng);
        }
    }

    /// Applies every write instruction to `pkt` using the current values.
    pub fn write_fields(&self, pkt: &mut [u8]) {
        for w in &self.writes {
            let value = self.vars[w.slot].value.wrapping_add(w.add_value as u64);
            let n = w.size.bytes();
            debug_assert!(w.offset + n <= pkt.len(), "write past end of packet buffer");
            match w.endianness {
                Endianness::Big => {
                    pkt[w.offset..w.offset + n].copy_from_slice(&value.to_be_bytes()[8 - n..]);
                }
                Endianness::Little => {
                    pkt[w.offset..w.offset + n].copy_from_slice(&value.to_le_bytes()[..n]);
                }
            }
        }
    }

    /// Current value of a variable, by name.
    pub fn value(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).map(|&slot| self.vars[slot].value)
    }

    /// Smallest packet buffer the write instructions fit into.
    pub fn required_len(&self) -> usize {
        self.writes.iter().map(|w| w.offset + w.size.bytes()).max().unwrap_or(0)
    }

    /// Number of precomputed packet variants this core keeps.
    pub fn cache_size(&self) -> u16 {
        self.cache_size
    }

    pub(crate) fn set_cache_size(&mut self, cache_size: u16) {
        self.cache_size = cache_size;
    }
}
