use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    instruction::{FlowVar, Instruction, VarOp, WriteField},
    runtime::CompiledVm,
};

/// Compile-time errors. All of these surface synchronously during stream
/// setup, before any traffic is generated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("instruction {index}: write references undefined variable `{name}`")]
    UndefinedVariable { index: usize, name: String },
    #[error("instruction {index}: variable `{name}` is already declared")]
    DuplicateVariable { index: usize, name: String },
    #[error("instruction {index}: variable `{name}` has min {min} greater than max {max}")]
    InvalidRange { index: usize, name: String, min: u64, max: u64 },
    #[error("instruction {index}: variable `{name}` init value {init} outside [{min}, {max}]")]
    InitOutOfRange { index: usize, name: String, init: u64, min: u64, max: u64 },
    #[error("instruction {index}: variable `{name}` max {max} does not fit in {size} byte(s)")]
    ValueTooWide { index: usize, name: String, max: u64, size: usize },
    #[error("instruction {index}: variable `{name}` has step 0")]
    ZeroStep { index: usize, name: String },
    #[error("instruction {index}: variable `{name}` spans the full 64-bit range")]
    RangeTooWide { index: usize, name: String },
    #[error("program is empty")]
    EmptyProgram,
    #[error("cache size {requested} exceeds the maximum of {ceiling}")]
    CacheTooLarge { requested: u16, ceiling: u16 },
    #[error("cannot split a stream across zero cores")]
    ZeroCores,
}

/// A per-flow packet-mutation program.
///
/// Instructions are appended in order; [`compile`](Self::compile) resolves
/// them into a runnable [`CompiledVm`] and leaves the program itself
/// untouched, so one program can serve as the template for any number of
/// compiled clones.
#[derive(Debug, Clone, Default)]
pub struct StreamVm {
    instructions: Vec<Instruction>,
    /// Requested number of precomputed packet variants, 0 disables caching.
    cache_size: u16,
}

impl StreamVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction to the program.
    pub fn push(&mut self, instruction: impl Into<Instruction>) -> &mut Self {
        self.instructions.push(instruction.into());
        self
    }

    pub fn set_cache_size(&mut self, cache_size: u16) -> &mut Self {
        self.cache_size = cache_size;
        self
    }

    pub fn cache_size(&self) -> u16 {
        self.cache_size
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(crate) fn instructions_mut(&mut self) -> &mut [Instruction] {
        &mut self.instructions
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Whether the program contains at least one variable whose value
    /// sequence can be partitioned by phase/stride. Programs without one
    /// fall back to whole-program cloning when split across cores.
    pub fn is_splittable(&self) -> bool {
        self.instructions.iter().any(|ins| match ins {
            Instruction::Var(v) => v.is_split_safe(),
            Instruction::Write(_) => false,
        })
    }

    /// Resolves every write against its declared variable and materializes
    /// the runtime state. Fails on the first invalid instruction, naming it.
    pub fn compile(&self, seed: u64) -> Result<CompiledVm, VmError> {
        if self.instructions.is_empty() {
            return Err(VmError::EmptyProgram);
        }

        let mut symbols: FxHashMap<String, usize> = FxHashMap::default();
        let mut vars: Vec<&FlowVar> = Vec::new();
        let mut writes: Vec<(usize, &WriteField)> = Vec::new();

        for (index, ins) in self.instructions.iter().enumerate() {
            match ins {
                Instruction::Var(var) => {
                    sanity_check(index, var)?;
                    if symbols.insert(var.name.clone(), vars.len()).is_some() {
                        return Err(VmError::DuplicateVariable { index, name: var.name.clone() });
                    }
                    vars.push(var);
                }
                Instruction::Write(write) => {
                    let Some(&slot) = symbols.get(&write.var) else {
                        return Err(VmError::UndefinedVariable { index, name: write.var.clone() });
                    };
                    writes.push((slot, write));
                }
            }
        }

        Ok(CompiledVm::build(symbols, &vars, &writes, seed, self.cache_size))
    }
}

fn sanity_check(index: usize, var: &FlowVar) -> Result<(), VmError> {
    let name = || var.name.clone();
    if var.min > var.max {
        return Err(VmError::InvalidRange { index, name: name(), min: var.min, max: var.max });
    }
    if var.init < var.min || var.init > var.max {
        return Err(VmError::InitOutOfRange {
            index,
            name: name(),
            init: var.init,
            min: var.min,
            max: var.max,
        });
    }
    if var.max > var.size.max_value() {
        return Err(VmError::ValueTooWide {
            index,
            name: name(),
            max: var.max,
            size: var.size.bytes(),
        });
    }
    if var.op != VarOp::Random {
        if var.step == 0 {
            return Err(VmError::ZeroStep { index, name: name() });
        }
        // stepping needs a representable range size
        if var.max - var.min == u64::MAX {
            return Err(VmError::RangeTooWide { index, name: name() });
        }
    }
    Ok(())
}
