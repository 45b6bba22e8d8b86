//! Per-flow packet-mutation programs.
//!
//! A [`StreamVm`] is an ordered list of [`Instruction`]s describing how the
//! variable fields of one flow's packets evolve over time: *variable*
//! instructions declare a value and how it is updated between packets,
//! *write* instructions place the current value at a byte offset in the
//! outgoing packet. Compiling a program resolves every write against its
//! declared variable and yields a [`CompiledVm`], the runnable per-core
//! form.
//!
//! [`VmSplitter`] partitions one program across N worker cores so that the
//! union of the per-core value sequences reproduces the original sequence
//! exactly, with no coordination between cores at send time.

mod instruction;
mod program;
mod runtime;
mod splitter;

pub use instruction::{Endianness, FlowVar, Instruction, VarOp, ValueSize, WriteField};
pub use program::{StreamVm, VmError};
pub use runtime::CompiledVm;
pub use splitter::{split_cache_size, VmSplitter, MAX_CACHE_SIZE};
