//! Common primitives shared by the flowgen crates: the logical tick type,
//! the per-core execution context, the cross-core handoff ring and the
//! worker start barrier.

mod barrier;
mod context;
pub mod ring;

pub use barrier::StartBarrier;
pub use context::CoreContext;

/// One logical scheduler tick. A tick corresponds to one timer-wheel bucket
/// advance; its wall-clock duration is set by the wheel configuration.
pub type Tick = u64;
