//! Core scheduling for the flow generator: the hierarchical timer wheel
//! driving per-flow timing events, the tick clock pacing a core's loop, the
//! rate ramp-up controller and the live worker-core pipeline.
//!
//! Everything here is single-core by design. A wheel, a clock and a ramp
//! are each owned by exactly one thread; the only structure shared between
//! cores is the handoff ring from `flowgen-common`, and that between
//! exactly two.

mod clock;
mod ramp;
mod wheel;
mod worker;

pub use clock::TickClock;
pub use ramp::{RampConfig, RampController, RampError, RampStep};
pub use wheel::{
    TimerHandle, TimerWheel, WheelConfig, WheelError, BUCKET_TIME_USEC, MAX_BUCKETS, MAX_LEVELS,
    MIN_BUCKETS,
};
pub use worker::{
    spawn_pipeline, DataCore, FlowJob, PipelineConfig, PipelineError, PipelineHandle,
    PipelineReport, SchedulerCore,
};
