//! The live worker-core pipeline.
//!
//! One scheduler core owns a [`TimerWheel`] and a [`RampController`] and
//! creates flows at the ramped rate; each data core drains its own handoff
//! ring and runs its own [`CompiledVm`] clone against a packet scratch
//! buffer. The cores share nothing but the rings, one ring per
//! scheduler/data pair.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, trace};

use flowgen_common::{
    ring::{ring, Consumer, Producer, RingError},
    CoreContext, StartBarrier, Tick,
};
use flowgen_vm::{CompiledVm, StreamVm, VmError, VmSplitter};

use crate::{
    clock::TickClock,
    ramp::{RampConfig, RampController, RampError, RampStep},
    wheel::{TimerWheel, WheelConfig, WheelError},
};

/// Setup errors for the pipeline. All pre-flight: nothing is spawned and
/// no partially-activated state is left behind.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Wheel(#[from] WheelError),
    #[error(transparent)]
    Ramp(#[from] RampError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Work item handed from the scheduler core to a data core. Ownership
/// moves with it through the ring.
#[derive(Debug, PartialEq, Eq)]
pub struct FlowJob {
    pub flow_id: u64,
}

/// Scheduling events carried by the scheduler core's wheel.
#[derive(Debug)]
enum SchedEvent {
    /// Create the next flow, then re-arm at the current inter-arrival
    /// interval.
    NewFlow,
    /// Retire a live flow.
    FlowEnd,
    /// Advance the ramp controller.
    RampTick,
}

/// Pipeline configuration. Validated before any thread starts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub wheel: WheelConfig,
    pub ramp: RampConfig,
    /// Capacity of each scheduler-to-data ring. Power of two.
    pub ring_capacity: usize,
    /// How long a created flow stays live before its end timer retires it.
    pub flow_lifetime: Duration,
    /// Seed for the per-core VM random streams.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wheel: WheelConfig::default(),
            ramp: RampConfig { rampup_secs: 2, target_cps: 1000.0 },
            ring_capacity: 1024,
            flow_lifetime: Duration::from_millis(10),
            seed: 0x0f10_67e4,
        }
    }
}

/// The scheduler core: wheel, ramp and the producing end of every ring.
///
/// Single-threaded; [`tick_once`](Self::tick_once) is the whole hot path.
#[derive(Debug)]
pub struct SchedulerCore {
    wheel: TimerWheel<SchedEvent>,
    ramp: Option<RampController>,
    producers: Vec<Producer<FlowJob>>,
    next_core: usize,
    /// Current flow inter-arrival interval, in ticks.
    interval_ticks: Tick,
    /// Ticks between ramp steps (one step per second).
    ticks_per_step: Tick,
    flow_lifetime: Tick,
    flow_timer_started: bool,
    next_flow_id: u64,
    flows_created: u64,
    flows_live: u64,
}

impl SchedulerCore {
    /// Builds the scheduler core and arms the first ramp step on the next
    /// tick. Flow creation stays off until the ramp reports a rate.
    pub fn new(
        config: &PipelineConfig,
        producers: Vec<Producer<FlowJob>>,
    ) -> Result<Self, PipelineError> {
        let mut wheel = TimerWheel::new(config.wheel.clone())?;
        let mut ramp = RampController::new(&config.ramp)?;

        ramp.arm(wheel.start(1, SchedEvent::RampTick));

        Ok(Self {
            ticks_per_step: config.wheel.ticks_per_second(),
            flow_lifetime: config.wheel.duration_to_ticks(config.flow_lifetime),
            wheel,
            ramp: Some(ramp),
            producers,
            next_core: 0,
            interval_ticks: 0,
            flow_timer_started: false,
            next_flow_id: 0,
            flows_created: 0,
            flows_live: 0,
        })
    }

    /// Advances the wheel one tick, dispatching every due event, then
    /// gives parked ring items another chance to go out.
    pub fn tick_once(&mut self) {
        let Self {
            wheel,
            ramp,
            producers,
            next_core,
            interval_ticks,
            ticks_per_step,
            flow_lifetime,
            flow_timer_started,
            next_flow_id,
            flows_created,
            flows_live,
        } = self;

        wheel.tick(&mut |w, event| match event {
            SchedEvent::NewFlow => {
                let flow_id = *next_flow_id;
                *next_flow_id += 1;
                *flows_created += 1;
                *flows_live += 1;

                producers[*next_core].send(FlowJob { flow_id });
                *next_core = (*next_core + 1) % producers.len();

                w.start(*flow_lifetime, SchedEvent::FlowEnd);
                w.start(*interval_ticks, SchedEvent::NewFlow);
            }
            SchedEvent::FlowEnd => {
                *flows_live -= 1;
            }
            SchedEvent::RampTick => {
                let Some(controller) = ramp.as_mut() else { return };
                // the wheel just released the fired timer
                controller.disarm();

                let step = controller.step();
                *interval_ticks = w.config().duration_to_ticks(step.interval());
                trace!(rate = step.rate(), interval = *interval_ticks, "ramp step");

                if !*flow_timer_started {
                    *flow_timer_started = true;
                    w.start(*interval_ticks, SchedEvent::NewFlow);
                }

                match step {
                    RampStep::Ramping { .. } => {
                        controller.arm(w.start(*ticks_per_step, SchedEvent::RampTick));
                    }
                    // self-terminates: timer already released, state dropped
                    RampStep::Steady { .. } => *ramp = None,
                }
            }
        });

        for producer in self.producers.iter_mut() {
            producer.flush_queued();
        }
    }

    /// Runs `n` ticks back to back, with no wall-clock pacing.
    pub fn run_ticks(&mut self, n: Tick) {
        for _ in 0..n {
            self.tick_once();
        }
    }

    pub fn flows_created(&self) -> u64 {
        self.flows_created
    }

    pub fn flows_live(&self) -> u64 {
        self.flows_live
    }

    /// Whether the ramp has finished and released itself.
    pub fn ramp_done(&self) -> bool {
        self.ramp.is_none()
    }

    /// Items currently parked across all reschedule queues.
    pub fn queued(&self) -> usize {
        self.producers.iter().map(Producer::queued).sum()
    }

    /// Cancels the ramp timer, detaches all pending wheel timers and makes
    /// a final attempt to flush parked ring items.
    pub fn shutdown(&mut self) {
        if let Some(mut controller) = self.ramp.take() {
            controller.stop(&mut self.wheel);
        }
        self.wheel.detach_all(drop);
        for producer in self.producers.iter_mut() {
            producer.flush_queued();
        }
        debug!(flows = self.flows_created, queued = self.queued(), "scheduler core stopped");
    }
}

/// A data core: the consuming ring end, this core's VM clone and the
/// packet scratch buffer the VM writes into.
#[derive(Debug)]
pub struct DataCore {
    ctx: CoreContext,
    consumer: Consumer<FlowJob>,
    vm: CompiledVm,
    pkt: BytesMut,
    packets: u64,
}

impl DataCore {
    pub fn new(
        ctx: CoreContext,
        consumer: Consumer<FlowJob>,
        vm: CompiledVm,
        template: &[u8],
    ) -> Self {
        let mut pkt = BytesMut::from(template);
        if pkt.len() < vm.required_len() {
            pkt.resize(vm.required_len(), 0);
        }
        Self { ctx, consumer, vm, pkt, packets: 0 }
    }

    pub fn core_id(&self) -> u8 {
        self.ctx.core_id()
    }

    /// Drains every job currently in the ring, building one packet per
    /// flow job. Returns the number handled; never blocks.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(_job) = self.consumer.try_recv() {
            self.vm.execute(&mut self.pkt);
            self.packets += 1;
            handled += 1;
        }
        handled
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Current contents of the packet scratch buffer.
    pub fn pkt(&self) -> &[u8] {
        &self.pkt
    }
}

/// Per-run counters from a finished pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub flows_created: u64,
    /// Flows still live when the pipeline stopped.
    pub flows_live: u64,
    /// Packets built, per data core.
    pub packets: Vec<u64>,
}

/// Handle to a running pipeline. Dropping it does not stop the threads;
/// call [`join`](Self::join).
#[derive(Debug)]
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    scheduler: thread::JoinHandle<(u64, u64)>,
    data: Vec<thread::JoinHandle<u64>>,
}

impl PipelineHandle {
    /// Signals every core to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stops the pipeline and collects the per-core reports.
    pub fn join(self) -> PipelineReport {
        self.stop();
        let (flows_created, flows_live) =
            self.scheduler.join().expect("scheduler core panicked");
        let packets =
            self.data.into_iter().map(|h| h.join().expect("data core panicked")).collect();
        PipelineReport { flows_created, flows_live, packets }
    }
}

/// Spawns the scheduler core and `cores` data cores on named threads, all
/// released together through a start barrier. The VM template is split
/// across the data cores before anything runs; every setup error surfaces
/// here, pre-flight.
pub fn spawn_pipeline(
    config: &PipelineConfig,
    template: &StreamVm,
    template_pkt: &[u8],
    cores: u8,
) -> Result<PipelineHandle, PipelineError> {
    let vms = VmSplitter::new(cores)?.split(template, config.seed)?;

    let mut producers = Vec::with_capacity(cores as usize);
    let mut consumers = Vec::with_capacity(cores as usize);
    for _ in 0..cores {
        let (tx, rx) = ring(config.ring_capacity)?;
        producers.push(tx);
        consumers.push(rx);
    }

    let mut scheduler = SchedulerCore::new(config, producers)?;

    let stop = Arc::new(AtomicBool::new(false));
    let barrier = StartBarrier::new(cores as usize + 1);

    let scheduler_thread = {
        let stop = Arc::clone(&stop);
        let barrier = barrier.clone();
        let mut clock = TickClock::for_wheel(&config.wheel);
        thread::Builder::new().name("flowgen-sched".into()).spawn(move || {
            barrier.wait();
            while !stop.load(Ordering::Acquire) {
                clock.wait_next();
                scheduler.tick_once();
            }
            scheduler.shutdown();
            (scheduler.flows_created(), scheduler.flows_live())
        })?
    };

    let mut data_threads = Vec::with_capacity(cores as usize);
    for (i, (consumer, vm)) in consumers.into_iter().zip(vms).enumerate() {
        let stop = Arc::clone(&stop);
        let barrier = barrier.clone();
        let ctx = CoreContext::new(i as u8, config.seed);
        let mut core = DataCore::new(ctx, consumer, vm, template_pkt);
        let handle = thread::Builder::new().name(format!("flowgen-data-{i}")).spawn(move || {
            barrier.wait();
            loop {
                if core.poll() == 0 {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    thread::yield_now();
                }
            }
            // one last sweep for anything flushed during shutdown
            core.poll();
            debug!(core = core.core_id(), packets = core.packets(), "data core stopped");
            core.packets()
        })?;
        data_threads.push(handle);
    }

    Ok(PipelineHandle { stop, scheduler: scheduler_thread, data: data_threads })
}
