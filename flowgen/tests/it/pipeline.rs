use std::{thread, time::Duration};

use flowgen::{
    ring::ring, spawn_pipeline, CoreContext, DataCore, FlowVar, PipelineConfig, RampConfig,
    SchedulerCore, StreamVm, ValueSize, VarOp, VmSplitter, WriteField,
};

fn program() -> StreamVm {
    let mut vm = StreamVm::new();
    vm.push(FlowVar::new("src_ip", ValueSize::U32, VarOp::Inc, 0, 0, 0xffff))
        .push(FlowVar::new("src_port", ValueSize::U16, VarOp::Inc, 1024, 1024, 65_000))
        .push(WriteField::new("src_ip", 26))
        .push(WriteField::new("src_port", 34));
    vm
}

fn config() -> PipelineConfig {
    PipelineConfig {
        ramp: RampConfig { rampup_secs: 2, target_cps: 2000.0 },
        flow_lifetime: Duration::from_millis(2),
        ..Default::default()
    }
}

#[test]
fn deterministic_pipeline_delivers_every_flow_to_a_data_core() {
    let config = config();
    let cores = 3u8;

    let mut producers = Vec::new();
    let mut consumers = Vec::new();
    for _ in 0..cores {
        let (tx, rx) = ring(config.ring_capacity).unwrap();
        producers.push(tx);
        consumers.push(rx);
    }

    let vms = VmSplitter::new(cores).unwrap().split(&program(), config.seed).unwrap();
    let mut data: Vec<DataCore> = consumers
        .into_iter()
        .zip(vms)
        .enumerate()
        .map(|(i, (rx, vm))| {
            DataCore::new(CoreContext::new(i as u8, config.seed), rx, vm, &[0u8; 64])
        })
        .collect();

    let mut sched = SchedulerCore::new(&config, producers).unwrap();

    // two simulated seconds of scheduling, draining the rings as we go
    for _ in 0..2 {
        for _ in 0..config.wheel.ticks_per_second() {
            sched.tick_once();
            for core in data.iter_mut() {
                core.poll();
            }
        }
    }
    assert!(sched.ramp_done());

    let built: u64 = data.iter().map(DataCore::packets).sum();
    assert_eq!(built, sched.flows_created());
    assert!(built > 2000, "expected a couple thousand flows, got {built}");

    // every core did a share of the work
    for core in &data {
        assert!(core.packets() > 0);
    }

    sched.shutdown();
}

#[test]
fn live_pipeline_runs_and_reports() {
    let _ = tracing_subscriber::fmt::try_init();

    let handle = spawn_pipeline(&config(), &program(), &[0u8; 64], 2).unwrap();

    thread::sleep(Duration::from_millis(1500));
    let report = handle.join();

    assert!(report.flows_created > 100, "flows {}", report.flows_created);
    assert_eq!(report.packets.len(), 2);

    let delivered: u64 = report.packets.iter().sum();
    assert!(delivered > 0);
    assert!(delivered <= report.flows_created);
}

#[test]
fn misconfigured_pipeline_fails_before_any_thread_starts() {
    let mut bad = config();
    bad.ring_capacity = 1000; // not a power of two
    assert!(spawn_pipeline(&bad, &program(), &[0u8; 64], 2).is_err());

    let mut bad = config();
    bad.wheel.levels = 9;
    assert!(spawn_pipeline(&bad, &program(), &[0u8; 64], 2).is_err());

    assert!(spawn_pipeline(&config(), &program(), &[0u8; 64], 0).is_err());
}
