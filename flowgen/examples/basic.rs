//! Ramps a two-core pipeline up to 5000 flows per second, with source
//! address and port striped across the cores.

use std::{thread, time::Duration};

use flowgen::{
    spawn_pipeline, FlowVar, PipelineConfig, RampConfig, StreamVm, ValueSize, VarOp, WriteField,
};

fn main() {
    tracing_subscriber::fmt::init();

    let ip = 0x0a00_0001u64;
    let mut program = StreamVm::new();
    program
        .push(FlowVar::new("src_ip", ValueSize::U32, VarOp::Inc, ip, ip, ip + 0xfffe))
        .push(FlowVar::new("src_port", ValueSize::U16, VarOp::Inc, 1024, 1024, 65_000))
        .push(WriteField::new("src_ip", 26))
        .push(WriteField::new("src_port", 34));

    let config = PipelineConfig {
        ramp: RampConfig { rampup_secs: 3, target_cps: 5000.0 },
        flow_lifetime: Duration::from_millis(5),
        ..Default::default()
    };

    let template_pkt = [0u8; 64];
    let handle = spawn_pipeline(&config, &program, &template_pkt, 2).expect("pipeline setup");

    thread::sleep(Duration::from_secs(4));
    let report = handle.join();

    println!(
        "created {} flows ({} still live), packets per core: {:?}",
        report.flows_created, report.flows_live, report.packets
    );
}
