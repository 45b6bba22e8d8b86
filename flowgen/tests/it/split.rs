use flowgen::{FlowVar, StreamVm, ValueSize, VarOp, VmSplitter, WriteField};

fn program() -> StreamVm {
    let mut vm = StreamVm::new();
    vm.push(FlowVar::new("src_ip", ValueSize::U32, VarOp::Inc, 0, 0, 9))
        .push(FlowVar::new("src_port", ValueSize::U16, VarOp::Inc, 1024, 1024, 1123))
        .push(WriteField::new("src_ip", 26))
        .push(WriteField::new("src_port", 34));
    vm
}

#[test]
fn three_core_union_covers_the_range_exactly_once() {
    let mut clones = VmSplitter::new(3).unwrap().split(&program(), 42).unwrap();

    let mut seen = Vec::new();
    for (expected_len, clone) in [4usize, 3, 3].iter().zip(clones.iter_mut()) {
        for _ in 0..*expected_len {
            clone.advance();
            seen.push(clone.value("src_ip").unwrap());
        }
    }

    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn per_core_packets_carry_the_partitioned_values() {
    let mut clones = VmSplitter::new(3).unwrap().split(&program(), 42).unwrap();

    let mut pkt = [0u8; 64];
    let mut fields = Vec::new();
    for clone in clones.iter_mut() {
        clone.execute(&mut pkt);
        fields.push(u32::from_be_bytes(pkt[26..30].try_into().unwrap()));
    }

    // first packet of core i starts at phase offset i
    assert_eq!(fields, vec![0, 1, 2]);
}

#[test]
fn both_variables_stride_by_the_core_count() {
    let mut clones = VmSplitter::new(2).unwrap().split(&program(), 42).unwrap();

    let mut ports = Vec::new();
    for _ in 0..3 {
        clones[1].advance();
        ports.push(clones[1].value("src_port").unwrap());
    }
    assert_eq!(ports, vec![1025, 1027, 1029]);
}

#[test]
fn cache_sizes_follow_the_remainder_rule() {
    let mut vm = program();
    vm.set_cache_size(10);
    let clones = VmSplitter::new(3).unwrap().split(&vm, 0).unwrap();
    let shares: Vec<u16> = clones.iter().map(|c| c.cache_size()).collect();
    assert_eq!(shares, vec![4, 3, 3]);

    let mut vm = program();
    vm.set_cache_size(2);
    let clones = VmSplitter::new(5).unwrap().split(&vm, 0).unwrap();
    let shares: Vec<u16> = clones.iter().map(|c| c.cache_size()).collect();
    assert_eq!(shares, vec![1, 1, 1, 1, 1]);
}
