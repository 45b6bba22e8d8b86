use flowgen::{TimerWheel, WheelConfig};

#[test]
fn delay_50_fires_exactly_on_the_50th_tick() {
    let config = WheelConfig { buckets: 1024, levels: 3, bucket_time_usec: 20.0 };
    let mut wheel: TimerWheel<u32> = TimerWheel::new(config).unwrap();

    wheel.start(50, 7);

    let mut fired = 0;
    for _ in 0..49 {
        wheel.tick(&mut |_, _| fired += 1);
    }
    assert_eq!(fired, 0, "timer must not fire during the first 49 ticks");

    wheel.tick(&mut |_, v| {
        assert_eq!(v, 7);
        fired += 1;
    });
    assert_eq!(fired, 1);

    // and never again
    for _ in 0..2000 {
        wheel.tick(&mut |_, _| fired += 1);
    }
    assert_eq!(fired, 1);
}

#[test]
fn a_stopped_timer_never_fires() {
    let config = WheelConfig { buckets: 1024, levels: 3, bucket_time_usec: 20.0 };
    let mut wheel: TimerWheel<&str> = TimerWheel::new(config).unwrap();

    let keep = wheel.start(40, "keep");
    let cancel = wheel.start(40, "cancel");
    assert_eq!(wheel.stop(cancel), Some("cancel"));

    let mut fired = Vec::new();
    for _ in 0..100 {
        wheel.tick(&mut |_, v| fired.push(v));
    }
    assert_eq!(fired, vec!["keep"]);
    assert_eq!(wheel.stop(keep), None);
}
