//! Timing logic validated under the discrete-event simulator, with no
//! live clocks or threads involved.

use std::{cell::RefCell, rc::Rc};

use flowgen::{
    EventAction, EventSim, RampConfig, RampController, SimEvent, SimTime, TimerWheel, WheelConfig,
};

/// Advances a timer wheel one tick per simulated tick, recording every
/// firing with its simulated time.
struct WheelDriver {
    wheel: TimerWheel<u32>,
    fired: Rc<RefCell<Vec<(SimTime, u32)>>>,
    until: SimTime,
}

impl SimEvent for WheelDriver {
    fn on_event(&mut self, sim: &mut EventSim) -> EventAction {
        let fired = Rc::clone(&self.fired);
        let now = sim.now();
        self.wheel.tick(&mut |_, v| fired.borrow_mut().push((now, v)));

        if now >= self.until {
            EventAction::Stop
        } else {
            EventAction::Reschedule(now + 1)
        }
    }
}

#[test]
fn wheel_timers_fire_at_their_simulated_times() {
    let mut wheel = TimerWheel::new(WheelConfig::default()).unwrap();
    wheel.start(50, 50);
    wheel.start(1024 + 3, 1027);
    wheel.start(2000, 2000);

    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut sim = EventSim::new();
    sim.add_event(1, Box::new(WheelDriver { wheel, fired: Rc::clone(&fired), until: 2500 }));

    sim.run();
    assert_eq!(*fired.borrow(), vec![(50, 50), (1027, 1027), (2000, 2000)]);
}

/// Steps the ramp once per simulated second and records each rate.
struct RampDriver {
    ramp: Option<RampController>,
    rates: Rc<RefCell<Vec<f64>>>,
}

impl SimEvent for RampDriver {
    fn on_event(&mut self, sim: &mut EventSim) -> EventAction {
        let Some(ramp) = self.ramp.as_mut() else { return EventAction::Done };

        let step = ramp.step();
        self.rates.borrow_mut().push(step.rate());

        if ramp.is_steady() {
            self.ramp = None;
            EventAction::Done
        } else {
            EventAction::Reschedule(sim.now() + 1)
        }
    }
}

#[test]
fn ramp_reaches_its_target_under_simulation() {
    let ramp = RampController::new(&RampConfig { rampup_secs: 8, target_cps: 4000.0 }).unwrap();
    let rates = Rc::new(RefCell::new(Vec::new()));

    let mut sim = EventSim::new();
    sim.add_event(1, Box::new(RampDriver { ramp: Some(ramp), rates: Rc::clone(&rates) }));
    let end = sim.run();

    let rates = rates.borrow();
    assert_eq!(end, 8);
    assert_eq!(rates.len(), 8);
    assert_eq!(*rates.last().unwrap(), 4000.0);
    assert!((rates[0] - 500.0).abs() < f64::EPSILON);
    assert!(rates.windows(2).all(|p| p[0] < p[1]));
}
