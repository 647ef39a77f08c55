#![allow(dead_code)]

use so101_calibration::MotorSpec;
use so101_feetech::{Operator, SessionError, SharedBus, Signal, SimulatedBus, SimulatedMotor, SweepRow};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Six STS3215s resting at mid travel.
pub fn so101_bus() -> SharedBus<SimulatedBus> {
    let sim = (1..=6).fold(SimulatedBus::new(), |sim, id| {
        sim.with_motor(id, SimulatedMotor::at(2048))
    });
    SharedBus::new(sim)
}

/// Plays the operator: moves the simulated joints when asked and answers
/// prompts from a script.
pub struct ScriptedOperator {
    bus: SharedBus<SimulatedBus>,
    /// Physical angle each joint is put at when a middle pose is requested.
    pub middles: BTreeMap<u8, u16>,
    /// Physical positions a joint passes through during its sweep.
    pub sweeps: BTreeMap<u8, Vec<u16>>,
    /// Reads that time out once the sweep of a joint starts.
    pub sweep_read_failures: BTreeMap<u8, u32>,
    /// Abort at this middle-pose request (1-based).
    pub abort_at_request: Option<usize>,
    /// Abort during the sweep instead of finishing it.
    pub abort_sweep: bool,
    pub retries: VecDeque<bool>,

    pub middle_requests: usize,
    pub retry_requests: Vec<String>,
    pub progress_updates: usize,
    polls: usize,
    polls_until_done: usize,
}

impl ScriptedOperator {
    pub fn new(bus: SharedBus<SimulatedBus>) -> Self {
        Self {
            bus,
            middles: BTreeMap::new(),
            sweeps: BTreeMap::new(),
            sweep_read_failures: BTreeMap::new(),
            abort_at_request: None,
            abort_sweep: false,
            retries: VecDeque::new(),
            middle_requests: 0,
            retry_requests: Vec::new(),
            progress_updates: 0,
            polls: 0,
            polls_until_done: 1,
        }
    }

    pub fn middle(mut self, id: u8, physical: u16) -> Self {
        self.middles.insert(id, physical);
        self
    }

    pub fn sweep(mut self, id: u8, physical: impl IntoIterator<Item = u16>) -> Self {
        self.sweeps.insert(id, physical.into_iter().collect());
        self
    }
}

impl Operator for ScriptedOperator {
    fn place_at_middle(&mut self, motors: &[MotorSpec]) -> Signal {
        self.middle_requests += 1;
        if self.abort_at_request == Some(self.middle_requests) {
            return Signal::Abort;
        }
        self.bus.exclusive(|sim| {
            for m in motors {
                if let Some(&physical) = self.middles.get(&m.id) {
                    sim.set_physical(m.id, physical);
                }
            }
        });
        Signal::Done
    }

    fn sweep_started(&mut self, motors: &[MotorSpec]) {
        self.polls = 0;
        self.polls_until_done = 1;
        self.bus.exclusive(|sim| {
            for m in motors {
                let failures = self.sweep_read_failures.get(&m.id).copied().unwrap_or(0);
                sim.fail_reads(m.id, failures);
                let path = self.sweeps.get(&m.id).map(Vec::as_slice).unwrap_or_default();
                sim.push_path(m.id, path.iter().copied());
                self.polls_until_done = self
                    .polls_until_done
                    .max(path.len() + failures as usize);
            }
        });
    }

    fn poll(&mut self, _timeout: Duration) -> Option<Signal> {
        self.polls += 1;
        if self.abort_sweep {
            return Some(Signal::Abort);
        }
        (self.polls >= self.polls_until_done).then_some(Signal::Done)
    }

    fn sweep_progress(&mut self, _rows: &[SweepRow<'_>]) {
        self.progress_updates += 1;
    }

    fn retry(&mut self, motor: &str, _error: &SessionError) -> bool {
        self.retry_requests.push(motor.to_string());
        self.retries.pop_front().unwrap_or(false)
    }
}
