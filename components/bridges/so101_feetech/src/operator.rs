//! The human side of a calibration session.
//!
//! A session never blocks on stdin itself. It asks an [`Operator`] to confirm
//! poses and, while a sweep runs, polls it with a timeout for a completion or
//! abort signal. [`ConsoleOperator`] implements this over a terminal: Enter
//! means done, Ctrl-C means abort.

use crate::error::SessionError;
use so101_calibration::MotorSpec;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The operator confirmed the current step.
    Done,
    /// Stop the session. The motor in progress is discarded.
    Abort,
}

/// Live state of one joint during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepRow<'a> {
    pub name: &'a str,
    /// `None` when the last read failed.
    pub current: Option<u16>,
    pub bounds: Option<(u16, u16)>,
}

pub trait Operator {
    /// Ask for `motors` to be placed at the middle of their travel. Blocks
    /// until the operator confirms or aborts; there is no timeout.
    fn place_at_middle(&mut self, motors: &[MotorSpec]) -> Signal;

    /// A sweep over `motors` is about to start.
    fn sweep_started(&mut self, _motors: &[MotorSpec]) {}

    /// Wait at most `timeout` for a signal.
    fn poll(&mut self, timeout: Duration) -> Option<Signal>;

    fn sweep_progress(&mut self, _rows: &[SweepRow<'_>]) {}

    /// A motor failed. Return `true` to restart it from the first step.
    fn retry(&mut self, motor: &str, error: &SessionError) -> bool;
}

// =========================================================================
// Terminal operator
// =========================================================================

enum Input {
    Line(String),
    Interrupt,
    Closed,
}

/// Operator on stdin/stdout.
///
/// A background thread forwards stdin lines and the Ctrl-C handler forwards
/// interrupts into one channel, so waiting is a timed receive.
pub struct ConsoleOperator {
    rx: Receiver<Input>,
    redraw_every: Duration,
    last_redraw: Option<Instant>,
}

impl ConsoleOperator {
    /// Install the Ctrl-C handler and start the stdin reader.
    ///
    /// Can only be called once per process.
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let interrupt = tx.clone();
        ctrlc::set_handler(move || {
            let _ = interrupt.send(Input::Interrupt);
        })
        .map_err(io::Error::other)?;

        std::thread::Builder::new()
            .name("operator-stdin".into())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(Input::Line(line)).is_err() {
                        return;
                    }
                }
                let _ = tx.send(Input::Closed);
            })?;

        Ok(Self {
            rx,
            redraw_every: Duration::from_millis(100),
            last_redraw: None,
        })
    }

    /// Throw away Enter presses made before the current question.
    fn drain(&mut self) -> Option<Signal> {
        loop {
            match self.rx.try_recv() {
                Ok(Input::Line(_)) => continue,
                Ok(Input::Interrupt) | Ok(Input::Closed) => return Some(Signal::Abort),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Signal::Abort),
            }
        }
    }

    fn wait_line(&mut self) -> Option<String> {
        match self.rx.recv() {
            Ok(Input::Line(line)) => Some(line),
            _ => None,
        }
    }
}

fn names(motors: &[MotorSpec]) -> String {
    motors
        .iter()
        .map(|m| m.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Operator for ConsoleOperator {
    fn place_at_middle(&mut self, motors: &[MotorSpec]) -> Signal {
        if let Some(signal) = self.drain() {
            return signal;
        }
        println!(
            "\nMove {} to the middle of its range of motion and press Enter (Ctrl-C aborts)...",
            names(motors)
        );
        match self.wait_line() {
            Some(_) => Signal::Done,
            None => Signal::Abort,
        }
    }

    fn sweep_started(&mut self, motors: &[MotorSpec]) {
        self.last_redraw = None;
        println!(
            "\nMove {} through the entire range of motion.\nRecording positions. Press Enter to stop...",
            names(motors)
        );
    }

    fn poll(&mut self, timeout: Duration) -> Option<Signal> {
        match self.rx.recv_timeout(timeout) {
            Ok(Input::Line(_)) => Some(Signal::Done),
            Ok(Input::Interrupt) | Ok(Input::Closed) => Some(Signal::Abort),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Signal::Abort),
        }
    }

    fn sweep_progress(&mut self, rows: &[SweepRow<'_>]) {
        let now = Instant::now();
        if self
            .last_redraw
            .is_some_and(|last| now.duration_since(last) < self.redraw_every)
        {
            return;
        }
        self.last_redraw = Some(now);

        let mut out = io::stdout().lock();
        let _ = write!(out, "\r");
        for row in rows {
            let current = row.current.map_or_else(|| "----".to_string(), |p| format!("{p:>4}"));
            let (min, max) = row.bounds.unwrap_or((0, 0));
            let _ = write!(out, "  {}:{current} [{min:>4}–{max:>4}]", row.name);
        }
        let _ = out.flush();
    }

    fn retry(&mut self, motor: &str, error: &SessionError) -> bool {
        if self.drain().is_some() {
            return false;
        }
        println!("\n{motor}: {error}\nRestart this motor from the first step? [Y/n]");
        match self.wait_line() {
            Some(answer) => !answer.trim().eq_ignore_ascii_case("n"),
            None => false,
        }
    }
}
