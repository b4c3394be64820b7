use std::time::{Duration, Instant};

use crate::classifier::Confidences;

/// The action chosen for one processing cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Increase,
    Decrease,
    None,
}

/// Decide on a command from one set of confidences.
///
/// A command fires only if its score is strictly above `threshold` and
/// strictly above both other labels, background included. Ties never fire.
pub fn decide(confidences: &Confidences, threshold: f32) -> Command {
    let Confidences {
        background,
        increase,
        decrease,
    } = *confidences;

    if increase > threshold && increase > background && increase > decrease {
        Command::Increase
    } else if decrease > threshold && decrease > background && decrease > increase {
        Command::Decrease
    } else {
        Command::None
    }
}

/// Debouncer suppresses commands for a refractory period after each dispatch.
///
/// The window slides by one chunk while spanning a whole second, so a single
/// spoken word stays above threshold for many consecutive cycles.
#[derive(Clone, Debug)]
pub struct Debouncer {
    refractory: Duration,
    last_dispatch: Option<Instant>,
}

impl Debouncer {
    pub fn new(refractory: Duration) -> Self {
        Self {
            refractory,
            last_dispatch: None,
        }
    }

    /// Pass `command` through unless it lands inside the refractory period of
    /// the previous dispatch. Does not start a new period.
    pub fn check(&self, command: Command, now: Instant) -> Command {
        if command == Command::None {
            return Command::None;
        }
        if let Some(last) = self.last_dispatch {
            if now.saturating_duration_since(last) < self.refractory {
                return Command::None;
            }
        }
        command
    }

    /// Start a refractory period at `now`. Call only once a command was
    /// actually dispatched.
    pub fn arm(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }

    /// `check` and, if the command passes, `arm`.
    pub fn admit(&mut self, command: Command, now: Instant) -> Command {
        let command = self.check(command, now);
        if command != Command::None {
            self.arm(now);
        }
        command
    }
}

/// Decider combines thresholding with the debouncer.
#[derive(Clone, Debug)]
pub struct Decider {
    threshold: f32,
    debouncer: Debouncer,
}

impl Decider {
    pub fn new(threshold: f32, refractory: Duration) -> Self {
        Self {
            threshold,
            debouncer: Debouncer::new(refractory),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The command to dispatch for `confidences`, or `None` while a previous
    /// dispatch's refractory period is running. Report successful dispatches
    /// back through [`Decider::dispatched`].
    pub fn decide(&self, confidences: &Confidences, now: Instant) -> Command {
        let command = decide(confidences, self.threshold);
        let admitted = self.debouncer.check(command, now);
        if admitted != command {
            log::debug!("{:?} suppressed by refractory period", command);
        }
        admitted
    }

    pub fn dispatched(&mut self, now: Instant) {
        self.debouncer.arm(now);
    }
}
