// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Escalating termination of an extension process.
//!
//! The ladder is a small state machine: ask politely with `$/shutdown`, then
//! SIGTERM, SIGINT and finally SIGKILL, waiting a fixed time after each step.
//! Every wait ends early as soon as the process exits.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use keel_core::KeelError;
use keel_launcher::Signal;

/// Where the machine is on the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    /// Nothing sent yet.
    Requested,
    /// `$/shutdown` sent; waiting for the process to leave on its own.
    WaitingExit,
    SentTerm,
    SentInt,
    SentKill,
    /// The process is gone.
    Exited,
    /// SIGKILL went unanswered; the host gives up on the process.
    Unresponsive,
}

impl ShutdownStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ShutdownStage::Exited | ShutdownStage::Unresponsive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    Start,
    /// The wait armed by the previous step ran out.
    Elapsed,
    ProcessExited,
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Send `$/shutdown`, then wait.
    SendShutdown(Duration),
    /// Deliver the signal, then wait.
    Signal(Signal, Duration),
    Done(ShutdownStage),
    /// The event does not apply in the current stage.
    Ignore,
}

/// Waits between the steps of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownLadder {
    pub graceful: Duration,
    pub after_term: Duration,
    pub after_int: Duration,
    pub after_kill: Duration,
}

impl ShutdownLadder {
    pub const DEFAULT: ShutdownLadder = ShutdownLadder {
        graceful: Duration::from_secs(5),
        after_term: Duration::from_secs(1),
        after_int: Duration::from_secs(3),
        after_kill: Duration::from_secs(5),
    };
}

impl Default for ShutdownLadder {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownMachine {
    stage: ShutdownStage,
    ladder: ShutdownLadder,
}

impl ShutdownMachine {
    pub fn new(ladder: ShutdownLadder) -> Self {
        Self {
            stage: ShutdownStage::Requested,
            ladder,
        }
    }

    pub fn stage(&self) -> ShutdownStage {
        self.stage
    }

    pub fn advance(&mut self, event: ShutdownEvent) -> Transition {
        use ShutdownStage::*;

        if self.stage.is_terminal() {
            return Transition::Ignore;
        }
        let (next, transition) = match (self.stage, event) {
            (_, ShutdownEvent::ProcessExited) => (Exited, Transition::Done(Exited)),
            (Requested, ShutdownEvent::Start) => {
                (WaitingExit, Transition::SendShutdown(self.ladder.graceful))
            }
            (WaitingExit, ShutdownEvent::Elapsed) => (
                SentTerm,
                Transition::Signal(Signal::Term, self.ladder.after_term),
            ),
            (SentTerm, ShutdownEvent::Elapsed) => (
                SentInt,
                Transition::Signal(Signal::Int, self.ladder.after_int),
            ),
            (SentInt, ShutdownEvent::Elapsed) => (
                SentKill,
                Transition::Signal(Signal::Kill, self.ladder.after_kill),
            ),
            (SentKill, ShutdownEvent::Elapsed) => {
                (Unresponsive, Transition::Done(Unresponsive))
            }
            _ => return Transition::Ignore,
        };
        self.stage = next;
        transition
    }
}

/// A process the ladder can be run against.
#[async_trait]
pub trait Terminable: Send + Sync {
    /// Sends `$/shutdown` without waiting for the reply.
    fn request_shutdown(&self);

    fn signal(&self, signal: Signal) -> Result<(), KeelError>;

    fn has_exited(&self) -> bool;

    /// Resolves once the process has exited.
    async fn exited(&self);
}

/// Drives `target` down the ladder until it exits or SIGKILL goes unanswered.
pub async fn escalate(target: &dyn Terminable, ladder: ShutdownLadder, name: &str) -> ShutdownStage {
    let mut machine = ShutdownMachine::new(ladder);
    let mut transition = if target.has_exited() {
        machine.advance(ShutdownEvent::ProcessExited)
    } else {
        machine.advance(ShutdownEvent::Start)
    };

    loop {
        let wait = match transition {
            Transition::SendShutdown(wait) => {
                debug!(extension = %name, "requesting shutdown");
                target.request_shutdown();
                wait
            }
            Transition::Signal(signal, wait) => {
                info!(extension = %name, signal = %signal, "extension still running, escalating");
                if let Err(e) = target.signal(signal) {
                    debug!(extension = %name, signal = %signal, error = %e, "signal not delivered");
                }
                wait
            }
            Transition::Done(stage) => {
                if stage == ShutdownStage::Unresponsive {
                    warn!(extension = %name, "extension did not exit after SIGKILL");
                }
                return stage;
            }
            Transition::Ignore => return machine.stage(),
        };

        let event = tokio::select! {
            () = target.exited() => ShutdownEvent::ProcessExited,
            () = tokio::time::sleep(wait) => ShutdownEvent::Elapsed,
        };
        transition = machine.advance(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    use keel_launcher::{ExitNotifier, ExitStatus};

    #[test]
    fn full_ladder_without_exit() {
        let mut machine = ShutdownMachine::new(ShutdownLadder::DEFAULT);
        assert_eq!(
            machine.advance(ShutdownEvent::Start),
            Transition::SendShutdown(Duration::from_secs(5))
        );
        assert_eq!(
            machine.advance(ShutdownEvent::Elapsed),
            Transition::Signal(Signal::Term, Duration::from_secs(1))
        );
        assert_eq!(
            machine.advance(ShutdownEvent::Elapsed),
            Transition::Signal(Signal::Int, Duration::from_secs(3))
        );
        assert_eq!(
            machine.advance(ShutdownEvent::Elapsed),
            Transition::Signal(Signal::Kill, Duration::from_secs(5))
        );
        assert_eq!(
            machine.advance(ShutdownEvent::Elapsed),
            Transition::Done(ShutdownStage::Unresponsive)
        );
        assert_eq!(machine.advance(ShutdownEvent::ProcessExited), Transition::Ignore);
    }

    #[test]
    fn exit_short_circuits_any_stage() {
        let mut machine = ShutdownMachine::new(ShutdownLadder::DEFAULT);
        machine.advance(ShutdownEvent::Start);
        machine.advance(ShutdownEvent::Elapsed);
        assert_eq!(
            machine.advance(ShutdownEvent::ProcessExited),
            Transition::Done(ShutdownStage::Exited)
        );
        assert_eq!(machine.stage(), ShutdownStage::Exited);
    }

    #[test]
    fn elapsed_before_start_is_ignored() {
        let mut machine = ShutdownMachine::new(ShutdownLadder::DEFAULT);
        assert_eq!(machine.advance(ShutdownEvent::Elapsed), Transition::Ignore);
        assert_eq!(machine.stage(), ShutdownStage::Requested);
    }

    /// Records each step with its offset from the start.
    struct FakeProcess {
        started: Instant,
        steps: Mutex<Vec<(String, Duration)>>,
        exits_on: Option<Signal>,
        exit: ExitNotifier,
    }

    impl FakeProcess {
        fn new(exits_on: Option<Signal>) -> Self {
            Self {
                started: Instant::now(),
                steps: Mutex::new(Vec::new()),
                exits_on,
                exit: ExitNotifier::new(),
            }
        }

        fn record(&self, step: &str) {
            self.steps
                .lock()
                .unwrap()
                .push((step.to_string(), self.started.elapsed()));
        }

        fn steps(&self) -> Vec<(String, u64)> {
            self.steps
                .lock()
                .unwrap()
                .iter()
                .map(|(step, at)| (step.clone(), at.as_secs()))
                .collect()
        }
    }

    #[async_trait]
    impl Terminable for FakeProcess {
        fn request_shutdown(&self) {
            self.record("$/shutdown");
        }

        fn signal(&self, signal: Signal) -> Result<(), KeelError> {
            self.record(&signal.to_string());
            if self.exits_on == Some(signal) {
                self.exit.notify(ExitStatus::default());
            }
            Ok(())
        }

        fn has_exited(&self) -> bool {
            self.exit.has_exited()
        }

        async fn exited(&self) {
            self.exit.wait().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_process_walks_the_whole_ladder() {
        let process = FakeProcess::new(None);
        let stage = escalate(&process, ShutdownLadder::DEFAULT, "stuck").await;

        assert_eq!(stage, ShutdownStage::Unresponsive);
        assert_eq!(
            process.steps(),
            vec![
                ("$/shutdown".to_string(), 0),
                ("SIGTERM".to_string(), 5),
                ("SIGINT".to_string(), 6),
                ("SIGKILL".to_string(), 9),
            ]
        );
        assert_eq!(process.started.elapsed().as_secs(), 14);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_on_sigterm_stops_the_ladder() {
        let process = FakeProcess::new(Some(Signal::Term));
        let stage = escalate(&process, ShutdownLadder::DEFAULT, "polite").await;

        assert_eq!(stage, ShutdownStage::Exited);
        assert_eq!(process.steps().len(), 2);
        assert_eq!(process.started.elapsed().as_secs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn already_exited_process_needs_nothing() {
        let process = FakeProcess::new(None);
        process.exit.notify(ExitStatus::from_code(0));
        let stage = escalate(&process, ShutdownLadder::DEFAULT, "gone").await;
        assert_eq!(stage, ShutdownStage::Exited);
        assert!(process.steps().is_empty());
    }
}
