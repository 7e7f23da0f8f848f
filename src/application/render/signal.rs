//! Render lifecycle as an explicit state machine.
//!
//! Engine callbacks, engine completion and the deadline all arrive as
//! [`RenderSignal`]s. [`RenderMachine::apply`] turns each signal into the
//! effects the coordinator must carry out; it performs no I/O itself.

use std::time::Duration;

use bytes::Bytes;

use super::types::{PostStreamFailure, PrerenderFailure, RenderError};

#[derive(Debug)]
pub enum RenderSignal {
    /// Enough output exists to start the response.
    ShellReady,
    /// Rendering failed before anything was safe to send.
    ShellError(RenderError),
    /// A recoverable error inside the render tree.
    RenderError(RenderError),
    /// A fragment of markup produced by the engine.
    Chunk(Bytes),
    /// The engine's render routine returned.
    Completed(Result<(), RenderError>),
    /// The deadline fired.
    AbortRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Streaming,
    Closed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }
}

#[derive(Debug, PartialEq)]
pub enum Effect {
    /// Build the response and resolve the outcome. `errored` forces a 500 status.
    Ready { errored: bool },
    /// Resolve the outcome as a failure; no response is built.
    Fail(PrerenderFailure),
    /// Append bytes to the response body.
    Forward(Bytes),
    /// Report a failure that happened after the response was committed.
    Report(PostStreamFailure),
    /// Log an error raised before the shell was ready.
    Warn(RenderError),
    /// Close the response body normally.
    Close,
    /// Terminate the engine.
    Abort,
    /// Close the response body, discarding anything not yet delivered.
    Truncate,
    /// Signal arrived in a phase where it has no effect.
    Ignore(&'static str),
}

#[derive(Debug)]
pub struct RenderMachine {
    phase: Phase,
    errored: bool,
    budget: Duration,
    held: Vec<Bytes>,
}

impl RenderMachine {
    /// `budget` is the total time allowed before the deadline fires.
    pub fn new(budget: Duration) -> Self {
        Self {
            phase: Phase::Pending,
            errored: false,
            budget,
            held: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn apply(&mut self, signal: RenderSignal) -> Vec<Effect> {
        match self.phase {
            Phase::Pending => self.apply_pending(signal),
            Phase::Streaming => self.apply_streaming(signal),
            Phase::Closed | Phase::Failed => vec![Effect::Ignore("render already finished")],
        }
    }

    fn apply_pending(&mut self, signal: RenderSignal) -> Vec<Effect> {
        match signal {
            RenderSignal::ShellReady => {
                self.phase = Phase::Streaming;
                self.ready_effects()
            }
            RenderSignal::ShellError(error) => self.fail(PrerenderFailure::Shell(error)),
            RenderSignal::RenderError(error) => {
                self.errored = true;
                vec![Effect::Warn(error)]
            }
            RenderSignal::Chunk(chunk) => {
                self.held.push(chunk);
                Vec::new()
            }
            RenderSignal::Completed(Ok(())) => {
                // Finished without announcing a shell: everything it wrote is the shell.
                self.phase = Phase::Closed;
                let mut effects = self.ready_effects();
                effects.push(Effect::Close);
                effects
            }
            RenderSignal::Completed(Err(error)) => self.fail(PrerenderFailure::Shell(error)),
            RenderSignal::AbortRequested => {
                let mut effects = vec![Effect::Abort];
                effects.extend(self.fail(PrerenderFailure::DeadlineExceeded(self.budget)));
                effects
            }
        }
    }

    fn apply_streaming(&mut self, signal: RenderSignal) -> Vec<Effect> {
        match signal {
            RenderSignal::ShellReady | RenderSignal::ShellError(_) => {
                vec![Effect::Ignore("shell already settled")]
            }
            RenderSignal::RenderError(error) => {
                vec![Effect::Report(PostStreamFailure::Render(error))]
            }
            RenderSignal::Chunk(chunk) => vec![Effect::Forward(chunk)],
            RenderSignal::Completed(Ok(())) => {
                self.phase = Phase::Closed;
                vec![Effect::Close]
            }
            RenderSignal::Completed(Err(error)) => {
                self.phase = Phase::Closed;
                vec![
                    Effect::Report(PostStreamFailure::Render(error)),
                    Effect::Close,
                ]
            }
            RenderSignal::AbortRequested => {
                self.phase = Phase::Closed;
                vec![
                    Effect::Abort,
                    Effect::Truncate,
                    Effect::Report(PostStreamFailure::DeadlineExceeded(self.budget)),
                ]
            }
        }
    }

    fn ready_effects(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(self.held.len() + 1);
        effects.push(Effect::Ready {
            errored: self.errored,
        });
        effects.extend(self.held.drain(..).map(Effect::Forward));
        effects
    }

    fn fail(&mut self, failure: PrerenderFailure) -> Vec<Effect> {
        self.phase = Phase::Failed;
        self.held.clear();
        vec![Effect::Fail(failure)]
    }
}
