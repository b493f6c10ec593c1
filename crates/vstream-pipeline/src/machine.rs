//! Explicit pipeline state machine.
//!
//! # Phases
//!
//! ```text
//!            source exhausted / partial frame / cancelled
//! Running ─────────────────────────────────────────────→ Draining
//!    │                                                      │ need-more-input
//!    │ device lost, incompatible params, unknown status     ↓
//!    └──────────────────────→ Fatal ←──────────────────── Done
//! ```
//!
//! [`step`] maps `(kind, phase, outcome, input)` to the next phase and the
//! [`Action`] the driver executes.  Drivers never branch on engine statuses
//! themselves; they only carry out the action.

use tracing::{debug, info, warn};

use vstream_core::codec_traits::SubmitStatus;
use vstream_core::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Input is still flowing into the engine.
    Running,
    /// No new input; the engine flushes what it holds.
    Draining,
    Done,
    Fatal,
}

impl Phase {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Fatal)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Decode,
    Encode,
}

/// Payload-free view of a [`SubmitStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ready,
    NeedMoreInput,
    NeedMoreSurface,
    DeviceBusy,
    DeviceLost,
    ParamsChanged,
    IncompatibleParams,
    BufferTooSmall,
    Unknown(i32),
}

impl<T> From<&SubmitStatus<T>> for SubmitOutcome {
    fn from(status: &SubmitStatus<T>) -> Self {
        match status {
            SubmitStatus::Ready(..) => Self::Ready,
            SubmitStatus::NeedMoreInput => Self::NeedMoreInput,
            SubmitStatus::NeedMoreSurface => Self::NeedMoreSurface,
            SubmitStatus::DeviceBusy => Self::DeviceBusy,
            SubmitStatus::DeviceLost => Self::DeviceLost,
            SubmitStatus::ParamsChanged => Self::ParamsChanged,
            SubmitStatus::IncompatibleParams => Self::IncompatibleParams,
            SubmitStatus::BufferTooSmall => Self::BufferTooSmall,
            SubmitStatus::Unknown(code) => Self::Unknown(*code),
        }
    }
}

/// State of the compressed input as seen by the decode driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSignal {
    /// The last refill read fresh bytes, or the caller does not track input.
    Flowing,
    /// The last refill read nothing; leftover bytes can never complete a unit.
    Dry,
    /// The buffer is full and the engine still cannot complete a unit.
    Full,
}

/// Why the pipeline aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    DeviceLost,
    IncompatibleParams,
    Unknown(i32),
    /// A status that this pipeline kind never expects.
    Unexpected {
        kind: PipelineKind,
        outcome: SubmitOutcome,
    },
}

impl From<AbortReason> for EngineError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::DeviceLost => EngineError::DeviceLost,
            AbortReason::IncompatibleParams => EngineError::IncompatibleParams,
            AbortReason::Unknown(code) => EngineError::UnknownStatus(code),
            AbortReason::Unexpected { kind, outcome } => {
                let msg = format!("engine returned unexpected status {outcome:?}");
                match kind {
                    PipelineKind::Decode => EngineError::Decode(msg),
                    PipelineKind::Encode => EngineError::Encode(msg),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Poll the completion token and hand the output on.
    Emit,
    /// Move on to the next iteration.
    Continue,
    /// Sleep briefly and resubmit exactly the same input.
    Backoff,
    /// Enlarge the compressed buffer, then submit again.
    GrowBuffer,
    /// Stop; the phase is terminal.
    Finish,
    Abort(AbortReason),
}

/// The transition table.
pub fn step(
    kind: PipelineKind,
    phase: Phase,
    outcome: SubmitOutcome,
    input: InputSignal,
) -> (Phase, Action) {
    use PipelineKind::{Decode, Encode};
    use SubmitOutcome as O;

    if phase.is_terminal() {
        return (phase, Action::Finish);
    }
    let abort = |reason| (Phase::Fatal, Action::Abort(reason));

    match (kind, outcome) {
        (_, O::Ready) => (phase, Action::Emit),

        (_, O::NeedMoreInput) if phase == Phase::Draining => (Phase::Done, Action::Finish),
        (Decode, O::NeedMoreInput) => match input {
            InputSignal::Flowing => (Phase::Running, Action::Continue),
            InputSignal::Dry => (Phase::Draining, Action::Continue),
            InputSignal::Full => (Phase::Running, Action::GrowBuffer),
        },
        (Encode, O::NeedMoreInput) => (Phase::Running, Action::Continue),

        (_, O::DeviceBusy) => (phase, Action::Backoff),

        (Decode, O::NeedMoreSurface) => (phase, Action::Continue),
        (Decode, O::ParamsChanged) => (phase, Action::Continue),
        (Encode, O::BufferTooSmall) => (phase, Action::GrowBuffer),

        (_, O::DeviceLost) => abort(AbortReason::DeviceLost),
        (_, O::IncompatibleParams) => abort(AbortReason::IncompatibleParams),
        (_, O::Unknown(code)) => abort(AbortReason::Unknown(code)),
        (Decode, O::BufferTooSmall) | (Encode, O::NeedMoreSurface | O::ParamsChanged) => {
            abort(AbortReason::Unexpected { kind, outcome })
        }
    }
}

/// Why input stopped flowing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// The source reached end of stream on a unit or frame boundary.
    Exhausted,
    /// The source ended mid-frame.
    Partial,
    /// Reading the source failed.
    Failed,
    Cancelled,
}

/// Per-run loop state and counters.  Owned by one driver, passed by `&mut`.
#[derive(Debug)]
pub struct PipelineState {
    pub kind: PipelineKind,
    pub phase: Phase,
    /// Decode: frames written out.  Encode: frames submitted.
    pub frames: u64,
    /// Encode: packets written out.
    pub packets: u64,
    pub busy_retries: u64,
    pub polls: u64,
    pub buffer_grows: u64,
    pub params_changes: u64,
    pub cancelled: bool,
    consecutive_busy: u32,
}

impl PipelineState {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            kind,
            phase: Phase::Running,
            frames: 0,
            packets: 0,
            busy_retries: 0,
            polls: 0,
            buffer_grows: 0,
            params_changes: 0,
            cancelled: false,
            consecutive_busy: 0,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Apply the transition table and return the action to execute.
    pub fn step(&mut self, outcome: SubmitOutcome, input: InputSignal) -> Action {
        let (next, action) = step(self.kind, self.phase, outcome, input);

        if outcome != SubmitOutcome::DeviceBusy {
            self.consecutive_busy = 0;
        }
        if outcome == SubmitOutcome::ParamsChanged && !matches!(action, Action::Abort(_)) {
            self.params_changes += 1;
            info!(kind = ?self.kind, "Stream parameters changed");
        }
        if self.kind == PipelineKind::Decode
            && outcome == SubmitOutcome::NeedMoreInput
            && input == InputSignal::Dry
            && next == Phase::Draining
        {
            warn!("Source is dry with an incomplete unit buffered; discarding it and draining");
        }
        self.transition(next);
        action
    }

    /// Stop feeding input and start draining.
    pub fn end_input(&mut self, event: InputEvent) {
        if self.phase != Phase::Running {
            return;
        }
        match event {
            InputEvent::Exhausted => debug!(kind = ?self.kind, "Input exhausted"),
            InputEvent::Partial => debug!(kind = ?self.kind, "Input ended mid-frame"),
            InputEvent::Failed => warn!(kind = ?self.kind, "Input failed; draining"),
            InputEvent::Cancelled => {
                self.cancelled = true;
                info!(kind = ?self.kind, "Cancellation requested; draining");
            }
        }
        self.transition(Phase::Draining);
    }

    /// Count one busy resubmission, failing once `max_retries` consecutive
    /// attempts have been spent.
    pub fn note_busy(&mut self, max_retries: u32) -> Result<()> {
        self.consecutive_busy += 1;
        self.busy_retries += 1;
        if self.consecutive_busy > max_retries {
            self.phase = Phase::Fatal;
            return Err(EngineError::BusyTimeout {
                attempts: self.consecutive_busy,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: Phase) {
        if next != self.phase {
            debug!(kind = ?self.kind, from = ?self.phase, to = ?next, "Pipeline phase change");
            self.phase = next;
        }
    }
}
