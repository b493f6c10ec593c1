//! Engine session scope and completion polling.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::{trace, warn};

use vstream_core::codec_traits::{CompletionToken, EngineSession, PollStatus};
use vstream_core::error::{EngineError, Result};

use crate::machine::PipelineState;

/// Closes an engine session exactly once.
///
/// Create the guard before `init` so a failing init is still torn down.
/// [`SessionGuard::close`] reports the close error; `Drop` only logs it.
pub struct SessionGuard<'a, E: EngineSession + ?Sized> {
    engine: &'a mut E,
    open: bool,
}

impl<'a, E: EngineSession + ?Sized> SessionGuard<'a, E> {
    pub fn new(engine: &'a mut E) -> Self {
        Self { engine, open: true }
    }

    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.engine.close()
    }
}

impl<E: EngineSession + ?Sized> Deref for SessionGuard<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: EngineSession + ?Sized> DerefMut for SessionGuard<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: EngineSession + ?Sized> Drop for SessionGuard<'_, E> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.engine.close() {
                warn!(error = %e, "Engine session close failed during teardown");
            }
        }
    }
}

/// Poll `token` with a bounded wait until the engine reports completion.
pub fn wait_for_completion<E: EngineSession + ?Sized>(
    engine: &mut E,
    token: CompletionToken,
    timeout: Duration,
    state: &mut PipelineState,
) -> Result<()> {
    loop {
        state.polls += 1;
        match engine.poll(token, timeout)? {
            PollStatus::Done => return Ok(()),
            PollStatus::StillExecuting => {
                trace!(token = token.0, "Completion still executing");
            }
            PollStatus::Failed(code) => return Err(EngineError::Poll(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::PipelineKind;

    #[derive(Default)]
    struct Recorder {
        closes: u32,
        fail_close: bool,
        busy_polls: u32,
    }

    impl EngineSession for Recorder {
        fn poll(&mut self, _: CompletionToken, _: Duration) -> Result<PollStatus> {
            if self.busy_polls == 0 {
                return Ok(PollStatus::Done);
            }
            self.busy_polls -= 1;
            Ok(PollStatus::StillExecuting)
        }

        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            if self.fail_close {
                return Err(EngineError::DeviceLost);
            }
            Ok(())
        }
    }

    #[test]
    fn guard_closes_once_on_drop() {
        let mut recorder = Recorder::default();
        drop(SessionGuard::new(&mut recorder));
        assert_eq!(recorder.closes, 1);
    }

    #[test]
    fn explicit_close_reports_error_and_skips_drop() {
        let mut recorder = Recorder {
            fail_close: true,
            ..Recorder::default()
        };
        let guard = SessionGuard::new(&mut recorder);
        assert!(guard.close().is_err());
        assert_eq!(recorder.closes, 1);
    }

    #[test]
    fn polling_counts_every_attempt() {
        let mut recorder = Recorder {
            busy_polls: 3,
            ..Recorder::default()
        };
        let mut state = PipelineState::new(PipelineKind::Decode);
        wait_for_completion(&mut recorder, CompletionToken(0), Duration::from_millis(1), &mut state)
            .unwrap();
        assert_eq!(state.polls, 4);
    }
}
