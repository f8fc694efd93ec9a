// SessionRunner - tokio loop driving a RecordingSession
//
// Owns the analysis interval task and, when a metronome is attached, the
// metronome poll task. Stopping aborts both tasks before the session itself
// is stopped, so no tick can race the final artifact. A session that stops
// itself (device loss, sink failure) takes the metronome down with it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::metronome::{MetronomeHandle, MetronomeRunner};
use crate::clock::Clock;
use crate::error::{log_capture_error, log_session_error, SessionError};
use crate::session::{RecordingSession, SessionPhase, SessionState, SessionSummary};

/// Metronome to drive alongside the analysis loop
pub struct MetronomeDrive {
    pub handle: MetronomeHandle,
    pub poll_interval: Duration,
}

/// Drives `tick` on a fixed cadence and publishes each snapshot
pub struct SessionRunner {
    session: Arc<Mutex<RecordingSession>>,
    clock: Arc<dyn Clock>,
    analysis_task: Option<JoinHandle<()>>,
    metronome: Option<MetronomeHandle>,
    metronome_runner: Arc<Mutex<Option<MetronomeRunner>>>,
}

fn stop_metronome_runner(runner: &Mutex<Option<MetronomeRunner>>) {
    let taken = match runner.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(mut runner) = taken {
        runner.stop();
    }
}

fn lock_session(
    session: &Arc<Mutex<RecordingSession>>,
) -> Result<MutexGuard<'_, RecordingSession>, SessionError> {
    session.lock().map_err(|_| SessionError::LockPoisoned {
        component: "recording session".to_string(),
    })
}

impl SessionRunner {
    /// Start the session and spawn its loops on the current tokio runtime
    pub fn start(
        mut session: RecordingSession,
        clock: Arc<dyn Clock>,
        analysis_interval: Duration,
        metronome: Option<MetronomeDrive>,
        state_tx: Option<broadcast::Sender<SessionState>>,
    ) -> Result<Self, SessionError> {
        // The session stops the metronome whenever it finishes on its own
        if let Some(drive) = &metronome {
            if !session.has_metronome() {
                session = session.with_metronome(drive.handle.clone());
            }
        }
        session.start(clock.now_ms())?;
        if let Some(tx) = &state_tx {
            let _ = tx.send(session.state());
        }

        let (handle, runner) = match metronome {
            Some(drive) => {
                drive.handle.start()?;
                let runner = MetronomeRunner::spawn(drive.handle.clone(), drive.poll_interval);
                (Some(drive.handle), Some(runner))
            }
            None => (None, None),
        };
        let metronome_runner = Arc::new(Mutex::new(runner));

        let session = Arc::new(Mutex::new(session));
        let analysis_task = tokio::spawn(Self::analysis_loop(
            Arc::clone(&session),
            Arc::clone(&clock),
            analysis_interval.max(Duration::from_millis(1)),
            Arc::clone(&metronome_runner),
            state_tx,
        ));

        Ok(Self {
            session,
            clock,
            analysis_task: Some(analysis_task),
            metronome: handle,
            metronome_runner,
        })
    }

    async fn analysis_loop(
        session: Arc<Mutex<RecordingSession>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        metronome_runner: Arc<Mutex<Option<MetronomeRunner>>>,
        state_tx: Option<broadcast::Sender<SessionState>>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; start() already snapshotted
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let state = {
                let mut guard = match lock_session(&session) {
                    Ok(guard) => guard,
                    Err(err) => {
                        log_session_error(&err, "analysis loop");
                        break;
                    }
                };
                match guard.tick(clock.now_ms()) {
                    Ok(state) => state,
                    Err(err) => {
                        log_session_error(&err, "tick");
                        guard.state()
                    }
                }
            };
            let stopped = state.phase == SessionPhase::Stopped;
            if let Some(tx) = &state_tx {
                let _ = tx.send(state);
            }
            if stopped {
                tracing::info!("[SessionRunner] Session stopped itself, analysis loop exiting");
                stop_metronome_runner(&metronome_runner);
                break;
            }
        }
    }

    fn abort_loops(&mut self) {
        if let Some(task) = self.analysis_task.take() {
            task.abort();
        }
        stop_metronome_runner(&self.metronome_runner);
        if let Some(handle) = &self.metronome {
            if let Err(err) = handle.stop() {
                log_capture_error(&err, "runner metronome stop");
            }
        }
    }

    /// Whether the metronome poll loop is still alive
    pub fn metronome_running(&self) -> bool {
        match self.metronome_runner.lock() {
            Ok(runner) => runner.as_ref().is_some_and(MetronomeRunner::is_running),
            Err(_) => false,
        }
    }

    pub fn state(&self) -> Result<SessionState, SessionError> {
        Ok(lock_session(&self.session)?.state())
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        lock_session(&self.session)?.pause(self.clock.now_ms())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        lock_session(&self.session)?.resume(self.clock.now_ms())
    }

    /// Abort both loops, then stop the session
    ///
    /// A session that already stopped on device loss returns its summary.
    pub fn stop(&mut self) -> Result<SessionSummary, SessionError> {
        self.abort_loops();
        let mut session = lock_session(&self.session)?;
        if session.phase() == SessionPhase::Stopped {
            return session.summary().cloned().ok_or(SessionError::AlreadyStopped);
        }
        session.stop(self.clock.now_ms())
    }

    /// Abort both loops and drop the recording
    pub fn discard(&mut self) -> Result<(), SessionError> {
        self.abort_loops();
        lock_session(&self.session)?.discard()
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        self.abort_loops();
    }
}
