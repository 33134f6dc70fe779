//! Background thread that owns a `SessionController` and ticks it.
//!
//! Every state transition happens on the driver thread. Callers talk to it through
//! `SessionHandle`, which sends commands over a channel and waits for the reply.
//! Display updates are read through the shared `DisplayWatch`, never through the
//! driver.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::controller::{Executor, SessionController, SessionError};
use super::sink::DisplayWatch;
use super::state::{DisplayState, SessionStats, SessionStatus};
use crate::ingest::FrameSource;
use crate::matcher::Matcher;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(10);

enum Command {
    Start(Sender<Result<(), SessionError>>),
    Stop(Sender<()>),
    Status(Sender<SessionStatus>),
    Stats(Sender<SessionStats>),
    Shutdown,
}

pub struct SessionDriver<S, M, E> {
    controller: SessionController<S, M, E>,
}

impl<S, M, E> SessionDriver<S, M, E>
where
    S: FrameSource + 'static,
    M: Matcher,
    E: Executor + 'static,
{
    pub fn new(controller: SessionController<S, M, E>) -> Self {
        Self { controller }
    }

    /// Move the controller onto its own thread. The tick cadence comes from the
    /// controller's `SessionTiming`.
    pub fn spawn(self) -> Result<SessionHandle> {
        let watch = self.controller.watch();
        let tick_interval = self.controller.timing().tick_interval;
        let (commands, inbox) = mpsc::channel();
        let mut controller = self.controller;

        let join = std::thread::Builder::new()
            .name("session-driver".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now();
                let mut last_health_log = Instant::now();
                let mut last_stats = controller.stats();
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match inbox.recv_timeout(wait) {
                        Ok(Command::Start(reply)) => {
                            let _ = reply.send(controller.start());
                            next_tick = Instant::now();
                        }
                        Ok(Command::Stop(reply)) => {
                            controller.stop();
                            let _ = reply.send(());
                        }
                        Ok(Command::Status(reply)) => {
                            let _ = reply.send(controller.status());
                        }
                        Ok(Command::Stats(reply)) => {
                            let _ = reply.send(controller.stats());
                        }
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            let now = Instant::now();
                            controller.tick(now);
                            if now.duration_since(last_health_log) >= HEALTH_LOG_INTERVAL {
                                let stats = controller.stats();
                                log_health(controller.status(), &last_stats, &stats);
                                last_stats = stats;
                                last_health_log = now;
                            }
                            next_tick += tick_interval;
                            if next_tick < now {
                                // Fell behind; skip missed ticks instead of bursting.
                                next_tick = now + tick_interval;
                            }
                        }
                    }
                }
                controller.stop();
                log::debug!("session driver exited");
            })
            .map_err(|e| anyhow!("failed to spawn session driver: {}", e))?;

        Ok(SessionHandle {
            commands,
            watch,
            join: Some(join),
        })
    }
}

fn log_health(status: SessionStatus, before: &SessionStats, after: &SessionStats) {
    if status != SessionStatus::Running {
        return;
    }
    let failed = after.failed - before.failed;
    if failed > 0 {
        log::warn!(
            "matcher failures: {} of {} calls in the last {}s",
            failed,
            after.dispatched - before.dispatched,
            HEALTH_LOG_INTERVAL.as_secs()
        );
    }
    log::info!(
        "session dispatched={} accepted={} rejected={} stale={} failed={} no_frame={}",
        after.dispatched,
        after.accepted,
        after.rejected,
        after.stale,
        after.failed,
        after.no_frame
    );
}

/// Control surface for a running `SessionDriver`. Dropping it shuts the driver down.
pub struct SessionHandle {
    commands: Sender<Command>,
    watch: DisplayWatch,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start verifying. Blocks until the capture device is bound or has failed.
    pub fn start(&self) -> Result<(), SessionError> {
        let (reply, answer) = mpsc::channel();
        self.commands
            .send(Command::Start(reply))
            .map_err(|_| SessionError::DriverGone)?;
        answer.recv().map_err(|_| SessionError::DriverGone)?
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        let (reply, answer) = mpsc::channel();
        self.commands
            .send(Command::Stop(reply))
            .map_err(|_| SessionError::DriverGone)?;
        answer.recv().map_err(|_| SessionError::DriverGone)
    }

    pub fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply, answer) = mpsc::channel();
        self.commands
            .send(Command::Status(reply))
            .map_err(|_| SessionError::DriverGone)?;
        answer.recv().map_err(|_| SessionError::DriverGone)
    }

    pub fn stats(&self) -> Result<SessionStats, SessionError> {
        let (reply, answer) = mpsc::channel();
        self.commands
            .send(Command::Stats(reply))
            .map_err(|_| SessionError::DriverGone)?;
        answer.recv().map_err(|_| SessionError::DriverGone)
    }

    pub fn display(&self) -> DisplayState {
        self.watch.current()
    }

    pub fn watch(&self) -> DisplayWatch {
        self.watch.clone()
    }

    /// Stop the session and join the driver thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.join_driver()
    }

    fn join_driver(&mut self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("session driver thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Err(e) = self.join_driver() {
            log::error!("{}", e);
        }
    }
}

/// Poll `watch` until `predicate` holds or `timeout` elapses.
pub fn wait_for_display<F>(
    watch: &DisplayWatch,
    timeout: Duration,
    predicate: F,
) -> Option<DisplayState>
where
    F: Fn(&DisplayState) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let state = watch.current();
        if predicate(&state) {
            return Some(state);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
