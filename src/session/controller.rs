//! Realtime verification session controller.
//!
//! One owned state machine drives the loop: `Idle → Running → Stopped → Running ...`.
//! The owner calls `tick(now)` on a fast cadence; a tick first reconciles settled
//! matcher calls (`pump`) and then dispatches a new sample only when the session is
//! running, no call is outstanding, and `min_interval` has elapsed since the last
//! dispatch.
//!
//! Matcher calls run on an `Executor` and report back over a channel. Results are
//! never applied directly: `on_completion` checks the request id, the epoch, and
//! the issue time before the decision policy touches the display. `stop()` does not
//! abort in-flight calls; it bumps the epoch so their results are dropped on arrival.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use thiserror::Error;

use super::policy::{Decision, DecisionPolicy};
use super::sink::{DisplayWatch, ResultSink};
use super::state::{
    DisplayState, Session, SessionStats, SessionStatus, VerificationRequest, VerificationResult,
};
use crate::ingest::{CaptureError, FrameSource};
use crate::matcher::{MatchError, Matcher};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("session driver is not running")]
    DriverGone,
}

/// Loop cadence. `tick_interval` must be strictly shorter than `min_interval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTiming {
    pub tick_interval: Duration,
    pub min_interval: Duration,
    /// Forced completion deadline for one matcher call.
    pub response_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            min_interval: DEFAULT_MIN_INTERVAL,
            response_timeout: crate::matcher::http::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl SessionTiming {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        if self.tick_interval >= self.min_interval {
            return Err(anyhow!(
                "tick interval ({:?}) must be shorter than the minimum dispatch interval ({:?})",
                self.tick_interval,
                self.min_interval
            ));
        }
        if self.response_timeout.is_zero() {
            return Err(anyhow!("response timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Executors: where matcher calls run
// ----------------------------------------------------------------------------

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send {
    fn execute(&self, job: Job);
}

/// One short-lived thread per call. At most one call is in flight per session.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        // A lost job is recovered by the response timeout.
        if let Err(e) = std::thread::Builder::new()
            .name("verify-dispatch".to_string())
            .spawn(job)
        {
            log::error!("failed to spawn verification thread: {}", e);
        }
    }
}

/// Runs the call on the caller's thread. Single-shot tools and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// Result of one `tick`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    NotRunning,
    Busy,
    RateLimited,
    NoFrame,
    Dispatched { request_id: u64 },
}

/// How one completion was reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    Accepted,
    Rejected,
    Failed,
    Stale,
}

#[derive(Debug)]
struct PendingRequest {
    request_id: u64,
    epoch: u64,
    issued_at: Instant,
    deadline: Instant,
}

pub struct SessionController<S, M, E = ThreadExecutor> {
    source: S,
    matcher: Arc<M>,
    executor: E,
    policy: DecisionPolicy,
    timing: SessionTiming,
    session: Session,
    display: DisplayState,
    sink: ResultSink,
    pending: Option<PendingRequest>,
    next_request_id: u64,
    completions_tx: Sender<VerificationResult>,
    completions_rx: Receiver<VerificationResult>,
    stats: SessionStats,
}

impl<S: FrameSource, M: Matcher> SessionController<S, M, ThreadExecutor> {
    pub fn new(
        source: S,
        matcher: M,
        policy: DecisionPolicy,
        timing: SessionTiming,
        sink: ResultSink,
    ) -> Result<Self> {
        timing.validate()?;
        let (completions_tx, completions_rx) = mpsc::channel();
        Ok(Self {
            source,
            matcher: Arc::new(matcher),
            executor: ThreadExecutor,
            policy,
            timing,
            session: Session::new(),
            display: DisplayState::default(),
            sink,
            pending: None,
            next_request_id: 0,
            completions_tx,
            completions_rx,
            stats: SessionStats::default(),
        })
    }
}

impl<S: FrameSource, M: Matcher, E: Executor> SessionController<S, M, E> {
    pub fn with_executor<E2: Executor>(self, executor: E2) -> SessionController<S, M, E2> {
        SessionController {
            source: self.source,
            matcher: self.matcher,
            executor,
            policy: self.policy,
            timing: self.timing,
            session: self.session,
            display: self.display,
            sink: self.sink,
            pending: self.pending,
            next_request_id: self.next_request_id,
            completions_tx: self.completions_tx,
            completions_rx: self.completions_rx,
            stats: self.stats,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn epoch(&self) -> u64 {
        self.session.epoch
    }

    pub fn is_busy(&self) -> bool {
        self.session.busy
    }

    /// Number of verification calls awaiting reconciliation (0 or 1).
    pub fn in_flight(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    /// Read handle on the published display state.
    pub fn watch(&self) -> DisplayWatch {
        self.sink.watch()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// `Idle|Stopped → Running`. No-op while already running.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.session.status == SessionStatus::Running {
            return Ok(());
        }
        self.source
            .acquire()
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

        self.session.epoch += 1;
        self.session.status = SessionStatus::Running;
        self.session.busy = false;
        self.session.last_dispatch_at = None;
        self.pending = None;
        log::info!(
            "session started: epoch={} source={}",
            self.session.epoch,
            self.source.describe()
        );
        Ok(())
    }

    /// `Running → Stopped`. Outstanding calls are neutralized, not aborted.
    pub fn stop(&mut self) {
        if self.session.status != SessionStatus::Running {
            return;
        }
        self.session.status = SessionStatus::Stopped;
        self.source.release();
        self.session.epoch += 1;
        self.session.busy = false;
        self.pending = None;
        self.display = DisplayState::default();
        self.sink.publish(&self.display);
        log::info!("session stopped: epoch={}", self.session.epoch);
    }

    /// Reconcile settled calls, then dispatch if eligible.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        self.pump(now);

        if self.session.status != SessionStatus::Running {
            return TickOutcome::NotRunning;
        }
        if self.session.busy {
            return TickOutcome::Busy;
        }
        if let Some(last) = self.session.last_dispatch_at {
            if now.saturating_duration_since(last) < self.timing.min_interval {
                return TickOutcome::RateLimited;
            }
        }

        let sample = match self.source.capture() {
            Ok(sample) => sample,
            Err(CaptureError::NoFrameAvailable) => {
                self.stats.no_frame += 1;
                return TickOutcome::NoFrame;
            }
            Err(CaptureError::DeviceUnavailable(reason)) => {
                log::warn!("capture failed mid-session: {}", reason);
                self.stats.no_frame += 1;
                return TickOutcome::NoFrame;
            }
        };

        self.next_request_id += 1;
        let request = VerificationRequest {
            request_id: self.next_request_id,
            epoch: self.session.epoch,
            issued_at: now,
            sample,
        };
        let request_id = request.request_id;
        log::debug!(
            "dispatch request={} epoch={} sample={}",
            request_id,
            request.epoch,
            request.sample.fingerprint()
        );

        self.session.busy = true;
        self.session.last_dispatch_at = Some(now);
        self.pending = Some(PendingRequest {
            request_id,
            epoch: request.epoch,
            issued_at: now,
            deadline: now + self.timing.response_timeout,
        });
        self.stats.dispatched += 1;
        self.dispatch(request);
        TickOutcome::Dispatched { request_id }
    }

    /// Drain settled calls and force-complete the pending one past its deadline.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(result) = self.completions_rx.try_recv() {
            self.on_completion(result);
            handled += 1;
        }

        let timed_out = self
            .pending
            .as_ref()
            .filter(|pending| now >= pending.deadline)
            .map(|pending| VerificationResult {
                request_id: pending.request_id,
                epoch: pending.epoch,
                issued_at: pending.issued_at,
                outcome: Err(MatchError::Timeout),
            });
        if let Some(result) = timed_out {
            self.on_completion(result);
            handled += 1;
        }
        handled
    }

    /// Reconcile one settled call against the current session.
    fn on_completion(&mut self, result: VerificationResult) -> Reconciled {
        let is_pending = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.request_id == result.request_id);
        if is_pending {
            self.pending = None;
            self.session.busy = false;
        }

        if result.epoch != self.session.epoch {
            return self.drop_stale(result.request_id, result.epoch, "epoch changed");
        }
        if !is_pending {
            // Already reconciled by its timeout.
            return self.drop_stale(result.request_id, result.epoch, "request already settled");
        }

        let outcome = match result.outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.failed += 1;
                log::debug!("request={} failed: {}", result.request_id, e);
                return Reconciled::Failed;
            }
        };

        if let Some(last) = self.display.last_accepted_issued_at {
            if result.issued_at <= last {
                return self.drop_stale(
                    result.request_id,
                    result.epoch,
                    "older than displayed result",
                );
            }
        }

        let reconciled = match self.policy.decide(&outcome) {
            Decision::Accept {
                identity,
                score,
                data_integrity,
            } => {
                log::debug!(
                    "request={} accepted identity={} score={:.3}",
                    result.request_id,
                    identity,
                    score
                );
                self.display = DisplayState {
                    matched_identity: Some(identity),
                    similarity_score: Some(score),
                    data_integrity,
                    last_accepted_issued_at: Some(result.issued_at),
                };
                self.stats.accepted += 1;
                Reconciled::Accepted
            }
            Decision::Reject(reason) => {
                log::debug!("request={} rejected: {:?}", result.request_id, reason);
                self.display = DisplayState {
                    last_accepted_issued_at: Some(result.issued_at),
                    ..DisplayState::default()
                };
                self.stats.rejected += 1;
                Reconciled::Rejected
            }
        };
        self.sink.publish(&self.display);
        reconciled
    }

    fn drop_stale(&mut self, request_id: u64, epoch: u64, why: &str) -> Reconciled {
        self.stats.stale += 1;
        log::debug!("request={} epoch={} dropped: {}", request_id, epoch, why);
        Reconciled::Stale
    }

    fn dispatch(&self, request: VerificationRequest) {
        let matcher = Arc::clone(&self.matcher);
        let completions = self.completions_tx.clone();
        self.executor.execute(Box::new(move || {
            let VerificationRequest {
                request_id,
                epoch,
                issued_at,
                sample,
            } = request;
            let outcome = matcher.verify(&sample);
            drop(sample);
            // The receiver is gone only when the controller was dropped.
            let _ = completions.send(VerificationResult {
                request_id,
                epoch,
                issued_at,
                outcome,
            });
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameSample;
    use crate::matcher::MatchOutcome;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct ScriptedSource {
        fail_acquire: bool,
        no_frame_for: usize,
        acquired: bool,
        acquires: usize,
        releases: usize,
        captures: usize,
    }

    impl FrameSource for ScriptedSource {
        fn acquire(&mut self) -> Result<(), CaptureError> {
            if self.fail_acquire {
                return Err(CaptureError::DeviceUnavailable("permission denied".into()));
            }
            if !self.acquired {
                self.acquired = true;
                self.acquires += 1;
            }
            Ok(())
        }

        fn capture(&mut self) -> Result<FrameSample, CaptureError> {
            self.captures += 1;
            if self.captures <= self.no_frame_for {
                return Err(CaptureError::NoFrameAvailable);
            }
            Ok(FrameSample::new(vec![0xFF, 0xD8, self.captures as u8, 0xFF, 0xD9], 4, 3))
        }

        fn release(&mut self) {
            if self.acquired {
                self.acquired = false;
                self.releases += 1;
            }
        }

        fn is_acquired(&self) -> bool {
            self.acquired
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    struct FixedMatcher(MatchOutcome);

    impl Matcher for FixedMatcher {
        fn verify(&self, _sample: &FrameSample) -> Result<MatchOutcome, MatchError> {
            Ok(self.0.clone())
        }
    }

    /// Answers from a queue, in call order.
    struct QueueMatcher(Mutex<VecDeque<Result<MatchOutcome, MatchError>>>);

    impl QueueMatcher {
        fn new(answers: Vec<Result<MatchOutcome, MatchError>>) -> Self {
            Self(Mutex::new(answers.into()))
        }
    }

    impl Matcher for QueueMatcher {
        fn verify(&self, _sample: &FrameSample) -> Result<MatchOutcome, MatchError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(MatchError::Transport("script exhausted".into())))
        }
    }

    /// Holds jobs until the test decides when (and in which order) they settle.
    #[derive(Clone, Default)]
    struct DeferredExecutor {
        jobs: Arc<Mutex<Vec<Job>>>,
    }

    impl DeferredExecutor {
        fn queued(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        fn run(&self, index: usize) {
            let job = self.jobs.lock().unwrap().remove(index);
            job();
        }

        fn run_all(&self) {
            while self.queued() > 0 {
                self.run(0);
            }
        }
    }

    impl Executor for DeferredExecutor {
        fn execute(&self, job: Job) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    fn timing() -> SessionTiming {
        SessionTiming {
            tick_interval: Duration::from_millis(500),
            min_interval: Duration::from_millis(1000),
            response_timeout: Duration::from_secs(30),
        }
    }

    fn ms(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    fn inline_controller<M: Matcher>(
        source: ScriptedSource,
        matcher: M,
    ) -> SessionController<ScriptedSource, M, InlineExecutor> {
        SessionController::new(
            source,
            matcher,
            DecisionPolicy::default(),
            timing(),
            ResultSink::new(),
        )
        .expect("controller")
        .with_executor(InlineExecutor)
    }

    fn deferred_controller<M: Matcher>(
        matcher: M,
    ) -> (
        SessionController<ScriptedSource, M, DeferredExecutor>,
        DeferredExecutor,
    ) {
        let executor = DeferredExecutor::default();
        let controller = SessionController::new(
            ScriptedSource::default(),
            matcher,
            DecisionPolicy::default(),
            timing(),
            ResultSink::new(),
        )
        .expect("controller")
        .with_executor(executor.clone());
        (controller, executor)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn start_acquires_source_and_bumps_epoch() {
        let mut controller =
            inline_controller(ScriptedSource::default(), FixedMatcher(MatchOutcome::no_match()));
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert_eq!(controller.epoch(), 0);

        controller.start().expect("start");
        assert_eq!(controller.status(), SessionStatus::Running);
        assert_eq!(controller.epoch(), 1);
        assert!(controller.source().is_acquired());

        // Starting again while running changes nothing.
        controller.start().expect("restart while running");
        assert_eq!(controller.epoch(), 1);
        assert_eq!(controller.source().acquires, 1);
    }

    #[test]
    fn device_unavailable_aborts_start() {
        let source = ScriptedSource {
            fail_acquire: true,
            ..ScriptedSource::default()
        };
        let mut controller = inline_controller(source, FixedMatcher(MatchOutcome::no_match()));

        let err = controller.start().expect_err("start must fail");
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert_eq!(controller.epoch(), 0);
        assert_eq!(controller.tick(Instant::now()), TickOutcome::NotRunning);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut controller =
            inline_controller(ScriptedSource::default(), FixedMatcher(MatchOutcome::no_match()));
        controller.stop();
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert_eq!(controller.epoch(), 0);

        controller.start().expect("start");
        controller.stop();
        let epoch_after_first = controller.epoch();
        let display_after_first = controller.display().clone();
        controller.stop();

        assert_eq!(controller.status(), SessionStatus::Stopped);
        assert_eq!(controller.epoch(), epoch_after_first);
        assert_eq!(controller.display(), &display_after_first);
        assert_eq!(controller.source().releases, 1);
        assert!(!controller.source().is_acquired());
    }

    #[test]
    fn timing_requires_tick_shorter_than_min_interval() {
        let bad = SessionTiming {
            tick_interval: Duration::from_millis(1000),
            min_interval: Duration::from_millis(1000),
            response_timeout: Duration::from_secs(30),
        };
        assert!(bad.validate().is_err());
        assert!(SessionController::new(
            ScriptedSource::default(),
            FixedMatcher(MatchOutcome::no_match()),
            DecisionPolicy::default(),
            bad,
            ResultSink::new(),
        )
        .is_err());
        assert!(SessionTiming::default().validate().is_ok());
    }

    // ------------------------------------------------------------------
    // Cadence and in-flight bounds
    // ------------------------------------------------------------------

    #[test]
    fn instant_match_dispatches_once_per_min_interval() {
        let mut controller = inline_controller(
            ScriptedSource::default(),
            FixedMatcher(MatchOutcome::matched("alice", 0.9)),
        );
        controller.start().expect("start");
        let t0 = Instant::now();

        assert_eq!(
            controller.tick(t0),
            TickOutcome::Dispatched { request_id: 1 }
        );
        controller.pump(t0);
        assert_eq!(controller.display().matched_identity.as_deref(), Some("alice"));
        assert_eq!(controller.display().similarity_score, Some(0.9));

        assert_eq!(controller.tick(ms(t0, 500)), TickOutcome::RateLimited);
        assert_eq!(
            controller.tick(ms(t0, 1000)),
            TickOutcome::Dispatched { request_id: 2 }
        );
        assert_eq!(controller.tick(ms(t0, 1500)), TickOutcome::RateLimited);
        assert_eq!(controller.stats().dispatched, 2);
    }

    #[test]
    fn dispatch_count_is_bounded_by_min_interval() {
        let mut controller = inline_controller(
            ScriptedSource::default(),
            FixedMatcher(MatchOutcome::matched("alice", 0.9)),
        );
        controller.start().expect("start");
        let t0 = Instant::now();
        let duration_ms = 10_000;

        // Jittery tick schedule: mostly 500 ms apart with a few bunched ticks.
        let mut offsets: Vec<u64> = (0..=duration_ms).step_by(500).collect();
        offsets.extend([1, 2, 999, 1001, 4999, 5001]);
        offsets.sort_unstable();
        for offset in offsets {
            controller.tick(ms(t0, offset));
            assert!(controller.in_flight() <= 1);
        }

        let bound = duration_ms / 1000 + 1;
        assert!(controller.stats().dispatched <= bound);
        assert_eq!(controller.stats().dispatched, 11);
    }

    #[test]
    fn never_more_than_one_request_in_flight() {
        let (mut controller, executor) =
            deferred_controller(FixedMatcher(MatchOutcome::matched("alice", 0.9)));
        controller.start().expect("start");
        let t0 = Instant::now();

        for step in 0..20 {
            let outcome = controller.tick(ms(t0, step * 500));
            assert!(controller.in_flight() <= 1);
            if step > 0 {
                assert_eq!(outcome, TickOutcome::Busy);
            }
        }
        assert_eq!(executor.queued(), 1);
        assert_eq!(controller.stats().dispatched, 1);

        executor.run_all();
        controller.pump(ms(t0, 10_000));
        assert!(!controller.is_busy());
        assert_eq!(
            controller.tick(ms(t0, 10_000)),
            TickOutcome::Dispatched { request_id: 2 }
        );
    }

    #[test]
    fn no_frame_ticks_are_skipped_silently() {
        let source = ScriptedSource {
            no_frame_for: 3,
            ..ScriptedSource::default()
        };
        let mut controller = inline_controller(source, FixedMatcher(MatchOutcome::matched("alice", 0.9)));
        controller.start().expect("start");
        let t0 = Instant::now();

        for step in 0..3 {
            assert_eq!(controller.tick(ms(t0, step * 500)), TickOutcome::NoFrame);
        }
        assert_eq!(controller.stats().dispatched, 0);
        assert_eq!(controller.stats().no_frame, 3);
        assert_eq!(controller.status(), SessionStatus::Running);
        assert!(!controller.is_busy());

        // The skipped ticks did not consume the rate budget.
        assert_eq!(
            controller.tick(ms(t0, 1500)),
            TickOutcome::Dispatched { request_id: 1 }
        );
    }

    // ------------------------------------------------------------------
    // Decision policy through the loop
    // ------------------------------------------------------------------

    #[test]
    fn success_below_threshold_shows_no_match() {
        let outcome = MatchOutcome {
            success: true,
            similarity_score: Some(0.3),
            ..MatchOutcome::default()
        };
        let mut controller = inline_controller(ScriptedSource::default(), FixedMatcher(outcome));
        controller.start().expect("start");
        let t0 = Instant::now();

        controller.tick(t0);
        controller.pump(t0);
        assert!(!controller.display().is_match());
        assert!(controller.display().similarity_score.is_none());
        assert_eq!(controller.stats().rejected, 1);
    }

    #[test]
    fn negative_decision_clears_previous_match() {
        let matcher = QueueMatcher::new(vec![
            Ok(MatchOutcome::matched("alice", 0.9)),
            Ok(MatchOutcome::no_match()),
        ]);
        let mut controller = inline_controller(ScriptedSource::default(), matcher);
        controller.start().expect("start");
        let t0 = Instant::now();

        controller.tick(t0);
        controller.pump(t0);
        assert!(controller.display().is_match());

        controller.tick(ms(t0, 1000));
        controller.pump(ms(t0, 1000));
        assert!(!controller.display().is_match());
    }

    #[test]
    fn transient_failure_leaves_display_and_retries() {
        let matcher = QueueMatcher::new(vec![
            Ok(MatchOutcome::matched("alice", 0.9)),
            Err(MatchError::Status {
                status: 500,
                detail: "boom".into(),
            }),
            Ok(MatchOutcome::matched("bob", 0.8)),
        ]);
        let mut controller = inline_controller(ScriptedSource::default(), matcher);
        controller.start().expect("start");
        let t0 = Instant::now();

        controller.tick(t0);
        controller.pump(t0);
        controller.tick(ms(t0, 1000));
        controller.pump(ms(t0, 1000));
        assert_eq!(controller.display().matched_identity.as_deref(), Some("alice"));
        assert_eq!(controller.stats().failed, 1);
        assert!(!controller.is_busy());

        controller.tick(ms(t0, 2000));
        controller.pump(ms(t0, 2000));
        assert_eq!(controller.display().matched_identity.as_deref(), Some("bob"));
    }

    // ------------------------------------------------------------------
    // Cancellation, timeouts, ordering
    // ------------------------------------------------------------------

    #[test]
    fn stop_discards_outstanding_completion() {
        let (mut controller, executor) =
            deferred_controller(FixedMatcher(MatchOutcome::matched("alice", 0.9)));
        controller.start().expect("start");
        let t0 = Instant::now();

        controller.tick(t0);
        controller.stop();
        assert!(!controller.is_busy());
        assert_eq!(controller.in_flight(), 0);

        executor.run_all();
        controller.pump(ms(t0, 500));

        assert_eq!(controller.display(), &DisplayState::default());
        assert_eq!(controller.status(), SessionStatus::Stopped);
        assert_eq!(controller.stats().stale, 1);
        assert_eq!(controller.stats().accepted, 0);
    }

    #[test]
    fn pre_restart_result_is_discarded_after_restart() {
        let matcher = QueueMatcher::new(vec![
            Ok(MatchOutcome::matched("mallory", 0.99)),
            Ok(MatchOutcome::matched("alice", 0.9)),
        ]);
        let (mut controller, executor) = deferred_controller(matcher);
        let t0 = Instant::now();

        controller.start().expect("start");
        controller.tick(t0);
        controller.stop();
        controller.start().expect("restart");
        assert_eq!(controller.epoch(), 3);

        // Old call settles after the restart.
        executor.run(0);
        controller.pump(ms(t0, 300));
        assert!(!controller.display().is_match());
        assert_eq!(controller.stats().stale, 1);

        assert_eq!(
            controller.tick(ms(t0, 400)),
            TickOutcome::Dispatched { request_id: 2 }
        );
        executor.run(0);
        controller.pump(ms(t0, 450));
        assert_eq!(controller.display().matched_identity.as_deref(), Some("alice"));
    }

    #[test]
    fn timeout_frees_the_session_and_late_result_is_ignored() {
        // Answers go out in execution order, not request order.
        let matcher = QueueMatcher::new(vec![
            Ok(MatchOutcome::matched("bob", 0.8)),
            Ok(MatchOutcome::matched("mallory", 0.99)),
        ]);
        let (mut controller, executor) = deferred_controller(matcher);
        controller.start().expect("start");
        let t0 = Instant::now();

        controller.tick(t0);
        assert_eq!(controller.tick(ms(t0, 29_500)), TickOutcome::Busy);

        // Deadline passes with no answer: forced failure, then a fresh dispatch.
        assert_eq!(
            controller.tick(ms(t0, 30_000)),
            TickOutcome::Dispatched { request_id: 2 }
        );
        assert_eq!(controller.stats().failed, 1);

        // Newer call settles first, the timed-out one straggles in afterwards.
        executor.run(1);
        controller.pump(ms(t0, 30_100));
        assert_eq!(controller.display().matched_identity.as_deref(), Some("bob"));
        let displayed = controller.display().clone();

        executor.run(0);
        controller.pump(ms(t0, 30_200));
        assert_eq!(controller.display(), &displayed);
        assert_eq!(controller.stats().stale, 1);
    }

    #[test]
    fn older_result_never_overwrites_newer_display() {
        let mut controller =
            inline_controller(ScriptedSource::default(), FixedMatcher(MatchOutcome::no_match()));
        controller.start().expect("start");
        let t0 = Instant::now();

        // B (issued later) is reconciled first while pending.
        controller.tick(ms(t0, 2000));
        while controller.completions_rx.try_recv().is_ok() {}
        let newer = VerificationResult {
            request_id: 1,
            epoch: controller.epoch(),
            issued_at: ms(t0, 2000),
            outcome: Ok(MatchOutcome::matched("bob", 0.8)),
        };
        assert_eq!(controller.on_completion(newer), Reconciled::Accepted);

        // A (issued earlier) arrives afterwards, tagged as the next pending request.
        controller.tick(ms(t0, 3000));
        while controller.completions_rx.try_recv().is_ok() {}
        let older = VerificationResult {
            request_id: 2,
            epoch: controller.epoch(),
            issued_at: ms(t0, 1000),
            outcome: Ok(MatchOutcome::matched("alice", 0.95)),
        };
        assert_eq!(controller.on_completion(older), Reconciled::Stale);
        assert_eq!(controller.display().matched_identity.as_deref(), Some("bob"));
        assert!(!controller.is_busy());
    }

    #[test]
    fn sink_mirrors_display_transitions() {
        let sink = ResultSink::new();
        let watch = sink.watch();
        let mut controller = SessionController::new(
            ScriptedSource::default(),
            FixedMatcher(MatchOutcome::matched("alice", 0.9)),
            DecisionPolicy::default(),
            timing(),
            sink,
        )
        .expect("controller")
        .with_executor(InlineExecutor);
        controller.start().expect("start");
        let t0 = Instant::now();

        controller.tick(t0);
        controller.pump(t0);
        assert_eq!(watch.current().matched_identity.as_deref(), Some("alice"));

        controller.stop();
        assert!(!watch.current().is_match());
        assert_eq!(watch.version(), 2);
    }
}
