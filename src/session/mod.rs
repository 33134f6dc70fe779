//! Continuous verification session.
//!
//! While a session is running, a fresh still is sampled from the capture device at
//! a bounded rate and sent to the matcher. The newest valid result drives the
//! displayed identity and similarity score.
//!
//! # Guarantees
//!
//! - At most one matcher call is outstanding at any time.
//! - Dispatches are at least `min_interval` apart.
//! - A result issued before a stop (or before a newer displayed result) never
//!   reaches the display.
//! - A negative decision clears the display; the last known identity is not kept.
//! - Matcher failures are transient: the display is left alone and the loop retries.

pub mod controller;
pub mod driver;
pub mod policy;
pub mod sink;
pub mod state;

pub use controller::{
    Executor, InlineExecutor, Reconciled, SessionController, SessionError, SessionTiming,
    ThreadExecutor, TickOutcome, DEFAULT_MIN_INTERVAL, DEFAULT_TICK_INTERVAL,
};
pub use driver::{wait_for_display, SessionDriver, SessionHandle};
pub use policy::{Decision, DecisionPolicy, RejectReason, DEFAULT_ACCEPTANCE_THRESHOLD};
pub use sink::{DisplayWatch, ResultSink};
pub use state::{DisplayState, SessionStats, SessionStatus, VerificationRequest, VerificationResult};
