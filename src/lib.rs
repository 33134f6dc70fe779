//! Live Verify
//!
//! Realtime face verification session kernel. While a session is running, stills
//! are sampled from a live capture device at a bounded rate, scored by a remote
//! matcher, and the newest valid result drives the displayed identity.
//!
//! # Invariants
//!
//! 1. **Single flight**: at most one matcher call is outstanding per session.
//! 2. **Bounded rate**: dispatches are at least `min_interval` apart.
//! 3. **No stale display**: results issued before a stop, or older than what is
//!    already shown, never reach the display.
//! 4. **No sticky identity**: a negative decision clears the display.
//! 5. **No frame retention**: stills live only as long as their matcher call and are
//!    zeroized on drop. Frame bytes are never logged.
//!
//! # Module Structure
//!
//! - `frame`: captured stills (`FrameSample`)
//! - `ingest`: capture devices (synthetic, still directory, HTTP cameras)
//! - `matcher`: matcher boundary and HTTP client
//! - `session`: controller state machine, decision policy, display sink, driver thread
//! - `enroll`: stage-gated enrollment flow
//! - `config`: file + environment configuration

pub mod config;
pub mod enroll;
pub mod frame;
pub mod ingest;
pub mod matcher;
pub mod session;

pub use config::LiveVerifyConfig;
pub use enroll::{
    EnrollError, EnrollReceipt, EnrollRequest, EnrollmentClient, EnrollmentFlow, EnrollmentStage,
    IdentityDetails,
};
pub use frame::FrameSample;
pub use ingest::{open_source, CameraSettings, CaptureError, FrameSource};
pub use matcher::{HttpMatcher, HttpMatcherConfig, MatchError, MatchOutcome, Matcher};
pub use session::{
    DecisionPolicy, DisplayState, DisplayWatch, ResultSink, SessionController, SessionDriver,
    SessionError, SessionHandle, SessionStats, SessionStatus, SessionTiming, TickOutcome,
};
