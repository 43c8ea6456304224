//! Domain core of the voice tutor: the session state machine and
//! everything it decides on (transcript, follow-up policy, progress,
//! score reports). Nothing here performs network or media I/O except the
//! OpenAI-backed evaluator.

pub mod channel;
pub mod clock;
pub mod course;
pub mod error;
pub mod evaluation;
pub mod followup;
pub mod level;
pub mod persona;
pub mod progress;
pub mod report;
pub mod session;
pub mod transcript;

pub use error::{SessionError, StoreError};
pub use session::{Command, Event, Notice, SessionController, SessionRequest, SessionState};
