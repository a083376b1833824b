//! Session lifecycle: start, pause, stop with a safety lock, and the
//! ordered shutdown (freeze clock, drain, synthesize, reclaim, record).

mod controller;
mod state;


pub use controller::{SessionController, SessionDeps};
pub use state::{
    format_duration, ControllerPhase, SessionEvent, SessionLog, SessionReport, SessionSnapshot,
    StartError, StopError,
};
