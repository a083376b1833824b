pub mod session;

pub use session::{
    InvalidTransition, OutcomeKind, Session, SessionMode, SessionRecord, SessionStatus,
};
