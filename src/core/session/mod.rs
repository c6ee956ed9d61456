//! Call session orchestration.
//!
//! - `call`: [`CallSession`], setup, call control and teardown of one call
//! - `events`: the typed per-session event bus
//! - `dispatcher`: realtime frames to CDR, billing and analytics

mod call;
mod dispatcher;
mod events;

pub use call::{
    CallSession, DEFAULT_TRANSFER_CONTEXT, DEFAULT_TRANSFER_PRIORITY, SILENCE_MEDIA,
    SessionContext, SessionState,
};
pub use dispatcher::ProtocolDispatcher;
pub use events::{SessionBus, SessionEvent, TransferRequest};
