//! Hub session lifecycle: connection supervision, reconnect backoff,
//! keepalive and server-push dispatch.

mod backoff;
pub mod dispatcher;
mod events;
mod keepalive;
pub mod manager;

pub use backoff::RetryPolicy;
pub use dispatcher::{DispatchOutcome, Dispatcher, HandlerContext};
pub use events::ServerEvent;
pub use keepalive::KeepalivePulse;
pub use manager::{
    Connection, ConnectionState, SessionManager, SessionOptions, SessionStatus, Transition,
};
