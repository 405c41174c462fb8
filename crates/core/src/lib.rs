#![warn(clippy::all, missing_docs)]

//! Core of the timetable console.
//!
//! This crate hosts the real-time hub session (connection supervision,
//! reconnect backoff, keepalive, server-push dispatch), the local snapshot
//! cache, the REST client, configuration handling, and the models shared
//! with the terminal front-end.

pub mod api;
pub mod auth;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod grid;
pub mod hub;
pub mod models;
pub mod session;
pub mod store;

pub use api::{ApiClient, Resource};
pub use auth::{AuthContext, Credentials};
pub use bus::{Command, CommandBus, CommandSender};
pub use cache::SnapshotCache;
pub use config::AppConfig;
pub use error::{ApiError, PayloadError, SessionError, StorageError, TransportError};
pub use grid::TimetableGrid;
pub use models::{Assignment, Day, Level, SlotKey, TimetableSnapshot, TimetableSummary};
pub use session::{ConnectionState, Dispatcher, SessionManager, SessionStatus};
pub use store::{SessionStore, StoreState};
