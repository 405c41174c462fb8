//! Real-time hub client: wire protocol and transports.

/// SignalR JSON protocol records.
pub mod protocol;
/// Transport traits and the websocket implementation.
pub mod transport;

pub use protocol::{FrameBuffer, HubMessage};
pub use transport::{Connector, HubEndpoint, HubTransport, WebSocketConnector};

/// Hub methods the client invokes.
pub mod methods {
    /// Request the current timetable of a level.
    pub const GET_TIMETABLE: &str = "GetTimetable";
    /// Request the saved timetables of a level.
    pub const LIST_TIMETABLES: &str = "ListTimetables";
    /// Start generating a timetable for a level.
    pub const GENERATE_TIMETABLE: &str = "GenerateTimetable";
    /// Load a saved timetable.
    pub const LOAD_TIMETABLE: &str = "LoadTimetable";
    /// Delete a saved timetable.
    pub const DELETE_TIMETABLE: &str = "DeleteTimetable";
    /// Mark a saved timetable as the published one.
    pub const SET_ACTIVE_TIMETABLE: &str = "SetActiveTimetable";
    /// Undo the last edit.
    pub const UNDO: &str = "Undo";
    /// Redo the last undone edit.
    pub const REDO: &str = "Redo";
    /// Place a course in a slot.
    pub const ADD_INTERVAL: &str = "AddInterval";
    /// Clear a slot.
    pub const REMOVE_INTERVAL: &str = "RemoveInterval";
    /// Move a course between slots.
    pub const MOVE_INTERVAL: &str = "MoveInterval";
    /// No-op used to keep the connection from idling out.
    pub const KEEP_ALIVE: &str = "KeepAlive";
}
