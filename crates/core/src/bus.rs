//! Typed commands from the front-end, executed against the session.

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::{
    error::{BusError, SessionError},
    hub::methods,
    models::{Day, Level, SlotKey},
    session::SessionManager,
};

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show another level, loading its cached snapshot first.
    SelectLevel(Level),
    /// Ask the hub for the current level's timetable again.
    Refresh,
    /// Start a generation run.
    Generate,
    /// Fetch the saved timetables.
    ListTimetables,
    /// Load a saved timetable by id.
    LoadTimetable(String),
    /// Delete a saved timetable by id.
    DeleteTimetable(String),
    /// Mark a saved timetable as the active one.
    SetActiveTimetable(String),
    /// Undo the last edit.
    Undo,
    /// Redo the last undone edit.
    Redo,
    /// Place a course in a slot.
    AddInterval {
        /// Day to place it on.
        day: Day,
        /// Slot to place it in.
        slot: u16,
        /// Course to place.
        course_code: String,
        /// Instructor; may be blank.
        instructor: String,
        /// Room; may be blank.
        room: String,
    },
    /// Clear a slot.
    RemoveInterval {
        /// Day of the slot.
        day: Day,
        /// Slot to clear.
        slot: u16,
    },
    /// Move whatever is taught in `from` to `to`.
    MoveInterval {
        /// Occupied slot.
        from: SlotKey,
        /// Destination slot.
        to: SlotKey,
    },
    /// Restart the session with the current credential.
    Reconnect,
    /// Close the session and stop retrying.
    Disconnect,
}

impl Command {
    /// Short name for logs and status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Command::SelectLevel(_) => "select level",
            Command::Refresh => "refresh",
            Command::Generate => "generate",
            Command::ListTimetables => "list timetables",
            Command::LoadTimetable(_) => "load timetable",
            Command::DeleteTimetable(_) => "delete timetable",
            Command::SetActiveTimetable(_) => "publish timetable",
            Command::Undo => "undo",
            Command::Redo => "redo",
            Command::AddInterval { .. } => "add course",
            Command::RemoveInterval { .. } => "clear slot",
            Command::MoveInterval { .. } => "move course",
            Command::Reconnect => "reconnect",
            Command::Disconnect => "disconnect",
        }
    }

    /// Hub method and arguments for commands that are a single invocation.
    pub fn invocation(&self, level: Level) -> Option<(&'static str, Vec<Value>)> {
        let call = match self {
            Command::Generate => (methods::GENERATE_TIMETABLE, vec![json!(level)]),
            Command::ListTimetables => (methods::LIST_TIMETABLES, vec![json!(level)]),
            Command::LoadTimetable(id) => (methods::LOAD_TIMETABLE, vec![json!(id)]),
            Command::DeleteTimetable(id) => (methods::DELETE_TIMETABLE, vec![json!(id)]),
            Command::SetActiveTimetable(id) => (methods::SET_ACTIVE_TIMETABLE, vec![json!(id)]),
            Command::Undo => (methods::UNDO, vec![json!(level)]),
            Command::Redo => (methods::REDO, vec![json!(level)]),
            Command::AddInterval {
                day,
                slot,
                course_code,
                instructor,
                room,
            } => (
                methods::ADD_INTERVAL,
                vec![
                    json!(level),
                    json!({
                        "day": day.to_string(),
                        "timeSlot": slot,
                        "courseCode": course_code,
                        "instructor": instructor,
                        "room": room,
                    }),
                ],
            ),
            Command::RemoveInterval { day, slot } => (
                methods::REMOVE_INTERVAL,
                vec![json!(level), slot_json(SlotKey::new(*day, *slot))],
            ),
            Command::MoveInterval { from, to } => (
                methods::MOVE_INTERVAL,
                vec![json!(level), slot_json(*from), slot_json(*to)],
            ),
            Command::SelectLevel(_)
            | Command::Refresh
            | Command::Reconnect
            | Command::Disconnect => return None,
        };
        Some(call)
    }
}

fn slot_json(key: SlotKey) -> Value {
    json!({ "day": key.day.to_string(), "timeSlot": key.slot })
}

/// Run one command against `manager`.
pub async fn execute(manager: &SessionManager, command: Command) -> Result<(), SessionError> {
    debug!(command = command.label(), "executing command");
    match command {
        Command::SelectLevel(level) => {
            manager.select_level(level);
            Ok(())
        }
        Command::Refresh => manager.refresh(),
        Command::Reconnect => manager.reconnect().await,
        Command::Disconnect => {
            manager.disconnect().await;
            Ok(())
        }
        other => {
            let level = manager.store().active_level();
            match other.invocation(level) {
                Some((method, arguments)) => manager.invoke(method, arguments),
                None => Ok(()),
            }
        }
    }
}

/// A command that reached the session but failed.
#[derive(Debug)]
pub struct CommandFailure {
    /// The command as submitted.
    pub command: Command,
    /// Why it failed.
    pub error: SessionError,
}

/// Cloneable handle used by the front-end to queue commands.
#[derive(Debug, Clone)]
pub struct CommandSender {
    sender: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Queue without waiting; fails when the queue is full or the bus stopped.
    pub fn send(&self, command: Command) -> Result<(), BusError> {
        self.sender.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => BusError::Full,
            TrySendError::Closed(_) => BusError::Closed,
        })
    }
}

/// Executes queued commands in order against one session.
pub struct CommandBus {
    receiver: mpsc::Receiver<Command>,
    manager: SessionManager,
    failures: Option<mpsc::Sender<CommandFailure>>,
}

impl CommandBus {
    /// Bus bound to `manager` plus the handle to feed it.
    pub fn new(manager: SessionManager, capacity: usize) -> (CommandSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            CommandSender { sender },
            Self {
                receiver,
                manager,
                failures: None,
            },
        )
    }

    /// Report failed commands on `failures`.
    pub fn with_failures(mut self, failures: mpsc::Sender<CommandFailure>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Execute commands until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            let label = command.label();
            if let Err(error) = execute(&self.manager, command.clone()).await {
                warn!(command = label, %error, "command failed");
                if let Some(failures) = &self.failures {
                    let _ = failures.send(CommandFailure { command, error }).await;
                }
            }
        }
        debug!("command bus stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{AuthContext, Credentials},
        error::TransportError,
        hub::{Connector, HubTransport},
        session::{Dispatcher, SessionOptions},
        store::SessionStore,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Offline;

    #[async_trait]
    impl Connector for Offline {
        async fn connect(
            &self,
            _credentials: &Credentials,
        ) -> Result<Box<dyn HubTransport>, SessionError> {
            Err(TransportError::Closed.into())
        }
    }

    fn offline_manager() -> SessionManager {
        SessionManager::new(
            Arc::new(Offline),
            Dispatcher::new(Arc::new(SessionStore::new(1)), None),
            AuthContext::default(),
            SessionOptions::default(),
        )
    }

    #[test]
    fn edits_carry_the_active_level() {
        let command = Command::MoveInterval {
            from: SlotKey::new(Day::Sunday, 1),
            to: SlotKey::new(Day::Tuesday, 3),
        };
        let (method, arguments) = command.invocation(2).expect("invocation");
        assert_eq!(method, methods::MOVE_INTERVAL);
        assert_eq!(
            arguments,
            vec![
                json!(2),
                json!({ "day": "Sunday", "timeSlot": 1 }),
                json!({ "day": "Tuesday", "timeSlot": 3 }),
            ]
        );

        let (method, arguments) = Command::LoadTimetable("17".into())
            .invocation(2)
            .expect("invocation");
        assert_eq!(method, methods::LOAD_TIMETABLE);
        assert_eq!(arguments, vec![json!("17")]);
    }

    #[test]
    fn session_commands_are_not_invocations() {
        for command in [
            Command::SelectLevel(3),
            Command::Refresh,
            Command::Reconnect,
            Command::Disconnect,
        ] {
            assert!(command.invocation(1).is_none(), "{}", command.label());
        }
    }

    #[tokio::test]
    async fn bus_runs_commands_in_order_and_reports_failures() {
        let manager = offline_manager();
        let store = manager.store().clone();
        let (sender, bus) = CommandBus::new(manager, 8);
        let (failures_tx, mut failures) = mpsc::channel(8);
        let task = tokio::spawn(bus.with_failures(failures_tx).run());

        sender.send(Command::SelectLevel(2)).expect("queued");
        sender.send(Command::Undo).expect("queued");
        drop(sender);
        task.await.expect("bus task");

        assert_eq!(store.active_level(), 2);
        let failure = failures.recv().await.expect("failure reported");
        assert_eq!(failure.command, Command::Undo);
        assert!(matches!(failure.error, SessionError::NotConnected));
    }

    #[tokio::test]
    async fn sending_after_stop_fails() {
        let (sender, bus) = CommandBus::new(offline_manager(), 1);
        drop(bus);
        assert_eq!(sender.send(Command::Refresh), Err(BusError::Closed));
    }
}
