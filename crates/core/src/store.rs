//! Session-scoped state read by the front-end.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::{
    models::{GenerationProgress, Level, TimetableSnapshot, TimetableSummary},
    session::ServerEvent,
};

/// Result of the last operation the hub answered.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// Event that carried the answer.
    pub event: ServerEvent,
    /// Whether the server reported success.
    pub success: bool,
    /// Human readable summary.
    pub message: String,
    /// When the answer arrived.
    pub at: DateTime<Utc>,
}

/// Everything the front-end renders, copied out in one piece.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    /// Level currently displayed.
    pub active_level: Level,
    /// Timetable of the active level.
    pub snapshot: Option<TimetableSnapshot>,
    /// Saved timetables of the active level.
    pub timetables: Vec<TimetableSummary>,
    /// Published timetable id.
    pub active_timetable: Option<String>,
    /// Progress of a running generation.
    pub progress: Option<GenerationProgress>,
    /// Last answered operation.
    pub last_outcome: Option<OperationOutcome>,
}

/// Local copy of server-owned state for one session.
///
/// Only the session manager and the dispatcher write; readers call
/// [`SessionStore::state`] or watch [`SessionStore::subscribe`] for changes.
#[derive(Debug)]
pub struct SessionStore {
    state: RwLock<StoreState>,
    revision: watch::Sender<u64>,
}

impl SessionStore {
    /// Empty store showing `level`.
    pub fn new(level: Level) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState {
                active_level: level,
                ..StoreState::default()
            }),
            revision,
        }
    }

    /// Receiver that changes whenever the store is written.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Copy of the full state.
    pub fn state(&self) -> StoreState {
        self.state.read().clone()
    }

    /// Level currently displayed.
    pub fn active_level(&self) -> Level {
        self.state.read().active_level
    }

    /// Snapshot of the active level.
    pub fn snapshot(&self) -> Option<TimetableSnapshot> {
        self.state.read().snapshot.clone()
    }

    /// Switch level; level-bound data is cleared and `cached` shown instead.
    pub fn switch_level(&self, level: Level, cached: Option<TimetableSnapshot>) {
        {
            let mut state = self.state.write();
            state.active_level = level;
            state.snapshot = cached.filter(|snapshot| snapshot.level == level);
            state.timetables.clear();
            state.active_timetable = None;
            state.progress = None;
        }
        self.bump();
    }

    /// Replace the snapshot wholesale. Returns `false` when it belongs to
    /// another level and was not applied.
    pub fn replace_snapshot(&self, snapshot: TimetableSnapshot) -> bool {
        let applied = {
            let mut state = self.state.write();
            if snapshot.level == state.active_level {
                state.snapshot = Some(snapshot);
                true
            } else {
                false
            }
        };
        if applied {
            self.bump();
        }
        applied
    }

    /// Replace the saved timetable list.
    pub fn set_timetables(&self, timetables: Vec<TimetableSummary>) {
        {
            let mut state = self.state.write();
            state.active_timetable = timetables
                .iter()
                .find(|entry| entry.is_active)
                .map(|entry| entry.id.clone());
            state.timetables = timetables;
        }
        self.bump();
    }

    /// Drop a deleted timetable from the list.
    pub fn remove_timetable(&self, id: &str) {
        {
            let mut state = self.state.write();
            state.timetables.retain(|entry| entry.id != id);
            if state.active_timetable.as_deref() == Some(id) {
                state.active_timetable = None;
            }
        }
        self.bump();
    }

    /// Mark one saved timetable as the published one.
    pub fn set_active_timetable(&self, id: &str) {
        {
            let mut state = self.state.write();
            for entry in state.timetables.iter_mut() {
                entry.is_active = entry.id == id;
            }
            state.active_timetable = Some(id.to_string());
        }
        self.bump();
    }

    /// Record generation progress.
    pub fn set_progress(&self, progress: Option<GenerationProgress>) {
        self.state.write().progress = progress;
        self.bump();
    }

    /// Record the answer to an operation.
    pub fn record_outcome(&self, event: ServerEvent, success: bool, message: impl Into<String>) {
        self.state.write().last_outcome = Some(OperationOutcome {
            event,
            success,
            message: message.into(),
            at: Utc::now(),
        });
        self.bump();
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Assignment, Day, SlotKey};

    fn snapshot(level: Level, course: &str) -> TimetableSnapshot {
        let mut snapshot = TimetableSnapshot::empty(level);
        snapshot.assignments.insert(
            SlotKey::new(Day::Monday, 1),
            Assignment {
                course_code: course.to_string(),
                instructor: String::new(),
                room: String::new(),
            },
        );
        snapshot
    }

    #[test]
    fn snapshots_for_other_levels_are_not_shown() {
        let store = SessionStore::new(1);
        assert!(!store.replace_snapshot(snapshot(2, "CS201")));
        assert!(store.snapshot().is_none());

        assert!(store.replace_snapshot(snapshot(1, "CS101")));
        assert_eq!(store.snapshot().map(|s| s.len()), Some(1));
    }

    #[test]
    fn switching_level_clears_level_data() {
        let store = SessionStore::new(1);
        store.replace_snapshot(snapshot(1, "CS101"));
        store.set_timetables(vec![TimetableSummary {
            id: "7".into(),
            name: "Draft".into(),
            level: Some(1),
            is_active: true,
            created_at: None,
        }]);
        assert_eq!(store.state().active_timetable.as_deref(), Some("7"));

        store.switch_level(3, Some(snapshot(3, "CS301")));
        let state = store.state();
        assert_eq!(state.active_level, 3);
        assert!(state.timetables.is_empty());
        assert_eq!(
            state
                .snapshot
                .and_then(|s| s.assignment(Day::Monday, 1).map(|a| a.course_code.clone())),
            Some("CS301".to_string())
        );
    }

    #[test]
    fn writes_bump_revision() {
        let store = SessionStore::new(1);
        let mut watcher = store.subscribe();
        assert!(!watcher.has_changed().unwrap_or(true));
        store.set_progress(Some(GenerationProgress {
            percent: 40.0,
            message: None,
        }));
        assert!(watcher.has_changed().unwrap_or(false));
        watcher.borrow_and_update();
        store.record_outcome(ServerEvent::UndoResult, true, "Undone");
        assert!(watcher.has_changed().unwrap_or(false));
    }
}
