//! Server push event names.

use std::fmt;

/// Events the hub pushes to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    /// New snapshot for a level.
    TimetableUpdated,
    /// Percent complete of a running generation.
    GenerationProgress,
    /// Final outcome of a generation run.
    GenerateResult,
    /// Saved timetable list.
    ListResult,
    /// Answer to `LoadTimetable`.
    LoadResult,
    /// Answer to `DeleteTimetable`.
    DeleteResult,
    /// Answer to `SetActiveTimetable`.
    SetActiveResult,
    /// Answer to `Undo`.
    UndoResult,
    /// Answer to `Redo`.
    RedoResult,
    /// Answer to `AddInterval`.
    AddIntervalResult,
    /// Answer to `RemoveInterval`.
    RemoveIntervalResult,
    /// Answer to `MoveInterval`.
    MoveIntervalResult,
}

impl ServerEvent {
    /// Every event the client subscribes to.
    pub const ALL: [ServerEvent; 12] = [
        ServerEvent::TimetableUpdated,
        ServerEvent::GenerationProgress,
        ServerEvent::GenerateResult,
        ServerEvent::ListResult,
        ServerEvent::LoadResult,
        ServerEvent::DeleteResult,
        ServerEvent::SetActiveResult,
        ServerEvent::UndoResult,
        ServerEvent::RedoResult,
        ServerEvent::AddIntervalResult,
        ServerEvent::RemoveIntervalResult,
        ServerEvent::MoveIntervalResult,
    ];

    /// Kebab-case event name.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::TimetableUpdated => "timetable-updated",
            ServerEvent::GenerationProgress => "generation-progress",
            ServerEvent::GenerateResult => "generate-result",
            ServerEvent::ListResult => "list-result",
            ServerEvent::LoadResult => "load-result",
            ServerEvent::DeleteResult => "delete-result",
            ServerEvent::SetActiveResult => "set-active-result",
            ServerEvent::UndoResult => "undo-result",
            ServerEvent::RedoResult => "redo-result",
            ServerEvent::AddIntervalResult => "add-interval-result",
            ServerEvent::RemoveIntervalResult => "remove-interval-result",
            ServerEvent::MoveIntervalResult => "move-interval-result",
        }
    }

    /// Resolve a hub target. `timetable-updated`, `TimetableUpdated` and
    /// `timetableUpdated` all name the same event.
    pub fn from_target(target: &str) -> Option<Self> {
        let normalized: String = target
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .map(|ch| ch.to_ascii_lowercase())
            .collect();
        Self::ALL.into_iter().find(|event| {
            event
                .name()
                .chars()
                .filter(|ch| *ch != '-')
                .eq(normalized.chars())
        })
    }

    /// Events answering an operation the user started.
    pub fn is_result(&self) -> bool {
        !matches!(
            self,
            ServerEvent::TimetableUpdated | ServerEvent::GenerationProgress
        )
    }

    /// Results whose data is a full timetable snapshot.
    pub fn carries_snapshot(&self) -> bool {
        matches!(
            self,
            ServerEvent::TimetableUpdated
                | ServerEvent::GenerateResult
                | ServerEvent::LoadResult
                | ServerEvent::UndoResult
                | ServerEvent::RedoResult
                | ServerEvent::AddIntervalResult
                | ServerEvent::RemoveIntervalResult
                | ServerEvent::MoveIntervalResult
        )
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_spellings_resolve() {
        assert_eq!(
            ServerEvent::from_target("timetable-updated"),
            Some(ServerEvent::TimetableUpdated)
        );
        assert_eq!(
            ServerEvent::from_target("MoveIntervalResult"),
            Some(ServerEvent::MoveIntervalResult)
        );
        assert_eq!(
            ServerEvent::from_target("setActiveResult"),
            Some(ServerEvent::SetActiveResult)
        );
        assert_eq!(ServerEvent::from_target("chat-message"), None);
    }

    #[test]
    fn every_name_round_trips() {
        for event in ServerEvent::ALL {
            assert_eq!(ServerEvent::from_target(event.name()), Some(event));
        }
    }
}
