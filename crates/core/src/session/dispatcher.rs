//! Routes server pushes to the handlers that fold them into the store.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::ServerEvent;
use crate::{
    cache::SnapshotCache,
    error::PayloadError,
    models::{
        normalize_list, ApiResult, Envelope, GenerationProgress, Level, TimetableSnapshot,
        TimetableSummary,
    },
    store::SessionStore,
};

/// Invocations sent to the hub and not yet completed, with the level each
/// one was issued for.
///
/// The hub runs one invocation per connection at a time, so a push that
/// arrives before any completion belongs to the oldest pending invocation.
#[derive(Debug, Default)]
pub struct InFlight {
    pending: Mutex<VecDeque<(String, Level)>>,
}

impl InFlight {
    /// Track `invocation_id`, issued while `level` was active.
    pub fn begin(&self, invocation_id: impl Into<String>, level: Level) {
        self.pending.lock().push_back((invocation_id.into(), level));
    }

    /// Forget a completed invocation and return its level.
    pub fn complete(&self, invocation_id: &str) -> Option<Level> {
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|(id, _)| id == invocation_id)?;
        pending.remove(index).map(|(_, level)| level)
    }

    /// Level of the oldest invocation still running.
    pub fn current_level(&self) -> Option<Level> {
        self.pending.lock().front().map(|(_, level)| *level)
    }

    /// Drop everything; completions never arrive once the connection is gone.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

/// State a push handler may touch.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Session state the front-end renders.
    pub store: Arc<SessionStore>,
    /// Durable per-level snapshot cache, when enabled.
    pub cache: Option<SnapshotCache>,
    /// Outstanding invocations of the live connection.
    pub requests: Arc<InFlight>,
}

impl HandlerContext {
    /// Level for a payload that does not name one: the level of the request
    /// being answered, else the level on screen.
    pub fn payload_level(&self) -> Level {
        self.requests
            .current_level()
            .unwrap_or_else(|| self.store.active_level())
    }
}

/// Handler for one server event; receives the invocation arguments.
pub type Handler = Arc<dyn Fn(&HandlerContext, &[Value]) -> Result<(), PayloadError> + Send + Sync>;

/// What happened to a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every handler accepted the payload.
    Handled(ServerEvent),
    /// At least one handler rejected the payload; it was logged and dropped.
    Malformed(ServerEvent),
    /// Target is not a known event.
    Unknown,
}

/// Routes hub invocations to the handlers registered for their event.
pub struct Dispatcher {
    context: HandlerContext,
    handlers: HashMap<ServerEvent, Vec<Handler>>,
}

impl Dispatcher {
    /// Dispatcher without any handlers.
    pub fn empty(context: HandlerContext) -> Self {
        Self {
            context,
            handlers: HashMap::new(),
        }
    }

    /// Dispatcher with the handlers that keep the store and cache current.
    pub fn new(store: Arc<SessionStore>, cache: Option<SnapshotCache>) -> Self {
        let mut dispatcher = Self::empty(HandlerContext {
            store,
            cache,
            requests: Arc::default(),
        });
        for event in ServerEvent::ALL {
            let handler: Handler = match event {
                ServerEvent::TimetableUpdated => Arc::new(handle_timetable_updated),
                ServerEvent::GenerationProgress => Arc::new(handle_generation_progress),
                ServerEvent::ListResult => Arc::new(handle_list_result),
                ServerEvent::DeleteResult => Arc::new(handle_delete_result),
                ServerEvent::SetActiveResult => Arc::new(handle_set_active_result),
                snapshot_result => Arc::new(move |context: &HandlerContext, arguments: &[Value]| {
                    handle_snapshot_result(snapshot_result, context, arguments)
                }),
            };
            dispatcher.handlers.entry(event).or_default().push(handler);
        }
        dispatcher
    }

    /// Add a handler; it runs after the ones already registered for `event`.
    pub fn on<F>(&mut self, event: ServerEvent, handler: F)
    where
        F: Fn(&HandlerContext, &[Value]) -> Result<(), PayloadError> + Send + Sync + 'static,
    {
        self.handlers.entry(event).or_default().push(Arc::new(handler));
    }

    /// State the handlers write into.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Run the handlers for `target`. Never fails: bad payloads are logged.
    pub fn dispatch(&self, target: &str, arguments: &[Value]) -> DispatchOutcome {
        let Some(event) = ServerEvent::from_target(target) else {
            debug!(target, "ignoring push for unknown event");
            return DispatchOutcome::Unknown;
        };

        let mut outcome = DispatchOutcome::Handled(event);
        for handler in self.handlers.get(&event).into_iter().flatten() {
            if let Err(err) = handler(&self.context, arguments) {
                warn!(event = %event, %err, "ignoring malformed push");
                outcome = DispatchOutcome::Malformed(event);
            }
        }
        outcome
    }
}

fn first_argument(arguments: &[Value]) -> Result<&Value, PayloadError> {
    arguments.first().ok_or(PayloadError::MissingField("arguments"))
}

/// Replace the snapshot and persist it; replays of identical content are no-ops.
fn apply_snapshot(context: &HandlerContext, snapshot: TimetableSnapshot) {
    let unchanged = context
        .store
        .snapshot()
        .is_some_and(|current| current.same_content(&snapshot));
    if unchanged {
        debug!(level = snapshot.level, "snapshot unchanged");
        return;
    }

    if let Some(cache) = &context.cache {
        if let Err(err) = cache.save_level(&snapshot) {
            warn!(level = snapshot.level, %err, "failed to cache snapshot");
        }
    }
    let level = snapshot.level;
    let entries = snapshot.len();
    if context.store.replace_snapshot(snapshot) {
        info!(level, entries, "timetable snapshot replaced");
    } else {
        debug!(level, "cached snapshot for inactive level");
    }
}

fn handle_timetable_updated(context: &HandlerContext, arguments: &[Value]) -> Result<(), PayloadError> {
    let payload = first_argument(arguments)?;
    let raw = match Envelope::detect(payload) {
        Some(envelope) => match envelope.into_api_result() {
            ApiResult::Success(Some(data)) => data,
            ApiResult::Success(None) => return Err(PayloadError::MissingField("data")),
            ApiResult::Failure { message } => return Err(PayloadError::Rejected(message)),
        },
        None => payload.clone(),
    };
    let snapshot = TimetableSnapshot::from_payload(&raw, Some(context.payload_level()))?;
    apply_snapshot(context, snapshot);
    Ok(())
}

fn handle_generation_progress(context: &HandlerContext, arguments: &[Value]) -> Result<(), PayloadError> {
    let payload = first_argument(arguments)?;
    let payload = match Envelope::detect(payload) {
        Some(envelope) => envelope
            .into_api_result()
            .into_result()?
            .ok_or(PayloadError::MissingField("data"))?,
        None => payload.clone(),
    };

    let (percent, message) = match &payload {
        Value::Number(number) => (number.as_f64(), None),
        Value::Object(object) => (
            object
                .get("percent")
                .or_else(|| object.get("progress"))
                .and_then(Value::as_f64),
            object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        _ => (None, None),
    };
    let percent = percent.ok_or(PayloadError::MissingField("percent"))?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(PayloadError::Invalid(format!("progress {percent} out of range")));
    }

    context
        .store
        .set_progress(Some(GenerationProgress { percent, message }));
    Ok(())
}

/// Shared prologue for `*-result` events: failed operations are recorded and
/// end here, successful ones hand back their data.
fn result_data(
    event: ServerEvent,
    context: &HandlerContext,
    arguments: &[Value],
) -> Result<Option<(Option<Value>, Option<String>)>, PayloadError> {
    let envelope = Envelope::require(first_argument(arguments)?)?;
    if !envelope.is_success {
        let message = envelope
            .message
            .unwrap_or_else(|| format!("{event} failed"));
        info!(event = %event, %message, "operation rejected by server");
        context.store.record_outcome(event, false, message);
        return Ok(None);
    }
    Ok(Some((envelope.data, envelope.message)))
}

fn success_text(event: ServerEvent) -> &'static str {
    match event {
        ServerEvent::GenerateResult => "Timetable generated",
        ServerEvent::ListResult => "Timetables listed",
        ServerEvent::LoadResult => "Timetable loaded",
        ServerEvent::DeleteResult => "Timetable deleted",
        ServerEvent::SetActiveResult => "Timetable published",
        ServerEvent::UndoResult => "Change undone",
        ServerEvent::RedoResult => "Change redone",
        ServerEvent::AddIntervalResult => "Course placed",
        ServerEvent::RemoveIntervalResult => "Slot cleared",
        ServerEvent::MoveIntervalResult => "Course moved",
        ServerEvent::TimetableUpdated => "Timetable updated",
        ServerEvent::GenerationProgress => "Generation running",
    }
}

fn handle_snapshot_result(
    event: ServerEvent,
    context: &HandlerContext,
    arguments: &[Value],
) -> Result<(), PayloadError> {
    let Some((data, message)) = result_data(event, context, arguments)? else {
        return Ok(());
    };
    if let Some(data) = data {
        let snapshot = TimetableSnapshot::from_payload(&data, Some(context.payload_level()))?;
        apply_snapshot(context, snapshot);
    }
    if event == ServerEvent::GenerateResult {
        context.store.set_progress(None);
    }
    context
        .store
        .record_outcome(event, true, message.unwrap_or_else(|| success_text(event).into()));
    Ok(())
}

fn handle_list_result(context: &HandlerContext, arguments: &[Value]) -> Result<(), PayloadError> {
    let event = ServerEvent::ListResult;
    let Some((data, message)) = result_data(event, context, arguments)? else {
        return Ok(());
    };
    let entries = normalize_list::<Value>(data.unwrap_or(Value::Null))?.into_result()?;
    let timetables = entries
        .iter()
        .map(TimetableSummary::from_payload)
        .collect::<Result<Vec<_>, _>>()?;
    let count = timetables.len();
    context.store.set_timetables(timetables);
    context.store.record_outcome(
        event,
        true,
        message.unwrap_or_else(|| format!("{count} saved timetables")),
    );
    Ok(())
}

fn timetable_id(data: Option<&Value>) -> Option<String> {
    match data? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        Value::Object(object) => timetable_id(object.get("id")),
        _ => None,
    }
}

fn handle_delete_result(context: &HandlerContext, arguments: &[Value]) -> Result<(), PayloadError> {
    let event = ServerEvent::DeleteResult;
    let Some((data, message)) = result_data(event, context, arguments)? else {
        return Ok(());
    };
    if let Some(id) = timetable_id(data.as_ref()) {
        context.store.remove_timetable(&id);
    }
    context
        .store
        .record_outcome(event, true, message.unwrap_or_else(|| success_text(event).into()));
    Ok(())
}

fn handle_set_active_result(context: &HandlerContext, arguments: &[Value]) -> Result<(), PayloadError> {
    let event = ServerEvent::SetActiveResult;
    let Some((data, message)) = result_data(event, context, arguments)? else {
        return Ok(());
    };
    let id = timetable_id(data.as_ref()).ok_or(PayloadError::MissingField("id"))?;
    context.store.set_active_timetable(&id);
    context
        .store
        .record_outcome(event, true, message.unwrap_or_else(|| success_text(event).into()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Day;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn dispatcher(cache: Option<SnapshotCache>) -> Dispatcher {
        Dispatcher::new(Arc::new(SessionStore::new(1)), cache)
    }

    fn timetable(course: &str) -> Value {
        json!({
            "level": 1,
            "entries": [
                { "day": "Sunday", "timeSlot": 1, "courseCode": course, "instructor": "Dr. Amal", "room": "A1" },
                { "day": "Monday", "timeSlot": 2, "courseCode": "MA101", "instructor": "Dr. Omar", "room": "A2" }
            ]
        })
    }

    #[test]
    fn replaying_a_push_is_idempotent() {
        let dispatcher = dispatcher(None);
        let store = dispatcher.context().store.clone();

        let push = [timetable("CS101")];
        assert_eq!(
            dispatcher.dispatch("timetable-updated", &push),
            DispatchOutcome::Handled(ServerEvent::TimetableUpdated)
        );
        let once = store.snapshot().expect("snapshot applied");

        dispatcher.dispatch("TimetableUpdated", &push);
        let twice = store.snapshot().expect("snapshot kept");
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[test]
    fn push_replaces_rather_than_merges() {
        let dispatcher = dispatcher(None);
        let store = dispatcher.context().store.clone();
        dispatcher.dispatch("timetable-updated", &[timetable("CS101")]);
        dispatcher.dispatch(
            "timetable-updated",
            &[json!({ "level": 1, "entries": [ { "day": "Tuesday", "timeSlot": 4, "courseCode": "PH110" } ] })],
        );

        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.assignment(Day::Sunday, 1).is_none());
    }

    #[test]
    fn malformed_push_leaves_snapshot_untouched() {
        let dispatcher = dispatcher(None);
        let store = dispatcher.context().store.clone();
        dispatcher.dispatch("timetable-updated", &[timetable("CS101")]);
        let before = store.snapshot();

        let missing_code = json!({ "level": 1, "entries": [ { "day": "Sunday", "timeSlot": 1 } ] });
        assert_eq!(
            dispatcher.dispatch("timetable-updated", &[missing_code]),
            DispatchOutcome::Malformed(ServerEvent::TimetableUpdated)
        );
        assert_eq!(
            dispatcher.dispatch("load-result", &[json!({ "data": [] })]),
            DispatchOutcome::Malformed(ServerEvent::LoadResult)
        );
        assert_eq!(
            dispatcher.dispatch("undo-result", &[]),
            DispatchOutcome::Malformed(ServerEvent::UndoResult)
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn failed_result_is_recorded_without_touching_snapshot() {
        let dispatcher = dispatcher(None);
        let store = dispatcher.context().store.clone();
        dispatcher.dispatch("timetable-updated", &[timetable("CS101")]);
        let before = store.snapshot();

        let outcome = dispatcher.dispatch(
            "move-interval-result",
            &[json!({ "isSuccess": false, "errorMessage": "Room B2 is taken" })],
        );
        assert_eq!(outcome, DispatchOutcome::Handled(ServerEvent::MoveIntervalResult));
        let recorded = store.state().last_outcome.expect("outcome recorded");
        assert!(!recorded.success);
        assert_eq!(recorded.message, "Room B2 is taken");
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn snapshot_results_are_cached_per_level() {
        let dir = tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path());
        let dispatcher = dispatcher(Some(cache.clone()));
        let store = dispatcher.context().store.clone();

        dispatcher.dispatch(
            "generate-result",
            &[json!({ "isSuccess": true, "data": timetable("CS150") })],
        );
        let cached = cache.load_level(1).expect("cached");
        assert_eq!(cached.assignment(Day::Sunday, 1).map(|a| a.course_code.as_str()), Some("CS150"));
        assert_eq!(
            store.state().last_outcome.map(|o| o.message),
            Some("Timetable generated".to_string())
        );

        let level_three = json!({ "level": 3, "entries": [] });
        dispatcher.dispatch("load-result", &[json!({ "isSuccess": true, "data": level_three })]);
        assert!(cache.load_level(3).is_some());
        assert_eq!(store.snapshot().map(|s| s.level), Some(1));
    }

    #[test]
    fn level_less_payload_belongs_to_the_request_it_answers() {
        let dir = tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path());
        let dispatcher = dispatcher(Some(cache.clone()));
        let context = dispatcher.context();
        let bare = json!({ "entries": [ { "day": "Sunday", "timeSlot": 1, "courseCode": "CS101" } ] });

        context.requests.begin("7", 1);
        context.store.switch_level(3, None);
        dispatcher.dispatch("load-result", &[json!({ "isSuccess": true, "data": bare.clone() })]);

        assert_eq!(cache.load_level(1).map(|s| s.len()), Some(1));
        assert!(cache.load_level(3).is_none());
        assert!(context.store.snapshot().is_none());

        assert_eq!(context.requests.complete("7"), Some(1));
        assert_eq!(context.requests.complete("7"), None);
        dispatcher.dispatch("timetable-updated", &[bare]);
        assert_eq!(context.store.snapshot().map(|s| s.level), Some(3));
    }

    #[test]
    fn list_delete_and_activate_update_saved_timetables() {
        let dispatcher = dispatcher(None);
        let store = dispatcher.context().store.clone();

        dispatcher.dispatch(
            "list-result",
            &[json!({ "isSuccess": true, "data": { "$values": [
                { "id": 1, "name": "Draft A", "isActive": true },
                { "id": "2", "name": "Draft B" }
            ] } })],
        );
        let state = store.state();
        assert_eq!(state.timetables.len(), 2);
        assert_eq!(state.active_timetable.as_deref(), Some("1"));

        dispatcher.dispatch("set-active-result", &[json!({ "isSuccess": true, "data": { "id": 2 } })]);
        assert_eq!(store.state().active_timetable.as_deref(), Some("2"));

        dispatcher.dispatch("delete-result", &[json!({ "isSuccess": true, "data": "1" })]);
        let state = store.state();
        assert_eq!(state.timetables.len(), 1);
        assert_eq!(state.timetables[0].id, "2");
        assert!(state.timetables[0].is_active);
    }

    #[test]
    fn progress_accepts_numbers_and_objects() {
        let dispatcher = dispatcher(None);
        let store = dispatcher.context().store.clone();

        dispatcher.dispatch("generation-progress", &[json!(25)]);
        assert_eq!(store.state().progress.map(|p| p.percent), Some(25.0));

        dispatcher.dispatch(
            "generation-progress",
            &[json!({ "isSuccess": true, "data": { "progress": 80, "message": "Placing labs" } })],
        );
        let progress = store.state().progress.expect("progress");
        assert_eq!(progress.percent, 80.0);
        assert_eq!(progress.message.as_deref(), Some("Placing labs"));

        assert_eq!(
            dispatcher.dispatch("generation-progress", &[json!(140)]),
            DispatchOutcome::Malformed(ServerEvent::GenerationProgress)
        );
    }

    #[test]
    fn custom_handlers_run_after_defaults() {
        let mut dispatcher = dispatcher(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        dispatcher.on(ServerEvent::UndoResult, move |context, _| {
            assert!(context.store.state().last_outcome.is_some());
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch("undo-result", &[json!({ "isSuccess": true })]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.dispatch("notify-all", &[]), DispatchOutcome::Unknown);
    }
}
