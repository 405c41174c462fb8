//! Shared domain models.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::de;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::PayloadError;

mod result;

pub use result::{normalize_list, ApiResult, Envelope};

/// Academic level (year of study) a timetable belongs to.
pub type Level = u8;

/// Day of the week, numbered the way the backend's `DayOfWeek` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    /// Sunday, ordinal 0.
    Sunday,
    /// Monday.
    Monday,
    /// Tuesday.
    Tuesday,
    /// Wednesday.
    Wednesday,
    /// Thursday.
    Thursday,
    /// Friday.
    Friday,
    /// Saturday.
    Saturday,
}

impl Day {
    /// All days, Sunday first.
    pub const ALL: [Day; 7] = [
        Day::Sunday,
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
    ];

    /// Day for a `DayOfWeek` ordinal (0 = Sunday).
    pub fn from_index(index: u64) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Three letter label used in grid headers.
    pub fn short_name(&self) -> &'static str {
        match self {
            Day::Sunday => "Sun",
            Day::Monday => "Mon",
            Day::Tuesday => "Tue",
            Day::Wednesday => "Wed",
            Day::Thursday => "Thu",
            Day::Friday => "Fri",
            Day::Saturday => "Sat",
        }
    }

    fn from_json(value: &Value) -> Result<Self, PayloadError> {
        match value {
            Value::String(name) => name.parse(),
            Value::Number(number) => number
                .as_u64()
                .and_then(Day::from_index)
                .ok_or_else(|| PayloadError::Invalid(format!("day index {number} out of range"))),
            other => Err(PayloadError::Invalid(format!("unexpected day value {other}"))),
        }
    }
}

impl FromStr for Day {
    type Err = PayloadError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let needle = input.trim().to_ascii_lowercase();
        Day::ALL
            .into_iter()
            .find(|day| {
                let full = format!("{day:?}").to_ascii_lowercase();
                full == needle || day.short_name().eq_ignore_ascii_case(&needle)
            })
            .ok_or_else(|| PayloadError::Invalid(format!("unknown day '{input}'")))
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Position of an assignment inside a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    /// Day of the week.
    pub day: Day,
    /// Period within the day, as numbered by the backend.
    pub slot: u16,
}

impl SlotKey {
    /// Key for `day`/`slot`.
    pub fn new(day: Day, slot: u16) -> Self {
        Self { day, slot }
    }
}

/// What is taught in a given slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Course taught in the slot; never blank.
    pub course_code: String,
    /// Instructor name; may be blank.
    #[serde(default)]
    pub instructor: String,
    /// Room; may be blank.
    #[serde(default)]
    pub room: String,
}

/// Complete timetable for one academic level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimetableSnapshot {
    /// Level this timetable belongs to.
    pub level: Level,
    #[serde(
        serialize_with = "serialize_assignments",
        deserialize_with = "deserialize_assignments"
    )]
    /// Taught slots only; empty slots have no entry.
    pub assignments: BTreeMap<SlotKey, Assignment>,
    /// When the client received it, not when the backend produced it.
    pub received_at: DateTime<Utc>,
}

impl TimetableSnapshot {
    /// Empty snapshot for a level.
    pub fn empty(level: Level) -> Self {
        Self {
            level,
            assignments: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Assignment taught at `day`/`slot`.
    pub fn assignment(&self, day: Day, slot: u16) -> Option<&Assignment> {
        self.assignments.get(&SlotKey::new(day, slot))
    }

    /// Number of taught slots.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True when nothing is taught.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Same level and same assignments, ignoring when it arrived.
    pub fn same_content(&self, other: &TimetableSnapshot) -> bool {
        self.level == other.level && self.assignments == other.assignments
    }

    /// Build a snapshot from the JSON the hub pushes.
    ///
    /// Accepts `{ "level": 2, "entries": [ { "day", "timeSlot", "courseCode",
    /// "instructor", "room" } ] }`; `intervals` is accepted in place of
    /// `entries`. A `(day, slot)` named twice makes the payload invalid.
    pub fn from_payload(value: &Value, fallback_level: Option<Level>) -> Result<Self, PayloadError> {
        let object = value
            .as_object()
            .ok_or_else(|| PayloadError::Invalid("timetable payload is not an object".into()))?;

        let level = match object.get("level") {
            Some(raw) => raw
                .as_u64()
                .and_then(|level| Level::try_from(level).ok())
                .ok_or_else(|| PayloadError::Invalid(format!("invalid level {raw}")))?,
            None => fallback_level.ok_or(PayloadError::MissingField("level"))?,
        };

        let entries = object
            .get("entries")
            .or_else(|| object.get("intervals"))
            .and_then(Value::as_array)
            .ok_or(PayloadError::MissingField("entries"))?;

        let mut assignments = BTreeMap::new();
        for entry in entries {
            let (key, assignment) = parse_entry(entry)?;
            if assignments.insert(key, assignment).is_some() {
                return Err(PayloadError::Invalid(format!(
                    "slot {} of {} assigned twice",
                    key.slot, key.day
                )));
            }
        }

        Ok(Self {
            level,
            assignments,
            received_at: Utc::now(),
        })
    }
}

fn parse_entry(entry: &Value) -> Result<(SlotKey, Assignment), PayloadError> {
    let day = entry.get("day").ok_or(PayloadError::MissingField("day"))?;
    let day = Day::from_json(day)?;
    let slot = entry
        .get("timeSlot")
        .or_else(|| entry.get("slot"))
        .ok_or(PayloadError::MissingField("timeSlot"))?;
    let slot = slot
        .as_u64()
        .and_then(|slot| u16::try_from(slot).ok())
        .ok_or_else(|| PayloadError::Invalid(format!("invalid time slot {slot}")))?;
    let course_code = entry
        .get("courseCode")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or(PayloadError::MissingField("courseCode"))?;
    let text = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    };

    Ok((
        SlotKey::new(day, slot),
        Assignment {
            course_code: course_code.to_string(),
            instructor: text("instructor"),
            room: text("room"),
        },
    ))
}

fn serialize_assignments<S>(
    value: &BTreeMap<SlotKey, Assignment>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(value.len()))?;
    for (key, assignment) in value {
        map.serialize_entry(&format!("{},{}", key.day, key.slot), assignment)?;
    }
    map.end()
}

fn deserialize_assignments<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<SlotKey, Assignment>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Assignment> = BTreeMap::deserialize(deserializer)?;
    let mut result = BTreeMap::new();
    for (key, assignment) in raw {
        let (day, slot) = key
            .split_once(',')
            .ok_or_else(|| de::Error::custom(format!("invalid key '{key}'")))?;
        let day = day
            .parse::<Day>()
            .map_err(|_| de::Error::custom(format!("invalid day in key '{key}'")))?;
        let slot = slot
            .parse::<u16>()
            .map_err(|_| de::Error::custom(format!("invalid slot in key '{key}'")))?;
        result.insert(SlotKey::new(day, slot), assignment);
    }
    Ok(result)
}

/// Saved timetable as listed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableSummary {
    /// Backend id, always as a string.
    pub id: String,
    /// Display name; may be blank.
    #[serde(default)]
    pub name: String,
    /// Level the timetable was generated for, when the backend reports it.
    #[serde(default)]
    pub level: Option<Level>,
    /// Whether this is the level's published timetable.
    #[serde(default)]
    pub is_active: bool,
    /// Creation time, when the backend reports it.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TimetableSummary {
    /// Parse one list entry; the backend sends ids as strings or numbers.
    pub fn from_payload(value: &Value) -> Result<Self, PayloadError> {
        let id = match value.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            Some(other) => return Err(PayloadError::Invalid(format!("invalid id {other}"))),
            None => return Err(PayloadError::MissingField("id")),
        };
        let mut value = value.clone();
        value["id"] = Value::String(id);
        Ok(serde_json::from_value(value)?)
    }

    /// Label shown in lists.
    pub fn display_name(&self) -> String {
        let name = if self.name.trim().is_empty() {
            format!("Timetable {}", self.id)
        } else {
            self.name.clone()
        };
        if self.is_active {
            format!("{name} (active)")
        } else {
            name
        }
    }
}

/// Last reported progress of a running generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// 0 to 100.
    pub percent: f64,
    /// Phase description, when the hub sent one.
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "level": 2,
            "entries": [
                { "day": "Sunday", "timeSlot": 1, "courseCode": "CS201", "instructor": "Dr. Salem", "room": "H1" },
                { "day": 2, "timeSlot": 3, "courseCode": "MA210", "instructor": "Dr. Nour", "room": "Lab 4" }
            ]
        })
    }

    #[test]
    fn parses_pushed_snapshot() -> Result<(), PayloadError> {
        let snapshot = TimetableSnapshot::from_payload(&sample_payload(), None)?;
        assert_eq!(snapshot.level, 2);
        assert_eq!(snapshot.len(), 2);
        let tuesday = snapshot
            .assignment(Day::Tuesday, 3)
            .expect("numeric day resolves to Tuesday");
        assert_eq!(tuesday.course_code, "MA210");
        assert_eq!(tuesday.room, "Lab 4");
        Ok(())
    }

    #[test]
    fn rejects_double_booked_slot() {
        let payload = json!({
            "level": 1,
            "entries": [
                { "day": "Mon", "timeSlot": 2, "courseCode": "CS101" },
                { "day": "monday", "timeSlot": 2, "courseCode": "CS102" }
            ]
        });
        let err = TimetableSnapshot::from_payload(&payload, None).unwrap_err();
        assert!(matches!(err, PayloadError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn missing_course_code_is_reported() {
        let payload = json!({ "level": 1, "entries": [ { "day": "Mon", "timeSlot": 2 } ] });
        let err = TimetableSnapshot::from_payload(&payload, None).unwrap_err();
        assert!(matches!(err, PayloadError::MissingField("courseCode")));
    }

    #[test]
    fn level_falls_back_to_active_level() -> Result<(), PayloadError> {
        let payload = json!({ "intervals": [] });
        let snapshot = TimetableSnapshot::from_payload(&payload, Some(4))?;
        assert_eq!(snapshot.level, 4);
        assert!(snapshot.is_empty());
        assert!(TimetableSnapshot::from_payload(&payload, None).is_err());
        Ok(())
    }

    #[test]
    fn snapshot_survives_json_storage() -> Result<(), PayloadError> {
        let snapshot = TimetableSnapshot::from_payload(&sample_payload(), None)?;
        let stored = serde_json::to_string(&snapshot)?;
        assert!(stored.contains("\"Sunday,1\""));
        let restored: TimetableSnapshot = serde_json::from_str(&stored)?;
        assert_eq!(restored, snapshot);
        Ok(())
    }

    #[test]
    fn summary_accepts_numeric_ids() -> Result<(), PayloadError> {
        let summary =
            TimetableSummary::from_payload(&json!({ "id": 12, "name": "", "isActive": true }))?;
        assert_eq!(summary.id, "12");
        assert_eq!(summary.display_name(), "Timetable 12 (active)");
        Ok(())
    }
}
