//! Day × slot projection of a snapshot for display.

use crate::models::{Assignment, Day, Level, SlotKey, TimetableSnapshot};

/// Days always shown, even when empty.
pub const WORK_WEEK: [Day; 5] = [
    Day::Sunday,
    Day::Monday,
    Day::Tuesday,
    Day::Wednesday,
    Day::Thursday,
];

/// Slots always shown, even when empty.
pub const DEFAULT_SLOTS: u16 = 5;

/// Rectangular view of one level's timetable.
///
/// Columns are days, rows are time slots from 1 (or 0 when a backend
/// numbers from zero). Weekend days and extra slots appear only when the
/// snapshot uses them.
#[derive(Debug, Clone, PartialEq)]
pub struct TimetableGrid {
    /// Level the grid was built from.
    pub level: Level,
    /// Column order, Sunday first.
    pub days: Vec<Day>,
    /// Row order, ascending.
    pub slots: Vec<u16>,
    rows: Vec<Vec<Option<Assignment>>>,
}

impl TimetableGrid {
    /// Project `snapshot` onto the work week and the default slots, widened to
    /// whatever days and slots it actually uses.
    pub fn from_snapshot(snapshot: &TimetableSnapshot) -> Self {
        let mut days: Vec<Day> = WORK_WEEK.to_vec();
        for key in snapshot.assignments.keys() {
            if !days.contains(&key.day) {
                days.push(key.day);
            }
        }
        days.sort();

        let used = snapshot.assignments.keys().map(|key| key.slot);
        let first_slot = used.clone().min().unwrap_or(1).min(1);
        let last_slot = used.max().unwrap_or(0).max(DEFAULT_SLOTS);
        let slots: Vec<u16> = (first_slot..=last_slot).collect();

        let rows = slots
            .iter()
            .map(|slot| {
                days.iter()
                    .map(|day| snapshot.assignment(*day, *slot).cloned())
                    .collect()
            })
            .collect();

        Self {
            level: snapshot.level,
            days,
            slots,
            rows,
        }
    }

    /// Grid with every default cell empty.
    pub fn empty(level: Level) -> Self {
        Self::from_snapshot(&TimetableSnapshot::empty(level))
    }

    /// Assignment at `day`/`slot`, if the grid shows that cell and it is taught.
    pub fn cell(&self, day: Day, slot: u16) -> Option<&Assignment> {
        let column = self.days.iter().position(|candidate| *candidate == day)?;
        let row = self.slots.iter().position(|candidate| *candidate == slot)?;
        self.rows.get(row)?.get(column)?.as_ref()
    }

    /// Cells of each slot row, in day order.
    pub fn rows(&self) -> impl Iterator<Item = (u16, &[Option<Assignment>])> {
        self.slots
            .iter()
            .copied()
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    /// Key of the cell at `(row, column)` indices.
    pub fn key_at(&self, row: usize, column: usize) -> Option<SlotKey> {
        Some(SlotKey::new(*self.days.get(column)?, *self.slots.get(row)?))
    }

    /// Filled cells and total cells.
    pub fn occupancy(&self) -> (usize, usize) {
        let filled = self
            .rows
            .iter()
            .flatten()
            .filter(|cell| cell.is_some())
            .count();
        (filled, self.days.len() * self.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(code: &str) -> Assignment {
        Assignment {
            course_code: code.into(),
            instructor: "Dr. Sami".into(),
            room: "Lab 2".into(),
        }
    }

    #[test]
    fn empty_grid_shows_work_week() {
        let grid = TimetableGrid::empty(1);
        assert_eq!(grid.days, WORK_WEEK.to_vec());
        assert_eq!(grid.slots, vec![1, 2, 3, 4, 5]);
        assert_eq!(grid.occupancy(), (0, 25));
    }

    #[test]
    fn grid_grows_for_weekend_and_late_slots() {
        let mut snapshot = TimetableSnapshot::empty(2);
        snapshot
            .assignments
            .insert(SlotKey::new(Day::Saturday, 7), assignment("CS499"));
        snapshot
            .assignments
            .insert(SlotKey::new(Day::Monday, 2), assignment("CS201"));

        let grid = TimetableGrid::from_snapshot(&snapshot);
        assert_eq!(grid.days.last(), Some(&Day::Saturday));
        assert_eq!(grid.slots.len(), 7);
        assert_eq!(
            grid.cell(Day::Monday, 2).map(|a| a.course_code.as_str()),
            Some("CS201")
        );
        assert!(grid.cell(Day::Friday, 1).is_none());
        assert_eq!(grid.key_at(6, 5), Some(SlotKey::new(Day::Saturday, 7)));

        let (slot, cells) = grid.rows().nth(1).expect("second row");
        assert_eq!(slot, 2);
        assert_eq!(cells.iter().filter(|cell| cell.is_some()).count(), 1);
        assert_eq!(grid.occupancy(), (2, 42));
    }

    #[test]
    fn zero_based_slots_get_a_row() {
        let mut snapshot = TimetableSnapshot::empty(1);
        snapshot
            .assignments
            .insert(SlotKey::new(Day::Sunday, 0), assignment("CS100"));

        let grid = TimetableGrid::from_snapshot(&snapshot);
        assert_eq!(grid.slots, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(grid.key_at(0, 0), Some(SlotKey::new(Day::Sunday, 0)));
        assert_eq!(
            grid.cell(Day::Sunday, 0).map(|a| a.course_code.as_str()),
            Some("CS100")
        );
    }
}
