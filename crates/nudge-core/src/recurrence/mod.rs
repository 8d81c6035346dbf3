//! Recurrence engine.
//!
//! Pure date arithmetic over [`RecurrenceRule`]: the next occurrence after a
//! given instant, a bounded forward sequence of future occurrences, and the
//! write-back applied when a recurring reminder is completed.
//!
//! Calendar rules (daily, weekly, monthly) work on wall-clock time in a
//! [`CalendarZone`], so "every Monday at 9:00" stays at 9:00 across DST
//! changes. Hourly rules are plain elapsed time.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime,
    Offset, TimeZone, Utc,
};
use tracing::debug;

use crate::model::{RecurrenceRule, Reminder};

/// Time zone used for wall-clock arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CalendarZone {
    /// The host's local zone, DST included.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl CalendarZone {
    pub fn utc() -> Self {
        CalendarZone::Fixed(Utc.fix())
    }

    /// Fixed offset in minutes east of UTC. `None` if out of range.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(CalendarZone::Fixed)
    }
}

/// Conversion between instants and wall-clock time in one zone.
trait WallClock {
    fn wall_clock_of(&self, instant: DateTime<Utc>) -> NaiveDateTime;
    fn instants_at(&self, wall: &NaiveDateTime) -> LocalResult<DateTime<Utc>>;
}

impl WallClock for CalendarZone {
    fn wall_clock_of(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match *self {
            CalendarZone::Local => instant.with_timezone(&Local).naive_local(),
            CalendarZone::Fixed(offset) => instant.with_timezone(&offset).naive_local(),
        }
    }

    fn instants_at(&self, wall: &NaiveDateTime) -> LocalResult<DateTime<Utc>> {
        match *self {
            CalendarZone::Local => Local
                .from_local_datetime(wall)
                .map(|dt| dt.with_timezone(&Utc)),
            CalendarZone::Fixed(offset) => offset
                .from_local_datetime(wall)
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Outcome of [`RecurrenceEngine::advance_to_next_occurrence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advancement {
    /// Nothing to do: non-recurring, or the series already ended.
    Unchanged,
    /// `scheduled_date` moved to the contained date.
    Advanced(DateTime<Utc>),
    /// The next date would pass `recurrence_end_date`; the reminder is now completed.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceEngine {
    zone: CalendarZone,
}

impl RecurrenceEngine {
    pub fn new(zone: CalendarZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> CalendarZone {
        self.zone
    }

    /// The first occurrence strictly after `after`, or `None` for
    /// non-recurring rules.
    pub fn next_occurrence(
        &self,
        rule: &RecurrenceRule,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        next_in_zone(&self.zone, rule, after)
    }

    /// Up to `count` occurrences strictly after `now`, walking forward from
    /// `starting_from` (which counts as the first candidate).
    ///
    /// The result is strictly increasing. A non-recurring rule yields at most
    /// `starting_from` itself.
    pub fn occurrences(
        &self,
        rule: &RecurrenceRule,
        starting_from: DateTime<Utc>,
        count: usize,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut found = Vec::with_capacity(count.min(128));
        if count == 0 {
            return found;
        }

        let mut cursor = starting_from;
        loop {
            if cursor > now {
                found.push(cursor);
                if found.len() == count {
                    break;
                }
            }
            match self.next_occurrence(rule, cursor) {
                Some(next) if next > cursor => cursor = next,
                _ => break,
            }
        }
        found
    }

    /// Move a recurring reminder to its next occurrence, or end the series if
    /// that occurrence would pass the end date.
    ///
    /// Completed reminders are left alone, so applying this twice to an
    /// exhausted series changes nothing. Any change bumps `updated_at`.
    pub fn advance_to_next_occurrence(
        &self,
        reminder: &mut Reminder,
        now: DateTime<Utc>,
    ) -> Advancement {
        if reminder.is_completed {
            return Advancement::Unchanged;
        }
        let Some(next) = self.next_occurrence(&reminder.recurrence, reminder.scheduled_date) else {
            return Advancement::Unchanged;
        };

        reminder.updated_at = now;
        match reminder.recurrence_end_date {
            Some(end) if next > end => {
                reminder.is_completed = true;
                Advancement::Exhausted
            }
            _ => {
                reminder.scheduled_date = next;
                Advancement::Advanced(next)
            }
        }
    }
}

fn next_in_zone(
    zone: &impl WallClock,
    rule: &RecurrenceRule,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match *rule {
        RecurrenceRule::None => None,
        RecurrenceRule::Hourly => after.checked_add_signed(Duration::hours(1)),
        RecurrenceRule::Daily => {
            let wall = zone.wall_clock_of(after);
            let next = wall.date().succ_opt()?.and_time(wall.time());
            resolve(zone, next)
        }
        RecurrenceRule::Weekly { weekday } => {
            if !(1..=7).contains(&weekday) {
                debug!(weekday, "weekly rule with invalid weekday; no next occurrence");
                return None;
            }
            let wall = zone.wall_clock_of(after);
            let mut date = wall.date();
            // 1..=7 days forward, never the same day
            for _ in 0..7 {
                date = date.succ_opt()?;
                if date.weekday().number_from_sunday() == u32::from(weekday) {
                    break;
                }
            }
            resolve(zone, date.and_time(wall.time()))
        }
        RecurrenceRule::Monthly { day } => {
            if !(1..=31).contains(&day) {
                debug!(day, "monthly rule with invalid day; no next occurrence");
                return None;
            }
            let wall = zone.wall_clock_of(after);
            let (year, month) = if wall.month() == 12 {
                (wall.year() + 1, 1)
            } else {
                (wall.year(), wall.month() + 1)
            };
            let day = u32::from(day).min(days_in_month(year, month)?);
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            resolve(zone, date.and_time(wall.time()))
        }
    }
}

fn resolve(zone: &impl WallClock, wall: NaiveDateTime) -> Option<DateTime<Utc>> {
    settle(zone.instants_at(&wall), || {
        // wall-clock time skipped by a DST jump; rebuild it past the gap
        let shifted = wall.checked_add_signed(Duration::hours(1))?;
        zone.instants_at(&shifted).earliest()
    })
}

/// Pick one instant for a wall-clock time: the earlier of two on a DST
/// fall-back, `past_gap` when the time does not exist.
fn settle(
    result: LocalResult<DateTime<Utc>>,
    past_gap: impl FnOnce() -> Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match result {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => past_gap(),
    }
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|last| last.day())
}
