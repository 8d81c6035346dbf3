//! Partitioning of the platform's pending-alert budget.
//!
//! A fixed reserve goes to one-time reminders (soonest first). Everything
//! else is shared by recurring reminders: candidate occurrences from every
//! recurring reminder are pooled and the earliest win, so one hourly reminder
//! cannot starve a weekly one that fires sooner.

use chrono::{DateTime, Utc};

use super::{alert_identifier, AlertInstance};
use crate::model::Reminder;
use crate::recurrence::RecurrenceEngine;
use crate::storage::AlertsConfig;

pub const DEFAULT_ALERT_CAPACITY: usize = 64;
pub const DEFAULT_ONE_TIME_RESERVE: usize = 14;
pub const DEFAULT_CANDIDATES_PER_REMINDER: usize = 100;

/// One alert the platform should hold right now.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedAlert<'a> {
    pub reminder: &'a Reminder,
    pub fire_at: DateTime<Utc>,
    pub occurrence_index: usize,
}

impl AllocatedAlert<'_> {
    pub fn identifier(&self) -> String {
        alert_identifier(&self.reminder.id, self.occurrence_index)
    }

    pub fn instance(&self) -> AlertInstance {
        AlertInstance {
            reminder_id: self.reminder.id.clone(),
            occurrence_index: self.occurrence_index,
            fire_at: self.fire_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertBudgetAllocator {
    engine: RecurrenceEngine,
    capacity: usize,
    one_time_reserve: usize,
    candidates_per_reminder: usize,
}

impl AlertBudgetAllocator {
    /// `one_time_reserve` is clamped to `capacity`.
    pub fn new(engine: RecurrenceEngine, capacity: usize, one_time_reserve: usize) -> Self {
        Self {
            engine,
            capacity,
            one_time_reserve: one_time_reserve.min(capacity),
            candidates_per_reminder: DEFAULT_CANDIDATES_PER_REMINDER,
        }
    }

    pub fn from_config(engine: RecurrenceEngine, config: &AlertsConfig) -> Self {
        Self::new(engine, config.capacity, config.one_time_reserve)
            .with_candidates(config.candidates_per_reminder)
    }

    pub fn with_candidates(mut self, candidates_per_reminder: usize) -> Self {
        self.candidates_per_reminder = candidates_per_reminder;
        self
    }

    pub fn engine(&self) -> &RecurrenceEngine {
        &self.engine
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn one_time_reserve(&self) -> usize {
        self.one_time_reserve
    }

    /// The complete set of alerts that should be pending at `now`: one-time
    /// alerts first, then recurring ones, each in firing order.
    ///
    /// Same reminders and same `now` always give the same output.
    pub fn allocate<'a>(
        &self,
        reminders: &'a [Reminder],
        now: DateTime<Utc>,
    ) -> Vec<AllocatedAlert<'a>> {
        let mut one_time: Vec<&Reminder> = reminders
            .iter()
            .filter(|r| !r.is_completed && !r.is_recurring() && r.scheduled_date > now)
            .collect();
        one_time.sort_by(|a, b| {
            a.scheduled_date
                .cmp(&b.scheduled_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut plan: Vec<AllocatedAlert<'a>> = one_time
            .into_iter()
            .take(self.one_time_reserve)
            .map(|reminder| AllocatedAlert {
                reminder,
                fire_at: reminder.scheduled_date,
                occurrence_index: 0,
            })
            .collect();

        let mut recurring: Vec<AllocatedAlert<'a>> = Vec::new();
        for reminder in reminders
            .iter()
            .filter(|r| !r.is_completed && r.is_recurring())
        {
            let end = reminder.effective_end_date();
            let dates = self.engine.occurrences(
                &reminder.recurrence,
                reminder.scheduled_date,
                self.candidates_per_reminder,
                now,
            );
            recurring.extend(
                dates
                    .into_iter()
                    .take_while(|date| end.map_or(true, |end| *date <= end))
                    .enumerate()
                    .map(|(occurrence_index, fire_at)| AllocatedAlert {
                        reminder,
                        fire_at,
                        occurrence_index,
                    }),
            );
        }
        recurring.sort_by(|a, b| {
            a.fire_at
                .cmp(&b.fire_at)
                .then_with(|| a.reminder.id.cmp(&b.reminder.id))
                .then_with(|| a.occurrence_index.cmp(&b.occurrence_index))
        });
        recurring.truncate(self.capacity - self.one_time_reserve);

        plan.extend(recurring);
        plan
    }
}

impl Default for AlertBudgetAllocator {
    fn default() -> Self {
        Self::new(
            RecurrenceEngine::default(),
            DEFAULT_ALERT_CAPACITY,
            DEFAULT_ONE_TIME_RESERVE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewReminder, RecurrenceRule};
    use crate::recurrence::CalendarZone;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn allocator(capacity: usize, reserve: usize) -> AlertBudgetAllocator {
        AlertBudgetAllocator::new(RecurrenceEngine::new(CalendarZone::utc()), capacity, reserve)
    }

    fn one_time(title: &str, in_hours: i64) -> Reminder {
        NewReminder::new(title, now() + Duration::hours(in_hours))
            .into_reminder(now())
            .unwrap()
    }

    fn recurring(title: &str, rule: RecurrenceRule, offset: Duration) -> Reminder {
        NewReminder::new(title, now() + offset)
            .recurring(rule)
            .into_reminder(now())
            .unwrap()
    }

    #[test]
    fn one_time_reminders_are_capped_at_reserve() {
        let reminders: Vec<Reminder> = (1..=20).map(|h| one_time(&format!("t{h}"), h)).collect();
        let plan = allocator(64, 14).allocate(&reminders, now());

        assert_eq!(plan.len(), 14);
        assert!(plan.iter().all(|a| a.occurrence_index == 0));
        assert!(plan.windows(2).all(|w| w[0].fire_at <= w[1].fire_at));
        // the six latest are dropped
        assert_eq!(plan.last().unwrap().reminder.title, "t14");
    }

    #[test]
    fn past_and_completed_one_time_reminders_are_skipped() {
        let mut done = one_time("done", 2);
        done.is_completed = true;
        let reminders = vec![one_time("past", -1), done, one_time("soon", 1)];

        let plan = allocator(64, 14).allocate(&reminders, now());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].reminder.title, "soon");
    }

    #[test]
    fn recurring_reminders_share_remaining_slots_by_date() {
        let reminders = vec![
            recurring("hourly", RecurrenceRule::Hourly, Duration::hours(1)),
            recurring("daily", RecurrenceRule::Daily, Duration::minutes(150)),
        ];
        let plan = allocator(10, 4).allocate(&reminders, now());

        assert_eq!(plan.len(), 6);
        let titles: Vec<&str> = plan.iter().map(|a| a.reminder.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["hourly", "hourly", "daily", "hourly", "hourly", "hourly"]
        );
        assert!(plan.windows(2).all(|w| w[0].fire_at <= w[1].fire_at));
    }

    #[test]
    fn recurring_candidates_respect_end_date() {
        let mut series = recurring("daily", RecurrenceRule::Daily, Duration::hours(1));
        series.recurrence_end_date = Some(now() + Duration::days(2) + Duration::hours(1));
        let plan = allocator(64, 14).allocate(std::slice::from_ref(&series), now());

        // day 0 +1h, day 1 +1h, day 2 +1h (end date inclusive)
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.iter().map(|a| a.occurrence_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn totals_never_exceed_budget() {
        let mut reminders: Vec<Reminder> = (1..=30).map(|h| one_time(&format!("t{h}"), h)).collect();
        reminders.push(recurring("hourly", RecurrenceRule::Hourly, Duration::hours(1)));
        reminders.push(recurring("weekly", RecurrenceRule::Weekly { weekday: 3 }, Duration::hours(1)));

        let plan = allocator(64, 14).allocate(&reminders, now());
        assert_eq!(plan.len(), 64);
        assert_eq!(plan.iter().filter(|a| !a.reminder.is_recurring()).count(), 14);
    }

    #[test]
    fn allocation_is_deterministic() {
        let reminders = vec![
            one_time("a", 3),
            one_time("b", 3),
            recurring("hourly", RecurrenceRule::Hourly, Duration::hours(1)),
            recurring("daily", RecurrenceRule::Daily, Duration::hours(1)),
        ];
        let alloc = allocator(16, 2);
        let first: Vec<String> = alloc
            .allocate(&reminders, now())
            .iter()
            .map(AllocatedAlert::identifier)
            .collect();
        let second: Vec<String> = alloc
            .allocate(&reminders, now())
            .iter()
            .map(AllocatedAlert::identifier)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn reserve_is_clamped_to_capacity() {
        let alloc = allocator(4, 10);
        assert_eq!(alloc.one_time_reserve(), 4);
        let reminders = vec![recurring("hourly", RecurrenceRule::Hourly, Duration::hours(1))];
        assert!(alloc.allocate(&reminders, now()).is_empty());
    }
}
