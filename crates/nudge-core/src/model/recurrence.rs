//! Recurrence rule value type.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How a reminder repeats.
///
/// Weekdays are numbered 1 = Sunday through 7 = Saturday. Stored and sent
/// over the wire as tagged JSON, e.g. `{"kind":"weekly","weekday":2}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly { weekday: u8 },
    Monthly { day: u8 },
}

impl RecurrenceRule {
    /// Weekly rule on the given weekday (1 = Sunday ... 7 = Saturday).
    pub fn weekly(weekday: u8) -> Result<Self, ValidationError> {
        let rule = RecurrenceRule::Weekly { weekday };
        rule.validate()?;
        Ok(rule)
    }

    /// Monthly rule on the given day, clamped per month when applied.
    pub fn monthly(day: u8) -> Result<Self, ValidationError> {
        let rule = RecurrenceRule::Monthly { day };
        rule.validate()?;
        Ok(rule)
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, RecurrenceRule::None)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            RecurrenceRule::Weekly { weekday } if !(1..=7).contains(&weekday) => {
                Err(ValidationError::WeekdayOutOfRange(weekday))
            }
            RecurrenceRule::Monthly { day } if !(1..=31).contains(&day) => {
                Err(ValidationError::MonthDayOutOfRange(day))
            }
            _ => Ok(()),
        }
    }

    /// Storage encoding.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from storage, rejecting out-of-range fields.
    pub fn decode(raw: &str) -> Result<Self, RuleDecodeError> {
        let rule: RecurrenceRule = serde_json::from_str(raw)?;
        rule.validate()?;
        Ok(rule)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuleDecodeError {
    #[error("malformed recurrence rule: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
