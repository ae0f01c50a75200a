use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a recurring invoice fires. `every` is the interval multiplier
/// (>= 1): `Monthly { every: 3, .. }` means every third month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Cadence {
    Daily { every: u32 },
    Weekly { every: u32, weekday: Weekday },
    Monthly { every: u32, day_of_month: u32 },
    Yearly { every: u32, month: u32, day: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    fn days_from_monday(self) -> i64 {
        match self {
            Weekday::Monday => 0,
            Weekday::Tuesday => 1,
            Weekday::Wednesday => 2,
            Weekday::Thursday => 3,
            Weekday::Friday => 4,
            Weekday::Saturday => 5,
            Weekday::Sunday => 6,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        };
        f.write_str(name)
    }
}

/// When a series stops producing occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndCondition {
    #[default]
    Never,
    AfterCount { count: u32 },
    OnOrBefore { date: NaiveDate },
}

/// Result of computing the n-th occurrence of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    Scheduled(NaiveDate),
    EndOfSeries,
}

/// Compute the date of the `index`-th occurrence (0-based) of a series.
///
/// Pure and deterministic: no I/O, no clock access. All occurrences are
/// derived from the anchor date alone, so a series that sat paused for
/// months still resumes at its next un-generated occurrence rather than
/// drifting to "today". Day-of-month and Feb-29 anchors are clamped to the
/// last valid day of each target month independently per occurrence; the
/// clamp never carries forward.
pub fn compute_occurrence(
    cadence: &Cadence,
    end: &EndCondition,
    anchor: NaiveDate,
    index: u32,
) -> Occurrence {
    if let EndCondition::AfterCount { count } = end {
        if index >= *count {
            return Occurrence::EndOfSeries;
        }
    }

    // A date outside chrono's representable range means the series has
    // effectively run out.
    let Some(date) = target_date(cadence, anchor, index) else {
        return Occurrence::EndOfSeries;
    };

    if let EndCondition::OnOrBefore { date: bound } = end {
        if date > *bound {
            return Occurrence::EndOfSeries;
        }
    }

    Occurrence::Scheduled(date)
}

fn target_date(cadence: &Cadence, anchor: NaiveDate, index: u32) -> Option<NaiveDate> {
    match cadence {
        Cadence::Daily { every } => {
            let days = i64::from(index).checked_mul(i64::from(*every))?;
            anchor.checked_add_signed(Duration::try_days(days)?)
        }
        Cadence::Weekly { every, weekday } => {
            // Snap within the anchor's week (Monday-based), then advance
            // whole weeks.
            let monday = anchor.checked_sub_signed(Duration::days(i64::from(
                anchor.weekday().num_days_from_monday(),
            )))?;
            let days = i64::from(index)
                .checked_mul(i64::from(*every))?
                .checked_mul(7)?
                .checked_add(weekday.days_from_monday())?;
            monday.checked_add_signed(Duration::try_days(days)?)
        }
        Cadence::Monthly { every, day_of_month } => {
            let months = (i64::from(anchor.year()) * 12 + i64::from(anchor.month0()))
                .checked_add(i64::from(index).checked_mul(i64::from(*every))?)?;
            let year = i32::try_from(months.div_euclid(12)).ok()?;
            let month = months.rem_euclid(12) as u32 + 1;
            clamped_day(year, month, *day_of_month)
        }
        Cadence::Yearly { every, month, day } => {
            let years = i64::from(index).checked_mul(i64::from(*every))?;
            let year = i64::from(anchor.year()).checked_add(years)?;
            clamped_day(i32::try_from(year).ok()?, *month, *day)
        }
    }
}

/// The requested day, or the last valid day of the target month when the
/// requested day does not exist there (Jan 31 -> Feb 29/28, etc.).
fn clamped_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).or_else(|| last_day_of_month(year, month))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

impl Cadence {
    /// Reject zero intervals and out-of-range calendar fields before a
    /// definition ever reaches the engine.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let every = match self {
            Cadence::Daily { every }
            | Cadence::Weekly { every, .. }
            | Cadence::Monthly { every, .. }
            | Cadence::Yearly { every, .. } => *every,
        };
        if every == 0 {
            return Err("interval multiplier must be at least 1".to_string());
        }
        match self {
            Cadence::Monthly { day_of_month, .. } if !(1..=31).contains(day_of_month) => {
                Err(format!("day_of_month {day_of_month} not in 1..=31"))
            }
            Cadence::Yearly { month, .. } if !(1..=12).contains(month) => {
                Err(format!("month {month} not in 1..=12"))
            }
            Cadence::Yearly { day, .. } if !(1..=31).contains(day) => {
                Err(format!("day {day} not in 1..=31"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily { every: 1 } => write!(f, "every day"),
            Cadence::Daily { every } => write!(f, "every {every} days"),
            Cadence::Weekly { every: 1, weekday } => write!(f, "every week on {weekday}"),
            Cadence::Weekly { every, weekday } => write!(f, "every {every} weeks on {weekday}"),
            Cadence::Monthly {
                every: 1,
                day_of_month,
            } => write!(f, "every month on day {day_of_month}"),
            Cadence::Monthly {
                every,
                day_of_month,
            } => write!(f, "every {every} months on day {day_of_month}"),
            Cadence::Yearly {
                every: 1,
                month,
                day,
            } => write!(f, "every year on {month:02}-{day:02}"),
            Cadence::Yearly { every, month, day } => {
                write!(f, "every {every} years on {month:02}-{day:02}")
            }
        }
    }
}
