//! Business-hours calendar: Monday to Friday, fixed opening and closing hour
//!
//! All arithmetic happens in the configured local offset; inputs and outputs
//! are UTC.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc, Weekday,
};

use crate::error::{EngineError, Result};
use crate::model::WaitStep;

/// `t + d`, clamped to the latest representable instant
pub fn saturating_add(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    t.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Business-hours window in a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
}

impl Default for BusinessHours {
    /// Monday to Friday, 09:00 to 17:00 UTC
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            open: NaiveTime::MIN + Duration::hours(9),
            close: NaiveTime::MIN + Duration::hours(17),
        }
    }
}

impl BusinessHours {
    /// `open_hour` and `close_hour` are whole hours in local time, `open < close <= 23`
    pub fn new(utc_offset_minutes: i32, open_hour: u32, close_hour: u32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::validation(format!("invalid UTC offset: {utc_offset_minutes} minutes"))
        })?;
        let hour = |h: u32| {
            NaiveTime::from_hms_opt(h, 0, 0)
                .ok_or_else(|| EngineError::validation(format!("invalid business hour: {h}")))
        };
        let (open, close) = (hour(open_hour)?, hour(close_hour)?);
        if open >= close {
            return Err(EngineError::validation(format!(
                "business hours must open before they close ({open_hour} >= {close_hour})"
            )));
        }
        Ok(Self {
            offset,
            open,
            close,
        })
    }

    fn to_local(&self, t: DateTime<Utc>) -> NaiveDateTime {
        t.with_timezone(&self.offset).naive_local()
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    fn is_business_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn is_open_local(&self, t: NaiveDateTime) -> bool {
        Self::is_business_day(t.date()) && t.time() >= self.open && t.time() < self.close
    }

    /// `t` itself if open, otherwise the next opening
    fn next_open_local(&self, t: NaiveDateTime) -> NaiveDateTime {
        let mut date = t.date();
        let mut time = t.time();
        loop {
            if Self::is_business_day(date) {
                if time < self.open {
                    return date.and_time(self.open);
                }
                if time < self.close {
                    return date.and_time(time);
                }
            }
            date = date + Duration::days(1);
            time = NaiveTime::MIN;
        }
    }

    pub fn is_open(&self, t: DateTime<Utc>) -> bool {
        self.is_open_local(self.to_local(t))
    }

    /// Earliest business-hours instant at or after `t`
    pub fn next_open(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.to_utc(self.next_open_local(self.to_local(t)))
    }

    /// Count `duration` only across open intervals, starting at the first
    /// opening at or after `start`
    pub fn add_business_time(&self, start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
        self.to_utc(self.add_business_time_local(self.to_local(start), duration))
    }

    fn add_business_time_local(&self, start: NaiveDateTime, duration: Duration) -> NaiveDateTime {
        let mut cursor = self.next_open_local(start);
        let mut remaining = duration;
        loop {
            let close = cursor.date().and_time(self.close);
            let available = close - cursor;
            if remaining <= available {
                return cursor + remaining;
            }
            remaining = remaining - available;
            cursor = self.next_open_local(close);
        }
    }

    /// When a wait step entered at `entered_at` becomes due.
    ///
    /// Without the business-hours flag this is plain wall-clock time. With it,
    /// minute and hour waits count only open time. Day and week waits keep
    /// their calendar length from the first opening; if that lands outside
    /// business hours, the remainder of the first business day is carried to
    /// the next opening (Friday 16:00 plus one day is Monday 10:00).
    pub fn wait_due(&self, entered_at: DateTime<Utc>, wait: &WaitStep) -> DateTime<Utc> {
        if !wait.business_hours_only {
            return saturating_add(entered_at, wait.length());
        }
        if !wait.unit.is_calendar() {
            return self.add_business_time(entered_at, wait.length());
        }

        let begin = self.next_open_local(self.to_local(entered_at));
        let Some(nominal) = begin.checked_add_signed(wait.length()) else {
            return DateTime::<Utc>::MAX_UTC;
        };
        if self.is_open_local(nominal) {
            return self.to_utc(nominal);
        }
        let carried = begin.date().and_time(self.close) - begin;
        self.to_utc(self.add_business_time_local(nominal, carried))
    }
}
