use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Market calendar consulted by gated jobs.
pub trait MarketCalendar: Send + Sync {
    fn is_open(&self, at: DateTime<Utc>) -> bool;

    fn is_trading_day(&self, at: DateTime<Utc>) -> bool;
}

/// Weekday trading sessions between fixed wall-clock times, minus holidays.
#[derive(Debug, Clone)]
pub struct WeekdayHoursCalendar {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    holidays: HashSet<NaiveDate>,
}

impl WeekdayHoursCalendar {
    pub fn new(timezone: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            timezone,
            open,
            close,
            holidays: HashSet::new(),
        }
    }

    /// NYSE / TSX regular session, 09:30–16:00 Eastern.
    pub fn north_american() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
        )
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }
}

impl Default for WeekdayHoursCalendar {
    fn default() -> Self {
        Self::north_american()
    }
}

impl MarketCalendar for WeekdayHoursCalendar {
    fn is_open(&self, at: DateTime<Utc>) -> bool {
        if !self.is_trading_day(at) {
            return false;
        }
        let local = at.with_timezone(&self.timezone).time();
        local >= self.open && local < self.close
    }

    fn is_trading_day(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone).date_naive();
        !matches!(local.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&local)
    }
}
