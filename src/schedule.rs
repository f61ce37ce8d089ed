//! Operating-hours gate.
//!
//! Maps a UTC instant to active / inactive using local time-of-day windows
//! in a configured IANA timezone (Asia/Tehran by default).

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::ConfigError;

/// A local time-of-day interval, `[start, end)`.
///
/// `start > end` means the window runs past midnight; the tail after midnight
/// belongs to the weekday the window started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Weekdays the window opens on.  Empty = every day.
    pub days: Vec<Weekday>,
}

impl ScheduleWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start,
            end,
            days: Vec::new(),
        }
    }

    pub fn on(mut self, days: &[Weekday]) -> Self {
        self.days = days.to_vec();
        self
    }

    fn opens_on(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }

    fn crosses_midnight(&self) -> bool {
        self.start > self.end
    }

    fn contains(&self, today: Weekday, time: NaiveTime) -> bool {
        if !self.crosses_midnight() {
            return self.opens_on(today) && self.start <= time && time < self.end;
        }
        (self.opens_on(today) && time >= self.start)
            || (self.opens_on(today.pred()) && time < self.end)
    }

    /// Parse `[days@]HH:MM-HH:MM`, e.g. `08:30-22:00` or
    /// `mon-fri,sun@22:00-02:00`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let (days, span) = match raw.split_once('@') {
            Some((days, span)) => (parse_days(days)?, span),
            None => (Vec::new(), raw),
        };

        let (start, end) = span.split_once('-').ok_or_else(|| {
            ConfigError::invalid("SCHEDULE_WINDOWS", format!("{raw:?}: expected HH:MM-HH:MM"))
        })?;
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        if start == end {
            return Err(ConfigError::invalid(
                "SCHEDULE_WINDOWS",
                format!("{raw:?}: start and end are equal"),
            ));
        }

        Ok(Self::new(start, end).on(&days))
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| ConfigError::invalid("SCHEDULE_WINDOWS", format!("{s:?}: {e}")))
}

fn parse_weekday(s: &str) -> Result<Weekday, ConfigError> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| ConfigError::invalid("SCHEDULE_WINDOWS", format!("unknown weekday {s:?}")))
}

/// `mon-fri,sun` → [Mon, Tue, Wed, Thu, Fri, Sun].  Ranges may wrap.
fn parse_days(raw: &str) -> Result<Vec<Weekday>, ConfigError> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => {
                let (mut day, to) = (parse_weekday(from)?, parse_weekday(to)?);
                loop {
                    if !days.contains(&day) {
                        days.push(day);
                    }
                    if day == to {
                        break;
                    }
                    day = day.succ();
                }
            }
            None => {
                let day = parse_weekday(part)?;
                if !days.contains(&day) {
                    days.push(day);
                }
            }
        }
    }
    if days.is_empty() {
        return Err(ConfigError::invalid(
            "SCHEDULE_WINDOWS",
            format!("{raw:?}: empty weekday list"),
        ));
    }
    Ok(days)
}

/// Pure, total `now → active?` function.
pub struct ScheduleGate {
    tz: Tz,
    windows: Vec<ScheduleWindow>,
    always_on: bool,
}

impl ScheduleGate {
    pub fn new(tz: Tz, windows: Vec<ScheduleWindow>) -> Self {
        Self {
            tz,
            windows,
            always_on: false,
        }
    }

    /// Gate that never drops anything (24-hour operation override).
    pub fn always_on(mut self, on: bool) -> Self {
        self.always_on = on;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.always_on {
            return true;
        }
        let local = now.with_timezone(&self.tz);
        let (today, time) = (local.weekday(), local.time());
        self.windows.iter().any(|w| w.contains(today, time))
    }

    /// Next UTC instant at which the gate is active (`now` if it already is).
    /// `None` when no window is configured.
    pub fn next_opening(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_active(now) {
            return Some(now);
        }
        let today = now.with_timezone(&self.tz).date_naive();

        (0..=7)
            .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
            .flat_map(|date| {
                self.windows
                    .iter()
                    .filter(move |w| w.opens_on(date.weekday()))
                    .filter_map(move |w| {
                        self.tz
                            .from_local_datetime(&date.and_time(w.start))
                            .earliest()
                    })
            })
            .map(|t| t.with_timezone(&Utc))
            .filter(|t| *t > now)
            .min()
    }
}

impl fmt::Display for ScheduleGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let windows: Vec<String> = self
            .windows
            .iter()
            .map(|w| {
                let span = format!("{}-{}", w.start.format("%H:%M"), w.end.format("%H:%M"));
                if w.days.is_empty() {
                    span
                } else {
                    format!("{:?}@{span}", w.days)
                }
            })
            .collect();
        write!(
            f,
            "ScheduleGate(tz={}, windows={:?}, always_on={})",
            self.tz.name(),
            windows,
            self.always_on,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Tehran;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Tehran wall-clock time → UTC.  2025-06-16 is a Monday.
    fn tehran(day: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Tehran
            .with_ymd_and_hms(2025, 6, day, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn office_hours() -> ScheduleGate {
        ScheduleGate::new(Tehran, vec![ScheduleWindow::new(hm(8, 30), hm(22, 0))])
    }

    #[test]
    fn inside_window_is_active() {
        assert!(office_hours().is_active(tehran(16, 12, 0, 0)));
    }

    #[test]
    fn outside_window_is_inactive() {
        let gate = office_hours();
        assert!(!gate.is_active(tehran(16, 3, 0, 0)));
        assert!(!gate.is_active(tehran(16, 23, 0, 0)));
    }

    #[test]
    fn start_inclusive_end_exclusive() {
        let gate = office_hours();
        assert!(gate.is_active(tehran(16, 8, 30, 0)));
        assert!(!gate.is_active(tehran(16, 8, 29, 59)));
        assert!(gate.is_active(tehran(16, 21, 59, 59)));
        assert!(!gate.is_active(tehran(16, 22, 0, 0)));
    }

    #[test]
    fn converts_from_utc() {
        // Tehran is UTC+03:30: 05:00 UTC == 08:30 local.
        let gate = office_hours();
        let utc = Utc.with_ymd_and_hms(2025, 6, 16, 5, 0, 0).unwrap();
        assert!(gate.is_active(utc));
        let utc = Utc.with_ymd_and_hms(2025, 6, 16, 4, 59, 0).unwrap();
        assert!(!gate.is_active(utc));
    }

    #[test]
    fn window_crossing_midnight() {
        let gate = ScheduleGate::new(
            Tehran,
            vec![ScheduleWindow::new(hm(22, 0), hm(2, 0)).on(&[Weekday::Fri])],
        );
        // 2025-06-20 Fri, 2025-06-21 Sat.
        assert!(gate.is_active(tehran(20, 23, 0, 0)));
        assert!(gate.is_active(tehran(21, 1, 59, 0)));
        assert!(!gate.is_active(tehran(21, 2, 0, 0)));
        assert!(!gate.is_active(tehran(21, 23, 0, 0)));
        assert!(!gate.is_active(tehran(20, 1, 0, 0)));
    }

    #[test]
    fn weekday_restriction() {
        let gate = ScheduleGate::new(
            Tehran,
            vec![ScheduleWindow::new(hm(9, 0), hm(17, 0)).on(&[Weekday::Sat, Weekday::Sun])],
        );
        assert!(!gate.is_active(tehran(16, 10, 0, 0))); // Mon
        assert!(gate.is_active(tehran(21, 10, 0, 0))); // Sat
    }

    #[test]
    fn no_windows_means_never_active() {
        let gate = ScheduleGate::new(Tehran, vec![]);
        assert!(!gate.is_active(tehran(16, 12, 0, 0)));
        assert_eq!(gate.next_opening(tehran(16, 12, 0, 0)), None);
    }

    #[test]
    fn always_on_override() {
        let gate = office_hours().always_on(true);
        assert!(gate.is_active(tehran(16, 3, 0, 0)));
    }

    #[test]
    fn next_opening_same_day_and_next_day() {
        let gate = office_hours();
        assert_eq!(gate.next_opening(tehran(16, 6, 0, 0)), Some(tehran(16, 8, 30, 0)));
        assert_eq!(gate.next_opening(tehran(16, 23, 0, 0)), Some(tehran(17, 8, 30, 0)));
        let now = tehran(16, 12, 0, 0);
        assert_eq!(gate.next_opening(now), Some(now));
    }

    #[test]
    fn parses_plain_and_weekday_windows() {
        let w = ScheduleWindow::parse("08:30-22:00").unwrap();
        assert_eq!(w, ScheduleWindow::new(hm(8, 30), hm(22, 0)));

        let w = ScheduleWindow::parse("mon-wed,sun@22:00-02:00").unwrap();
        assert_eq!(
            w.days,
            vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Sun]
        );
        assert!(w.crosses_midnight());

        let w = ScheduleWindow::parse("fri-mon@10:00-11:00").unwrap();
        assert_eq!(
            w.days,
            vec![Weekday::Fri, Weekday::Sat, Weekday::Sun, Weekday::Mon]
        );
    }

    #[test]
    fn rejects_malformed_windows() {
        assert!(ScheduleWindow::parse("8-22").is_err());
        assert!(ScheduleWindow::parse("10:00-10:00").is_err());
        assert!(ScheduleWindow::parse("funday@10:00-11:00").is_err());
        assert!(ScheduleWindow::parse("25:00-26:00").is_err());
    }
}
