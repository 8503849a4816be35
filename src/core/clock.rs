use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Source of "now" for run ids, date keys and retention cutoffs.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock rendered in the configured timezone.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Canonical dated-directory name. Zero-padded ISO form keeps lexicographic
/// and chronological order identical, which retention relies on.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Test clock that only moves when told to.
#[cfg(test)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Tz>>,
}

#[cfg(test)]
impl FixedClock {
    pub fn at(rfc3339: &str) -> Self {
        let parsed = DateTime::parse_from_rfc3339(rfc3339)
            .expect("valid RFC 3339 timestamp")
            .with_timezone(&Tz::UTC);
        Self {
            now: std::sync::Mutex::new(parsed),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        *self.now.lock().expect("clock lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(date_key(date), "2026-03-07");
    }

    #[test]
    fn fixed_clock_advances_by_days() {
        let clock = FixedClock::at("2026-01-30T23:10:00Z");
        clock.advance(chrono::Duration::days(2));
        assert_eq!(date_key(clock.today()), "2026-02-01");
    }
}
