use std::sync::atomic::{AtomicI64, Ordering};

use crate::ParseError;

/// `strftime` format of the civil part of the textual form.
/// It is followed by `_` and three millisecond digits.
const CIVIL_FORMAT: &str = "%Y%m%dT%H%M%S";

/// When a registration event happened, in milliseconds since unix epoch (UTC).
///
/// The textual form is `YYYYMMDDTHHMMSS_mmm`. It is fixed width, so sorting the
/// text sorts the times. Times are clamped to the years 1000-9999 to keep it that way.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationTime(i64);

impl RegistrationTime {
    /// `10000101T000000_000`
    pub const MIN: Self = Self(-30_610_224_000_000);

    /// `99991231T235959_999`
    pub const MAX: Self = Self(253_402_300_799_999);

    /// The current wall-clock time.
    ///
    /// Strictly increasing within a process: two calls in the same millisecond
    /// still produce distinct, ordered times.
    pub fn now() -> Self {
        static LAST: AtomicI64 = AtomicI64::new(i64::MIN);

        let wall = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_millis() as i64)
            .unwrap_or_default();

        let mut previous = LAST.load(Ordering::Relaxed);
        loop {
            let next = Self::clamped(wall.max(previous.saturating_add(1)));
            match LAST.compare_exchange_weak(previous, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Self(next),
                Err(actual) => previous = actual,
            }
        }
    }

    /// Values outside [`Self::MIN`]..=[`Self::MAX`] are clamped.
    #[inline]
    pub const fn from_millis_since_epoch(millis: i64) -> Self {
        Self(Self::clamped(millis))
    }

    const fn clamped(millis: i64) -> i64 {
        if millis < Self::MIN.0 {
            Self::MIN.0
        } else if millis > Self::MAX.0 {
            Self::MAX.0
        } else {
            millis
        }
    }

    #[inline]
    pub const fn millis_since_epoch(self) -> i64 {
        self.0
    }

    /// Returns a time `millis` later (or earlier, if negative).
    #[inline]
    #[must_use]
    pub const fn offset_millis(self, millis: i64) -> Self {
        Self(Self::clamped(self.0.saturating_add(millis)))
    }

    /// See the type docs for the format.
    pub fn format(self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for RegistrationTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seconds = self.0.div_euclid(1000);
        let millis = self.0.rem_euclid(1000);
        match jiff::Timestamp::from_second(seconds) {
            Ok(timestamp) => {
                let zoned = timestamp.to_zoned(jiff::tz::TimeZone::UTC);
                write!(f, "{}_{millis:03}", zoned.strftime(CIVIL_FORMAT))
            }
            // Not reachable for clamped times.
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

impl std::fmt::Debug for RegistrationTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::str::FromStr for RegistrationTime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ParseError::InvalidTime {
            text: s.to_owned(),
            reason,
        };

        let (civil, millis) = s
            .trim()
            .split_once('_')
            .ok_or_else(|| invalid("missing '_' before milliseconds".to_owned()))?;

        if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected exactly three millisecond digits".to_owned()));
        }
        let millis: i64 = millis.parse().map_err(|err| invalid(format!("{err}")))?;

        if civil.starts_with('0') {
            return Err(invalid("years before 1000 are not supported".to_owned()));
        }
        let seconds = parse_civil(civil)
            .ok_or_else(|| invalid("expected YYYYMMDDTHHMMSS".to_owned()))?
            .and_then(|datetime| datetime.to_zoned(jiff::tz::TimeZone::UTC))
            .map_err(|err| invalid(err.to_string()))?
            .timestamp()
            .as_second();

        Ok(Self(seconds * 1000 + millis))
    }
}

/// Parses the fixed-width `YYYYMMDDTHHMMSS` part.
///
/// `None` if the layout is wrong, `Some(Err)` if the fields are out of range.
fn parse_civil(civil: &str) -> Option<Result<jiff::civil::DateTime, jiff::Error>> {
    let bytes = civil.as_bytes();
    if bytes.len() != 15 || bytes[8] != b'T' {
        return None;
    }
    let field = |range: std::ops::Range<usize>| -> Option<i16> {
        let digits = civil.get(range)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    };

    let year = field(0..4)?;
    let month = field(4..6)? as i8;
    let day = field(6..8)? as i8;
    let hour = field(9..11)? as i8;
    let minute = field(11..13)? as i8;
    let second = field(13..15)? as i8;

    Some(jiff::civil::DateTime::new(
        year, month, day, hour, minute, second, 0,
    ))
}

impl serde::Serialize for RegistrationTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for RegistrationTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The read cursor of a registration history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ActiveTime {
    /// Always use the newest event.
    #[default]
    Latest,

    /// Use the newest event at or before this time.
    At(RegistrationTime),
}

impl ActiveTime {
    /// Is an event at `time` visible through this cursor?
    #[inline]
    pub fn includes(self, time: RegistrationTime) -> bool {
        match self {
            Self::Latest => true,
            Self::At(cursor) => time <= cursor,
        }
    }

    #[inline]
    pub fn time(self) -> Option<RegistrationTime> {
        match self {
            Self::Latest => None,
            Self::At(time) => Some(time),
        }
    }
}

impl From<Option<RegistrationTime>> for ActiveTime {
    #[inline]
    fn from(time: Option<RegistrationTime>) -> Self {
        time.map_or(Self::Latest, Self::At)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        // 2024-10-16 10:15:30.042 UTC
        let time = RegistrationTime::from_millis_since_epoch(1_729_073_730_042);
        let text = time.to_string();
        assert_eq!(text, "20241016T101530_042");
        assert_eq!(text.parse::<RegistrationTime>(), Ok(time));
    }

    #[test]
    fn text_sorts_like_time() {
        let times = [
            RegistrationTime::from_millis_since_epoch(999),
            RegistrationTime::from_millis_since_epoch(1_000),
            RegistrationTime::from_millis_since_epoch(86_400_000),
            RegistrationTime::from_millis_since_epoch(1_729_073_730_042),
            RegistrationTime::from_millis_since_epoch(1_729_073_730_043),
        ];
        for pair in times.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_string() < pair[1].to_string());
        }
    }

    #[test]
    fn now_is_strictly_increasing() {
        let mut previous = RegistrationTime::now();
        for _ in 0..1000 {
            let next = RegistrationTime::now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn extreme_times_are_clamped() {
        for millis in [i64::MIN, -30_610_224_000_001, 253_402_300_800_000, i64::MAX] {
            let time = RegistrationTime::from_millis_since_epoch(millis);
            assert!(time == RegistrationTime::MIN || time == RegistrationTime::MAX);
            assert_eq!(time.to_string().parse::<RegistrationTime>(), Ok(time));
        }
        assert_eq!(RegistrationTime::MIN.to_string(), "10000101T000000_000");
        assert_eq!(RegistrationTime::MAX.to_string(), "99991231T235959_999");
        assert_eq!(RegistrationTime::MAX.offset_millis(1), RegistrationTime::MAX);
    }

    #[test]
    fn bad_text_is_rejected() {
        for text in [
            "",
            "20241016T101530",
            "20241016T101530_42",
            "2024-10-16_000",
            "x_123",
            "09991231T235959_999",
        ] {
            assert!(text.parse::<RegistrationTime>().is_err(), "{text:?}");
        }
    }

    #[test]
    fn serde_uses_text() {
        let time = RegistrationTime::from_millis_since_epoch(1_729_073_730_042);
        let json = serde_json::to_string(&time).unwrap();
        assert_eq!(json, "\"20241016T101530_042\"");
        assert_eq!(serde_json::from_str::<RegistrationTime>(&json).unwrap(), time);
    }

    #[test]
    fn active_time_cursor() {
        let t = RegistrationTime::from_millis_since_epoch(10);
        assert!(ActiveTime::Latest.includes(t));
        assert!(ActiveTime::At(t).includes(t));
        assert!(!ActiveTime::At(t.offset_millis(-1)).includes(t));
        assert_eq!(ActiveTime::from(None), ActiveTime::Latest);
    }
}
