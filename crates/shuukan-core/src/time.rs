use chrono::{DateTime, Datelike, FixedOffset, Offset, TimeDelta, Timelike, Utc, Weekday};
use phf::phf_ordered_map;

use crate::models::Countdown;

/// The site writes countdowns against Japan wall-clock time.
pub const REFERENCE_OFFSET_HOURS: i32 = 9;

/// A selectable display timezone.
#[derive(Debug, Clone, Copy)]
pub struct ZoneInfo {
    pub label: &'static str,
    pub name: &'static str,
    /// Offset from UTC in minutes; `None` for auto-detect.
    pub offset_minutes: Option<i32>,
}

/// Selectable zones keyed by their preference value, in menu order.
pub static TIMEZONES: phf::OrderedMap<&'static str, ZoneInfo> = phf_ordered_map! {
    "jst" => ZoneInfo { label: "UTC+9", name: "Japan Standard Time", offset_minutes: Some(540) },
    "pst" => ZoneInfo { label: "UTC-8", name: "Pacific Standard Time", offset_minutes: Some(-480) },
    "pdt" => ZoneInfo { label: "UTC-7", name: "Pacific Daylight Time", offset_minutes: Some(-420) },
    "est" => ZoneInfo { label: "UTC-5", name: "Eastern Standard Time", offset_minutes: Some(-300) },
    "edt" => ZoneInfo { label: "UTC-4", name: "Eastern Daylight Time", offset_minutes: Some(-240) },
    "bst" => ZoneInfo { label: "UTC+1", name: "British Summer Time", offset_minutes: Some(60) },
    "cet" => ZoneInfo { label: "UTC+1", name: "Central European Time", offset_minutes: Some(60) },
    "cest" => ZoneInfo { label: "UTC+2", name: "Central European Summer Time", offset_minutes: Some(120) },
    "ist" => ZoneInfo { label: "UTC+5:30", name: "Indian Standard Time", offset_minutes: Some(330) },
    "aest" => ZoneInfo { label: "UTC+10", name: "Australian Eastern Standard Time", offset_minutes: Some(600) },
    "nzst" => ZoneInfo { label: "UTC+12", name: "New Zealand Standard Time", offset_minutes: Some(720) },
    "auto" => ZoneInfo { label: "Auto", name: "Auto-detect from browser", offset_minutes: None },
};

/// Timezone the calendar is displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetZone {
    /// Follow the runtime's local offset, re-read on every resolve.
    Auto,
    Fixed(FixedOffset),
}

impl TargetZone {
    /// Look up a preference key. Unknown keys fall back to Japan time.
    pub fn from_key(key: &str) -> Self {
        match TIMEZONES.get(key).map(|z| z.offset_minutes) {
            Some(None) => Self::Auto,
            Some(Some(minutes)) => Self::Fixed(offset_from_minutes(minutes)),
            None => {
                tracing::warn!(timezone = key, "Unknown timezone key, using JST");
                Self::Fixed(reference_offset())
            }
        }
    }

    /// Fixed zone from a fractional hour offset such as `5.5`.
    pub fn from_hours(hours: f64) -> Option<Self> {
        if !hours.is_finite() {
            return None;
        }
        let secs = (hours * 3600.0).round();
        FixedOffset::east_opt(secs as i32).map(Self::Fixed)
    }

    /// Concrete offset, resolving `Auto` against `local`.
    pub fn offset(&self, local: FixedOffset) -> FixedOffset {
        match self {
            Self::Auto => local,
            Self::Fixed(offset) => *offset,
        }
    }
}

pub fn reference_offset() -> FixedOffset {
    offset_from_minutes(REFERENCE_OFFSET_HOURS * 60)
}

fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Header label such as `UTC+9` or `UTC+5:30`.
pub fn zone_label(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let minutes = secs.unsigned_abs() / 60;
    let (h, m) = (minutes / 60, minutes % 60);
    if m == 0 {
        format!("UTC{sign}{h}")
    } else {
        format!("UTC{sign}{h}:{m:02}")
    }
}

/// Outcome of resolving one countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Airing instant expressed in the target zone.
    pub airing_at: DateTime<FixedOffset>,
    /// Weekday of the naive local computation.
    pub original_day: Weekday,
    pub resolved_day: Weekday,
    pub day_shifted: bool,
}

/// Turn a countdown into an airing instant in the target zone.
///
/// `now` carries the local offset. Returns `None` only when the countdown
/// overflows the representable date range.
pub fn resolve(
    countdown: Countdown,
    now: DateTime<FixedOffset>,
    target: TargetZone,
) -> Option<Resolution> {
    let delta = TimeDelta::try_days(i64::from(countdown.days))?
        .checked_add(&TimeDelta::try_hours(i64::from(countdown.hours))?)?
        .checked_add(&TimeDelta::try_minutes(i64::from(countdown.minutes))?)?;
    let naive = now.checked_add_signed(delta)?.with_second(0)?.with_nanosecond(0)?;
    Some(rezone(naive, *now.offset(), target))
}

/// Re-express an instant in a (possibly different) target zone.
pub fn rezone(
    instant: DateTime<FixedOffset>,
    local: FixedOffset,
    target: TargetZone,
) -> Resolution {
    let original_day = instant.with_timezone(&local).weekday();
    // Local wall clock -> reference wall clock -> target wall clock.
    let airing_at = instant
        .with_timezone(&reference_offset())
        .with_timezone(&target.offset(local));
    let resolved_day = airing_at.weekday();
    Resolution {
        airing_at,
        original_day,
        resolved_day,
        day_shifted: resolved_day != original_day,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_pacific_viewer_japan_target_shifts_day() {
        // Monday 10:00 PST, airs in 5h: Monday 15:00 PST == Tuesday 08:00 JST.
        let now = at("2024-01-01T10:00:00-08:00");
        let res = resolve(Countdown::new(0, 5, 0), now, TargetZone::from_key("jst")).unwrap();
        assert_eq!(res.original_day, Weekday::Mon);
        assert_eq!(res.resolved_day, Weekday::Tue);
        assert!(res.day_shifted);
        assert_eq!(res.airing_at.hour(), 8);
    }

    #[test]
    fn test_japan_viewer_japan_target_never_shifts() {
        let now = at("2024-01-03T23:30:00+09:00");
        let res = resolve(Countdown::new(2, 0, 45), now, TargetZone::from_key("jst")).unwrap();
        assert_eq!(res.resolved_day, Weekday::Sat);
        assert!(!res.day_shifted);
        assert_eq!((res.airing_at.hour(), res.airing_at.minute()), (0, 15));
    }

    #[test]
    fn test_auto_uses_local_offset() {
        let now = at("2024-01-01T22:00:00-05:00");
        let res = resolve(Countdown::new(0, 3, 0), now, TargetZone::Auto).unwrap();
        assert_eq!(res.airing_at.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(res.resolved_day, Weekday::Tue);
        assert!(!res.day_shifted);
    }

    #[test]
    fn test_half_hour_zone() {
        let now = at("2024-01-01T10:00:00+00:00");
        let res = resolve(Countdown::new(0, 0, 45), now, TargetZone::from_key("ist")).unwrap();
        assert_eq!((res.airing_at.hour(), res.airing_at.minute()), (16, 15));
        assert_eq!(TargetZone::from_hours(5.5), Some(TargetZone::from_key("ist")));
    }

    #[test]
    fn test_seconds_are_zeroed_and_deterministic() {
        let now = at("2024-01-01T10:00:42+09:00");
        let a = resolve(Countdown::new(1, 2, 3), now, TargetZone::Auto).unwrap();
        let b = resolve(Countdown::new(1, 2, 3), now, TargetZone::Auto).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.airing_at.second(), 0);
    }

    #[test]
    fn test_unknown_key_falls_back_to_reference() {
        assert_eq!(TargetZone::from_key("mars"), TargetZone::Fixed(reference_offset()));
    }

    #[test]
    fn test_zone_labels() {
        assert_eq!(zone_label(FixedOffset::east_opt(9 * 3600).unwrap()), "UTC+9");
        assert_eq!(zone_label(FixedOffset::west_opt(8 * 3600).unwrap()), "UTC-8");
        assert_eq!(zone_label(FixedOffset::east_opt(19800).unwrap()), "UTC+5:30");
    }
}
