use chrono::Weekday;

/// Fixed week order used for schedule buckets, Sunday first.
pub const WEEK: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

pub fn day_abbrev(day: Weekday) -> &'static str {
    &day_name(day)[..3]
}

/// Bucket index of a weekday (0 = Sunday).
pub fn day_index(day: Weekday) -> usize {
    day.num_days_from_sunday() as usize
}

pub fn day_from_name(name: &str) -> Option<Weekday> {
    WEEK.iter()
        .copied()
        .find(|d| day_name(*d).eq_ignore_ascii_case(name) || day_abbrev(*d).eq_ignore_ascii_case(name))
}

/// Serde adapter writing weekdays as their full English name.
pub mod serde_full_name {
    use chrono::Weekday;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(super::day_name(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        let name = String::deserialize(d)?;
        super::day_from_name(&name)
            .ok_or_else(|| de::Error::custom(format!("unknown weekday: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_indices_match_positions() {
        for (i, day) in WEEK.iter().enumerate() {
            assert_eq!(day_index(*day), i);
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(day_name(Weekday::Wed), "Wednesday");
        assert_eq!(day_abbrev(Weekday::Thu), "Thu");
        assert_eq!(day_from_name("saturday"), Some(Weekday::Sat));
        assert_eq!(day_from_name("Sun"), Some(Weekday::Sun));
        assert_eq!(day_from_name("Someday"), None);
    }
}
