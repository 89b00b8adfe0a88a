use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use super::day::serde_full_name;
use super::progress::EpisodeProgress;

/// Time remaining until an episode airs, as scraped from the card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

impl Countdown {
    pub fn new(days: u32, hours: u32, minutes: u32) -> Self {
        Self {
            days,
            hours,
            minutes,
        }
    }
}

/// One anime's scraped data for a single scrape pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiringEntry {
    /// Site identifier, or `unknown-N` when the card exposes none.
    pub id: String,
    pub title: String,
    pub clean_title: String,
    pub cover_image: String,
    pub countdown: Countdown,
    /// Airing instant expressed in the selected target zone.
    pub airing_at: DateTime<FixedOffset>,
    #[serde(with = "serde_full_name")]
    pub resolved_day: Weekday,
    #[serde(with = "serde_full_name")]
    pub original_day: Weekday,
    pub day_shifted: bool,
    pub progress: EpisodeProgress,
}

impl AiringEntry {
    /// Wall-clock time of day in the target zone, to the minute.
    pub fn time_of_day(&self) -> NaiveTime {
        let t = self.airing_at.time();
        NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
    }

    /// Ordering within a day bucket.
    pub fn sort_key(&self) -> NaiveTime {
        self.time_of_day()
    }
}
