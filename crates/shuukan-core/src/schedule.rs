use std::collections::HashMap;

use chrono::Weekday;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::day::{day_index, day_name};
use crate::models::{AiringEntry, WEEK};
use crate::scrape::CardReferences;

/// Entries bucketed by weekday, each bucket sorted by time of day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySchedule {
    days: [Vec<AiringEntry>; 7],
}

impl WeeklySchedule {
    /// Bucket entries by `resolved_day` and sort each day by (hour, minute).
    ///
    /// The sort is stable, so entries at the same minute keep scrape order.
    pub fn build(entries: impl IntoIterator<Item = AiringEntry>) -> Self {
        let mut schedule = Self::default();
        for entry in entries {
            schedule.days[day_index(entry.resolved_day)].push(entry);
        }
        for bucket in &mut schedule.days {
            bucket.sort_by_key(AiringEntry::sort_key);
        }
        schedule
    }

    pub fn day(&self, day: Weekday) -> &[AiringEntry] {
        &self.days[day_index(day)]
    }

    /// Buckets in Sunday-first order.
    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &[AiringEntry])> {
        WEEK.iter().map(|d| (*d, self.day(*d)))
    }

    pub fn entries(&self) -> impl Iterator<Item = &AiringEntry> {
        self.days.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    pub fn find(&self, id: &str) -> Option<&AiringEntry> {
        self.entries().find(|e| e.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut AiringEntry> {
        self.days.iter_mut().flatten().find(|e| e.id == id)
    }

    /// Set the watched count of one entry in place. Never re-buckets.
    ///
    /// Returns the updated entry, or `None` if no entry has this id.
    pub fn apply_progress_increment(&mut self, id: &str, watched: u32) -> Option<&AiringEntry> {
        let entry = self.find_mut(id)?;
        entry.progress.record_watched(watched);
        Some(entry)
    }

    pub fn into_entries(self) -> Vec<AiringEntry> {
        self.days.into_iter().flatten().collect()
    }
}

impl Serialize for WeeklySchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(7))?;
        for (day, entries) in self.iter() {
            map.serialize_entry(day_name(day), entries)?;
        }
        map.end()
    }
}

/// Keyed store of per-anime references, replacing DOM read-backs.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    by_id: HashMap<String, CardReferences>,
}

impl ReferenceCache {
    /// Merge newly scanned references. A known cover is never replaced by nothing.
    pub fn merge(&mut self, found: impl IntoIterator<Item = (String, CardReferences)>) {
        for (id, refs) in found {
            let slot = self.by_id.entry(id).or_default();
            if refs.progress_control.is_some() {
                slot.progress_control = refs.progress_control;
            }
            if refs.cover_url.is_some() {
                slot.cover_url = refs.cover_url;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CardReferences> {
        self.by_id.get(id)
    }

    pub fn progress_control(&self, id: &str) -> Option<&str> {
        self.get(id)?.progress_control.as_deref()
    }

    pub fn cover_url(&self, id: &str) -> Option<&str> {
        self.get(id)?.cover_url.as_deref()
    }

    /// Count of `(controls, covers)` known.
    pub fn counts(&self) -> (usize, usize) {
        let controls = self.by_id.values().filter(|r| r.progress_control.is_some()).count();
        let covers = self.by_id.values().filter(|r| r.cover_url.is_some()).count();
        (controls, covers)
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }
}

/// Sole writer of the session's schedule and reference cache.
#[derive(Debug, Default)]
pub struct ScheduleStore {
    schedule: WeeklySchedule,
    references: ReferenceCache,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self) -> &WeeklySchedule {
        &self.schedule
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    /// Replace the schedule wholesale after a successful scrape.
    pub fn replace(&mut self, schedule: WeeklySchedule) {
        self.schedule = schedule;
    }

    pub fn merge_references(&mut self, found: impl IntoIterator<Item = (String, CardReferences)>) {
        self.references.merge(found);
    }

    pub fn apply_progress_increment(&mut self, id: &str, watched: u32) -> Option<&AiringEntry> {
        let updated = self.schedule.apply_progress_increment(id, watched);
        if updated.is_none() {
            tracing::warn!(anime_id = id, "Progress update for unknown entry");
        }
        updated
    }

    /// Rebuild with every entry passed through `f`, e.g. after a timezone change.
    pub fn rebuild_with(&mut self, f: impl FnMut(AiringEntry) -> AiringEntry) {
        let entries = std::mem::take(&mut self.schedule).into_entries();
        self.schedule = WeeklySchedule::build(entries.into_iter().map(f));
    }

    /// Drop all session state, as on navigation.
    pub fn clear(&mut self) {
        self.schedule = WeeklySchedule::default();
        self.references.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Datelike};

    use super::*;
    use crate::models::{Countdown, EpisodeProgress};

    fn entry(id: &str, at: &str) -> AiringEntry {
        let airing_at = DateTime::parse_from_rfc3339(at).unwrap();
        AiringEntry {
            id: id.into(),
            title: id.into(),
            clean_title: id.into(),
            cover_image: String::new(),
            countdown: Countdown::default(),
            airing_at,
            resolved_day: airing_at.weekday(),
            original_day: airing_at.weekday(),
            day_shifted: false,
            progress: EpisodeProgress::new(4, 7, Some(12)),
        }
    }

    #[test]
    fn test_build_buckets_and_sorts() {
        let schedule = WeeklySchedule::build(vec![
            entry("late", "2024-01-01T23:30:00+09:00"),
            entry("tue", "2024-01-02T01:00:00+09:00"),
            entry("early", "2024-01-01T08:15:00+09:00"),
            entry("tie-a", "2024-01-01T12:00:00+09:00"),
            entry("tie-b", "2024-01-01T12:00:00+09:00"),
        ]);
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule.iter().count(), 7);
        let monday: Vec<_> = schedule.day(Weekday::Mon).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(monday, ["early", "tie-a", "tie-b", "late"]);
        assert_eq!(schedule.day(Weekday::Tue).len(), 1);
        assert!(schedule.day(Weekday::Sun).is_empty());
    }

    #[test]
    fn test_progress_increment_in_place() {
        let mut schedule = WeeklySchedule::build(vec![
            entry("a", "2024-01-01T08:00:00+09:00"),
            entry("b", "2024-01-03T08:00:00+09:00"),
        ]);
        let before = schedule.day(Weekday::Wed).to_vec();

        let updated = schedule.apply_progress_increment("b", 7).unwrap();
        assert_eq!(updated.progress.behind_count(), 0);
        assert_eq!(updated.progress.available, 7);
        assert_eq!(updated.progress.total, Some(12));

        let updated = schedule.apply_progress_increment("b", 9).unwrap();
        assert_eq!(updated.progress.available, 9);
        assert_eq!(schedule.day(Weekday::Wed)[0].airing_at, before[0].airing_at);
        assert!(schedule.apply_progress_increment("missing", 1).is_none());
    }

    #[test]
    fn test_serializes_all_seven_days() {
        let schedule = WeeklySchedule::build(vec![entry("a", "2024-01-05T20:00:00+09:00")]);
        let json = serde_json::to_value(&schedule).unwrap();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), 7);
        assert_eq!(map["Friday"][0]["id"], "a");
        assert_eq!(map["Friday"][0]["resolved_day"], "Friday");
        assert!(map["Sunday"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_reference_merge_keeps_known_cover() {
        let mut cache = ReferenceCache::default();
        cache.merge([(
            "1".to_string(),
            CardReferences {
                progress_control: None,
                cover_url: Some("https://img.test/1.jpg".into()),
            },
        )]);
        cache.merge([(
            "1".to_string(),
            CardReferences {
                progress_control: Some("button".into()),
                cover_url: None,
            },
        )]);
        assert_eq!(cache.cover_url("1"), Some("https://img.test/1.jpg"));
        assert_eq!(cache.progress_control("1"), Some("button"));
        assert_eq!(cache.counts(), (1, 1));
    }

    #[test]
    fn test_store_clear_drops_everything() {
        let mut store = ScheduleStore::new();
        store.replace(WeeklySchedule::build(vec![entry("a", "2024-01-01T08:00:00+09:00")]));
        store.merge_references([("a".to_string(), CardReferences::default())]);
        store.clear();
        assert!(store.schedule().is_empty());
        assert!(store.references().get("a").is_none());
    }
}
