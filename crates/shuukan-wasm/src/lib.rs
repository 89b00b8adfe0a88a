//! Browser bridge. The content script owns the DOM and timers; this crate
//! owns every decision, exchanging JSON strings across the boundary.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use scraper::Html;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use shuukan_core::calendar::Calendar;
use shuukan_core::config::AppConfig;
use shuukan_core::extract::{self, CardHints};
use shuukan_core::lifecycle::{Lifecycle, MutationHint};
use shuukan_core::preferences::{MemoryStore, PrefMap, UserPreferences};

#[wasm_bindgen]
pub fn parse_title(raw: &str, countdown_label: &str) -> String {
    let hints = CardHints {
        countdown_label: Some(countdown_label.to_string()).filter(|s| !s.is_empty()),
        ..Default::default()
    };
    let parsed = extract::parse_title(raw, Some(&hints));
    serde_json::to_string(&parsed).unwrap_or_else(|_| "{}".to_string())
}

/// Timer settings the content script schedules with.
#[derive(Serialize)]
struct TimerPlan {
    debounce_ms: u64,
    safety_ladder_ms: Vec<u64>,
    rescan_interval_secs: u64,
    navigation_rescan_ms: Vec<u64>,
    countdown_tick_secs: u64,
    progress_timeout_ms: u64,
}

#[wasm_bindgen]
pub struct CalendarController {
    lifecycle: Lifecycle,
    calendar: Calendar,
}

#[wasm_bindgen]
impl CalendarController {
    /// `stored` is the raw key-value map read from extension storage.
    #[wasm_bindgen(constructor)]
    pub fn new(stored: &str, url: &str) -> CalendarController {
        let values: PrefMap = serde_json::from_str(stored).unwrap_or_default();
        let prefs = shuukan_core::preferences::load(&MemoryStore::new(values));
        let config = AppConfig::default();
        let lifecycle = Lifecycle::new(url, config.site.section_title.clone());
        Self {
            lifecycle,
            calendar: Calendar::new(config, prefs),
        }
    }

    pub fn timers(&self) -> String {
        let config = self.calendar.config();
        let w = &config.watcher;
        let plan = TimerPlan {
            debounce_ms: w.debounce_ms,
            safety_ladder_ms: w.safety_ladder_ms.clone(),
            rescan_interval_secs: w.rescan_interval_secs,
            navigation_rescan_ms: w.navigation_rescan_ms.clone(),
            countdown_tick_secs: w.countdown_tick_secs,
            progress_timeout_ms: config.progress.timeout_ms,
        };
        serde_json::to_string(&plan).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn page_ready(&mut self) -> bool {
        self.lifecycle.page_ready()
    }

    pub fn is_searching(&self) -> bool {
        self.lifecycle.is_searching()
    }

    pub fn is_home(&self) -> bool {
        self.lifecycle.is_home()
    }

    /// Whether a mutation batch should (re)start the debounce timer.
    pub fn accepts_mutation(&mut self, hints: &str, calendar_present: bool) -> bool {
        let hints: Vec<MutationHint> = serde_json::from_str(hints).unwrap_or_default();
        if !calendar_present {
            self.calendar.unmount();
        }
        self.lifecycle.accepts_mutation(&hints, calendar_present)
    }

    /// Run one attempt against a page snapshot.
    ///
    /// Returns the mount JSON, or an empty string when nothing was mounted.
    /// Call `scan` with a fresh snapshot once the mount is applied.
    pub fn attempt(&mut self, html: &str, now_ms: f64, offset_minutes: i32, aggressive: bool) -> String {
        let Some(now) = local_now(now_ms, offset_minutes) else {
            return String::new();
        };
        let Some(attempt) = self.lifecycle.begin_attempt(now.with_timezone(&Utc)) else {
            return String::new();
        };

        let html = Html::parse_document(html);
        let Some(page) = self.calendar.scrape(&html, now, aggressive) else {
            self.lifecycle.attempt_failed();
            return String::new();
        };
        let json = self
            .calendar
            .adopt(page, now)
            .map_err(|e| e.to_string())
            .and_then(|mount| serde_json::to_string(&mount).map_err(|e| e.to_string()));
        match json {
            Ok(json) => {
                self.lifecycle.attempt_succeeded();
                json
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Mount attempt failed");
                self.calendar.unmount();
                self.lifecycle.attempt_failed();
                String::new()
            }
        }
    }

    /// Returns true if the URL changed; the script then restarts its timers.
    pub fn navigate(&mut self, url: &str) -> bool {
        if !self.lifecycle.navigate(url) {
            return false;
        }
        self.calendar.reset();
        true
    }

    /// Refresh cached progress controls and covers from a page snapshot.
    pub fn scan(&mut self, html: &str, full: bool) {
        let html = Html::parse_document(html);
        self.calendar.scan(&html, full);
    }

    /// Selector of the site's progress control for `id` in this snapshot,
    /// or an empty string when none can be used.
    pub fn control_for(&mut self, html: &str, id: &str) -> String {
        let html = Html::parse_document(html);
        self.calendar.progress_control(&html, id).unwrap_or_else(|e| {
            tracing::warn!(anime_id = id, error = %e, "No usable progress control");
            String::new()
        })
    }

    /// Record a progress update the site confirmed. Returns the new card
    /// markup, or an empty string when it could not be recorded.
    pub fn confirm_progress(&mut self, id: &str, now_ms: f64, offset_minutes: i32) -> String {
        let Some(now) = local_now(now_ms, offset_minutes) else {
            return String::new();
        };
        match self.calendar.confirm_progress(id, now) {
            Ok(update) => update.markup,
            Err(e) => {
                tracing::warn!(anime_id = id, error = %e, "Progress not recorded");
                String::new()
            }
        }
    }

    /// `(id, label)` pairs as JSON for the countdown tick.
    pub fn countdown_labels(&self, now_ms: f64, offset_minutes: i32) -> String {
        let Some(now) = local_now(now_ms, offset_minutes) else {
            return "[]".to_string();
        };
        let labels = self.calendar.countdown_labels(now);
        serde_json::to_string(&labels).unwrap_or_else(|_| "[]".to_string())
    }

    /// Apply saved preferences. Returns fresh calendar markup when mounted.
    pub fn set_preferences(&mut self, stored: &str, now_ms: f64, offset_minutes: i32) -> String {
        let Ok(values) = serde_json::from_str::<PrefMap>(stored) else {
            return String::new();
        };
        let Some(now) = local_now(now_ms, offset_minutes) else {
            return String::new();
        };
        let prefs = UserPreferences::from_values(&values);
        match self.calendar.set_preferences(prefs, now) {
            Ok(markup) => markup.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Re-render after preference change failed");
                String::new()
            }
        }
    }

    /// Current preferences as the flat storage map.
    pub fn stored_preferences(&self) -> String {
        serde_json::to_string(&self.calendar.preferences().to_values())
            .unwrap_or_else(|_| "{}".to_string())
    }
}

/// `offset_minutes` is east of UTC, i.e. `-Date.getTimezoneOffset()`.
fn local_now(now_ms: f64, offset_minutes: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(offset_minutes.checked_mul(60)?)?;
    let utc = Utc.timestamp_millis_opt(now_ms as i64).single()?;
    Some(utc.with_timezone(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: &str = r#"<html><body>
        <div class="list-preview-wrap">
          <div class="section-header"><h2>Airing</h2></div>
          <div class="list-preview">
            <div class="media-preview-card">
              <a class="cover" href="/anime/1/"></a>
              <div class="title">Alpha Progress: 3/12</div>
              <div class="countdown">5h 0m</div>
              <div class="plus-progress">+</div>
            </div>
          </div>
        </div></body></html>"#;

    // 2024-01-01T01:00:00Z
    const NOW_MS: f64 = 1_704_070_800_000.0;

    #[test]
    fn test_parse_title_json() {
        let json = parse_title("3 episodes behind Show Title Progress: 4/12", "");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["clean_title"], "Show Title");
        assert_eq!(value["progress"]["available"], 7);
    }

    #[test]
    fn test_controller_round() {
        let mut c = CalendarController::new("{}", "https://anilist.co/");
        assert!(c.page_ready());
        let mount = c.attempt(HOME, NOW_MS, 540, false);
        let value: serde_json::Value = serde_json::from_str(&mount).unwrap();
        assert_eq!(value["plan"]["mode"], "after_header");
        assert!(!c.is_searching());
        assert!(!c.control_for(HOME, "1").is_empty());

        let markup = c.confirm_progress("1", NOW_MS, 540);
        assert!(markup.contains(r#"data-anime-id="1""#));
        assert_eq!(c.calendar.store().schedule().find("1").unwrap().progress.watched, 4);

        assert!(c.navigate("https://anilist.co/anime/1"));
        assert!(c.control_for(HOME, "1").is_empty());
        assert!(c.attempt(HOME, NOW_MS, 540, false).is_empty());
    }

    #[test]
    fn test_preferences_round_trip() {
        let stored = r#"{"anilist_calendar_compact_mode": true}"#;
        let c = CalendarController::new(stored, "https://anilist.co/");
        let out: serde_json::Value = serde_json::from_str(&c.stored_preferences()).unwrap();
        assert_eq!(out["anilist_calendar_layout_mode"], "compact");
    }
}
