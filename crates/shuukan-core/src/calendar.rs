//! Calendar state shared by every host: preferences, the schedule store and
//! the active mount. Hosts own the DOM, the clock and the timers.

use chrono::{DateTime, FixedOffset};
use scraper::Html;
use url::Url;

use crate::config::AppConfig;
use crate::error::ShuukanError;
use crate::pipeline::{self, Mount, MountPlan, PageScrape};
use crate::preferences::UserPreferences;
use crate::render;
use crate::schedule::ScheduleStore;
use crate::scrape::{self, ScrapeContext};

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("no entry with id {0}")]
    UnknownEntry(String),
    #[error("no progress control found for {0}")]
    MissingControl(String),
    #[error("watched count for {0} cannot go any higher")]
    Overflow(String),
    #[error(transparent)]
    Render(#[from] ShuukanError),
}

/// A progress update the site confirmed, ready to patch into the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub watched: u32,
    pub markup: String,
}

#[derive(Debug)]
pub struct Calendar {
    config: AppConfig,
    prefs: UserPreferences,
    base_url: Option<Url>,
    store: ScheduleStore,
    mounted: Option<MountPlan>,
}

impl Calendar {
    pub fn new(config: AppConfig, prefs: UserPreferences) -> Self {
        let base_url = Url::parse(&config.site.base_url)
            .map_err(|e| tracing::warn!(error = %e, "Invalid base URL in config"))
            .ok();
        Self {
            config,
            prefs,
            base_url,
            store: ScheduleStore::new(),
            mounted: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn preferences(&self) -> &UserPreferences {
        &self.prefs
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// Locate and scrape the Airing section, or every card when `aggressive`.
    pub fn scrape(
        &self,
        html: &Html,
        now: DateTime<FixedOffset>,
        aggressive: bool,
    ) -> Option<PageScrape> {
        let ctx = ScrapeContext {
            now,
            zone: self.prefs.target_zone(),
            base_url: self.base_url.as_ref(),
            placeholder_cover: &self.config.site.placeholder_cover,
        };
        if aggressive {
            pipeline::scrape_page_aggressive(html, &ctx)
        } else {
            pipeline::scrape_page(html, &self.config.site.section_title, &ctx)
        }
    }

    /// Take over a successful scrape and build the mount for it.
    pub fn adopt(
        &mut self,
        page: PageScrape,
        now: DateTime<FixedOffset>,
    ) -> Result<Mount, ShuukanError> {
        self.store.replace(page.schedule);
        self.store.merge_references(page.references);
        let mount = pipeline::build_mount(
            &page.plan,
            self.store.schedule(),
            &self.prefs,
            now,
            &self.config.site.replacement_title,
            self.store.references(),
        )?;
        self.mounted = Some(page.plan);
        Ok(mount)
    }

    /// The host no longer shows the calendar.
    pub fn unmount(&mut self) {
        self.mounted = None;
    }

    /// Drop everything scraped so far, as on navigation.
    pub fn reset(&mut self) {
        self.store.clear();
        self.mounted = None;
    }

    /// Refresh cached references from a snapshot. Returns `(controls, covers)` known.
    pub fn scan(&mut self, html: &Html, full: bool) -> (usize, usize) {
        let found = scrape::scan_references(html, full, self.base_url.as_ref());
        self.store.merge_references(found);
        self.store.references().counts()
    }

    /// Selector of the control to trigger for `id` in the current snapshot.
    ///
    /// Fails before anything is triggered if the update could not be recorded.
    pub fn progress_control(&mut self, html: &Html, id: &str) -> Result<String, ProgressError> {
        self.next_watched(id)?;
        self.scan(html, true);
        scrape::find_progress_control(html, id)
            .ok_or_else(|| ProgressError::MissingControl(id.to_string()))
    }

    /// Record one more watched episode after the site confirmed it.
    pub fn confirm_progress(
        &mut self,
        id: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<ProgressUpdate, ProgressError> {
        let watched = self.next_watched(id)?;
        if self.store.apply_progress_increment(id, watched).is_none() {
            return Err(ProgressError::UnknownEntry(id.to_string()));
        }
        let entry = self
            .store
            .schedule()
            .find(id)
            .ok_or_else(|| ProgressError::UnknownEntry(id.to_string()))?;
        let markup = render::render_entry(entry, &self.prefs, now, Some(self.store.references()))?;
        Ok(ProgressUpdate { watched, markup })
    }

    fn next_watched(&self, id: &str) -> Result<u32, ProgressError> {
        let entry = self
            .store
            .schedule()
            .find(id)
            .ok_or_else(|| ProgressError::UnknownEntry(id.to_string()))?;
        entry
            .progress
            .watched
            .checked_add(1)
            .ok_or_else(|| ProgressError::Overflow(id.to_string()))
    }

    pub fn countdown_labels(&self, now: DateTime<FixedOffset>) -> Vec<(String, String)> {
        render::time_labels(self.store.schedule(), &self.prefs, now)
    }

    /// Switch preferences, moving entries when the timezone changed.
    ///
    /// Returns fresh calendar markup when a calendar is mounted.
    pub fn set_preferences(
        &mut self,
        prefs: UserPreferences,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<String>, ShuukanError> {
        let zone_changed = prefs.timezone != self.prefs.timezone;
        self.prefs = prefs;
        if zone_changed {
            let local = *now.offset();
            let target = self.prefs.target_zone();
            self.store
                .rebuild_with(|e| pipeline::rezone_entry(e, local, target));
            tracing::info!(timezone = %self.prefs.timezone, "Entries moved to new timezone");
        }
        self.rerender(now)
    }

    pub fn rerender(&self, now: DateTime<FixedOffset>) -> Result<Option<String>, ShuukanError> {
        let Some(plan) = &self.mounted else {
            return Ok(None);
        };
        let mount = pipeline::build_mount(
            plan,
            self.store.schedule(),
            &self.prefs,
            now,
            &self.config.site.replacement_title,
            self.store.references(),
        )?;
        Ok(Some(mount.calendar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: &str = r#"<html><body><div class="home">
        <div class="list-preview-wrap">
          <div class="section-header"><h2>Airing</h2></div>
          <div class="list-preview">
            <div class="media-preview-card">
              <a class="cover" href="/anime/1/"></a>
              <div class="title">Alpha Progress: 3/12</div>
              <div class="countdown">5h 0m</div>
              <div class="plus-progress">+</div>
            </div>
            <div class="media-preview-card">
              <a class="cover" href="/anime/2/"></a>
              <div class="title">Beta Progress: 4294967295</div>
              <div class="plus-progress">+</div>
            </div>
          </div>
        </div>
      </div></body></html>"#;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-01-01T10:00:00+09:00").unwrap()
    }

    fn mounted() -> (Calendar, Html) {
        let html = Html::parse_document(HOME);
        let mut calendar = Calendar::new(AppConfig::default(), UserPreferences::default());
        let page = calendar.scrape(&html, now(), false).unwrap();
        calendar.adopt(page, now()).unwrap();
        (calendar, html)
    }

    #[test]
    fn test_adopt_fills_store_and_mounts() {
        let (calendar, _) = mounted();
        assert!(calendar.is_mounted());
        assert_eq!(calendar.store().schedule().len(), 2);
        assert!(calendar.rerender(now()).unwrap().is_some());
    }

    #[test]
    fn test_confirm_progress_increments_once() {
        let (mut calendar, html) = mounted();
        let control = calendar.progress_control(&html, "1").unwrap();
        assert!(control.ends_with("div:nth-child(4)"));

        let update = calendar.confirm_progress("1", now()).unwrap();
        assert_eq!(update.watched, 4);
        assert!(update.markup.contains(r#"data-anime-id="1""#));
        assert_eq!(calendar.store().schedule().find("1").unwrap().progress.watched, 4);
    }

    #[test]
    fn test_progress_at_max_is_refused_before_trigger() {
        let (mut calendar, html) = mounted();
        assert!(matches!(
            calendar.progress_control(&html, "2"),
            Err(ProgressError::Overflow(_))
        ));
        assert!(matches!(
            calendar.confirm_progress("2", now()),
            Err(ProgressError::Overflow(_))
        ));
        assert_eq!(
            calendar.store().schedule().find("2").unwrap().progress.watched,
            u32::MAX
        );
    }

    #[test]
    fn test_unknown_and_missing_controls() {
        let (mut calendar, _) = mounted();
        assert!(matches!(
            calendar.confirm_progress("404", now()),
            Err(ProgressError::UnknownEntry(_))
        ));
        let bare = Html::parse_document("<html><body></body></html>");
        assert!(matches!(
            calendar.progress_control(&bare, "1"),
            Err(ProgressError::MissingControl(_))
        ));
    }

    #[test]
    fn test_timezone_change_rezones_and_rerenders() {
        let (mut calendar, _) = mounted();
        let prefs = UserPreferences {
            timezone: "pst".into(),
            ..UserPreferences::default()
        };
        let markup = calendar.set_preferences(prefs, now()).unwrap().unwrap();
        assert!(markup.contains("UTC-8"));
        let entry = calendar.store().schedule().find("1").unwrap();
        assert_eq!(entry.airing_at.offset().local_minus_utc(), -8 * 3600);

        calendar.unmount();
        assert_eq!(calendar.set_preferences(UserPreferences::default(), now()).unwrap(), None);
    }
}
