//! Event-driven driver for one tab: debounce, retry ladder, rescans, ticks.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use scraper::Html;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use shuukan_core::calendar::Calendar;
use shuukan_core::config::AppConfig;
use shuukan_core::debug_log::{DebugEvent, SharedEventLog};
use shuukan_core::lifecycle::{Lifecycle, MutationHint, Phase};
use shuukan_core::preferences::{TimeFormat, UserPreferences};
use shuukan_core::schedule::ScheduleStore;

use crate::host::{HostPage, Notice, PageEvent};
use crate::RuntimeError;

/// Extra full scans after a periodic rescan on the home page.
const HOME_FOLLOW_UP_SCANS: [Duration; 2] = [Duration::from_millis(1000), Duration::from_millis(2500)];

/// Reference scans scheduled after navigating away from the home page.
const NON_HOME_NAVIGATION_SCANS: usize = 3;

#[derive(Debug, Default)]
struct Timers {
    debounce: Option<Instant>,
    /// `(deadline, final step)`; the final step falls back to aggressive init.
    ladder: VecDeque<(Instant, bool)>,
    /// `(deadline, full scan)`.
    scans: VecDeque<(Instant, bool)>,
}

impl Timers {
    fn clear(&mut self) {
        self.debounce = None;
        self.ladder.clear();
        self.scans.clear();
    }
}

/// One page session. Owns the calendar state and is its only writer.
pub struct Session<H> {
    host: H,
    lifecycle: Lifecycle,
    calendar: Calendar,
    timers: Timers,
    events: SharedEventLog,
}

impl<H: HostPage> Session<H> {
    pub fn new(host: H, config: AppConfig, prefs: UserPreferences, events: SharedEventLog) -> Self {
        let lifecycle = Lifecycle::new(host.current_url(), config.site.section_title.clone());
        Self {
            host,
            lifecycle,
            calendar: Calendar::new(config, prefs),
            timers: Timers::default(),
            events,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn store(&self) -> &ScheduleStore {
        self.calendar.store()
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    pub fn preferences(&self) -> &UserPreferences {
        self.calendar.preferences()
    }

    /// Drive the session until the event channel closes.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<PageEvent>) {
        let watcher = &self.calendar.config().watcher;
        let mut rescan = repeating(watcher.rescan_interval());
        let mut tick = repeating(watcher.countdown_tick());

        loop {
            let debounce = self.timers.debounce;
            let ladder = self.timers.ladder.front().map(|(at, _)| *at);
            let scan = self.timers.scans.front().map(|(at, _)| *at);

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = sleep_until(debounce) => {
                    self.timers.debounce = None;
                    tracing::debug!("Relevant DOM changes settled");
                    self.attempt(false);
                }
                _ = sleep_until(ladder) => {
                    if let Some((_, last)) = self.timers.ladder.pop_front() {
                        self.safety_step(last);
                    }
                }
                _ = sleep_until(scan) => {
                    if let Some((_, full)) = self.timers.scans.pop_front() {
                        self.scan_references(full);
                    }
                }
                _ = rescan.tick() => self.periodic_rescan(),
                _ = tick.tick() => self.refresh_countdowns(),
            }
        }
        tracing::debug!("Event channel closed, session ending");
    }

    async fn handle(&mut self, event: PageEvent) {
        match event {
            PageEvent::Ready => self.start(),
            PageEvent::Mutation {
                hints,
                calendar_present,
            } => self.on_mutation(&hints, calendar_present),
            PageEvent::Navigated { url } => self.navigate(&url),
            PageEvent::ProgressRequested { id } => self.request_progress(&id).await,
            PageEvent::PreferencesSaved(prefs) => self.apply_preferences(prefs),
        }
    }

    /// `Uninitialized -> Searching`, first attempt, and the safety ladder.
    fn start(&mut self) {
        if !self.lifecycle.page_ready() {
            return;
        }
        self.attempt(false);
        let now = Instant::now();
        let ladder = self.calendar.config().watcher.safety_ladder();
        let count = ladder.len();
        self.timers.ladder = ladder
            .into_iter()
            .enumerate()
            .map(|(i, delay)| (now + delay, i + 1 == count))
            .collect();
    }

    fn on_mutation(&mut self, hints: &[MutationHint], calendar_present: bool) {
        if !calendar_present && self.lifecycle.phase() == Phase::Rendered {
            self.calendar.unmount();
        }
        if self.lifecycle.accepts_mutation(hints, calendar_present) {
            // Trailing edge: every relevant batch pushes the deadline out.
            self.timers.debounce =
                Some(Instant::now() + self.calendar.config().watcher.debounce());
        }
    }

    fn safety_step(&mut self, last: bool) {
        if !self.lifecycle.is_searching() {
            return;
        }
        tracing::info!(last, "Safety initialization attempt");
        if self.attempt(false) || !last {
            return;
        }
        tracing::info!("Final safety check, trying aggressive initialization");
        self.scan_references(true);
        if !self.attempt(true) {
            tracing::warn!(
                attempts = self.lifecycle.state().attempts,
                "Airing section never found, leaving page untouched"
            );
        }
    }

    /// One locate + scrape + build + render pass. Returns true on success.
    fn attempt(&mut self, aggressive: bool) -> bool {
        let at = self.host.now().with_timezone(&Utc);
        let Some(attempt) = self.lifecycle.begin_attempt(at) else {
            return false;
        };
        match self.try_mount(aggressive) {
            Ok(true) => {
                self.lifecycle.attempt_succeeded();
                true
            }
            Ok(false) => {
                self.lifecycle.attempt_failed();
                self.log(DebugEvent::SectionMissing { attempt });
                false
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Mount attempt failed");
                self.lifecycle.attempt_failed();
                self.log(DebugEvent::Error {
                    source: "mount".into(),
                    message: e.to_string(),
                });
                false
            }
        }
    }

    fn try_mount(&mut self, aggressive: bool) -> Result<bool, RuntimeError> {
        let html = Html::parse_document(&self.host.snapshot()?);
        let now = self.host.now();
        let Some(page) = self.calendar.scrape(&html, now, aggressive) else {
            return Ok(false);
        };

        for (index, reason) in &page.skipped {
            self.log(DebugEvent::CardSkipped {
                index: *index,
                reason: reason.clone(),
            });
        }
        if let (Some(tier), Some(container_rule)) = (page.tier, page.container_rule) {
            self.log(DebugEvent::SectionLocated {
                tier,
                container_rule,
            });
        }

        let entries = page.schedule.len();
        let mount = self.calendar.adopt(page, now)?;
        if let Err(e) = self.host.mount(&mount) {
            self.calendar.unmount();
            return Err(e.into());
        }
        // Cached control paths point into the page as it was before the mount.
        self.scan_references(true);

        tracing::info!(entries, aggressive, "Calendar mounted");
        self.log(DebugEvent::ScrapeCompleted {
            entries,
            aggressive,
        });
        Ok(true)
    }

    /// `* -> Uninitialized`: cancel timers, drop session state, start over.
    fn navigate(&mut self, url: &str) {
        if !self.lifecycle.navigate(url) {
            return;
        }
        let home = self.lifecycle.is_home();
        self.timers.clear();
        self.calendar.reset();
        self.log(DebugEvent::Navigated {
            url: url.to_string(),
            home,
        });

        self.start();
        self.scan_references(home);

        let now = Instant::now();
        let delays = self.calendar.config().watcher.navigation_rescans();
        let count = if home {
            delays.len()
        } else {
            delays.len().min(NON_HOME_NAVIGATION_SCANS)
        };
        self.timers.scans = delays
            .into_iter()
            .take(count)
            .map(|delay| (now + delay, home))
            .collect();
    }

    fn periodic_rescan(&mut self) {
        if !self.timers.scans.is_empty() {
            return;
        }
        let home = self.lifecycle.is_home();
        self.scan_references(home);
        if home {
            let now = Instant::now();
            self.timers
                .scans
                .extend(HOME_FOLLOW_UP_SCANS.iter().map(|d| (now + *d, true)));
        }
    }

    fn scan_references(&mut self, full: bool) {
        let snapshot = match self.host.snapshot() {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping reference scan");
                return;
            }
        };
        let html = Html::parse_document(&snapshot);
        let (controls, covers) = self.calendar.scan(&html, full);
        self.log(DebugEvent::ReferencesScanned { controls, covers });
    }

    fn refresh_countdowns(&mut self) {
        if self.lifecycle.phase() != Phase::Rendered
            || self.calendar.preferences().time_format != TimeFormat::Countdown
        {
            return;
        }
        let labels = self.calendar.countdown_labels(self.host.now());
        self.host.refresh_countdowns(&labels);
    }

    async fn request_progress(&mut self, id: &str) {
        self.host.notify(Notice::loading("Updating progress..."));
        match self.confirm_progress(id).await {
            Ok(watched) => {
                tracing::info!(anime_id = id, watched, "Progress confirmed");
                self.log(DebugEvent::ProgressConfirmed {
                    id: id.to_string(),
                    watched,
                });
                self.host
                    .notify(Notice::success(format!("Progress updated to episode {watched}")));
            }
            Err(e) => {
                tracing::error!(anime_id = id, error = %e, "Progress update failed");
                self.log(DebugEvent::ProgressFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
                self.host
                    .notify(Notice::error(format!("Could not update progress: {e}")));
            }
        }
    }

    /// Trigger the site's control and wait for it. The store only changes
    /// after the host confirms.
    async fn confirm_progress(&mut self, id: &str) -> Result<u32, RuntimeError> {
        // Resolved against the live page every time; the mount moves things.
        let control = {
            let html = Html::parse_document(&self.host.snapshot()?);
            self.calendar.progress_control(&html, id)?
        };

        let limit = self.calendar.config().progress.timeout();
        time::timeout(limit, self.host.trigger_progress(&control))
            .await
            .map_err(|_| RuntimeError::Timeout(limit))??;

        let update = self.calendar.confirm_progress(id, self.host.now())?;
        self.host.patch_entry(id, &update.markup)?;
        Ok(update.watched)
    }

    fn apply_preferences(&mut self, prefs: UserPreferences) {
        let markup = match self.calendar.set_preferences(prefs, self.host.now()) {
            Ok(markup) => markup,
            Err(e) => {
                tracing::warn!(error = %e, "Re-render after preference change failed");
                return;
            }
        };
        if let Some(markup) = markup {
            if let Err(e) = self.host.replace_calendar(&markup) {
                tracing::warn!(error = %e, "Host refused the re-rendered calendar");
            }
        }
    }

    fn log(&self, event: DebugEvent) {
        let at = self.host.now().with_timezone(&Utc);
        if let Ok(mut log) = self.events.lock() {
            log.push_at(at, event);
        }
    }
}

fn repeating(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
