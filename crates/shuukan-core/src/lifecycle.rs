use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Classes on an added node that suggest the home layout is (re)rendering.
const RELEVANT_CLASSES: &[&str] = &["home", "section-header", "content-wrap"];

/// Where the calendar stands on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Searching,
    Rendered,
}

/// Bookkeeping for locate attempts on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeAttemptState {
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub initialized: bool,
}

/// A summary of one node added to the page, reported by the host observer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationHint {
    #[serde(default)]
    pub added_text: String,
    #[serde(default)]
    pub added_classes: Vec<String>,
}

/// Cheap filter: does this added node plausibly contain the Airing section?
pub fn is_relevant(hint: &MutationHint, section_title: &str) -> bool {
    hint.added_text.contains(section_title)
        || hint
            .added_classes
            .iter()
            .any(|c| RELEVANT_CLASSES.contains(&c.as_str()))
}

/// Home feed URLs: the site root (with or without a query) and `/home`.
pub fn is_home_page(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.host_str() != Some("anilist.co") {
        return false;
    }
    matches!(parsed.path(), "/" | "" | "/home")
}

/// The page lifecycle state machine.
///
/// `Uninitialized -> Searching -> Rendered`, back to `Searching` when the
/// mounted calendar disappears, and to `Uninitialized` on navigation.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Phase,
    url: String,
    section_title: String,
    state: ScrapeAttemptState,
}

impl Lifecycle {
    pub fn new(url: impl Into<String>, section_title: impl Into<String>) -> Self {
        Self {
            phase: Phase::Uninitialized,
            url: url.into(),
            section_title: section_title.into(),
            state: ScrapeAttemptState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> &ScrapeAttemptState {
        &self.state
    }

    pub fn is_home(&self) -> bool {
        is_home_page(&self.url)
    }

    /// True while a locate attempt would do anything.
    pub fn is_searching(&self) -> bool {
        self.phase == Phase::Searching
    }

    /// Page finished loading. Returns false if already past `Uninitialized`.
    pub fn page_ready(&mut self) -> bool {
        if self.phase != Phase::Uninitialized {
            return false;
        }
        tracing::info!(url = %self.url, "Searching for Airing section");
        self.phase = Phase::Searching;
        true
    }

    /// Decide whether a mutation batch should (re)arm the debounce timer.
    ///
    /// While rendered, mutations are ignored unless the calendar itself is
    /// gone, in which case the machine drops back to `Searching`.
    pub fn accepts_mutation(&mut self, hints: &[MutationHint], calendar_present: bool) -> bool {
        match self.phase {
            Phase::Uninitialized => false,
            Phase::Rendered if calendar_present => false,
            Phase::Rendered => {
                self.section_lost();
                true
            }
            Phase::Searching => hints.iter().any(|h| is_relevant(h, &self.section_title)),
        }
    }

    /// Record the start of an attempt. Returns the attempt number, or `None`
    /// when not searching.
    pub fn begin_attempt(&mut self, at: DateTime<Utc>) -> Option<u32> {
        if self.phase != Phase::Searching {
            return None;
        }
        self.state.attempts += 1;
        self.state.last_attempt = Some(at);
        Some(self.state.attempts)
    }

    pub fn attempt_succeeded(&mut self) {
        if self.phase != Phase::Searching {
            return;
        }
        tracing::info!(attempts = self.state.attempts, "Calendar rendered");
        self.phase = Phase::Rendered;
        self.state.initialized = true;
    }

    /// A failed attempt is not fatal; the host widget stays untouched.
    pub fn attempt_failed(&mut self) {
        tracing::debug!(attempts = self.state.attempts, "Airing section not found yet");
    }

    pub fn section_lost(&mut self) {
        if self.phase == Phase::Rendered {
            tracing::info!("Calendar removed by host, searching again");
            self.phase = Phase::Searching;
            self.state.initialized = false;
        }
    }

    /// Handle a URL change. Returns true if the URL actually changed, which
    /// resets the machine to `Uninitialized`.
    pub fn navigate(&mut self, url: &str) -> bool {
        if url == self.url {
            return false;
        }
        tracing::info!(from = %self.url, to = url, "Navigation detected");
        self.url = url.to_string();
        self.phase = Phase::Uninitialized;
        self.state = ScrapeAttemptState::default();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(text: &str, classes: &[&str]) -> MutationHint {
        MutationHint {
            added_text: text.into(),
            added_classes: classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_home_page_detection() {
        assert!(is_home_page("https://anilist.co/"));
        assert!(is_home_page("https://anilist.co/home"));
        assert!(is_home_page("https://anilist.co/?ref=nav"));
        assert!(is_home_page("https://anilist.co"));
        assert!(!is_home_page("https://anilist.co/anime/1"));
        assert!(!is_home_page("https://example.com/"));
        assert!(!is_home_page("not a url"));
    }

    #[test]
    fn test_relevance_filter() {
        assert!(is_relevant(&hint("Airing now", &[]), "Airing"));
        assert!(is_relevant(&hint("", &["section-header"]), "Airing"));
        assert!(is_relevant(&hint("", &["foo", "content-wrap"]), "Airing"));
        assert!(!is_relevant(&hint("Trending", &["tooltip"]), "Airing"));
    }

    #[test]
    fn test_full_cycle() {
        let mut lc = Lifecycle::new("https://anilist.co/home", "Airing");
        assert_eq!(lc.phase(), Phase::Uninitialized);
        assert!(lc.begin_attempt(Utc::now()).is_none());

        assert!(lc.page_ready());
        assert!(!lc.page_ready());
        assert_eq!(lc.begin_attempt(Utc::now()), Some(1));
        lc.attempt_failed();
        assert_eq!(lc.phase(), Phase::Searching);
        assert_eq!(lc.begin_attempt(Utc::now()), Some(2));
        lc.attempt_succeeded();
        assert_eq!(lc.phase(), Phase::Rendered);
        assert!(lc.state().initialized);
        assert!(lc.begin_attempt(Utc::now()).is_none());

        assert!(lc.navigate("https://anilist.co/anime/1"));
        assert_eq!(lc.phase(), Phase::Uninitialized);
        assert_eq!(lc.state(), &ScrapeAttemptState::default());
        assert!(!lc.is_home());
    }

    #[test]
    fn test_same_url_is_not_navigation() {
        let mut lc = Lifecycle::new("https://anilist.co/", "Airing");
        lc.page_ready();
        assert!(!lc.navigate("https://anilist.co/"));
        assert_eq!(lc.phase(), Phase::Searching);
    }

    #[test]
    fn test_rendered_ignores_churn_until_calendar_lost() {
        let mut lc = Lifecycle::new("https://anilist.co/", "Airing");
        let relevant = [hint("Airing", &[])];
        assert!(!lc.accepts_mutation(&relevant, false));

        lc.page_ready();
        assert!(lc.accepts_mutation(&relevant, false));
        assert!(!lc.accepts_mutation(&[hint("Other", &[])], false));

        lc.begin_attempt(Utc::now());
        lc.attempt_succeeded();
        assert!(!lc.accepts_mutation(&relevant, true));
        assert_eq!(lc.phase(), Phase::Rendered);

        assert!(lc.accepts_mutation(&[], false));
        assert_eq!(lc.phase(), Phase::Searching);
        assert!(!lc.state().initialized);
    }
}
