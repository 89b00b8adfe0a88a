use serde::{Deserialize, Serialize};

/// Episode counts scraped for one anime.
///
/// `available >= watched` holds after every constructor and mutator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeProgress {
    pub watched: u32,
    pub available: u32,
    /// Series length; `None` when the site doesn't know it yet.
    pub total: Option<u32>,
    /// Episode currently counting down, when one is known.
    pub next_episode: Option<u32>,
}

impl EpisodeProgress {
    pub fn new(watched: u32, available: u32, total: Option<u32>) -> Self {
        Self {
            watched,
            available: available.max(watched),
            total: total.filter(|t| *t > 0),
            next_episode: None,
        }
    }

    pub fn with_next_episode(mut self, next: Option<u32>) -> Self {
        self.next_episode = next;
        self
    }

    /// Released episodes the user hasn't seen.
    pub fn behind_count(&self) -> u32 {
        self.available.saturating_sub(self.watched)
    }

    pub fn is_behind(&self) -> bool {
        self.behind_count() > 0
    }

    /// Apply a confirmed watched count. Raises `available` if needed.
    pub fn record_watched(&mut self, watched: u32) {
        self.watched = watched;
        if self.available < watched {
            self.available = watched;
        }
    }

    /// Short progress text, e.g. `4/7/12`, `4/12`, `4` or `Next: Ep 5`.
    pub fn formatted(&self) -> String {
        if self.watched == 0 {
            if let Some(next) = self.next_episode {
                return format!("Next: Ep {next}");
            }
        }
        match self.total {
            Some(total) if self.available > self.watched => {
                format!("{}/{}/{}", self.watched, self.available, total)
            }
            Some(total) => format!("{}/{}", self.watched, total),
            None => self.watched.to_string(),
        }
    }

    /// Label shown on a calendar card.
    pub fn display_label(&self) -> String {
        let formatted = self.formatted();
        if formatted.starts_with("Next:") {
            formatted
        } else {
            format!("Ep {formatted}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_variants() {
        assert_eq!(EpisodeProgress::new(4, 7, Some(12)).formatted(), "4/7/12");
        assert_eq!(EpisodeProgress::new(4, 4, Some(12)).formatted(), "4/12");
        assert_eq!(EpisodeProgress::new(4, 6, None).formatted(), "4");
        assert_eq!(EpisodeProgress::default().display_label(), "Ep 0");
        let upcoming = EpisodeProgress::new(0, 1, None).with_next_episode(Some(5));
        assert_eq!(upcoming.display_label(), "Next: Ep 5");
    }

    #[test]
    fn test_available_never_below_watched() {
        let progress = EpisodeProgress::new(5, 2, Some(0));
        assert_eq!(progress.available, 5);
        assert_eq!(progress.total, None);
    }

    #[test]
    fn test_record_watched_clears_behind() {
        let mut progress = EpisodeProgress::new(4, 7, Some(12));
        assert_eq!(progress.behind_count(), 3);
        progress.record_watched(7);
        assert!(!progress.is_behind());
        assert_eq!(progress.available, 7);
        assert_eq!(progress.total, Some(12));
        progress.record_watched(9);
        assert_eq!(progress.available, 9);
    }
}
