use std::num::ParseIntError;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::EpisodeProgress;

static RE_BEHIND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+episodes?\s+behind\s+").unwrap());
static RE_BEHIND_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+episodes?\s+behind").unwrap());
static RE_PROGRESS_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Progress:\s*(\d+)\s*/\s*(\d+)").unwrap());
static RE_PROGRESS_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Progress:\s*(\d+)\b").unwrap());
static RE_EPISODE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:Ep|Episode)\s+(\d+)\+?\s*").unwrap());
static RE_EPISODE_ANYWHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bEp(?:isode)?\s+(\d+)").unwrap());
static RE_TRAILING_PLUS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+\+\s*$").unwrap());

/// Card text consulted when the title alone doesn't carry progress.
#[derive(Debug, Clone, Default)]
pub struct CardHints {
    /// Text of the card's progress label (`.info`, mobile plus button).
    pub progress_label: Option<String>,
    /// Text of the card's info header, which may say "N episodes behind".
    pub behind_label: Option<String>,
    /// Countdown text; its presence marks the entry as upcoming.
    pub countdown_label: Option<String>,
}

/// Result of parsing a raw card title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTitle {
    pub clean_title: String,
    pub progress: EpisodeProgress,
    pub upcoming: bool,
}

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error("invalid episode number: {0}")]
    Number(#[from] ParseIntError),
    #[error("episode count overflow")]
    Overflow,
}

/// Parse progress facts out of a card title.
///
/// Never fails: unparseable numbers degrade to zero-valued progress.
pub fn parse_title(raw: &str, hints: Option<&CardHints>) -> ParsedTitle {
    match try_parse(raw, hints) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(title = raw, error = %e, "Title parse failed, using defaults");
            ParsedTitle {
                clean_title: raw.trim().to_string(),
                progress: EpisodeProgress::default(),
                upcoming: false,
            }
        }
    }
}

fn try_parse(raw: &str, hints: Option<&CardHints>) -> Result<ParsedTitle, ExtractError> {
    let mut title = raw.to_string();

    let mut behind = None;
    if let Some(caps) = RE_BEHIND.captures(&title) {
        behind = Some(caps[1].parse::<u32>()?);
        title = RE_BEHIND.replace(&title, "").into_owned();
    }

    let mut progress = take_progress(&mut title)?;

    if let Some(hints) = hints {
        if progress.is_none() {
            if let Some(label) = &hints.progress_label {
                progress = read_progress(label)?;
            }
        }
        if behind.is_none() {
            if let Some(label) = &hints.behind_label {
                if let Some(caps) = RE_BEHIND_LABEL.captures(label) {
                    behind = Some(caps[1].parse::<u32>()?);
                }
            }
        }
    }

    let (watched, total) = progress.unwrap_or((0, None));
    let explicit_behind = behind.filter(|b| *b > 0);
    let mut available = match explicit_behind {
        Some(b) => watched.checked_add(b).ok_or(ExtractError::Overflow)?,
        None => watched,
    };

    let countdown_label = hints.and_then(|h| h.countdown_label.as_deref());
    let upcoming = countdown_label.is_some();
    if upcoming && explicit_behind.is_none() {
        available = watched.checked_add(1).ok_or(ExtractError::Overflow)?;
    }

    let mut episode = None;
    if let Some(caps) = RE_EPISODE_PREFIX.captures(&title) {
        episode = Some(caps[1].parse::<u32>()?);
    }
    if episode.is_none() {
        if let Some(caps) = countdown_label.and_then(|l| RE_EPISODE_ANYWHERE.captures(l)) {
            episode = Some(caps[1].parse::<u32>()?);
        }
    }
    let next_episode = match episode {
        Some(ep) => Some(ep),
        None if upcoming => Some(available),
        None => None,
    };

    let stripped = RE_EPISODE_PREFIX.replace(&title, "");
    let clean_title = RE_TRAILING_PLUS.replace(&stripped, "").trim().to_string();

    Ok(ParsedTitle {
        clean_title,
        progress: EpisodeProgress::new(watched, available, total).with_next_episode(next_episode),
        upcoming,
    })
}

/// Remove a progress marker from `title`, returning `(watched, total)`.
fn take_progress(title: &mut String) -> Result<Option<(u32, Option<u32>)>, ExtractError> {
    let found = read_progress(title)?;
    if found.is_some() {
        let without = if RE_PROGRESS_TOTAL.is_match(title) {
            RE_PROGRESS_TOTAL.replace(title, "")
        } else {
            RE_PROGRESS_SINGLE.replace(title, "")
        };
        *title = without.into_owned();
    }
    Ok(found)
}

fn read_progress(text: &str) -> Result<Option<(u32, Option<u32>)>, ExtractError> {
    if let Some(caps) = RE_PROGRESS_TOTAL.captures(text) {
        let watched = caps[1].parse::<u32>()?;
        let total = caps[2].parse::<u32>()?;
        return Ok(Some((watched, Some(total))));
    }
    if let Some(caps) = RE_PROGRESS_SINGLE.captures(text) {
        return Ok(Some((caps[1].parse::<u32>()?, None)));
    }
    Ok(None)
}
