use std::num::ParseIntError;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Timelike};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::extract::{parse_title, CardHints};
use crate::locate::{ancestors, closest, css_path, text_of, CARDS};
use crate::models::{AiringEntry, Countdown};
use crate::time::{self, TargetZone};

static RE_ANIME_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/anime/(\d+)").unwrap());
static RE_BACKGROUND_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(['"]?(.*?)['"]?\)"#).unwrap());
static RE_DAYS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)d").unwrap());
static RE_HOURS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)h").unwrap());
static RE_MINUTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)m").unwrap());
static RE_CLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+):(\d+)").unwrap());

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".title, .anime-title, .content .title").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static PLUS_CONTROL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#".plus-button, .plus-progress, button[data-test="plusButton"]"#).unwrap()
});
static COVER_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.cover").unwrap());
static COVER_IMG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".cover img, .image img, img.cover, img.image").unwrap());
static COUNTDOWN: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".countdown, .airing-countdown, .airing-time, .time").unwrap()
});
static PROGRESS_LABEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".info, .plus-progress.mobile").unwrap());
static INFO_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".info-header").unwrap());
static EXTENDED_CARDS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#".media-preview-card, .airing-anime, .countdown-card, .media-card, .list-preview-wrap .cover, [data-media-type="ANIME"]"#,
    )
    .unwrap()
});
static ANIME_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/anime/"]"#).unwrap());
static LINK_CARD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".media-preview-card, .airing-anime, .countdown-card, .media-card, .cover-wrap")
        .unwrap()
});
static ANY_COVER: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a.cover, .cover img, .image img, img.cover, img.image").unwrap()
});
/// Anything that might be an anime card, for the last-resort page scrape.
static AGGRESSIVE_CARDS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#".media-preview-card, .airing-anime, .countdown-card, .media-card, [class*="airing"], [class*="Airing"], [data-media-id], [data-media-type="ANIME"]"#,
    )
    .unwrap()
});
static CALENDAR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#anilist-calendar-container").unwrap());

/// Inputs shared by every card of one scrape pass.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeContext<'u> {
    /// Current time carrying the local UTC offset.
    pub now: DateTime<FixedOffset>,
    pub zone: TargetZone,
    /// Base for resolving relative image URLs.
    pub base_url: Option<&'u Url>,
    pub placeholder_cover: &'u str,
}

/// Per-anime handles the progress action and re-renders rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardReferences {
    /// Selector path of the site's own "+1 episode" control.
    pub progress_control: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeOutput {
    pub entries: Vec<AiringEntry>,
    pub references: Vec<(String, CardReferences)>,
    /// Cards that failed, as `(index, reason)`.
    pub skipped: Vec<(usize, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("unreadable countdown `{text}`: {source}")]
    Countdown {
        text: String,
        #[source]
        source: ParseIntError,
    },
    #[error("airing time out of range for {0:?}")]
    OutOfRange(Countdown),
}

/// Scrape every card inside a located container.
pub fn extract(container: ElementRef<'_>, ctx: &ScrapeContext<'_>) -> ScrapeOutput {
    extract_cards(container.select(&CARDS), ctx)
}

/// Scrape every card-like element anywhere in the page.
///
/// Matches nested inside an accepted card are skipped, as are wrappers that
/// link to more than one anime.
pub fn extract_page(html: &Html, ctx: &ScrapeContext<'_>) -> ScrapeOutput {
    let mut accepted: Vec<ElementRef<'_>> = Vec::new();
    for candidate in html.select(&AGGRESSIVE_CARDS) {
        if in_calendar(candidate)
            || ancestors(candidate).any(|a| accepted.iter().any(|c| c.id() == a.id()))
            || linked_ids(candidate) > 1
        {
            continue;
        }
        accepted.push(candidate);
    }
    extract_cards(accepted.into_iter(), ctx)
}

/// Distinct anime ids linked from inside `el`.
fn linked_ids(el: ElementRef<'_>) -> usize {
    let mut ids: Vec<String> = el
        .select(&ANIME_LINK)
        .filter_map(|a| a.value().attr("href").and_then(anime_id_from_href))
        .collect();
    ids.sort();
    ids.dedup();
    ids.len()
}

fn in_calendar(el: ElementRef<'_>) -> bool {
    closest(el, &CALENDAR).is_some()
}

fn extract_cards<'a>(
    cards: impl Iterator<Item = ElementRef<'a>>,
    ctx: &ScrapeContext<'_>,
) -> ScrapeOutput {
    let mut out = ScrapeOutput::default();
    for (index, card) in cards.enumerate() {
        match scrape_card(card, index, ctx) {
            Ok((entry, refs)) => {
                out.references.push((entry.id.clone(), refs));
                out.entries.push(entry);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping card");
                out.skipped.push((index, e.to_string()));
            }
        }
    }
    tracing::debug!(
        entries = out.entries.len(),
        skipped = out.skipped.len(),
        "Extracted cards"
    );
    out
}

fn scrape_card(
    card: ElementRef<'_>,
    index: usize,
    ctx: &ScrapeContext<'_>,
) -> Result<(AiringEntry, CardReferences), CardError> {
    let title = card
        .select(&TITLE)
        .next()
        .map(text_of)
        .unwrap_or_else(|| format!("Unknown Anime {index}"));
    let id = card_id(card).unwrap_or_else(|| format!("unknown-{index}"));

    let countdown_text = card
        .select(&COUNTDOWN)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty());
    let hints = CardHints {
        progress_label: card.select(&PROGRESS_LABEL).next().map(text_of),
        behind_label: card.select(&INFO_HEADER).next().map(text_of),
        countdown_label: countdown_text.clone(),
    };
    let parsed = parse_title(&title, Some(&hints));

    let countdown = match &countdown_text {
        Some(text) => parse_countdown(text).map_err(|source| CardError::Countdown {
            text: text.clone(),
            source,
        })?,
        None => Countdown::default(),
    };
    // Without a countdown the entry is pinned to the current hour.
    let base = if countdown_text.is_some() {
        ctx.now
    } else {
        ctx.now.with_minute(0).unwrap_or(ctx.now)
    };
    let resolution =
        time::resolve(countdown, base, ctx.zone).ok_or(CardError::OutOfRange(countdown))?;

    let cover_url = card_cover(card, ctx.base_url);
    let refs = CardReferences {
        progress_control: card.select(&PLUS_CONTROL).next().map(css_path),
        cover_url: cover_url.clone(),
    };

    let clean_title = if parsed.clean_title.is_empty() {
        title.clone()
    } else {
        parsed.clean_title
    };

    let entry = AiringEntry {
        id,
        title,
        clean_title,
        cover_image: cover_url.unwrap_or_else(|| ctx.placeholder_cover.to_string()),
        countdown,
        airing_at: resolution.airing_at,
        resolved_day: resolution.resolved_day,
        original_day: resolution.original_day,
        day_shifted: resolution.day_shifted,
        progress: parsed.progress,
    };
    Ok((entry, refs))
}

/// Parse `2d 4h 10m` style countdowns, or `H:MM` when no hour token exists.
pub fn parse_countdown(text: &str) -> Result<Countdown, ParseIntError> {
    let grab = |re: &Regex| -> Result<Option<u32>, ParseIntError> {
        re.captures(text).map(|c| c[1].parse::<u32>()).transpose()
    };
    let days = grab(&*RE_DAYS)?.unwrap_or(0);
    let mut hours = grab(&*RE_HOURS)?;
    let mut minutes = grab(&*RE_MINUTES)?.unwrap_or(0);
    if hours.is_none() {
        if let Some(caps) = RE_CLOCK.captures(text) {
            hours = Some(caps[1].parse()?);
            minutes = caps[2].parse()?;
        }
    }
    Ok(Countdown::new(days, hours.unwrap_or(0), minutes))
}

fn card_id(card: ElementRef<'_>) -> Option<String> {
    // Extended scans may hand us the cover anchor itself.
    std::iter::once(card)
        .filter(|c| c.value().name() == "a")
        .chain(card.select(&ANCHOR))
        .filter_map(|a| a.value().attr("href"))
        .find_map(anime_id_from_href)
        .or_else(|| {
            let el = card.value();
            el.attr("data-media-id")
                .or_else(|| el.attr("data-id"))
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
}

fn anime_id_from_href(href: &str) -> Option<String> {
    RE_ANIME_ID.captures(href).map(|c| c[1].to_string())
}

/// Cover URL from `data-src`, an inline background image, or an `<img>`.
fn card_cover(card: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    std::iter::once(card)
        .filter(|c| COVER_LINK.matches(c))
        .chain(card.select(&COVER_LINK))
        .next()
        .and_then(cover_from_link)
        .or_else(|| {
            card.select(&COVER_IMG)
                .next()
                .and_then(|img| img.value().attr("src"))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .map(|raw| absolutize(&raw, base))
}

fn cover_from_link(link: ElementRef<'_>) -> Option<String> {
    let el = link.value();
    if let Some(src) = el.attr("data-src").filter(|s| !s.is_empty()) {
        return Some(src.to_string());
    }
    let style = el.attr("style")?;
    RE_BACKGROUND_URL
        .captures(style)
        .map(|c| c[1].to_string())
        .filter(|s| !s.is_empty())
}

fn cover_from_any(el: ElementRef<'_>) -> Option<String> {
    if el.value().name() == "img" {
        el.value()
            .attr("src")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    } else {
        cover_from_link(el)
    }
}

fn absolutize(raw: &str, base: Option<&Url>) -> String {
    match base.map(|b| b.join(raw)) {
        Some(Ok(url)) => url.to_string(),
        _ => raw.to_string(),
    }
}

/// Collect progress controls and covers from the whole page.
///
/// A full scan widens the card selector and also walks every anime link.
#[tracing::instrument(skip(html, base))]
pub fn scan_references(
    html: &Html,
    full: bool,
    base: Option<&Url>,
) -> Vec<(String, CardReferences)> {
    let mut found = Vec::new();

    if full {
        for link in html.select(&ANIME_LINK) {
            let Some(id) = link.value().attr("href").and_then(anime_id_from_href) else {
                continue;
            };
            let Some(card) = closest(link, &LINK_CARD).filter(|c| !in_calendar(*c)) else {
                continue;
            };
            let refs = CardReferences {
                progress_control: card.select(&PLUS_CONTROL).next().map(css_path),
                cover_url: card
                    .select(&ANY_COVER)
                    .next()
                    .and_then(cover_from_any)
                    .map(|raw| absolutize(&raw, base)),
            };
            found.push((id, refs));
        }
    }

    let cards = if full { &*EXTENDED_CARDS } else { &*CARDS };
    for card in html.select(cards).filter(|c| !in_calendar(*c)) {
        let Some(id) = card_id(card) else {
            continue;
        };
        let refs = CardReferences {
            progress_control: card.select(&PLUS_CONTROL).next().map(css_path),
            cover_url: card_cover(card, base),
        };
        found.push((id, refs));
    }

    tracing::debug!(found = found.len(), "Reference scan finished");
    found
}

/// Selector path of the site's "+1 episode" control for `id` in this snapshot.
///
/// Resolved by anime id rather than by a cached path, so it stays valid
/// after the page around the card has been rearranged.
pub fn find_progress_control(html: &Html, id: &str) -> Option<String> {
    let by_link = html
        .select(&ANIME_LINK)
        .filter(|link| {
            link.value()
                .attr("href")
                .and_then(anime_id_from_href)
                .is_some_and(|found| found == id)
        })
        .filter_map(|link| closest(link, &LINK_CARD).or_else(|| closest(link, &CARDS)));
    let by_attr = html.select(&EXTENDED_CARDS).filter(|card| {
        let el = card.value();
        el.attr("data-media-id").or_else(|| el.attr("data-id")) == Some(id)
    });

    by_link
        .chain(by_attr)
        .filter(|card| !in_calendar(*card))
        .find_map(|card| card.select(&PLUS_CONTROL).next())
        .map(css_path)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Weekday};

    use super::*;

    const PLACEHOLDER: &str = "https://example.test/default.jpg";

    fn ctx<'u>(base: Option<&'u Url>) -> ScrapeContext<'u> {
        ScrapeContext {
            now: DateTime::parse_from_rfc3339("2024-01-01T10:00:00+09:00").unwrap(),
            zone: TargetZone::from_key("jst"),
            base_url: base,
            placeholder_cover: PLACEHOLDER,
        }
    }

    fn container(html: &Html) -> ElementRef<'_> {
        html.select(&Selector::parse(".list").unwrap()).next().unwrap()
    }

    const CARDS_HTML: &str = r#"
        <div class="list">
          <div class="media-preview-card">
            <a class="cover" href="/anime/154587/Frieren/" data-src="https://img.test/frieren.jpg"></a>
            <div class="content">
              <div class="title">2 episodes behind Frieren Progress: 10/28</div>
              <div class="countdown">Ep 13: 2d 4h 30m</div>
              <div class="plus-progress">+</div>
            </div>
          </div>
          <div class="media-preview-card" data-media-id="9001">
            <a class="cover" href="/user/me" style="background-image: url('/covers/x.png')"></a>
            <div class="title">Ep 5</div>
            <div class="time">1:15</div>
          </div>
          <div class="media-card">
            <div class="countdown">99999999999d</div>
          </div>
          <div class="airing-anime">
            <img class="image" src="https://img.test/raw.jpg">
          </div>
        </div>"#;

    #[test]
    fn test_extracts_cards_and_isolates_failures() {
        let html = Html::parse_document(CARDS_HTML);
        let base = Url::parse("https://anilist.co/").unwrap();
        let out = extract(container(&html), &ctx(Some(&base)));

        assert_eq!(out.entries.len(), 3);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].0, 2);

        let frieren = &out.entries[0];
        assert_eq!(frieren.id, "154587");
        assert_eq!(frieren.clean_title, "Frieren");
        assert_eq!(frieren.cover_image, "https://img.test/frieren.jpg");
        assert_eq!(frieren.countdown, Countdown::new(2, 4, 30));
        assert_eq!(frieren.progress.available, 12);
        assert_eq!(frieren.resolved_day, Weekday::Wed);
        assert_eq!(frieren.airing_at.day(), 3);

        let second = &out.entries[1];
        assert_eq!(second.id, "9001");
        assert_eq!(second.cover_image, "https://anilist.co/covers/x.png");
        assert_eq!(second.countdown, Countdown::new(0, 1, 15));
        assert_eq!(second.progress.formatted(), "Next: Ep 5");
        assert_eq!(second.clean_title, "Ep 5");

        let last = &out.entries[2];
        assert_eq!(last.id, "unknown-3");
        assert_eq!(last.title, "Unknown Anime 3");
        assert_eq!(last.cover_image, "https://img.test/raw.jpg");
        assert_eq!(last.airing_at.minute(), 0);

        let (id, refs) = &out.references[0];
        assert_eq!(id, "154587");
        assert!(refs.progress_control.as_deref().unwrap().ends_with("div:nth-child(3)"));
        assert_eq!(out.references[1].1.progress_control, None);
    }

    #[test]
    fn test_missing_cover_uses_placeholder() {
        let html = Html::parse_document(
            r#"<div class="list"><div class="media-card"><div class="title">X</div></div></div>"#,
        );
        let out = extract(container(&html), &ctx(None));
        assert_eq!(out.entries[0].cover_image, PLACEHOLDER);
        assert_eq!(out.references[0].1.cover_url, None);
    }

    #[test]
    fn test_parse_countdown_forms() {
        assert_eq!(parse_countdown("3d 2h 1m").unwrap(), Countdown::new(3, 2, 1));
        assert_eq!(parse_countdown("45m").unwrap(), Countdown::new(0, 0, 45));
        assert_eq!(parse_countdown("1d 12:05").unwrap(), Countdown::new(1, 12, 5));
        assert_eq!(parse_countdown("5h 12:05").unwrap(), Countdown::new(0, 5, 0));
        assert_eq!(parse_countdown("soon").unwrap(), Countdown::default());
        assert!(parse_countdown("99999999999m").is_err());
    }

    #[test]
    fn test_full_reference_scan_walks_links() {
        let html = Html::parse_document(
            r#"<div class="cover-wrap">
                 <a href="https://anilist.co/anime/21/One-Piece">
                   <img class="image" src="https://img.test/op.jpg">
                 </a>
                 <button data-test="plusButton">+</button>
               </div>"#,
        );
        assert!(scan_references(&html, false, None).is_empty());
        let refs = scan_references(&html, true, None);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, "21");
        assert_eq!(refs[0].1.cover_url.as_deref(), Some("https://img.test/op.jpg"));
        assert!(refs[0].1.progress_control.is_some());
    }

    #[test]
    fn test_extract_page_takes_any_card_like_element() {
        let html = Html::parse_document(
            r#"<html><body><main>
                 <div data-media-id="42">
                   <div class="title">Delta</div>
                   <div class="countdown">2h 0m</div>
                 </div>
                 <div class="AiringCard">
                   <a href="/anime/43/"></a>
                   <div class="title">Epsilon</div>
                   <div class="airing-countdown">3h 0m</div>
                 </div>
                 <div class="airing-list">
                   <a href="/anime/44/"></a>
                   <a href="/anime/45/"></a>
                 </div>
               </main></body></html>"#,
        );
        let out = extract_page(&html, &ctx(None));
        let ids: Vec<_> = out.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["42", "43"]);
        assert_eq!(out.entries[1].countdown, Countdown::new(0, 3, 0));
    }

    #[test]
    fn test_progress_control_found_by_anime_id() {
        let html = Html::parse_document(
            r#"<html><body>
                 <div id="anilist-calendar-container">
                   <div class="media-card"><a href="/anime/5/"></a><div class="plus-button">+</div></div>
                 </div>
                 <div class="list-preview" hidden>
                   <div class="media-preview-card">
                     <a class="cover" href="/anime/5/Some-Show"></a>
                     <div class="plus-progress">+</div>
                   </div>
                   <div class="media-preview-card" data-media-id="6">
                     <button data-test="plusButton">+</button>
                   </div>
                 </div>
               </body></html>"#,
        );
        let path = find_progress_control(&html, "5").unwrap();
        let control = html.select(&Selector::parse(&path).unwrap()).next().unwrap();
        assert!(control
            .value()
            .has_class("plus-progress", scraper::CaseSensitivity::CaseSensitive));

        let path = find_progress_control(&html, "6").unwrap();
        let control = html.select(&Selector::parse(&path).unwrap()).next().unwrap();
        assert_eq!(control.value().name(), "button");

        assert_eq!(find_progress_control(&html, "7"), None);
    }
}
