//! Finding the "Airing" section in a host page whose markup isn't a stable contract.
//!
//! Both the header search and the container search are ordered rule lists;
//! the first rule that matches wins.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static NEARBY_HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2, h3, .section-header").unwrap());
static INNER_HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3").unwrap());
static SECTION_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".section-header").unwrap());
static HOME_SECTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".home section").unwrap());
static SECTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("section").unwrap());
static CLASSED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[class]").unwrap());
static LIST_PREVIEW_WRAP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".list-preview-wrap").unwrap());
static LIST_PREVIEW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".list-preview").unwrap());

/// Card-like elements across the site's markup revisions.
pub(crate) static CARDS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".media-preview-card, .airing-anime, .countdown-card, .media-card").unwrap()
});

/// Classes that mark a card list wrapper.
const CONTAINER_CLASSES: &[&str] = &[
    "list-wrap",
    "content-wrap",
    "list-preview-wrap",
    "list-preview",
    "airing-content",
];

/// Mount points for the last-resort initialization, in priority order.
const FALLBACK_MOUNTS: &[&str] = &[
    ".list-preview-wrap",
    ".content-wrap",
    ".list-wrap",
    ".page-content",
    "main",
    ".airing-content",
    "body",
];

/// How far up the tree the container search walks.
const ANCESTOR_DEPTH: usize = 5;

/// Which header rule found the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateTier {
    ExactHeading,
    ContainsTitle,
    SectionScan,
    KeywordClass,
}

impl LocateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactHeading => "exact_heading",
            Self::ContainsTitle => "contains_title",
            Self::SectionScan => "section_scan",
            Self::KeywordClass => "keyword_class",
        }
    }
}

impl std::fmt::Display for LocateTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type HeaderRule = for<'a> fn(&'a Html, &str) -> Option<ElementRef<'a>>;
type ContainerRule = for<'a> fn(ElementRef<'a>) -> Option<ElementRef<'a>>;

const HEADER_RULES: [(LocateTier, HeaderRule); 4] = [
    (LocateTier::ExactHeading, exact_heading),
    (LocateTier::ContainsTitle, contains_title),
    (LocateTier::SectionScan, section_scan),
    (LocateTier::KeywordClass, keyword_class),
];

const CONTAINER_RULES: [(&str, ContainerRule); 5] = [
    ("section_header_wrap", via_section_header),
    ("ancestor_walk", via_ancestors),
    ("parent_sibling", via_parent_siblings),
    ("closest_section", via_closest_section),
    ("grandparent", via_grandparent),
];

/// A located Airing section.
#[derive(Debug, Clone, Copy)]
pub struct Located<'a> {
    /// Element whose text is replaced and after which the calendar mounts.
    pub header: ElementRef<'a>,
    /// Element holding the original cards; hidden once the calendar mounts.
    pub container: ElementRef<'a>,
    pub tier: LocateTier,
    pub container_rule: &'static str,
}

/// Search `html` for the section titled `title`.
///
/// `None` is the normal answer while the page is still rendering.
#[tracing::instrument(skip(html))]
pub fn locate<'a>(html: &'a Html, title: &str) -> Option<Located<'a>> {
    for (tier, rule) in HEADER_RULES {
        let Some(anchor) = rule(html, title) else {
            continue;
        };
        let Some((container_rule, container)) = find_container(anchor) else {
            tracing::debug!(%tier, "Header found but no container");
            continue;
        };
        tracing::debug!(%tier, container_rule, "Located section");
        return Some(Located {
            header: header_of(anchor),
            container,
            tier,
            container_rule,
        });
    }
    None
}

/// Run the container cascade from a matched header element.
pub fn find_container(anchor: ElementRef<'_>) -> Option<(&'static str, ElementRef<'_>)> {
    CONTAINER_RULES
        .iter()
        .find_map(|(name, rule)| rule(anchor).map(|c| (*name, c)))
}

/// First available last-resort mount point.
pub fn fallback_mount(html: &Html) -> Option<ElementRef<'_>> {
    FALLBACK_MOUNTS.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        html.select(&selector).next()
    })
}

// ── Header rules ────────────────────────────────────────────────

fn exact_heading<'a>(html: &'a Html, title: &str) -> Option<ElementRef<'a>> {
    html.select(&HEADING).find(|h| text_of(*h) == title)
}

fn contains_title<'a>(html: &'a Html, title: &str) -> Option<ElementRef<'a>> {
    let headings: Vec<_> = html
        .select(&HEADING)
        .filter(|h| text_of(*h).contains(title))
        .collect();
    let under_header = headings.iter().copied().find(|h| {
        parent_element(*h).is_some_and(|p| p.value().has_class("section-header", case_sensitive()))
    });
    under_header.or_else(|| headings.first().copied()).or_else(|| {
        html.select(&SECTION_HEADER)
            .find(|h| text_of(*h).contains(title))
    })
}

fn section_scan<'a>(html: &'a Html, title: &str) -> Option<ElementRef<'a>> {
    html.select(&HOME_SECTION)
        .filter(|s| text_of(*s).contains(title))
        .find_map(|s| s.select(&NEARBY_HEADING).next())
}

fn keyword_class<'a>(html: &'a Html, title: &str) -> Option<ElementRef<'a>> {
    let keyword = title.to_lowercase();
    let matches: Vec<_> = html
        .select(&CLASSED)
        .filter(|el| {
            el.value()
                .attr("class")
                .is_some_and(|c| c.to_lowercase().contains(&keyword))
        })
        .collect();

    let nearby = matches.iter().find_map(|el| {
        el.select(&NEARBY_HEADING)
            .next()
            .or_else(|| closest(*el, &SECTION_HEADER))
            .or_else(|| closest(*el, &SECTION).and_then(|s| s.select(&NEARBY_HEADING).next()))
    });
    nearby.or_else(|| {
        let first = matches.first().copied()?;
        (first.value().name() == "section")
            .then(|| first.select(&NEARBY_HEADING).next().unwrap_or(first))
    })
}

// ── Container rules ─────────────────────────────────────────────

fn via_section_header(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let header = closest(anchor, &SECTION_HEADER)?;
    closest(header, &LIST_PREVIEW_WRAP)
        .or_else(|| closest(header, &LIST_PREVIEW))
        .or_else(|| {
            next_element_sibling(header).filter(|s| {
                s.value().has_class("list-wrap", case_sensitive())
                    || s.value().has_class("content-wrap", case_sensitive())
            })
        })
}

fn via_ancestors(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    ancestors(anchor).take(ANCESTOR_DEPTH).find(|el| {
        el.select(&CARDS).next().is_some()
            || CONTAINER_CLASSES
                .iter()
                .any(|c| el.value().has_class(c, case_sensitive()))
    })
}

fn via_parent_siblings(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let parent = parent_element(anchor)?;
    let grandparent = parent_element(parent)?;
    child_elements(grandparent)
        .filter(|s| s.id() != parent.id())
        .find(|s| s.select(&CARDS).next().is_some())
}

fn via_closest_section(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    closest(anchor, &SECTION)
}

fn via_grandparent(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    parent_element(anchor).and_then(parent_element)
}

// ── DOM helpers ─────────────────────────────────────────────────

fn case_sensitive() -> scraper::CaseSensitivity {
    scraper::CaseSensitivity::CaseSensitive
}

/// The element whose text gets replaced: the match itself when it is a
/// heading, else the first heading inside it.
fn header_of(anchor: ElementRef<'_>) -> ElementRef<'_> {
    match anchor.value().name() {
        "h2" | "h3" => anchor,
        _ => anchor.select(&INNER_HEADING).next().unwrap_or(anchor),
    }
}

/// Whitespace-collapsed text content.
pub fn text_of(el: ElementRef<'_>) -> String {
    let raw: String = el.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn parent_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.parent().and_then(ElementRef::wrap)
}

pub fn ancestors(el: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    el.ancestors().filter_map(ElementRef::wrap)
}

/// Nearest inclusive ancestor matching `selector`, like DOM `closest`.
pub fn closest<'a>(el: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    std::iter::once(el)
        .chain(ancestors(el))
        .find(|e| selector.matches(e))
}

fn next_element_sibling(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

fn child_elements(el: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    el.children().filter_map(ElementRef::wrap)
}

/// A `>`-joined `tag:nth-child(n)` path that re-finds `el` in the same document.
pub fn css_path(el: ElementRef<'_>) -> String {
    let mut segments: Vec<String> = std::iter::once(el)
        .chain(ancestors(el))
        .map(|e| {
            let name = e.value().name();
            if parent_element(e).is_none() {
                return name.to_string();
            }
            let position = 1 + e.prev_siblings().filter(|n| n.value().is_element()).count();
            format!("{name}:nth-child({position})")
        })
        .collect();
    segments.reverse();
    segments.join(" > ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"<div class="media-preview-card"><a class="cover" href="/anime/1/"></a></div>"#;

    fn page(body: &str) -> Html {
        Html::parse_document(&format!("<html><body>{body}</body></html>"))
    }

    #[test]
    fn test_exact_heading_tier() {
        let html = page(&format!(
            r#"<div class="list-preview-wrap">
                 <div class="section-header"><h2>Airing</h2></div>
                 <div class="list-preview">{CARD}</div>
               </div>"#
        ));
        let found = locate(&html, "Airing").unwrap();
        assert_eq!(found.tier, LocateTier::ExactHeading);
        assert_eq!(found.header.value().name(), "h2");
        assert_eq!(found.container_rule, "section_header_wrap");
        assert!(found.container.value().has_class("list-preview-wrap", case_sensitive()));
    }

    #[test]
    fn test_contains_title_prefers_section_header_parent() {
        let html = page(&format!(
            r#"<h2>Airing soon elsewhere</h2>
               <div class="wrap">
                 <div class="section-header"><h2>Airing Now</h2></div>
                 <div class="content-wrap">{CARD}</div>
               </div>"#
        ));
        let found = locate(&html, "Airing").unwrap();
        assert_eq!(found.tier, LocateTier::ContainsTitle);
        assert_eq!(text_of(found.header), "Airing Now");
        assert!(found.container.value().has_class("content-wrap", case_sensitive()));
    }

    #[test]
    fn test_section_scan_tier() {
        let html = page(&format!(
            r#"<div class="home"><section><h3>Airing</h3><div>{CARD}</div></section></div>"#
        ));
        let found = locate(&html, "Airing").unwrap();
        assert_eq!(found.tier, LocateTier::SectionScan);
        assert_eq!(found.header.value().name(), "h3");
        assert_eq!(found.container.value().name(), "section");
    }

    #[test]
    fn test_loosest_tier_still_locates() {
        let html = page(&format!(
            r#"<div class="page">
                 <section class="AiringPanel"><span>This week</span></section>
                 <div class="grid">{CARD}</div>
               </div>"#
        ));
        let found = locate(&html, "Airing").unwrap();
        assert_eq!(found.tier, LocateTier::KeywordClass);
        assert!(found.container.value().has_class("page", case_sensitive()));
    }

    #[test]
    fn test_missing_section_is_none() {
        let html = page("<h2>Trending</h2><div class='list-wrap'></div>");
        assert!(locate(&html, "Airing").is_none());
    }

    #[test]
    fn test_fallback_mount_priority() {
        let html = page(r#"<main><div class="content-wrap"></div></main>"#);
        let mount = fallback_mount(&html).unwrap();
        assert!(mount.value().has_class("content-wrap", case_sensitive()));
    }

    #[test]
    fn test_css_path_refinds_element() {
        let html = page(r#"<div><p>a</p><p class="target">b</p></div>"#);
        let target = html
            .select(&Selector::parse(".target").unwrap())
            .next()
            .unwrap();
        let path = css_path(target);
        assert_eq!(path, "html > body:nth-child(2) > div:nth-child(1) > p:nth-child(2)");
        let again = html.select(&Selector::parse(&path).unwrap()).next().unwrap();
        assert_eq!(again.id(), target.id());
    }
}
