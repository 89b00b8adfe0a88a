use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::error::ShuukanError;
use crate::locate::{self, closest, css_path, parent_element, LocateTier};
use crate::models::AiringEntry;
use crate::preferences::UserPreferences;
use crate::render::{render_calendar, render_settings_trigger, RenderContext};
use crate::schedule::{ReferenceCache, WeeklySchedule};
use crate::scrape::{self, CardReferences, ScrapeContext, ScrapeOutput};
use crate::time::{self, TargetZone};

static SECTION_HEADER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".section-header").unwrap());

/// Where the rendered calendar goes relative to `MountPlan::container_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    /// Insert right after the element at `anchor_path`.
    AfterHeader,
    Append,
    /// Last-resort mount at the top of a generic page container.
    Prepend,
}

/// Instructions for the host to swap the Airing widget for the calendar.
///
/// Paths are `css_path` selectors against the snapshot the plan was built
/// from; the host resolves all of them before mutating anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPlan {
    pub mode: MountMode,
    pub container_path: String,
    /// Section header kept in place; the calendar follows it.
    pub anchor_path: Option<String>,
    /// Heading to retitle and place the settings trigger beside.
    pub heading_path: Option<String>,
    /// Original card lists to hide. They stay in the page so the site's own
    /// progress controls keep working.
    pub hide_paths: Vec<String>,
}

impl MountPlan {
    /// The calendar draws its own header only when no host heading is kept.
    pub fn show_header(&self) -> bool {
        self.heading_path.is_none()
    }
}

/// Everything the host needs to perform one mount.
#[derive(Debug, Clone, Serialize)]
pub struct Mount {
    pub plan: MountPlan,
    /// New text for the kept host heading.
    pub heading_text: String,
    pub calendar: String,
    pub settings_trigger: String,
}

/// Result of one successful locate + scrape + build pass.
#[derive(Debug, Clone)]
pub struct PageScrape {
    pub plan: MountPlan,
    pub schedule: WeeklySchedule,
    pub references: Vec<(String, CardReferences)>,
    pub skipped: Vec<(usize, String)>,
    /// `None` for the aggressive fallback.
    pub tier: Option<LocateTier>,
    pub container_rule: Option<&'static str>,
}

/// Locate the Airing section titled `title` and scrape it.
///
/// `None` means nothing usable yet: no section, or a section with no cards.
#[tracing::instrument(skip(html, ctx))]
pub fn scrape_page(html: &Html, title: &str, ctx: &ScrapeContext<'_>) -> Option<PageScrape> {
    let located = locate::locate(html, title)?;
    let out = scrape::extract(located.container, ctx);
    if out.entries.is_empty() {
        tracing::debug!(tier = %located.tier, "Section located but no entries");
        return None;
    }

    let plan = replace_plan(located.container, located.header);
    Some(finish(out, plan, Some(located.tier), Some(located.container_rule)))
}

/// Last resort: scrape every card on the page and mount at a generic container.
#[tracing::instrument(skip(html, ctx))]
pub fn scrape_page_aggressive(html: &Html, ctx: &ScrapeContext<'_>) -> Option<PageScrape> {
    let out = scrape::extract_page(html, ctx);
    if out.entries.is_empty() {
        return None;
    }
    let mount = locate::fallback_mount(html)?;
    tracing::info!(
        entries = out.entries.len(),
        mount = mount.value().name(),
        "Aggressive initialization"
    );
    let plan = MountPlan {
        mode: MountMode::Prepend,
        container_path: css_path(mount),
        anchor_path: None,
        heading_path: None,
        hide_paths: Vec::new(),
    };
    Some(finish(out, plan, None, None))
}

/// Render the calendar and settings trigger for `plan`.
pub fn build_mount(
    plan: &MountPlan,
    schedule: &WeeklySchedule,
    prefs: &UserPreferences,
    now: DateTime<FixedOffset>,
    title: &str,
    references: &ReferenceCache,
) -> Result<Mount, ShuukanError> {
    let offset = prefs.target_zone().offset(*now.offset());
    let ctx = RenderContext {
        now: now.with_timezone(&offset),
        title,
        zone_label: time::zone_label(offset),
        show_header: plan.show_header(),
        references: Some(references),
    };
    Ok(Mount {
        plan: plan.clone(),
        heading_text: title.to_string(),
        calendar: render_calendar(schedule, prefs, &ctx)?,
        settings_trigger: render_settings_trigger()?,
    })
}

/// Move an entry into another display zone, keeping its airing instant.
pub fn rezone_entry(mut entry: AiringEntry, local: FixedOffset, target: TargetZone) -> AiringEntry {
    let resolution = time::rezone(entry.airing_at, local, target);
    entry.airing_at = resolution.airing_at;
    entry.original_day = resolution.original_day;
    entry.resolved_day = resolution.resolved_day;
    entry.day_shifted = resolution.day_shifted;
    entry
}

fn finish(
    out: ScrapeOutput,
    plan: MountPlan,
    tier: Option<LocateTier>,
    container_rule: Option<&'static str>,
) -> PageScrape {
    PageScrape {
        plan,
        schedule: WeeklySchedule::build(out.entries),
        references: out.references,
        skipped: out.skipped,
        tier,
        container_rule,
    }
}

/// Keep the section header, hide the container's other children, and put the
/// calendar right after the header when it is a direct child.
fn replace_plan(container: ElementRef<'_>, heading: ElementRef<'_>) -> MountPlan {
    let section_header = closest(heading, &SECTION_HEADER);

    let holds_header = |child: ElementRef<'_>| {
        section_header.is_some_and(|sh| {
            sh.id() == child.id() || locate::ancestors(sh).any(|a| a.id() == child.id())
        })
    };
    let hide_paths = container
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| !holds_header(*child))
        .map(css_path)
        .collect();

    let direct = section_header
        .filter(|sh| parent_element(*sh).is_some_and(|p| p.id() == container.id()));

    MountPlan {
        mode: if direct.is_some() {
            MountMode::AfterHeader
        } else {
            MountMode::Append
        },
        container_path: css_path(container),
        anchor_path: direct.map(css_path),
        heading_path: Some(css_path(heading)),
        hide_paths,
    }
}
