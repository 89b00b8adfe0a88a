use askama::Template;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Weekday};

use crate::error::ShuukanError;
use crate::models::day::{day_abbrev, day_index, day_name};
use crate::models::{AiringEntry, WEEK};
use crate::preferences::{ColumnJustify, LayoutMode, StartDay, TimeFormat, UserPreferences};
use crate::schedule::{ReferenceCache, WeeklySchedule};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Per-render inputs that aren't preferences.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    /// Current time in the display zone.
    pub now: DateTime<FixedOffset>,
    pub title: &'a str,
    pub zone_label: String,
    /// Draw the calendar's own title bar. Off when the host header is reused.
    pub show_header: bool,
    pub references: Option<&'a ReferenceCache>,
}

/// View model for one calendar card.
#[derive(Debug, Clone)]
pub struct EntryCard {
    pub id: String,
    pub title: String,
    pub initial: String,
    pub cover: String,
    pub compact: bool,
    pub gallery: bool,
    pub title_classes: String,
    pub show_info: bool,
    pub info_hidden: bool,
    pub episode_label: String,
    pub behind: u32,
    pub time_label: String,
    pub countdown_mode: bool,
    /// Airing instant in epoch millis, for countdown refresh; empty in release mode.
    pub target_ms: String,
    pub shift_hint: String,
    pub last: bool,
}

#[derive(Debug, Clone)]
pub struct DayColumn {
    pub id: String,
    pub name: &'static str,
    pub abbrev: &'static str,
    pub date_label: String,
    pub classes: String,
    pub list_classes: String,
    pub last: bool,
    pub pages: Vec<Vec<EntryCard>>,
}

#[derive(Template)]
#[template(path = "calendar.html")]
struct CalendarTemplate<'a> {
    container_classes: String,
    zone_label: &'a str,
    show_header: bool,
    title: &'a str,
    compact: bool,
    justify: &'static str,
    columns: Vec<DayColumn>,
}

#[derive(Template)]
#[template(path = "entry.html")]
struct EntryTemplate<'a> {
    card: &'a EntryCard,
}

#[derive(Template)]
#[template(
    source = r#"<button class="anilist-calendar-settings-trigger" data-action="settings" title="{{ label }}">&#9881;</button>"#,
    ext = "html"
)]
struct SettingsTrigger<'a> {
    label: &'a str,
}

/// Week rotated to begin at the preferred start day.
pub fn ordered_days(start: StartDay, today: Weekday) -> Vec<Weekday> {
    let first = match start {
        StartDay::Today => today,
        StartDay::Day(d) => d,
    };
    let offset = day_index(first);
    (0..7).map(|i| WEEK[(offset + i) % 7]).collect()
}

/// Days to draw: the rotated week, minus empty days when asked.
/// Hiding everything falls back to today alone.
pub fn visible_days(schedule: &WeeklySchedule, prefs: &UserPreferences, today: Weekday) -> Vec<Weekday> {
    let days = ordered_days(prefs.start_day, today);
    if !prefs.hide_empty_days {
        return days;
    }
    let filled: Vec<_> = days
        .into_iter()
        .filter(|d| !schedule.day(*d).is_empty())
        .collect();
    if filled.is_empty() {
        vec![today]
    } else {
        filled
    }
}

/// `D:HH:MM` with a day or more left, `HH:MM` under a day, `Aired` once past.
pub fn countdown_label(airing_at: DateTime<FixedOffset>, now: DateTime<FixedOffset>) -> String {
    let remaining = airing_at.signed_duration_since(now);
    if remaining < Duration::zero() {
        return "Aired".into();
    }
    let minutes = remaining.num_minutes();
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    if days > 0 {
        format!("{days}:{hours:02}:{mins:02}")
    } else {
        format!("{hours:02}:{mins:02}")
    }
}

/// Time text for an entry under the current preferences.
pub fn time_label(entry: &AiringEntry, prefs: &UserPreferences, now: DateTime<FixedOffset>) -> String {
    match prefs.time_format {
        TimeFormat::Countdown => countdown_label(entry.airing_at, now),
        TimeFormat::Release => entry.airing_at.format("%H:%M").to_string(),
    }
}

/// Fresh `(id, label)` pairs for the countdown tick.
pub fn time_labels(
    schedule: &WeeklySchedule,
    prefs: &UserPreferences,
    now: DateTime<FixedOffset>,
) -> Vec<(String, String)> {
    schedule
        .entries()
        .map(|e| (e.id.clone(), time_label(e, prefs, now)))
        .collect()
}

fn container_classes(prefs: &UserPreferences, day_count: usize) -> String {
    let mut classes = vec![
        format!("{}-mode", prefs.layout_mode.as_key()),
        format!("title-{}", prefs.title_alignment.as_key()),
        format!("column-justify-{}", prefs.column_justify.as_key()),
        format!("days-count-{day_count}"),
    ];
    if prefs.layout_mode == LayoutMode::Standard && prefs.full_width_images {
        classes.push("full-width-images".into());
    }
    classes.join(" ")
}

fn entry_card(
    entry: &AiringEntry,
    prefs: &UserPreferences,
    now: DateTime<FixedOffset>,
    references: Option<&ReferenceCache>,
) -> EntryCard {
    let compact = prefs.layout_mode == LayoutMode::Compact;
    let gallery = prefs.layout_mode == LayoutMode::Extended;
    let hide_all = !prefs.show_episode_numbers && !prefs.show_time;

    let title_classes = if gallery {
        "anime-title text-center".to_string()
    } else if hide_all {
        format!("anime-title text-{} title-expanded", prefs.title_alignment.as_key())
    } else {
        format!("anime-title text-{}", prefs.title_alignment.as_key())
    };

    let cover = references
        .and_then(|r| r.cover_url(&entry.id))
        .unwrap_or(entry.cover_image.as_str())
        .to_string();
    let countdown_mode = prefs.time_format == TimeFormat::Countdown;

    EntryCard {
        id: entry.id.clone(),
        title: entry.clean_title.clone(),
        initial: entry
            .clean_title
            .chars()
            .next()
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_default(),
        cover,
        compact,
        gallery,
        title_classes,
        show_info: !gallery || !hide_all,
        info_hidden: hide_all,
        episode_label: if prefs.show_episode_numbers {
            entry.progress.display_label()
        } else {
            String::new()
        },
        behind: entry.progress.behind_count(),
        time_label: if prefs.show_time {
            time_label(entry, prefs, now)
        } else {
            String::new()
        },
        countdown_mode,
        target_ms: if countdown_mode && entry.airing_at >= now {
            entry.airing_at.timestamp_millis().to_string()
        } else {
            String::new()
        },
        shift_hint: if entry.day_shifted {
            format!("Originally {}", day_name(entry.original_day))
        } else {
            String::new()
        },
        last: false,
    }
}

fn paginate(mut cards: Vec<EntryCard>, page_size: u32) -> Vec<Vec<EntryCard>> {
    if let Some(last) = cards.last_mut() {
        last.last = true;
    }
    if cards.is_empty() {
        return Vec::new();
    }
    if page_size == 0 {
        return vec![cards];
    }
    let size = page_size as usize;
    let mut pages = Vec::with_capacity(cards.len().div_ceil(size));
    let mut rest = cards.as_slice();
    while !rest.is_empty() {
        let (page, tail) = rest.split_at(size.min(rest.len()));
        pages.push(page.to_vec());
        rest = tail;
    }
    pages
}

fn day_column(
    day: Weekday,
    index: usize,
    count: usize,
    schedule: &WeeklySchedule,
    prefs: &UserPreferences,
    ctx: &RenderContext<'_>,
) -> DayColumn {
    let today = ctx.now.weekday();
    let ahead = (day_index(day) + 7 - day_index(today)) % 7;
    let date = ctx.now.date_naive() + Duration::days(ahead as i64);

    let mut classes = vec!["anilist-calendar-day"];
    if day == today {
        classes.push("current-day");
    }
    if prefs.start_day == StartDay::Today && index == 0 {
        classes.push("today-column");
    }
    classes.push(match prefs.column_justify {
        ColumnJustify::Center => "force-center",
        ColumnJustify::Top => "force-top",
    });

    let mut list_classes = format!("day-anime-list justify-{}", prefs.column_justify.as_key());
    if prefs.layout_mode == LayoutMode::Compact {
        list_classes.push_str(" compact-mode-list");
    }

    let cards = schedule
        .day(day)
        .iter()
        .map(|e| entry_card(e, prefs, ctx.now, ctx.references))
        .collect();

    DayColumn {
        id: format!("calendar-day-{}", day_name(day).to_lowercase()),
        name: day_name(day),
        abbrev: day_abbrev(day),
        date_label: format!("{} {}", date.day(), MONTHS[date.month0() as usize]),
        classes: classes.join(" "),
        list_classes,
        last: index + 1 == count,
        pages: paginate(cards, prefs.max_cards_per_day),
    }
}

/// Render the weekly grid that replaces the host's Airing widget.
#[tracing::instrument(skip_all, fields(entries = schedule.len()))]
pub fn render_calendar(
    schedule: &WeeklySchedule,
    prefs: &UserPreferences,
    ctx: &RenderContext<'_>,
) -> Result<String, ShuukanError> {
    let days = visible_days(schedule, prefs, ctx.now.weekday());
    let columns = days
        .iter()
        .enumerate()
        .map(|(i, d)| day_column(*d, i, days.len(), schedule, prefs, ctx))
        .collect();
    let template = CalendarTemplate {
        container_classes: container_classes(prefs, days.len()),
        zone_label: &ctx.zone_label,
        show_header: ctx.show_header,
        title: ctx.title,
        compact: prefs.layout_mode == LayoutMode::Compact,
        justify: prefs.column_justify.as_key(),
        columns,
    };
    Ok(template.render()?)
}

/// Re-render a single card, e.g. after a confirmed progress update.
pub fn render_entry(
    entry: &AiringEntry,
    prefs: &UserPreferences,
    now: DateTime<FixedOffset>,
    references: Option<&ReferenceCache>,
) -> Result<String, ShuukanError> {
    let card = entry_card(entry, prefs, now, references);
    Ok(EntryTemplate { card: &card }.render()?)
}

/// Settings control placed next to the host header.
pub fn render_settings_trigger() -> Result<String, ShuukanError> {
    Ok(SettingsTrigger {
        label: "Calendar settings",
    }
    .render()?)
}
