use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, FixedOffset, Local};
use scraper::Html;
use url::Url;

use shuukan_core::config::AppConfig;
use shuukan_core::error::ShuukanError;
use shuukan_core::models::day::day_name;
use shuukan_core::pipeline::{self, PageScrape};
use shuukan_core::preferences::{self, FileStore, PrefValue, UserPreferences};
use shuukan_core::render;
use shuukan_core::schedule::ReferenceCache;
use shuukan_core::scrape::ScrapeContext;
use shuukan_core::time;

use crate::SnapshotArgs;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ShuukanError),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid --now value `{0}`, expected RFC 3339")]
    Now(String),
    #[error("no airing entries found in {0}")]
    Empty(PathBuf),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Toml(#[from] toml::ser::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct Snapshot {
    config: AppConfig,
    prefs: UserPreferences,
    now: DateTime<FixedOffset>,
    page: PageScrape,
}

fn load_snapshot(args: &SnapshotArgs) -> Result<Snapshot, CliError> {
    let config = AppConfig::load()?;
    let mut prefs = preferences::load(&FileStore::open_default());
    if let Some(tz) = &args.tz {
        prefs.timezone = tz.clone();
    }
    let now = match &args.now {
        Some(raw) => DateTime::parse_from_rfc3339(raw).map_err(|_| CliError::Now(raw.clone()))?,
        None => Local::now().fixed_offset(),
    };

    let source = std::fs::read_to_string(&args.file).map_err(|source| CliError::Read {
        path: args.file.clone(),
        source,
    })?;
    let html = Html::parse_document(&source);
    let base_url = Url::parse(&config.site.base_url).ok();
    let ctx = ScrapeContext {
        now,
        zone: prefs.target_zone(),
        base_url: base_url.as_ref(),
        placeholder_cover: &config.site.placeholder_cover,
    };

    let page = if args.aggressive {
        pipeline::scrape_page_aggressive(&html, &ctx)
    } else {
        pipeline::scrape_page(&html, &config.site.section_title, &ctx)
    };
    let page = page.ok_or_else(|| CliError::Empty(args.file.clone()))?;
    for (index, reason) in &page.skipped {
        tracing::warn!(index, reason = %reason, "Card skipped");
    }

    Ok(Snapshot {
        config,
        prefs,
        now,
        page,
    })
}

pub fn scrape(args: &SnapshotArgs, json: bool) -> Result<(), CliError> {
    let snap = load_snapshot(args)?;
    let schedule = &snap.page.schedule;

    if json {
        println!("{}", serde_json::to_string_pretty(schedule)?);
        return Ok(());
    }

    let offset = snap.prefs.target_zone().offset(*snap.now.offset());
    match snap.page.tier {
        Some(tier) => println!(
            "Weekly schedule ({}), {} entries, found by {tier}",
            time::zone_label(offset),
            schedule.len()
        ),
        None => println!(
            "Weekly schedule ({}), {} entries, aggressive scan",
            time::zone_label(offset),
            schedule.len()
        ),
    }

    for day in render::ordered_days(snap.prefs.start_day, snap.now.weekday()) {
        let entries = schedule.day(day);
        println!("{}", day_name(day));
        if entries.is_empty() {
            println!("  (none)");
            continue;
        }
        for entry in entries {
            let mut line = format!(
                "  {}  {:<40}  Ep {:<10}  {}",
                entry.airing_at.format("%H:%M"),
                entry.clean_title,
                entry.progress.formatted(),
                render::countdown_label(entry.airing_at, snap.now),
            );
            if entry.progress.is_behind() {
                line.push_str(&format!("  ({} behind)", entry.progress.behind_count()));
            }
            if entry.day_shifted {
                line.push_str(&format!("  (originally {})", day_name(entry.original_day)));
            }
            println!("{line}");
        }
    }
    Ok(())
}

pub fn render(args: &SnapshotArgs, out: Option<&Path>) -> Result<(), CliError> {
    let snap = load_snapshot(args)?;
    let mut references = ReferenceCache::default();
    references.merge(snap.page.references.iter().cloned());
    let mount = pipeline::build_mount(
        &snap.page.plan,
        &snap.page.schedule,
        &snap.prefs,
        snap.now,
        &snap.config.site.replacement_title,
        &references,
    )?;

    match out {
        Some(path) => {
            std::fs::write(path, &mount.calendar)?;
            tracing::info!(path = %path.display(), "Calendar written");
        }
        None => println!("{}", mount.calendar),
    }
    Ok(())
}

pub fn prefs_show() -> Result<(), CliError> {
    let store = FileStore::open_default();
    let prefs = preferences::load(&store);
    println!("# {}", store.path().display());
    for (key, value) in prefs.to_values() {
        let shown = match value {
            PrefValue::Bool(b) => b.to_string(),
            PrefValue::Number(n) => n.to_string(),
            PrefValue::Text(s) => s,
        };
        println!("{key} = {shown}");
    }
    Ok(())
}

pub fn prefs_set(key: &str, value: &str) -> Result<(), CliError> {
    let mut store = FileStore::open_default();
    let mut prefs = preferences::load(&store);
    prefs.set(key, value)?;
    preferences::save(&mut store, &prefs)?;
    println!("{key} = {value}");
    Ok(())
}

pub fn prefs_reset() -> Result<(), CliError> {
    let mut store = FileStore::open_default();
    preferences::save(&mut store, &UserPreferences::default())?;
    println!("Preferences reset to defaults");
    Ok(())
}

pub fn config() -> Result<(), CliError> {
    let config = AppConfig::load()?;
    println!("# {}", AppConfig::config_path().display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
