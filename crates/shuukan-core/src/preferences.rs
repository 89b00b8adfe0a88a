//! User preferences and the flat key-value store they persist to.

use std::collections::BTreeMap;
#[cfg(feature = "fs-store")]
use std::path::PathBuf;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::ShuukanError;
use crate::models::WEEK;
use crate::time::{TargetZone, TIMEZONES};

/// Namespace every stored key lives under.
pub const KEY_PREFIX: &str = "anilist_calendar_";

const START_DAY: &str = "start_day";
const HIDE_EMPTY_DAYS: &str = "hide_empty_days";
const LAYOUT_MODE: &str = "layout_mode";
const TIME_FORMAT: &str = "time_format";
const SHOW_TIME: &str = "show_time";
const SHOW_EPISODE_NUMBERS: &str = "show_episode_numbers";
const TITLE_ALIGNMENT: &str = "title_alignment";
const COLUMN_JUSTIFY: &str = "column_justify";
const MAX_CARDS_PER_DAY: &str = "max_cards_per_day";
const FULL_WIDTH_IMAGES: &str = "full_width_images";
const TIMEZONE: &str = "timezone";

// Read only when the current key is absent.
const LEGACY_COMPACT_MODE: &str = "compact_mode";
const LEGACY_GRID_MODE: &str = "grid_mode";
const LEGACY_SHOW_COUNTDOWN: &str = "show_countdown";

const CURRENT_KEYS: &[&str] = &[
    START_DAY,
    HIDE_EMPTY_DAYS,
    LAYOUT_MODE,
    TIME_FORMAT,
    SHOW_TIME,
    SHOW_EPISODE_NUMBERS,
    TITLE_ALIGNMENT,
    COLUMN_JUSTIFY,
    MAX_CARDS_PER_DAY,
    FULL_WIDTH_IMAGES,
    TIMEZONE,
];
const LEGACY_KEYS: &[&str] = &[LEGACY_COMPACT_MODE, LEGACY_GRID_MODE, LEGACY_SHOW_COUNTDOWN];

pub fn storage_key(name: &str) -> String {
    format!("{KEY_PREFIX}{name}")
}

/// Every key `load` asks the store for, current and legacy.
pub fn all_storage_keys() -> Vec<String> {
    CURRENT_KEYS
        .iter()
        .chain(LEGACY_KEYS)
        .map(|k| storage_key(k))
        .collect()
}

/// A stored scalar. Numbers appear in values written by older versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl PrefValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.parse().ok(),
            Self::Number(_) => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(_) => None,
        }
    }
}

pub type PrefMap = BTreeMap<String, PrefValue>;

/// Key-value storage for preferences, e.g. browser extension storage.
pub trait PreferenceStore {
    /// Read the given keys. Missing keys are simply absent from the result.
    fn read(&self, keys: &[String]) -> Result<PrefMap, ShuukanError>;

    /// Write (insert or overwrite) the given keys.
    fn write(&mut self, values: PrefMap) -> Result<(), ShuukanError>;
}

/// In-memory store, used by the browser bridge and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: PrefMap,
}

impl MemoryStore {
    pub fn new(values: PrefMap) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &PrefMap {
        &self.values
    }
}

impl PreferenceStore for MemoryStore {
    fn read(&self, keys: &[String]) -> Result<PrefMap, ShuukanError> {
        Ok(keys
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn write(&mut self, values: PrefMap) -> Result<(), ShuukanError> {
        self.values.extend(values);
        Ok(())
    }
}

/// TOML-file store under the platform data directory.
#[cfg(feature = "fs-store")]
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

#[cfg(feature = "fs-store")]
impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default preferences path.
    pub fn open_default() -> Self {
        Self::new(crate::config::AppConfig::preferences_path())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_all(&self) -> Result<PrefMap, ShuukanError> {
        if !self.path.exists() {
            return Ok(PrefMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        toml::from_str(&content).map_err(|e| ShuukanError::Preferences(e.to_string()))
    }
}

#[cfg(feature = "fs-store")]
impl PreferenceStore for FileStore {
    fn read(&self, keys: &[String]) -> Result<PrefMap, ShuukanError> {
        let mut all = self.read_all()?;
        all.retain(|k, _| keys.contains(k));
        Ok(all)
    }

    fn write(&mut self, values: PrefMap) -> Result<(), ShuukanError> {
        let mut all = self.read_all()?;
        all.extend(values);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(&all).map_err(|e| ShuukanError::Preferences(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

// ── Preference record ───────────────────────────────────────────

/// First column of the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDay {
    Today,
    Day(Weekday),
}

impl StartDay {
    fn parse(s: &str) -> Option<Self> {
        if s == "today" {
            return Some(Self::Today);
        }
        let index: usize = s.trim().parse().ok()?;
        WEEK.get(index).copied().map(Self::Day)
    }

    pub fn as_key(&self) -> String {
        match self {
            Self::Today => "today".into(),
            Self::Day(d) => d.num_days_from_sunday().to_string(),
        }
    }
}

macro_rules! key_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $key:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_key(&self) -> &'static str {
                match self {
                    $(Self::$variant => $key),+
                }
            }

            pub fn from_key(s: &str) -> Option<Self> {
                match s {
                    $($key => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

key_enum!(
    /// Card density of the calendar grid.
    LayoutMode { Compact => "compact", Standard => "standard", Extended => "extended" }
);
key_enum!(
    /// Clock time in the target zone, or a live countdown.
    TimeFormat { Release => "release", Countdown => "countdown" }
);
key_enum!(TitleAlignment { Left => "left", Center => "center" });
key_enum!(ColumnJustify { Top => "top", Center => "center" });

/// The running session's configuration record.
#[derive(Debug, Clone, PartialEq)]
pub struct UserPreferences {
    pub start_day: StartDay,
    pub hide_empty_days: bool,
    pub layout_mode: LayoutMode,
    pub time_format: TimeFormat,
    pub show_time: bool,
    pub show_episode_numbers: bool,
    pub title_alignment: TitleAlignment,
    pub column_justify: ColumnJustify,
    /// Cards per page in a day column; 0 disables paging.
    pub max_cards_per_day: u32,
    pub full_width_images: bool,
    /// Key into the timezone table, or `auto`.
    pub timezone: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            start_day: StartDay::Day(Weekday::Mon),
            hide_empty_days: false,
            layout_mode: LayoutMode::Standard,
            time_format: TimeFormat::Countdown,
            show_time: true,
            show_episode_numbers: true,
            title_alignment: TitleAlignment::Center,
            column_justify: ColumnJustify::Top,
            max_cards_per_day: 0,
            full_width_images: false,
            timezone: "auto".into(),
        }
    }
}

impl UserPreferences {
    pub fn target_zone(&self) -> TargetZone {
        TargetZone::from_key(&self.timezone)
    }

    /// Build from stored values, keeping defaults for absent or malformed keys.
    pub fn from_values(values: &PrefMap) -> Self {
        let mut prefs = Self::default();
        let get = |name: &str| values.get(&storage_key(name));
        let text = |name: &str| get(name).and_then(PrefValue::as_text);
        let flag = |name: &str| get(name).and_then(PrefValue::as_bool);

        if let Some(v) = text(START_DAY).and_then(|s| StartDay::parse(&s)) {
            prefs.start_day = v;
        }
        if let Some(v) = flag(HIDE_EMPTY_DAYS) {
            prefs.hide_empty_days = v;
        }
        match text(LAYOUT_MODE) {
            // `grid` is what older versions called the extended layout.
            Some(s) if s == "grid" => prefs.layout_mode = LayoutMode::Extended,
            Some(s) => {
                if let Some(v) = LayoutMode::from_key(&s) {
                    prefs.layout_mode = v;
                }
            }
            None => {
                if flag(LEGACY_COMPACT_MODE) == Some(true) {
                    prefs.layout_mode = LayoutMode::Compact;
                } else if flag(LEGACY_GRID_MODE) == Some(true) {
                    prefs.layout_mode = LayoutMode::Extended;
                }
            }
        }
        match text(TIME_FORMAT) {
            Some(s) => {
                if let Some(v) = TimeFormat::from_key(&s) {
                    prefs.time_format = v;
                }
            }
            None => match flag(LEGACY_SHOW_COUNTDOWN) {
                Some(true) => prefs.time_format = TimeFormat::Countdown,
                Some(false) => prefs.time_format = TimeFormat::Release,
                None => {}
            },
        }
        if let Some(v) = flag(SHOW_TIME) {
            prefs.show_time = v;
        }
        if let Some(v) = flag(SHOW_EPISODE_NUMBERS) {
            prefs.show_episode_numbers = v;
        }
        if let Some(v) = text(TITLE_ALIGNMENT).and_then(|s| TitleAlignment::from_key(&s)) {
            prefs.title_alignment = v;
        }
        if let Some(v) = text(COLUMN_JUSTIFY).and_then(|s| ColumnJustify::from_key(&s)) {
            prefs.column_justify = v;
        }
        if let Some(v) = text(MAX_CARDS_PER_DAY).and_then(|s| s.trim().parse::<u32>().ok()) {
            prefs.max_cards_per_day = v;
        }
        if let Some(v) = flag(FULL_WIDTH_IMAGES) {
            prefs.full_width_images = v;
        }
        if let Some(v) = text(TIMEZONE).filter(|s| TIMEZONES.contains_key(s.as_str())) {
            prefs.timezone = v;
        }
        prefs
    }

    /// Current-name keys only; legacy keys are never written.
    pub fn to_values(&self) -> PrefMap {
        let text = |s: &str| PrefValue::Text(s.to_string());
        [
            (START_DAY, PrefValue::Text(self.start_day.as_key())),
            (HIDE_EMPTY_DAYS, PrefValue::Bool(self.hide_empty_days)),
            (LAYOUT_MODE, text(self.layout_mode.as_key())),
            (TIME_FORMAT, text(self.time_format.as_key())),
            (SHOW_TIME, PrefValue::Bool(self.show_time)),
            (SHOW_EPISODE_NUMBERS, PrefValue::Bool(self.show_episode_numbers)),
            (TITLE_ALIGNMENT, text(self.title_alignment.as_key())),
            (COLUMN_JUSTIFY, text(self.column_justify.as_key())),
            (MAX_CARDS_PER_DAY, PrefValue::Text(self.max_cards_per_day.to_string())),
            (FULL_WIDTH_IMAGES, PrefValue::Bool(self.full_width_images)),
            (TIMEZONE, text(&self.timezone)),
        ]
        .into_iter()
        .map(|(k, v)| (storage_key(k), v))
        .collect()
    }

    /// Set one preference by its short key name, e.g. `layout_mode`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ShuukanError> {
        if !CURRENT_KEYS.contains(&name) {
            return Err(ShuukanError::Preferences(format!("unknown preference `{name}`")));
        }
        let mut values = self.to_values();
        let parsed = match value {
            "true" => PrefValue::Bool(true),
            "false" => PrefValue::Bool(false),
            other => PrefValue::Text(other.to_string()),
        };
        values.insert(storage_key(name), parsed);
        let updated = Self::from_values(&values);
        if updated.to_values().get(&storage_key(name)) != values.get(&storage_key(name)) {
            return Err(ShuukanError::Preferences(format!(
                "invalid value `{value}` for `{name}`"
            )));
        }
        *self = updated;
        Ok(())
    }
}

/// Load preferences; any storage failure falls back to the defaults.
#[tracing::instrument(skip(store))]
pub fn load(store: &dyn PreferenceStore) -> UserPreferences {
    match store.read(&all_storage_keys()) {
        Ok(values) => UserPreferences::from_values(&values),
        Err(e) => {
            tracing::warn!(error = %e, "Preference load failed, using defaults");
            UserPreferences::default()
        }
    }
}

pub fn save(store: &mut dyn PreferenceStore, prefs: &UserPreferences) -> Result<(), ShuukanError> {
    store.write(prefs.to_values())?;
    tracing::debug!("Saved preferences");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl PreferenceStore for BrokenStore {
        fn read(&self, _keys: &[String]) -> Result<PrefMap, ShuukanError> {
            Err(ShuukanError::Preferences("storage unavailable".into()))
        }

        fn write(&mut self, _values: PrefMap) -> Result<(), ShuukanError> {
            Err(ShuukanError::Preferences("storage unavailable".into()))
        }
    }

    fn custom() -> UserPreferences {
        UserPreferences {
            start_day: StartDay::Today,
            hide_empty_days: true,
            layout_mode: LayoutMode::Extended,
            time_format: TimeFormat::Release,
            show_time: false,
            show_episode_numbers: true,
            title_alignment: TitleAlignment::Left,
            column_justify: ColumnJustify::Center,
            max_cards_per_day: 4,
            full_width_images: true,
            timezone: "ist".into(),
        }
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let mut store = MemoryStore::default();
        save(&mut store, &custom()).unwrap();
        assert_eq!(load(&store), custom());
    }

    #[cfg(feature = "fs-store")]
    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("prefs.toml"));
        assert_eq!(load(&store), UserPreferences::default());
        save(&mut store, &custom()).unwrap();

        let fresh = FileStore::new(dir.path().join("prefs.toml"));
        assert_eq!(load(&fresh), custom());
    }

    #[test]
    fn test_legacy_keys_used_when_current_absent() {
        let store = MemoryStore::new(PrefMap::from([
            (storage_key("compact_mode"), PrefValue::Bool(true)),
            (storage_key("show_countdown"), PrefValue::Bool(false)),
        ]));
        let prefs = load(&store);
        assert_eq!(prefs.layout_mode, LayoutMode::Compact);
        assert_eq!(prefs.time_format, TimeFormat::Release);
    }

    #[test]
    fn test_current_keys_beat_legacy() {
        let store = MemoryStore::new(PrefMap::from([
            (storage_key("grid_mode"), PrefValue::Bool(true)),
            (storage_key("layout_mode"), PrefValue::Text("compact".into())),
        ]));
        assert_eq!(load(&store).layout_mode, LayoutMode::Compact);
    }

    #[test]
    fn test_save_never_writes_legacy_keys() {
        let mut store = MemoryStore::default();
        save(&mut store, &UserPreferences::default()).unwrap();
        for legacy in LEGACY_KEYS {
            assert!(!store.values().contains_key(&storage_key(legacy)));
        }
        assert_eq!(store.values().len(), CURRENT_KEYS.len());
    }

    #[test]
    fn test_numeric_values_from_older_versions() {
        let store = MemoryStore::new(PrefMap::from([
            (storage_key("start_day"), PrefValue::Number(3)),
            (storage_key("max_cards_per_day"), PrefValue::Number(5)),
        ]));
        let prefs = load(&store);
        assert_eq!(prefs.start_day, StartDay::Day(Weekday::Wed));
        assert_eq!(prefs.max_cards_per_day, 5);
    }

    #[test]
    fn test_broken_store_gives_defaults() {
        assert_eq!(load(&BrokenStore), UserPreferences::default());
        assert!(save(&mut BrokenStore, &custom()).is_err());
    }

    #[test]
    fn test_set_validates_values() {
        let mut prefs = UserPreferences::default();
        prefs.set("layout_mode", "compact").unwrap();
        assert_eq!(prefs.layout_mode, LayoutMode::Compact);
        prefs.set("hide_empty_days", "true").unwrap();
        assert!(prefs.hide_empty_days);
        assert!(prefs.set("layout_mode", "sideways").is_err());
        assert!(prefs.set("timezone", "mars").is_err());
        assert!(prefs.set("favourite_colour", "red").is_err());
        assert_eq!(prefs.layout_mode, LayoutMode::Compact);
    }
}
