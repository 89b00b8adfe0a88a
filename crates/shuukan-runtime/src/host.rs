//! The seam between the session driver and the page it decorates.

use std::future::Future;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use shuukan_core::lifecycle::MutationHint;
use shuukan_core::pipeline::Mount;
use shuukan_core::preferences::UserPreferences;

use crate::HostError;

/// Everything the page can tell the session.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// The document finished loading.
    Ready,
    /// Nodes were added. `calendar_present` is false once our mount is gone.
    Mutation {
        hints: Vec<MutationHint>,
        calendar_present: bool,
    },
    Navigated {
        url: String,
    },
    /// The user pressed a card's "+1 episode" control.
    ProgressRequested {
        id: String,
    },
    /// The settings UI saved a new preference record.
    PreferencesSaved(UserPreferences),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Loading,
    Success,
    Error,
}

/// A transient message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn loading(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Loading,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// The page the calendar lives in.
///
/// Implementations run on the UI thread; nothing here needs to be `Send`.
pub trait HostPage {
    fn current_url(&self) -> String;

    /// Wall clock with the page's local UTC offset.
    fn now(&self) -> DateTime<FixedOffset>;

    /// Serialized markup of the whole document.
    fn snapshot(&self) -> Result<String, HostError>;

    /// Swap the host widget for the calendar as described by `mount.plan`.
    fn mount(&mut self, mount: &Mount) -> Result<(), HostError>;

    /// Replace the already mounted calendar's markup.
    fn replace_calendar(&mut self, markup: &str) -> Result<(), HostError>;

    /// Replace one entry card in the mounted calendar.
    fn patch_entry(&mut self, id: &str, markup: &str) -> Result<(), HostError>;

    /// Update time labels in place, as `(entry id, label)` pairs.
    fn refresh_countdowns(&mut self, labels: &[(String, String)]);

    fn notify(&mut self, notice: Notice);

    /// Activate the site's own progress control at `control` and wait for the
    /// site to confirm the update.
    fn trigger_progress(&mut self, control: &str) -> impl Future<Output = Result<(), HostError>>;
}
