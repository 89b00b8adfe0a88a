mod host;
mod session;

use std::time::Duration;

use shuukan_core::calendar::ProgressError;
use shuukan_core::error::ShuukanError;

pub use host::{HostPage, Notice, NoticeKind, PageEvent};
pub use session::Session;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("host rejected the action: {0}")]
    Rejected(String),
    #[error("page unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error(transparent)]
    Core(#[from] ShuukanError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error("progress update timed out after {0:?}")]
    Timeout(Duration),
}
