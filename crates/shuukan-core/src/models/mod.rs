pub mod day;
pub mod entry;
pub mod progress;

pub use day::WEEK;
pub use entry::{AiringEntry, Countdown};
pub use progress::EpisodeProgress;
