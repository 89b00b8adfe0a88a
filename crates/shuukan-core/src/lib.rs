pub mod calendar;
pub mod config;
pub mod debug_log;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod locate;
pub mod models;
pub mod pipeline;
pub mod preferences;
pub mod render;
pub mod schedule;
pub mod scrape;
pub mod time;
