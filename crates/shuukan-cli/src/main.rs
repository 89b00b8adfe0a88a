mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Weekly airing calendar from AniList page snapshots", long_about = None)]
struct Cli {
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SnapshotArgs {
    /// Saved HTML of an AniList page.
    file: PathBuf,
    /// Timezone key (jst, pst, est, ..., auto). Defaults to the stored preference.
    #[arg(long)]
    tz: Option<String>,
    /// Reference time as RFC 3339. Defaults to the current time.
    #[arg(long)]
    now: Option<String>,
    /// Skip the section search and scrape every card on the page.
    #[arg(long)]
    aggressive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the weekly schedule found in a snapshot
    Scrape {
        #[command(flatten)]
        snapshot: SnapshotArgs,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Render calendar markup for a snapshot
    Render {
        #[command(flatten)]
        snapshot: SnapshotArgs,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Inspect or edit stored preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
    /// Print the config file location and effective values
    Config,
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Show current preferences
    Show,
    /// Set one preference, e.g. `layout_mode compact`
    Set { key: String, value: String },
    /// Restore defaults
    Reset,
}

fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref());

    let result = match cli.command {
        Commands::Scrape { snapshot, json } => commands::scrape(&snapshot, json),
        Commands::Render { snapshot, out } => commands::render(&snapshot, out.as_deref()),
        Commands::Prefs { command } => match command {
            PrefsCommands::Show => commands::prefs_show(),
            PrefsCommands::Set { key, value } => commands::prefs_set(&key, &value),
            PrefsCommands::Reset => commands::prefs_reset(),
        },
        Commands::Config => commands::config(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shuukan=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let Some(path) = log_file else {
        builder.init();
        return None;
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(std::path::Path::new("."));
    let name = path.file_name().unwrap_or(std::ffi::OsStr::new("shuukan.log"));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    builder.with_ansi(false).with_writer(writer).init();
    Some(guard)
}
