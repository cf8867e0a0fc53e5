use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_TIMEOUT_SECS;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Progress state file shared by every thread.
    #[arg(long, global = true, default_value = "progress.json")]
    pub progress_file: String,

    /// Directory holding `cookies_<domain>.json` files exported from a browser session.
    #[arg(long, global = true, default_value = ".")]
    pub cookies_dir: String,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Override the browser User-Agent sent with every request.
    #[arg(long, global = true)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mirror a thread (or resume an interrupted mirror).
    Mirror(MirrorArgs),
    /// Re-mirror every page that has logged asset failures, across all threads.
    RetryFailed(OutputArgs),
    /// Look for new pages on one tracked thread, or on all of them.
    CheckUpdates(CheckUpdatesArgs),
    /// Rename `.php` image assets and fix gallery links in a mirrored thread directory.
    Reconcile(ReconcileArgs),
}

#[derive(Debug, Args)]
pub struct MirrorArgs {
    /// Thread URL (any page of the thread).
    pub url: String,

    /// Parent directory for thread directories.
    #[arg(long, default_value = ".")]
    pub output: String,

    /// First page to download (forces a refetch of the range).
    #[arg(long = "from")]
    pub from: Option<u32>,

    /// Last page to download (default: last page).
    #[arg(long)]
    pub to: Option<u32>,

    /// Keep the raw layout: skip reconciliation after mirroring.
    #[arg(long, conflicts_with = "reconcile")]
    pub legacy: bool,

    /// Reconcile after mirroring (the default).
    #[arg(long)]
    pub reconcile: bool,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Parent directory for thread directories.
    #[arg(long, default_value = ".")]
    pub output: String,
}

#[derive(Debug, Args)]
pub struct CheckUpdatesArgs {
    /// Thread URL to check (default: every tracked thread).
    pub url: Option<String>,

    /// Parent directory for thread directories.
    #[arg(long, default_value = ".")]
    pub output: String,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Thread directory to convert.
    #[arg(default_value = ".")]
    pub dir: String,

    /// Report what would change without modifying any file.
    #[arg(long)]
    pub dry_run: bool,
}
