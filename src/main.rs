use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use threadmirror::cli::{Command, MirrorArgs};
use threadmirror::config::MirrorConfig;
use threadmirror::mirror::{self, MirrorRequest, ThreadOutcome, VersionFlag};
use threadmirror::progress::ProgressStore;
use threadmirror::reconcile::{self, ReconcileOptions};
use threadmirror::schedule::Mode;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    threadmirror::logging::init().context("init logging")?;

    let cli = threadmirror::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");
    let global = &cli.global;

    match &cli.command {
        Command::Mirror(args) => {
            let config = MirrorConfig::from_args(global, &args.output);
            let mut progress = ProgressStore::open_file(&config.progress_file)?;
            let request = mirror_request(args);
            let outcome = tokio::task::block_in_place(|| {
                mirror::run_thread(&config, &mut progress, &request)
            })
            .context("mirror")?;
            report_outcome(&outcome);
        }
        Command::RetryFailed(args) => {
            let config = MirrorConfig::from_args(global, &args.output);
            let mut progress = ProgressStore::open_file(&config.progress_file)?;
            let outcomes =
                tokio::task::block_in_place(|| mirror::retry_failed(&config, &mut progress))
                    .context("retry failed")?;
            outcomes.iter().for_each(report_outcome);
        }
        Command::CheckUpdates(args) => {
            let config = MirrorConfig::from_args(global, &args.output);
            let mut progress = ProgressStore::open_file(&config.progress_file)?;
            let outcomes = tokio::task::block_in_place(|| {
                mirror::check_updates(&config, &mut progress, args.url.as_deref())
            })
            .context("check updates")?;
            outcomes.iter().for_each(report_outcome);
        }
        Command::Reconcile(args) => {
            let dir = PathBuf::from(&args.dir);
            let options = ReconcileOptions {
                dry_run: args.dry_run,
            };
            let report = tokio::task::block_in_place(|| reconcile::reconcile(&dir, options))
                .context("reconcile")?;
            let prefix = if report.dry_run { "would rename" } else { "renamed" };
            for (old, new) in &report.renamed {
                println!("{prefix} {old} -> {new}");
            }
            println!(
                "{} file(s) renamed, {} document(s) kept, {} file(s) updated, {} gallery link(s) fixed",
                report.renamed.len(),
                report.documents.len(),
                report.updated_files.len(),
                report.gallery_links_fixed
            );
        }
    }

    Ok(())
}

fn mirror_request(args: &MirrorArgs) -> MirrorRequest {
    let mode = if args.from.is_some() || args.to.is_some() {
        Mode::Range {
            from: args.from,
            to: args.to,
        }
    } else {
        Mode::Resume
    };
    let version = if args.legacy {
        VersionFlag::Legacy
    } else if args.reconcile {
        VersionFlag::Reconcile
    } else {
        VersionFlag::Default
    };
    MirrorRequest {
        version,
        ..MirrorRequest::new(&args.url, mode)
    }
}

fn report_outcome(outcome: &ThreadOutcome) {
    if outcome.selected.is_empty() {
        println!("{}: nothing to do ({} page(s))", outcome.thread_url, outcome.total_pages);
        return;
    }
    println!(
        "{}: {} page(s) saved, {} skipped, {} failed asset(s) outstanding",
        outcome.thread_url,
        outcome.summary.processed.len(),
        outcome.summary.skipped.len(),
        outcome.summary.outstanding_failures
    );
    println!("{}", outcome.out_dir.join("index.html").display());
}
