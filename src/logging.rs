use anyhow::Context as _;

/// Used when `RUST_LOG` is unset. Keeps HTTP client chatter out of the run log.
const DEFAULT_DIRECTIVES: &str = "warn,threadmirror=info";

/// Installs the stderr subscriber. Stdout stays reserved for run summaries.
pub fn init() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_DIRECTIVES))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("install log subscriber: {err}"))?;

    Ok(())
}
