//! bibtidy.
//!
//! bibtidy normalizes bibliographic reference databases. It runs a
//! configured sequence of filters over a bibliography file, looking up
//! missing metadata on arXiv, doi.org and INSPIRE-HEP through a
//! self-validating cache that persists across runs.

use anyhow::Context;
use bibtidy_service::logging;
use bibtidy_service::pipeline::Pipeline;

use settings::Settings;

mod settings;

fn main() {
    match execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

fn execute() -> anyhow::Result<()> {
    let settings = Settings::get()?;

    // SAFETY: We are in a single-threaded context here, no other thread can
    // concurrently access the environment.
    unsafe { logging::init_logging(&settings.config.logging) };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let summary = runtime
        .block_on(Pipeline::new(settings.config, settings.bibliography).run())
        .context("normalization failed")?;

    tracing::info!(
        filters = summary.filters_run,
        entries = summary.entries,
        "bibliography normalized"
    );
    Ok(())
}
