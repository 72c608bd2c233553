use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize structured logging on stderr.
///
/// `SEMINAR_GRADING_LOG` (or `RUST_LOG`) overrides the level chosen on the
/// command line.
pub fn init_tracing(verbose: bool, log_level: Option<&str>, log_json: bool) -> anyhow::Result<()> {
    let level = match (verbose, log_level) {
        (_, Some(level)) => level,
        (true, None) => "debug",
        (false, None) => "info",
    };

    let filter = EnvFilter::try_from_env("SEMINAR_GRADING_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            EnvFilter::new(if level.contains('=') {
                level.to_string()
            } else {
                format!("seminar_grading={level}")
            })
        });

    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}
