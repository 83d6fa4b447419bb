//! Console logging for the batch runner.

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{AlphaBatchError, Result};

/// HTTP internals that would drown the batch progress at debug level.
const QUIET_TARGETS: &[&str] = &["reqwest=warn", "hyper=warn", "h2=warn", "rustls=warn"];

fn directive(raw: &str) -> Result<Directive> {
    raw.parse()
        .map_err(|e| AlphaBatchError::config_error(format!("invalid log directive {}: {}", raw, e)))
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let mut filter = EnvFilter::new(level.to_string());
    for target in QUIET_TARGETS {
        filter = filter.add_directive(directive(target)?);
    }
    Ok(filter)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(verbose)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| AlphaBatchError::config_error(format!("logging already initialised: {}", e)))?;

    tracing::debug!("Logging initialised (verbose={})", verbose);
    Ok(())
}
