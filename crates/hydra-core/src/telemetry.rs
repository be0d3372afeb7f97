//! Tracing setup shared by the Hydra binaries.
//!
//! Call [`init_tracing`] once at startup. The global subscriber can only be
//! installed once per process; later calls are no-ops, so library tests and
//! embedded use stay safe.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence for filtering; `level` is the floor applied
/// when it is unset. With `json` set, log lines come out as newline-delimited
/// JSON for aggregation pipelines.
pub fn init_tracing(json: bool, level: Level) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::new(level.as_str()),
    };

    let format = fmt::layer().with_target(false);
    let format = if json {
        format.json().boxed()
    } else {
        format.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init()
        .ok();
}
