//! Tracing subscriber set-up.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::Error;

/// Installs the global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `filter` is used, e.g. the
/// `STRATA_LOG` value from [`Config`](crate::Config). Fails if the filter
/// does not parse or a global subscriber is already installed.
pub fn init(filter: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter).map_err(|e| Error::Logging(e.to_string()))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
