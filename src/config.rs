//! Typed configuration from environment variables.
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `STRATA_ADDR` | [`Config::addr`] | `0.0.0.0:3000` |
//! | `STRATA_LOG` | [`Config::log_filter`] | `info` |
//! | `STRATA_COMPRESS` | [`CompressConfig::enabled`] | `true` |
//! | `STRATA_COMPRESS_MIN_SIZE` | [`CompressConfig::min_size`] | `1024` |
//! | `STRATA_COMPRESS_ENCODINGS` | [`CompressConfig::encodings`] | `br,zstd,gzip,deflate` |
//! | `STRATA_ACCESS_LOG` | [`Config::access_log`] | `true` |
//! | `STRATA_SECURE_HEADERS` | [`Config::security_headers`] | `true` |
//!
//! Every field has its own small parser; an unset or empty variable keeps the
//! default, anything unparseable is an [`Error::Config`].

use std::net::SocketAddr;
use std::str::FromStr;

use crate::codec;
use crate::error::Error;
use crate::middleware::{Compress, DEFAULT_MIN_SIZE};

/// Process configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Listen address (used by the application, not by the pipeline).
    pub addr: SocketAddr,
    /// `tracing` filter directive passed to [`logging::init`](crate::logging::init).
    pub log_filter: String,
    pub compress: CompressConfig,
    pub access_log: bool,
    pub security_headers: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressConfig {
    pub enabled: bool,
    pub min_size: u64,
    /// Content-coding tokens in preference order.
    pub encodings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_filter: "info".to_owned(),
            compress: CompressConfig::default(),
            access_log: true,
            security_headers: true,
        }
    }
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: DEFAULT_MIN_SIZE,
            encodings: codec::defaults().iter().map(|c| c.token().to_owned()).collect(),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            addr: match get("STRATA_ADDR") {
                Some(value) => parse("STRATA_ADDR", &value)?,
                None => defaults.addr,
            },
            log_filter: get("STRATA_LOG").unwrap_or(defaults.log_filter),
            compress: CompressConfig {
                enabled: match get("STRATA_COMPRESS") {
                    Some(value) => parse_bool("STRATA_COMPRESS", &value)?,
                    None => defaults.compress.enabled,
                },
                min_size: match get("STRATA_COMPRESS_MIN_SIZE") {
                    Some(value) => parse("STRATA_COMPRESS_MIN_SIZE", &value)?,
                    None => defaults.compress.min_size,
                },
                encodings: match get("STRATA_COMPRESS_ENCODINGS") {
                    Some(value) => parse_encodings("STRATA_COMPRESS_ENCODINGS", &value)?,
                    None => defaults.compress.encodings,
                },
            },
            access_log: match get("STRATA_ACCESS_LOG") {
                Some(value) => parse_bool("STRATA_ACCESS_LOG", &value)?,
                None => defaults.access_log,
            },
            security_headers: match get("STRATA_SECURE_HEADERS") {
                Some(value) => parse_bool("STRATA_SECURE_HEADERS", &value)?,
                None => defaults.security_headers,
            },
        })
    }

    /// The compression middleware this configuration describes, or `None`
    /// when compression is disabled.
    pub fn compress(&self) -> Option<Compress> {
        if !self.compress.enabled {
            return None;
        }

        // Tokens were validated when the config was read.
        let codecs = self.compress.encodings.iter().filter_map(|token| codec::by_token(token));

        Some(Compress::new().codecs(codecs).min_size(self.compress.min_size))
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| Error::Config {
        key,
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config {
            key,
            value: value.to_owned(),
            reason: "expected true/false, yes/no, on/off or 1/0".to_owned(),
        }),
    }
}

fn parse_encodings(key: &'static str, value: &str) -> Result<Vec<String>, Error> {
    let tokens: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();

    if let Some(unknown) = tokens.iter().find(|token| codec::by_token(token).is_none()) {
        return Err(Error::Config {
            key,
            value: value.to_owned(),
            reason: format!("unsupported encoding `{unknown}`"),
        });
    }

    Ok(tokens)
}
