//! Environment configuration.
//!
//! The dispatcher is configured through the environment only; there are no
//! command-line flags and no on-disk state.

use std::env;
use std::time::Duration;

const DEFAULT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Config {
    /// libpq-style connection string, passed to the client verbatim.
    pub pg_uri: String,

    /// Size of the worker pool.
    pub workers: usize,

    /// Capacity of the work queue. Defaults to the worker count.
    pub queue_depth: usize,

    /// How long shutdown waits for tasks before aborting them.
    pub grace: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not defined")]
    Missing(&'static str),

    #[error("environment variable {name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pg_uri = lookup("PG_URI").ok_or(ConfigError::Missing("PG_URI"))?;

        let workers = lookup("WORKERS_NUM").ok_or(ConfigError::Missing("WORKERS_NUM"))?;
        let workers = parse_positive("WORKERS_NUM", workers)?;

        let queue_depth = match lookup("QUEUE_DEPTH") {
            Some(value) => parse_positive("QUEUE_DEPTH", value)?,
            None => workers,
        };

        let grace = match lookup("SHUTDOWN_GRACE_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    return Err(ConfigError::Invalid {
                        name: "SHUTDOWN_GRACE_SECS",
                        expected: "a non-negative integer",
                        value,
                    })
                }
            },
            None => DEFAULT_GRACE,
        };

        Ok(Config {
            pg_uri,
            workers,
            queue_depth,
            grace,
        })
    }
}

fn parse_positive(name: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "an integer >= 1",
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn missing_uri_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("WORKERS_NUM", "4")])).unwrap_err();
        assert!(err.to_string().contains("PG_URI"));
    }

    #[test]
    fn missing_worker_count_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("PG_URI", "postgres://localhost")])).unwrap_err();
        assert!(err.to_string().contains("WORKERS_NUM"));
    }

    #[test]
    fn rejects_non_integer_worker_count() {
        let err = Config::from_lookup(lookup(&[
            ("PG_URI", "postgres://localhost"),
            ("WORKERS_NUM", "four"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "WORKERS_NUM",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = Config::from_lookup(lookup(&[
            ("PG_URI", "postgres://localhost"),
            ("WORKERS_NUM", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn queue_depth_defaults_to_worker_count() {
        let config = Config::from_lookup(lookup(&[
            ("PG_URI", "postgres://localhost"),
            ("WORKERS_NUM", "3"),
        ]))
        .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_depth, 3);
        assert_eq!(config.grace, DEFAULT_GRACE);
    }

    #[test]
    fn queue_depth_and_grace_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PG_URI", "postgres://localhost"),
            ("WORKERS_NUM", "2"),
            ("QUEUE_DEPTH", "16"),
            ("SHUTDOWN_GRACE_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.queue_depth, 16);
        assert_eq!(config.grace, Duration::from_secs(3));
    }
}
