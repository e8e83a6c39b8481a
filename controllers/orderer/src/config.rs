//! Process configuration, read from the environment at start-up.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ControllerError;

const DEFAULT_WORKER_COUNT: usize = 3;
const DEFAULT_REQUEUE_MAX_SECONDS: u64 = 60;
const DEFAULT_PROBE_PORT: u16 = 8080;

/// Controller settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Directory of template overrides; `None` uses the built-in templates
    pub template_dir: Option<PathBuf>,
    /// Number of concurrent reconciliation workers
    pub workers: usize,
    /// Cap on the requeue delay
    pub requeue_max_seconds: u64,
    /// Port of the health and metrics server
    pub probe_port: u16,
}

impl ControllerConfig {
    /// Reads `WATCH_NAMESPACE`, `TEMPLATE_DIR`, `WORKER_COUNT`,
    /// `REQUEUE_MAX_SECONDS` and `PROBE_PORT`
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let workers = parse_or(&non_empty, "WORKER_COUNT", DEFAULT_WORKER_COUNT)?;
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }
        let requeue_max_seconds = parse_or(&non_empty, "REQUEUE_MAX_SECONDS", DEFAULT_REQUEUE_MAX_SECONDS)?;
        if requeue_max_seconds == 0 {
            return Err(ControllerError::InvalidConfig(
                "REQUEUE_MAX_SECONDS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            template_dir: non_empty("TEMPLATE_DIR").map(PathBuf::from),
            workers,
            requeue_max_seconds,
            probe_port: parse_or(&non_empty, "PROBE_PORT", DEFAULT_PROBE_PORT)?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ControllerError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{name} must be a number, got {value:?}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(
            config,
            ControllerConfig {
                namespace: None,
                template_dir: None,
                workers: 3,
                requeue_max_seconds: 60,
                probe_port: 8080,
            }
        );
    }

    #[test]
    fn test_values_are_read() {
        let config = config_from(&[
            ("WATCH_NAMESPACE", "fabric"),
            ("TEMPLATE_DIR", "/etc/fabric-operator/templates"),
            ("WORKER_COUNT", "8"),
            ("REQUEUE_MAX_SECONDS", " 120 "),
            ("PROBE_PORT", "9090"),
        ])
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("fabric"));
        assert_eq!(
            config.template_dir,
            Some(PathBuf::from("/etc/fabric-operator/templates"))
        );
        assert_eq!(config.workers, 8);
        assert_eq!(config.requeue_max_seconds, 120);
        assert_eq!(config.probe_port, 9090);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = config_from(&[("WATCH_NAMESPACE", ""), ("WORKER_COUNT", "  ")]).unwrap();
        assert_eq!(config.namespace, None);
        assert_eq!(config.workers, 3);
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        for (name, value) in [
            ("WORKER_COUNT", "three"),
            ("REQUEUE_MAX_SECONDS", "-1"),
            ("PROBE_PORT", "70000"),
            ("WORKER_COUNT", "0"),
        ] {
            let err = config_from(&[(name, value)]).unwrap_err();
            assert!(
                matches!(err, ControllerError::InvalidConfig(ref msg) if msg.contains(name)),
                "{name}={value} gave {err}"
            );
        }
    }
}
