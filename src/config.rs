//! The server core configuration. This only covers the knobs the core
//! itself consumes; listener, backend and tls configuration live with their
//! owning components.

use serde::Deserialize;

fn default_max_collateral_depth() -> usize {
    10
}

fn default_filter_max_elements() -> usize {
    32
}

/// Configuration for the operation processing core. All fields have
/// defaults so a config file only needs to name what it changes.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// How deep collateral (side-effect) operations may nest before the
    /// chain refuses to re-enter.
    #[serde(default = "default_max_collateral_depth")]
    pub max_collateral_depth: usize,
    /// Maximum number of nodes accepted in a single search filter.
    #[serde(default = "default_filter_max_elements")]
    pub filter_max_elements: usize,
    /// Default search size limit when the request does not set one.
    /// Zero means unlimited.
    #[serde(default)]
    pub default_size_limit: usize,
    /// Default search time limit in seconds when the request does not set
    /// one. Zero means unlimited. Enforced by backends, carried here.
    #[serde(default)]
    pub default_time_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            max_collateral_depth: default_max_collateral_depth(),
            filter_max_elements: default_filter_max_elements(),
            default_size_limit: 0,
            default_time_limit: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreConfig;

    #[test]
    fn test_config_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.max_collateral_depth, 10);
        assert_eq!(config.filter_max_elements, 32);
        assert_eq!(config.default_size_limit, 0);
    }

    #[test]
    fn test_config_partial_file() {
        let config: CoreConfig =
            serde_json::from_str(r#"{ "max_collateral_depth": 4 }"#).expect("parse failure");
        assert_eq!(config.max_collateral_depth, 4);
        // Unnamed fields keep their defaults.
        assert_eq!(config.filter_max_elements, 32);
    }
}
