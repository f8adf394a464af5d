//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

/// Server and store settings.
#[derive(Clone, Debug)]
pub struct Config {
    /// Database file (from RELEASE_CMS_DB_PATH). `None` uses the platform data directory.
    pub db_path: Option<PathBuf>,
    /// HTTP port (from RELEASE_CMS_PORT)
    pub port: u16,
    /// Name of the release created at startup when none is open
    /// (from RELEASE_CMS_DEFAULT_RELEASE, empty disables)
    pub default_release: Option<String>,
    /// Refuse deploys with conflicts (from RELEASE_CMS_BLOCK_ON_CONFLICTS)
    pub block_on_conflicts: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("RELEASE_CMS_DB_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let port = lookup("RELEASE_CMS_PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3000);

        let default_release = match lookup("RELEASE_CMS_DEFAULT_RELEASE") {
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name.trim().to_string()),
            None => Some("Initial release".to_string()),
        };

        let block_on_conflicts = lookup("RELEASE_CMS_BLOCK_ON_CONFLICTS")
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            db_path,
            port,
            default_release,
            block_on_conflicts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.port, 3000);
        assert!(config.db_path.is_none());
        assert_eq!(config.default_release.as_deref(), Some("Initial release"));
        assert!(!config.block_on_conflicts);
    }

    #[test]
    fn empty_default_release_disables_bootstrap() {
        let config = config(&[("RELEASE_CMS_DEFAULT_RELEASE", " ")]);
        assert!(config.default_release.is_none());
    }

    #[test]
    fn conflict_gate_accepts_truthy_values() {
        assert!(config(&[("RELEASE_CMS_BLOCK_ON_CONFLICTS", "TRUE")]).block_on_conflicts);
        assert!(!config(&[("RELEASE_CMS_BLOCK_ON_CONFLICTS", "no")]).block_on_conflicts);
    }

    #[test]
    fn invalid_port_falls_back() {
        assert_eq!(config(&[("RELEASE_CMS_PORT", "http")]).port, 3000);
    }
}
