//! Per-agent settings

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a run needs to know beyond its collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Root under which each session gets its own directory
    pub output_dir: PathBuf,
    /// Round budget; a run never plays more rounds than this
    pub max_rounds: u32,
}

impl AgentSettings {
    pub fn new(output_dir: impl Into<PathBuf>, max_rounds: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            max_rounds,
        }
    }
}

impl From<&Config> for AgentSettings {
    fn from(config: &Config) -> Self {
        Self::new(config.output_dir.clone(), config.max_rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = Config::default()
            .with_output_dir(PathBuf::from("/tmp/analyses"))
            .with_max_rounds(3);
        let settings = AgentSettings::from(&config);
        assert_eq!(settings, AgentSettings::new("/tmp/analyses", 3));
    }
}
