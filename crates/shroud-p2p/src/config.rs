//! Node configuration.
//!
//! Every field has a default, so a JSON config file only needs to name what it
//! changes:
//!
//! ```json
//! { "mode": "Direct", "bootstrap": { "dial_timeout_ms": 5000 } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bootstrap::BootstrapConfig;
use crate::error::ConfigError;
use crate::transport::{ListenEndpoint, TransportConfig, TransportMode};

/// Everything needed to construct a [`crate::Node`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub mode: TransportMode,

    /// Only used in direct mode. The default port is random per run.
    pub listen: ListenEndpoint,

    /// Persist the node identity here. `None` means a fresh identity per run.
    pub identity_path: Option<PathBuf>,

    pub transport: TransportConfig,

    pub bootstrap: BootstrapConfig,
}

impl NodeConfig {
    /// Direct-mode configuration listening on `listen`.
    pub fn direct(listen: ListenEndpoint) -> Self {
        Self {
            mode: TransportMode::Direct,
            listen,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
