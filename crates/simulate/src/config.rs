use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ewe_routing::application::AppManifest;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::{SimulateError, SimulateResult};

/// Where a deployed application keeps its manifest, relative to its root.
pub const DEFAULT_MANIFEST_PATH: &str = "bin/app.toml";

pub const DEFAULT_THREAD_NAME: &str = "ewe-simulate-boundary";

/// Settings for an [`crate::boundary::IsolationBoundary`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    pub manifest_path: PathBuf,
    pub thread_name: String,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            thread_name: String::from(DEFAULT_THREAD_NAME),
        }
    }
}

impl BoundaryConfig {
    /// Reads the settings from a TOML file; missing keys keep their defaults.
    pub fn from_path<V: Into<PathBuf>>(target: V) -> SimulateResult<Self> {
        from_path(target)
    }

    #[must_use]
    pub fn with_manifest_path(mut self, manifest_path: impl Into<PathBuf>) -> Self {
        self.manifest_path = manifest_path.into();
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    #[must_use]
    pub fn manifest_location(&self, application_root: &Path) -> PathBuf {
        application_root.join(&self.manifest_path)
    }
}

pub fn from_path<T, V>(target: V) -> SimulateResult<T>
where
    T: DeserializeOwned,
    V: Into<PathBuf>,
{
    let target_path = target.into();
    let content = std::fs::read_to_string(target_path)?;
    let value: T = toml::from_str(&content)?;
    Ok(value)
}

/// Loads the deployment manifest of the application rooted at
/// `application_root`.
///
/// A missing manifest is reported as [`SimulateError::Configuration`]; any
/// other I/O failure is passed through unchanged.
pub fn load_manifest(application_root: &Path, config: &BoundaryConfig) -> SimulateResult<AppManifest> {
    let location = config.manifest_location(application_root);
    match from_path::<AppManifest, _>(&location) {
        Err(SimulateError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            Err(SimulateError::Configuration {
                hint: format!(
                    "point the boundary at the application's deployment root, the directory holding {}",
                    config.manifest_path.display()
                ),
                path: location,
            })
        }
        other => other,
    }
}
