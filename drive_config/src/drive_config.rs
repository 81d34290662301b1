use crate::groups;

/// Primary configuration struct containing all config sections.
#[derive(Debug, Clone, Default)]
pub struct DriveConfig {
    pub client: groups::client::ConfigValues,
    pub download: groups::download::ConfigValues,
    pub upload: groups::upload::ConfigValues,
    pub archive: groups::archive::ConfigValues,
}

impl DriveConfig {
    /// Create a config with default values and environment overrides
    /// applied. Equivalent to `DriveConfig::default().with_env_overrides()`.
    pub fn new() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides to all configuration sections.
    /// Variables follow the pattern `DRIVE_{GROUP}_{FIELD}`.
    pub fn with_env_overrides(mut self) -> Self {
        self.client.apply_env_overrides();
        self.download.apply_env_overrides();
        self.upload.apply_env_overrides();
        self.archive.apply_env_overrides();
        self
    }
}
