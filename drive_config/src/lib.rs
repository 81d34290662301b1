pub mod env_value;
pub mod macros;

pub mod groups;

mod drive_config;
pub use drive_config::DriveConfig;
pub use env_value::EnvConfigValue;

pub type ClientConfig = groups::client::ConfigValues;
pub type DownloadConfig = groups::download::ConfigValues;
pub type UploadConfig = groups::upload::ConfigValues;
pub type ArchiveConfig = groups::archive::ConfigValues;
