//! OPUS-MT model discovery, listing and installation.

pub mod descriptor;
pub mod download;
pub mod listing;
pub mod repository;

pub use descriptor::{InstallStatus, ModelDescriptor};
pub use download::DownloadProgress;
pub use repository::{InstallEvent, ModelRepository, RemoteStatus};
