pub mod eula;
pub mod fabric;
pub mod installer;
pub mod java;
pub mod kinds;
pub mod metadata;
pub mod paper;
pub mod servers;
pub mod vanilla;

pub use eula::{eula_accepted, write_eula, EULA_FILE};
pub use fabric::FabricSource;
pub use installer::{install_from_source, install_server, InstallOptions, InstalledServer, LATEST};
pub use java::{adoptium_platform, extract_archive, ArchiveFormat, JreInstaller, JRE_CACHE_DIR};
pub use kinds::{
    java_major_for, JarSource, KindRow, ResolvedJar, ServerKind, VersionEntry, SERVER_KINDS,
};
pub use metadata::{ServerMetadata, METADATA_FILE};
pub use paper::PaperSource;
pub use servers::{list_servers, unique_server_name, ServerEntry};
pub use vanilla::VanillaSource;
