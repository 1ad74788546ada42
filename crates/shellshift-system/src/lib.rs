mod command;
mod json_store;
mod locator;
mod memory_store;
mod package_manager;
mod registry;
mod store;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use json_store::JsonDocumentStore;
pub use locator::{is_executable_file, parse_version_output, InstallationLocator, LOCATE_STEP};
pub use memory_store::MemoryStore;
pub use package_manager::{PackageManager, ProvisionStatus, INSTALL_STEP};
pub use registry::{parse_reg_query_value, RegistryStore, RegistryValueKey};
pub use store::ConfigStore;
