pub mod config_store;

pub use config_store::{
    ConfigOverrides,
    ConfigSection,
    ConfigStore,
    ConfigStoreError,
    RepoflowConfig,
    RepositoryEntry,
    DEFAULT_CONFIG_FILE,
};
