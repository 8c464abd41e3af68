//! Client-side core of the chatlens desktop client: account bootstrap, preferences and the
//! chat service client.

pub mod accounts;
pub mod api;
pub mod config;
pub mod logging;
pub mod preferences;
pub mod privacy;
pub mod session;

pub use accounts::{AccountCoordinator, AccountState, CoordinatorOptions, LoadState, reconcile};
pub use api::{AccountListing, AccountService, ApiClient, ApiError, HealthStatus};
pub use config::{
    AppConfig, ConfigError, ConfigLoadResult, ConfigSource, RuntimeOverrides,
    apply_runtime_overrides, config_directory, config_path, load_config, save_config,
};
pub use logging::{LoggingDestination, LoggingError, current_log_path, init_logging};
pub use preferences::{
    FilePreferenceStore, MemoryPreferenceStore, PreferenceStore, SelectedAccountPreference,
    StorageError,
};
pub use privacy::PrivacyMode;
pub use session::{Session, SessionError};
