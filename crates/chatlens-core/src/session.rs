//! Application session: owns the stores the rest of the client is handed.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::accounts::{AccountCoordinator, CoordinatorOptions};
use crate::api::{AccountService, ApiClient, ApiError};
use crate::config::AppConfig;
use crate::preferences::{FilePreferenceStore, PreferenceStore, SelectedAccountPreference};
use crate::privacy::PrivacyMode;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to build the HTTP client: {0}")]
    Client(#[from] ApiError),
}

pub struct Session {
    api: Option<ApiClient>,
    accounts: AccountCoordinator,
    privacy: PrivacyMode,
}

impl Session {
    /// Wire the HTTP client and the on-disk preference store described by `config`.
    pub fn start(config: &AppConfig) -> Result<Self, SessionError> {
        let api = ApiClient::new(&config.api)?;
        let preferences_path = config.preferences_path();
        info!(
            base_url = api.base_url(),
            preferences = %preferences_path.display(),
            "starting session"
        );

        let store: Arc<dyn PreferenceStore> = Arc::new(FilePreferenceStore::new(preferences_path));
        let options = CoordinatorOptions {
            clear_preference_on_failure: config.accounts.clear_preference_on_failure,
        };
        let mut session = Self::with_parts(Arc::new(api.clone()), store, options);
        session.api = Some(api);
        Ok(session)
    }

    /// Build a session from explicit collaborators.
    pub fn with_parts(
        service: Arc<dyn AccountService>,
        store: Arc<dyn PreferenceStore>,
        options: CoordinatorOptions,
    ) -> Self {
        let accounts = AccountCoordinator::new(
            service,
            SelectedAccountPreference::new(Arc::clone(&store)),
            options,
        );
        let privacy = PrivacyMode::new(store);
        privacy.init();

        Self {
            api: None,
            accounts,
            privacy,
        }
    }

    pub fn accounts(&self) -> &AccountCoordinator {
        &self.accounts
    }

    pub fn privacy(&self) -> &PrivacyMode {
        &self.privacy
    }

    /// The HTTP client, when the session was started from configuration.
    pub fn api(&self) -> Option<&ApiClient> {
        self.api.as_ref()
    }

    /// Let any running account load settle before the session goes away.
    pub async fn shutdown(self) {
        self.accounts.settled().await;
        info!("session closed");
    }
}
