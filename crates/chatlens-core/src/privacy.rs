use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::preferences::{PRIVACY_MODE_KEY, PreferenceStore};

/// Privacy mode flag (masks names and avatars in the UI), persisted as `1`/`0`.
#[derive(Clone)]
pub struct PrivacyMode {
    store: Arc<dyn PreferenceStore>,
    enabled: Arc<watch::Sender<bool>>,
    initialized: Arc<AtomicBool>,
}

impl PrivacyMode {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            enabled: Arc::new(watch::Sender::new(false)),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read the persisted flag. Only the first call has any effect.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let enabled = match self.store.get(PRIVACY_MODE_KEY) {
            Ok(raw) => raw.as_deref().map(parse_flag).unwrap_or(false),
            Err(err) => {
                warn!(error = %err, "could not read privacy mode");
                false
            }
        };
        self.enabled.send_replace(enabled);
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.send_replace(enabled);
        let encoded = if enabled { "1" } else { "0" };
        if let Err(err) = self.store.set(PRIVACY_MODE_KEY, Some(encoded)) {
            warn!(error = %err, "could not persist privacy mode");
        }
        info!(enabled, "privacy mode changed");
    }

    pub fn toggle(&self) -> bool {
        let next = !self.enabled();
        self.set(next);
        next
    }

    pub fn enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_init_reads_persisted_flag_once() {
        let store = Arc::new(MemoryPreferenceStore::new());
        store.set(PRIVACY_MODE_KEY, Some("true")).expect("set");

        let privacy = PrivacyMode::new(store.clone());
        assert!(!privacy.enabled());
        privacy.init();
        assert!(privacy.enabled());

        store.set(PRIVACY_MODE_KEY, Some("0")).expect("set");
        privacy.init();
        assert!(privacy.enabled(), "second init must not re-read");
    }

    #[test]
    fn test_toggle_persists_and_notifies() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let privacy = PrivacyMode::new(store.clone());
        privacy.init();
        let mut rx = privacy.subscribe();

        assert!(privacy.toggle());
        assert!(rx.has_changed().expect("sender alive"));
        assert!(*rx.borrow_and_update());
        assert_eq!(store.get(PRIVACY_MODE_KEY).expect("get").as_deref(), Some("1"));

        assert!(!privacy.toggle());
        assert_eq!(store.get(PRIVACY_MODE_KEY).expect("get").as_deref(), Some("0"));
    }
}
