//! Account bootstrap.
//!
//! [`AccountCoordinator`] loads the account list from the chat service at most once at a
//! time, reconciles the remembered selection against it and publishes every change through
//! a [`watch`] channel. Callers that ask for a load while one is running wait for that load
//! instead of issuing their own request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{AccountListing, AccountService};
use crate::preferences::{SelectedAccountPreference, normalize_account};

const LOAD_FAILED_MESSAGE: &str = "failed to load accounts";
const LOAD_INTERRUPTED_MESSAGE: &str = "account load was interrupted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    /// The last load failed; the state is settled (empty) and counts as loaded.
    Failed,
}

/// Snapshot published to subscribers after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub accounts: Vec<String>,
    pub selected_account: Option<String>,
    pub status: LoadState,
    pub last_error: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl AccountState {
    pub fn loading(&self) -> bool {
        self.status == LoadState::Loading
    }

    pub fn loaded(&self) -> bool {
        matches!(self.status, LoadState::Loaded | LoadState::Failed)
    }

    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Forget the remembered account when a load fails.
    pub clear_preference_on_failure: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            clear_preference_on_failure: true,
        }
    }
}

/// Pick the account to work with once a fresh listing is available.
///
/// The preferred account wins if the service still reports it, then the service default,
/// then the first listed account.
pub fn reconcile(preferred: Option<&str>, listing: &AccountListing) -> Option<String> {
    if let Some(preferred) = normalize_account(preferred) {
        if listing.accounts.iter().any(|account| *account == preferred) {
            return Some(preferred);
        }
    }

    normalize_account(listing.default_account.as_deref()).or_else(|| {
        listing
            .accounts
            .first()
            .filter(|account| !account.is_empty())
            .cloned()
    })
}

/// How a load cycle ended.
enum LoadOutcome {
    Listed(AccountListing),
    /// The service answered with an error.
    Failed(String),
    /// The load task went away before the service answered.
    Interrupted,
}

#[derive(Debug, Default)]
struct Flight {
    /// Completion signal of the running load, if any.
    pending: Option<watch::Receiver<bool>>,
    /// Bumped on every direct selection.
    selection_epoch: u64,
}

struct Shared {
    service: Arc<dyn AccountService>,
    preference: SelectedAccountPreference,
    options: CoordinatorOptions,
    state: watch::Sender<AccountState>,
    flight: Mutex<Flight>,
}

/// Cloneable handle; all clones share one account state and one in-flight load.
#[derive(Clone)]
pub struct AccountCoordinator {
    shared: Arc<Shared>,
}

impl AccountCoordinator {
    pub fn new(
        service: Arc<dyn AccountService>,
        preference: SelectedAccountPreference,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                preference,
                options,
                state: watch::Sender::new(AccountState::default()),
                flight: Mutex::new(Flight::default()),
            }),
        }
    }

    /// Make sure the account list has been loaded.
    ///
    /// Returns immediately when a previous load settled and `force` is false. Joins the
    /// running load if there is one, `force` included. Never fails: a failed load settles
    /// with an empty list and the message in [`AccountState::last_error`].
    ///
    /// Must be called from within a tokio runtime.
    pub async fn ensure_loaded(&self, force: bool) {
        let Some(mut done) = self.join_or_start(force) else {
            return;
        };
        // An error means the load task is gone; its guard has already settled the state.
        let _ = done.wait_for(|settled| *settled).await;
    }

    /// Wait for the running load, if any, without starting one.
    pub async fn settled(&self) {
        let pending = self.shared.lock_flight().pending.clone();
        if let Some(mut done) = pending {
            let _ = done.wait_for(|settled| *settled).await;
        }
    }

    /// Select an account directly. Blank input clears the selection.
    ///
    /// The value is trusted as-is and is not checked against the loaded list. A load that is
    /// running when this is called keeps this selection instead of reconciling its own.
    pub fn set_selected_account(&self, value: Option<&str>) {
        let next = normalize_account(value);
        let mut flight = self.shared.lock_flight();
        flight.selection_epoch = flight.selection_epoch.wrapping_add(1);
        self.shared
            .state
            .send_modify(|state| state.selected_account = next.clone());
        self.shared.preference.write(next.as_deref());
        info!(selected = ?next, "account selected");
    }

    pub fn subscribe(&self) -> watch::Receiver<AccountState> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> AccountState {
        self.shared.state.borrow().clone()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.shared.state.borrow().accounts.clone()
    }

    pub fn selected_account(&self) -> Option<String> {
        self.shared.state.borrow().selected_account.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state.borrow().loading()
    }

    pub fn loaded(&self) -> bool {
        self.shared.state.borrow().loaded()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.state.borrow().last_error.clone()
    }

    fn join_or_start(&self, force: bool) -> Option<watch::Receiver<bool>> {
        let mut flight = self.shared.lock_flight();

        if let Some(pending) = flight.pending.as_ref() {
            debug!(force, "joining in-flight account load");
            return Some(pending.clone());
        }

        let already_loaded = self.shared.state.borrow().loaded();
        if already_loaded && !force {
            return None;
        }

        let (done_tx, done_rx) = watch::channel(false);
        flight.pending = Some(done_rx.clone());
        let epoch = flight.selection_epoch;
        self.shared.begin_load();
        drop(flight);

        // Created after the lock is released: dropping a ticket settles, which locks.
        let ticket = LoadTicket {
            shared: Arc::clone(&self.shared),
            epoch,
            done: Some(done_tx),
        };
        tokio::spawn(async move {
            let outcome = match ticket.shared.service.list_accounts().await {
                Ok(listing) => LoadOutcome::Listed(listing),
                Err(err) => LoadOutcome::Failed(err.to_string()),
            };
            ticket.finish(outcome);
        });

        Some(done_rx)
    }
}

impl Shared {
    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adopt the remembered account if nothing is selected yet, then enter `Loading`.
    fn begin_load(&self) {
        let unset = self.state.borrow().selected_account.is_none();
        let remembered = if unset { self.preference.read() } else { None };
        if let Some(account) = remembered.as_deref() {
            debug!(account, "using remembered account until the list arrives");
        }

        self.state.send_modify(|state| {
            if remembered.is_some() {
                state.selected_account = remembered;
            }
            state.status = LoadState::Loading;
            state.last_error = None;
        });
    }

    fn settle(&self, outcome: LoadOutcome, epoch: u64) {
        let mut flight = self.lock_flight();
        let selected_during_load = flight.selection_epoch != epoch;
        let current = self.state.borrow().selected_account.clone();

        match outcome {
            LoadOutcome::Listed(listing) => {
                if listing.is_empty() {
                    warn!(
                        status = ?listing.status,
                        message = ?listing.message,
                        "chat service reported no accounts"
                    );
                }
                let selected = if selected_during_load {
                    current
                } else {
                    reconcile(current.as_deref(), &listing)
                };
                info!(
                    accounts = listing.accounts.len(),
                    selected = ?selected,
                    "account list loaded"
                );

                self.state.send_modify(|state| {
                    state.accounts = listing.accounts;
                    state.selected_account = selected.clone();
                    state.status = LoadState::Loaded;
                    state.last_error = None;
                    state.loaded_at = Some(Utc::now());
                });
                if !selected_during_load {
                    self.preference.write(selected.as_deref());
                }
            }
            LoadOutcome::Failed(message) => {
                let message = if message.trim().is_empty() {
                    LOAD_FAILED_MESSAGE.to_string()
                } else {
                    message
                };
                warn!(error = %message, "account list failed to load");

                let selected = if selected_during_load { current } else { None };
                self.state.send_modify(|state| {
                    state.accounts.clear();
                    state.selected_account = selected;
                    state.status = LoadState::Failed;
                    state.last_error = Some(message);
                    state.loaded_at = Some(Utc::now());
                });
                if !selected_during_load && self.options.clear_preference_on_failure {
                    self.preference.write(None);
                }
            }
            LoadOutcome::Interrupted => {
                // No answer from the service: the remembered account stays on record.
                warn!("account load was interrupted before the service answered");
                self.state.send_modify(|state| {
                    state.accounts.clear();
                    state.selected_account = current;
                    state.status = LoadState::Failed;
                    state.last_error = Some(LOAD_INTERRUPTED_MESSAGE.to_string());
                    state.loaded_at = Some(Utc::now());
                });
            }
        }

        flight.pending = None;
    }
}

/// Owned by the load task. Settles the cycle and wakes the waiters exactly once, even if the
/// task is dropped before the service answers.
struct LoadTicket {
    shared: Arc<Shared>,
    epoch: u64,
    done: Option<watch::Sender<bool>>,
}

impl LoadTicket {
    fn finish(mut self, outcome: LoadOutcome) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: LoadOutcome) {
        if let Some(done) = self.done.take() {
            self.shared.settle(outcome, self.epoch);
            let _ = done.send(true);
        }
    }
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        self.complete(LoadOutcome::Interrupted);
    }
}
