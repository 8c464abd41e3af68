use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatlens_core::preferences::SELECTED_ACCOUNT_KEY;
use chatlens_core::{
    AccountCoordinator, AccountListing, AccountService, ApiError, CoordinatorOptions,
    FilePreferenceStore, LoadState, MemoryPreferenceStore, PreferenceStore,
    SelectedAccountPreference, Session,
};
use tempfile::tempdir;
use tokio::sync::Semaphore;

/// Answers `list_accounts` from a script. When gated, each call waits for `release()`.
struct ScriptedService {
    responses: Mutex<VecDeque<Result<AccountListing, String>>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl ScriptedService {
    fn new(responses: Vec<Result<AccountListing, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn gated(responses: Vec<Result<AccountListing, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    async fn wait_for_calls(&self, expected: usize) {
        while self.calls() < expected {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl AccountService for ScriptedService {
    async fn list_accounts(&self) -> Result<AccountListing, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected list_accounts call");
        next.map_err(|message| ApiError::Status {
            status: 500,
            message,
        })
    }
}

fn listing(accounts: &[&str], default_account: Option<&str>) -> AccountListing {
    AccountListing::new(
        accounts.iter().map(|a| a.to_string()).collect(),
        default_account.map(str::to_string),
    )
}

fn coordinator_with(
    service: Arc<ScriptedService>,
    store: Arc<dyn PreferenceStore>,
    options: CoordinatorOptions,
) -> AccountCoordinator {
    AccountCoordinator::new(service, SelectedAccountPreference::new(store), options)
}

fn remembered(store: &Arc<MemoryPreferenceStore>) -> Option<String> {
    store.get(SELECTED_ACCOUNT_KEY).expect("memory store")
}

#[tokio::test]
async fn concurrent_callers_share_one_request() {
    let service = ScriptedService::gated(vec![Ok(listing(&["alice", "bob"], Some("bob")))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(service.clone(), store, CoordinatorOptions::default());

    let release = async {
        service.wait_for_calls(1).await;
        assert!(coordinator.loading());
        service.release();
    };
    tokio::join!(
        coordinator.ensure_loaded(false),
        coordinator.ensure_loaded(false),
        coordinator.ensure_loaded(true),
        coordinator.ensure_loaded(false),
        release,
    );

    assert_eq!(service.calls(), 1);
    assert!(coordinator.loaded());
    assert!(!coordinator.loading());
    assert_eq!(coordinator.selected_account().as_deref(), Some("bob"));
}

#[tokio::test]
async fn spawned_callers_share_one_request() {
    let service = ScriptedService::gated(vec![Ok(listing(&["alice"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(service.clone(), store, CoordinatorOptions::default());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.ensure_loaded(false).await;
                coordinator.snapshot()
            })
        })
        .collect();

    service.wait_for_calls(1).await;
    service.release();

    for handle in handles {
        let state = handle.await.expect("caller task");
        assert!(state.loaded(), "every caller resumes after settlement");
        assert_eq!(state.selected_account.as_deref(), Some("alice"));
    }
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn loaded_state_is_served_from_cache() {
    let service = ScriptedService::new(vec![
        Ok(listing(&["alice"], None)),
        Ok(listing(&["alice", "bob"], None)),
    ]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(service.clone(), store, CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;
    coordinator.ensure_loaded(false).await;
    coordinator.ensure_loaded(false).await;
    assert_eq!(service.calls(), 1);
    assert_eq!(coordinator.accounts(), vec!["alice".to_string()]);

    coordinator.ensure_loaded(true).await;
    assert_eq!(service.calls(), 2);
    assert_eq!(
        coordinator.accounts(),
        vec!["alice".to_string(), "bob".to_string()]
    );
}

#[tokio::test]
async fn remembered_account_wins_when_still_listed() {
    let service = ScriptedService::new(vec![Ok(listing(&["alice", "bob"], Some("bob")))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("alice")).unwrap();
    let coordinator =
        coordinator_with(service, store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(remembered(&store).as_deref(), Some("alice"));
}

#[tokio::test]
async fn default_account_used_without_preference() {
    let service = ScriptedService::new(vec![Ok(listing(&["alice", "bob"], Some("bob")))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator =
        coordinator_with(service, store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    assert_eq!(coordinator.selected_account().as_deref(), Some("bob"));
    assert_eq!(remembered(&store).as_deref(), Some("bob"));
}

#[tokio::test]
async fn first_account_used_without_default() {
    let service = ScriptedService::new(vec![Ok(listing(&["alice", "bob"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator =
        coordinator_with(service, store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(remembered(&store).as_deref(), Some("alice"));
}

#[tokio::test]
async fn stale_preference_is_replaced() {
    let service = ScriptedService::new(vec![Ok(listing(&["alice", "bob"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("carol")).unwrap();
    let coordinator =
        coordinator_with(service, store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(remembered(&store).as_deref(), Some("alice"));
}

#[tokio::test]
async fn empty_listing_clears_selection() {
    let mut empty = listing(&[], None);
    empty.status = Some("error".to_string());
    empty.message = Some("No decrypted databases found.".to_string());
    let service = ScriptedService::new(vec![Ok(empty)]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("alice")).unwrap();
    let coordinator =
        coordinator_with(service, store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    let state = coordinator.snapshot();
    assert_eq!(state.status, LoadState::Loaded);
    assert!(state.accounts.is_empty());
    assert_eq!(state.selected_account, None);
    assert_eq!(state.last_error, None);
    assert_eq!(remembered(&store), None);
}

#[tokio::test]
async fn failure_settles_with_empty_state() {
    let service = ScriptedService::new(vec![Err("server error, please retry later".to_string())]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("alice")).unwrap();
    let coordinator =
        coordinator_with(service.clone(), store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    let state = coordinator.snapshot();
    assert!(state.accounts.is_empty());
    assert_eq!(state.selected_account, None);
    assert!(state.loaded());
    assert!(!state.loading());
    assert_eq!(state.status, LoadState::Failed);
    assert_eq!(state.error(), Some("server error, please retry later"));
    assert_eq!(remembered(&store), None);

    coordinator.ensure_loaded(false).await;
    assert_eq!(service.calls(), 1, "a failed load still counts as settled");
}

#[tokio::test]
async fn blank_failure_message_is_replaced() {
    let service = ScriptedService::new(vec![Err("  ".to_string())]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(service, store, CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;

    assert_eq!(coordinator.snapshot().status, LoadState::Failed);
    assert_eq!(coordinator.error().as_deref(), Some("failed to load accounts"));
}

#[tokio::test]
async fn failure_can_keep_preference_when_configured() {
    let service = ScriptedService::new(vec![
        Err("could not reach the chat service".to_string()),
        Ok(listing(&["bob", "alice"], None)),
    ]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("alice")).unwrap();
    let options = CoordinatorOptions {
        clear_preference_on_failure: false,
    };
    let coordinator = coordinator_with(service, store.clone(), options);

    coordinator.ensure_loaded(false).await;
    assert_eq!(coordinator.selected_account(), None);
    assert_eq!(remembered(&store).as_deref(), Some("alice"));

    coordinator.ensure_loaded(true).await;
    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(coordinator.error(), None);
}

#[tokio::test]
async fn retry_after_failure_recovers() {
    let service = ScriptedService::new(vec![
        Err("boom".to_string()),
        Ok(listing(&["alice"], None)),
    ]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator =
        coordinator_with(service.clone(), store.clone(), CoordinatorOptions::default());

    coordinator.ensure_loaded(false).await;
    assert_eq!(coordinator.error().as_deref(), Some("boom"));

    coordinator.ensure_loaded(true).await;
    assert_eq!(service.calls(), 2);
    assert_eq!(coordinator.error(), None);
    assert_eq!(coordinator.snapshot().status, LoadState::Loaded);
    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(remembered(&store).as_deref(), Some("alice"));
}

#[tokio::test]
async fn direct_selection_is_trusted() {
    let service = ScriptedService::new(vec![Ok(listing(&["alice", "bob"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator =
        coordinator_with(service, store.clone(), CoordinatorOptions::default());
    coordinator.ensure_loaded(false).await;

    coordinator.set_selected_account(Some("zeta"));

    assert_eq!(coordinator.selected_account().as_deref(), Some("zeta"));
    assert_eq!(remembered(&store).as_deref(), Some("zeta"));
    assert_eq!(
        coordinator.accounts(),
        vec!["alice".to_string(), "bob".to_string()]
    );
}

#[tokio::test]
async fn clearing_selection_is_idempotent() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(
        ScriptedService::new(Vec::new()),
        store.clone(),
        CoordinatorOptions::default(),
    );

    coordinator.set_selected_account(Some("  alice "));
    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(remembered(&store).as_deref(), Some("alice"));

    coordinator.set_selected_account(None);
    assert_eq!(coordinator.selected_account(), None);
    assert_eq!(remembered(&store), None);

    coordinator.set_selected_account(Some("bob"));
    coordinator.set_selected_account(Some(""));
    assert_eq!(coordinator.selected_account(), None);
    assert_eq!(remembered(&store), None);

    coordinator.set_selected_account(Some("   "));
    assert_eq!(coordinator.selected_account(), None);
    assert_eq!(remembered(&store), None);
}

#[tokio::test]
async fn selection_made_during_load_survives() {
    let service = ScriptedService::gated(vec![Ok(listing(&["alice", "bob"], Some("bob")))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator =
        coordinator_with(service.clone(), store.clone(), CoordinatorOptions::default());

    let racer = async {
        service.wait_for_calls(1).await;
        coordinator.set_selected_account(Some("zeta"));
        service.release();
    };
    tokio::join!(coordinator.ensure_loaded(false), racer);

    let state = coordinator.snapshot();
    assert_eq!(state.selected_account.as_deref(), Some("zeta"));
    assert_eq!(state.accounts, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(remembered(&store).as_deref(), Some("zeta"));
}

#[tokio::test]
async fn remembered_account_is_visible_while_loading() {
    let service = ScriptedService::gated(vec![Ok(listing(&["bob"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("carol")).unwrap();
    let coordinator =
        coordinator_with(service.clone(), store.clone(), CoordinatorOptions::default());

    let observer = async {
        service.wait_for_calls(1).await;
        let state = coordinator.snapshot();
        assert_eq!(state.status, LoadState::Loading);
        assert_eq!(state.selected_account.as_deref(), Some("carol"));
        service.release();
    };
    tokio::join!(coordinator.ensure_loaded(false), observer);

    assert_eq!(coordinator.selected_account().as_deref(), Some("bob"));
}

#[tokio::test]
async fn subscribers_observe_transitions() {
    let service = ScriptedService::gated(vec![Ok(listing(&["alice"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(service.clone(), store, CoordinatorOptions::default());
    let mut rx = coordinator.subscribe();
    assert_eq!(rx.borrow_and_update().status, LoadState::NotLoaded);

    let watcher = async {
        rx.changed().await.expect("coordinator alive");
        assert!(rx.borrow_and_update().loading());
        service.release();
        rx.wait_for(|state| state.loaded())
            .await
            .expect("coordinator alive")
            .clone()
    };
    let ((), settled) = tokio::join!(coordinator.ensure_loaded(false), watcher);

    assert_eq!(settled.selected_account.as_deref(), Some("alice"));
    assert!(settled.loaded_at.is_some());
}

#[tokio::test]
async fn abandoned_caller_does_not_strand_the_load() {
    let service = ScriptedService::gated(vec![Ok(listing(&["alice"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    let coordinator = coordinator_with(service.clone(), store, CoordinatorOptions::default());

    let caller = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.ensure_loaded(false).await })
    };
    service.wait_for_calls(1).await;
    caller.abort();
    let _ = caller.await;

    service.release();
    coordinator.settled().await;

    assert!(coordinator.loaded());
    assert_eq!(coordinator.selected_account().as_deref(), Some("alice"));
    assert_eq!(service.calls(), 1);
}

#[test]
fn shutdown_during_load_keeps_remembered_account() {
    let service = ScriptedService::gated(vec![Ok(listing(&["alice"], None))]);
    let store = Arc::new(MemoryPreferenceStore::new());
    store.set(SELECTED_ACCOUNT_KEY, Some("alice")).unwrap();
    let coordinator =
        coordinator_with(service.clone(), store.clone(), CoordinatorOptions::default());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let caller = coordinator.clone();
        tokio::spawn(async move { caller.ensure_loaded(false).await });
        service.wait_for_calls(1).await;
        assert!(coordinator.loading());
    });
    // Shutting the runtime down drops the load task while the service is still pending.
    drop(runtime);

    let state = coordinator.snapshot();
    assert_eq!(state.status, LoadState::Failed);
    assert!(state.loaded());
    assert!(!state.loading());
    assert!(state.accounts.is_empty());
    assert_eq!(state.error(), Some("account load was interrupted"));
    assert_eq!(state.selected_account.as_deref(), Some("alice"));
    assert_eq!(remembered(&store).as_deref(), Some("alice"));
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn file_store_round_trip_across_sessions() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("preferences.toml");

    let first = Session::with_parts(
        ScriptedService::new(vec![Ok(listing(&["alice", "bob"], Some("alice")))]),
        Arc::new(FilePreferenceStore::new(&path)),
        CoordinatorOptions::default(),
    );
    first.accounts().ensure_loaded(false).await;
    first.accounts().set_selected_account(Some("bob"));
    first.shutdown().await;

    let second = Session::with_parts(
        ScriptedService::new(vec![Ok(listing(&["alice", "bob"], Some("alice")))]),
        Arc::new(FilePreferenceStore::new(&path)),
        CoordinatorOptions::default(),
    );
    second.accounts().ensure_loaded(false).await;
    assert_eq!(second.accounts().selected_account().as_deref(), Some("bob"));
}

#[tokio::test]
async fn unreadable_store_degrades_to_memory() {
    let temp = tempdir().expect("tempdir");
    // A directory where the file should be makes every read and write fail.
    let path = temp.path().join("preferences.toml");
    std::fs::create_dir_all(&path).expect("mkdir");

    let session = Session::with_parts(
        ScriptedService::new(vec![Ok(listing(&["alice", "bob"], None))]),
        Arc::new(FilePreferenceStore::new(&path)),
        CoordinatorOptions::default(),
    );
    session.accounts().ensure_loaded(false).await;
    assert_eq!(session.accounts().selected_account().as_deref(), Some("alice"));

    session.accounts().set_selected_account(Some("bob"));
    assert_eq!(session.accounts().selected_account().as_deref(), Some("bob"));
    assert_eq!(session.accounts().error(), None);
}
