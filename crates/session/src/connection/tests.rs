use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use furrow_backend::{
	ChatMessage, CropPrediction, DiseaseScan, Field, FieldId, ImageBlob, Location,
	ProgressReporter, UserProfile,
};

use furrow_backend::Result;

use super::*;

struct StubBackend;

fn stub() -> BackendError {
	BackendError::Transport("stub backend".into())
}

#[async_trait]
impl FarmBackend for StubBackend {
	async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>> {
		Ok(None)
	}

	async fn save_caller_user_profile(&self, _profile: UserProfile) -> Result<()> {
		Err(stub())
	}

	async fn get_fields_by_user(&self, _user: &Principal) -> Result<Vec<Field>> {
		Ok(Vec::new())
	}

	async fn add_field(&self, _name: &str, _location: Location, _notes: &str) -> Result<Field> {
		Err(stub())
	}

	async fn get_predictions_by_field(&self, _field: FieldId) -> Result<Vec<CropPrediction>> {
		Ok(Vec::new())
	}

	async fn make_prediction(&self, _field: FieldId, _crop: &str) -> Result<CropPrediction> {
		Err(stub())
	}

	async fn get_diseases_by_user(&self, _user: &Principal) -> Result<Vec<DiseaseScan>> {
		Ok(Vec::new())
	}

	async fn upload_scan(
		&self,
		_field: FieldId,
		_plant_type: &str,
		_image: ImageBlob,
		_progress: &ProgressReporter,
	) -> Result<DiseaseScan> {
		Err(stub())
	}

	async fn get_chat_history(&self, _user: &Principal) -> Result<Vec<ChatMessage>> {
		Ok(Vec::new())
	}

	async fn send_message(&self, _text: &str) -> Result<ChatMessage> {
		Err(stub())
	}
}

/// Connector whose constructions can be held open per principal.
#[derive(Default)]
struct GatedConnector {
	calls: AtomicUsize,
	gates: Mutex<HashMap<String, watch::Sender<bool>>>,
	failing: Mutex<HashSet<String>>,
}

impl GatedConnector {
	fn hold(&self, principal: &str) {
		let (tx, _) = watch::channel(false);
		self.gates.lock().insert(principal.to_string(), tx);
	}

	fn release(&self, principal: &str) {
		if let Some(tx) = self.gates.lock().get(principal) {
			tx.send_replace(true);
		}
	}

	fn fail(&self, principal: &str, failing: bool) {
		let mut set = self.failing.lock();
		if failing {
			set.insert(principal.to_string());
		} else {
			set.remove(principal);
		}
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Connector for GatedConnector {
	async fn connect(&self, identity: &Identity) -> Result<Arc<dyn FarmBackend>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let gate = self
			.gates
			.lock()
			.get(identity.principal().as_str())
			.map(watch::Sender::subscribe);
		if let Some(mut gate) = gate {
			let _ = gate.wait_for(|open| *open).await;
		}
		if self.failing.lock().contains(identity.principal().as_str()) {
			return Err(BackendError::Transport("replica unreachable".into()));
		}
		Ok(Arc::new(StubBackend))
	}
}

fn identity(name: &str) -> Identity {
	Identity::new(Principal::new(name), format!("delegation-{name}"))
}

fn setup() -> (Arc<GatedConnector>, Arc<ConnectionManager>) {
	let _ = tracing_subscriber::fmt::try_init();
	let connector = Arc::new(GatedConnector::default());
	let manager = Arc::new(ConnectionManager::new(connector.clone()));
	(connector, manager)
}

async fn wait_until(cond: impl Fn() -> bool) {
	for _ in 0..1000 {
		if cond() {
			return;
		}
		tokio::task::yield_now().await;
	}
	panic!("condition not reached");
}

#[tokio::test]
async fn absent_identity_settles_immediately() {
	let (connector, manager) = setup();

	let state = manager.set_identity(None).await;

	assert!(state.handle.is_none());
	assert!(!state.establishing);
	assert!(state.error.is_none());
	assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn same_identity_reuses_handle() {
	let (connector, manager) = setup();

	let first = manager.set_identity(Some(identity("alice"))).await;
	let second = manager.set_identity(Some(identity("alice"))).await;

	assert_eq!(connector.calls(), 1);
	let first = first.handle.unwrap();
	let second = second.handle.unwrap();
	assert_eq!(first.generation(), second.generation());
	assert!(Arc::ptr_eq(first.backend(), second.backend()));
}

#[tokio::test]
async fn concurrent_calls_for_same_identity_construct_once() {
	let (connector, manager) = setup();
	connector.hold("alice");

	let m1 = manager.clone();
	let m2 = manager.clone();
	let t1 = tokio::spawn(async move { m1.set_identity(Some(identity("alice"))).await });
	wait_until(|| connector.calls() == 1).await;
	let t2 = tokio::spawn(async move { m2.set_identity(Some(identity("alice"))).await });
	for _ in 0..10 {
		tokio::task::yield_now().await;
	}
	assert!(manager.state().establishing);
	assert!(manager.handle().is_none());

	connector.release("alice");
	let (s1, s2) = tokio::join!(t1, t2);
	let (s1, s2) = (s1.unwrap(), s2.unwrap());

	assert_eq!(connector.calls(), 1);
	assert_eq!(s1.handle.unwrap().generation(), s2.handle.unwrap().generation());
}

#[tokio::test]
async fn latest_identity_wins_race() {
	let (connector, manager) = setup();
	connector.hold("alice");
	connector.hold("bob");

	let m = manager.clone();
	let alice = tokio::spawn(async move { m.set_identity(Some(identity("alice"))).await });
	wait_until(|| connector.calls() == 1).await;

	let m = manager.clone();
	let bob = tokio::spawn(async move { m.set_identity(Some(identity("bob"))).await });
	wait_until(|| connector.calls() == 2).await;

	connector.release("bob");
	let bob_state = bob.await.unwrap();
	assert_eq!(bob_state.handle.as_ref().unwrap().principal().as_str(), "bob");

	connector.release("alice");
	let alice_state = alice.await.unwrap();

	// The slow, older construction reports the winner instead of itself.
	assert_eq!(alice_state.handle.unwrap().principal().as_str(), "bob");
	let current = manager.handle().unwrap();
	assert_eq!(current.principal().as_str(), "bob");
	assert_eq!(current.generation(), manager.generation());
}

#[tokio::test]
async fn sign_out_during_construction_discards_handle() {
	let (connector, manager) = setup();
	connector.hold("alice");

	let m = manager.clone();
	let pending = tokio::spawn(async move { m.set_identity(Some(identity("alice"))).await });
	wait_until(|| connector.calls() == 1).await;

	let out = manager.set_identity(None).await;
	assert!(out.handle.is_none());

	connector.release("alice");
	let settled = pending.await.unwrap();

	assert!(settled.handle.is_none());
	assert!(manager.handle().is_none());
	assert!(!manager.state().establishing);
}

#[tokio::test]
async fn identity_change_drops_old_handle_immediately() {
	let (connector, manager) = setup();
	manager.set_identity(Some(identity("alice"))).await;
	connector.hold("bob");

	let m = manager.clone();
	let bob = tokio::spawn(async move { m.set_identity(Some(identity("bob"))).await });
	wait_until(|| connector.calls() == 2).await;

	let state = manager.state();
	assert!(state.establishing);
	assert!(state.handle.is_none(), "alice's handle must not outlive the identity change");

	connector.release("bob");
	bob.await.unwrap();
}

#[tokio::test]
async fn failure_is_reported_and_retryable() {
	let (connector, manager) = setup();
	connector.fail("alice", true);

	let failed = manager.set_identity(Some(identity("alice"))).await;
	assert!(failed.handle.is_none());
	assert!(!failed.establishing);
	let error = failed.error.unwrap();
	assert_eq!(error.principal.as_str(), "alice");

	connector.fail("alice", false);
	let retried = manager.set_identity(Some(identity("alice"))).await;
	assert!(retried.error.is_none());
	assert!(retried.handle.is_some());
	assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn follow_tracks_session_changes() {
	let (connector, manager) = setup();
	let (tx, rx) = watch::channel(SessionSnapshot::default());
	let follower = manager.follow(rx);

	tx.send_modify(|s| s.identity = Some(identity("alice")));
	wait_until(|| manager.handle().is_some()).await;
	assert_eq!(manager.handle().unwrap().principal().as_str(), "alice");

	tx.send_modify(|s| s.logging_in = true);
	for _ in 0..10 {
		tokio::task::yield_now().await;
	}
	assert_eq!(connector.calls(), 1, "unrelated snapshot changes must not reconnect");

	tx.send_modify(|s| s.identity = None);
	wait_until(|| manager.handle().is_none()).await;

	drop(tx);
	follower.await.unwrap();
}

async fn eventually(cond: impl Fn() -> bool) {
	let reached = tokio::time::timeout(std::time::Duration::from_secs(5), async {
		while !cond() {
			tokio::time::sleep(std::time::Duration::from_millis(1)).await;
		}
	})
	.await;
	assert!(reached.is_ok(), "condition not reached within 5s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_identity_runs_on_worker_threads() {
	let (connector, manager) = setup();

	let m = manager.clone();
	let first = tokio::spawn(async move { m.set_identity(Some(identity("alice"))).await })
		.await
		.unwrap();
	let m = manager.clone();
	let second = tokio::spawn(async move { m.set_identity(Some(identity("alice"))).await })
		.await
		.unwrap();

	assert_eq!(connector.calls(), 1);
	assert_eq!(first.ready().unwrap().generation(), second.ready().unwrap().generation());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follow_settles_on_latest_identity_across_threads() {
	for _ in 0..50 {
		let (connector, manager) = setup();
		let (tx, rx) = watch::channel(SessionSnapshot::default());
		let follower = manager.follow(rx);

		tx.send_modify(|s| s.identity = Some(identity("alice")));
		tx.send_modify(|s| s.identity = Some(identity("bob")));
		eventually(|| manager.handle().is_some_and(|h| h.principal().as_str() == "bob")).await;

		for _ in 0..10 {
			tokio::task::yield_now().await;
		}
		let current = manager.handle().unwrap();
		assert_eq!(current.principal().as_str(), "bob");
		assert_eq!(current.generation(), manager.generation());
		assert!(connector.calls() <= 2);

		drop(tx);
		follower.await.unwrap();
	}
}

#[tokio::test]
async fn follower_mints_generation_before_construction_finishes() {
	let (connector, manager) = setup();
	connector.hold("alice");
	connector.hold("bob");
	let (tx, rx) = watch::channel(SessionSnapshot::default());
	let follower = manager.follow(rx);

	tx.send_modify(|s| s.identity = Some(identity("alice")));
	wait_until(|| connector.calls() == 1).await;
	tx.send_modify(|s| s.identity = Some(identity("bob")));
	wait_until(|| manager.generation() == 2).await;

	// Alice finishing late must not publish over bob's generation.
	connector.release("alice");
	for _ in 0..10 {
		tokio::task::yield_now().await;
	}
	assert!(manager.handle().is_none());
	assert!(manager.state().establishing);

	connector.release("bob");
	wait_until(|| manager.handle().is_some()).await;
	assert_eq!(manager.handle().unwrap().principal().as_str(), "bob");

	drop(tx);
	follower.await.unwrap();
}
