use super::context::{ActorContext, ActorSettings};
use super::identity::diagnostic_id;
use crate::core::{ReproError, Result};
use crate::protocol::ActorEnvelope;
use crate::storage::{ChunkStore, StoreProvider};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// How long the hang endpoint stalls before replying (about 11.5 days).
pub const HANG_DURATION: Duration = Duration::from_millis(1_000_000_000);
pub const HANG_REPLY: &str = "after hang ???";

const MAILBOX_CAPACITY: usize = 64;

struct ActorMessage {
    body: Vec<u8>,
    reply: oneshot::Sender<ActorEnvelope>,
}

#[derive(Clone)]
struct ActorHandle {
    sender: mpsc::Sender<ActorMessage>,
    instance_id: String,
    /// Flips to `true` once the incarnation's task has drained and exited.
    finished: watch::Receiver<bool>,
}

impl ActorHandle {
    fn is_live(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Per-name activation state. Its lock serializes activation and eviction of
/// one actor without blocking any other.
#[derive(Default)]
struct ActorCell {
    current: Option<ActorHandle>,
    /// Incarnation that was evicted and may still be draining.
    previous: Option<watch::Receiver<bool>>,
}

type SharedCell = Arc<tokio::sync::Mutex<ActorCell>>;

/// Host-level knobs.
#[derive(Debug, Clone)]
pub struct ActorHostConfig {
    /// Number of simulated worker processes actors are spread across.
    pub worker_slots: usize,
    pub settings: ActorSettings,
    /// Deactivate an actor after this long without requests.
    pub idle_timeout: Option<Duration>,
}

impl ActorHostConfig {
    pub fn new() -> Self {
        Self {
            worker_slots: 4,
            settings: ActorSettings::default(),
            idle_timeout: None,
        }
    }

    pub fn worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots.max(1);
        self
    }

    pub fn settings(mut self, settings: ActorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl Default for ActorHostConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory of resident actors, keyed by name.
///
/// Each actor runs as its own task draining a mailbox, so requests to one
/// actor are handled one at a time while distinct actors run in parallel.
/// Actors are activated on first use and rebuilt with fresh state after
/// eviction; their persisted namespaces come from the [`StoreProvider`].
/// At most one incarnation of a name runs at a time: a replacement is only
/// activated after its predecessor has drained.
pub struct ActorHost {
    stores: Arc<dyn StoreProvider>,
    config: ActorHostConfig,
    slots: Vec<OnceLock<String>>,
    cells: Mutex<HashMap<String, SharedCell>>,
}

impl ActorHost {
    pub fn new(stores: Arc<dyn StoreProvider>, config: ActorHostConfig) -> Self {
        let slots = (0..config.worker_slots.max(1)).map(|_| OnceLock::new()).collect();
        Self {
            stores,
            config,
            slots,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ActorHostConfig {
        &self.config
    }

    /// Worker slot an actor name is pinned to.
    pub fn slot_for(&self, name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        (hasher.finish() % self.slots.len() as u64) as usize
    }

    /// Identity of the simulated process behind a slot, fixed on first use.
    fn process_id(&self, slot: usize) -> String {
        self.slots[slot].get_or_init(diagnostic_id).clone()
    }

    fn cell(&self, name: &str) -> SharedCell {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.entry(name.to_string()).or_default().clone()
    }

    fn existing_cell(&self, name: &str) -> Option<SharedCell> {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.get(name).cloned()
    }

    fn existing_cells(&self) -> Vec<(String, SharedCell)> {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells
            .iter()
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect()
    }

    /// Opening may replay a WAL from disk, so it runs on the blocking pool.
    async fn open_store(&self, name: &str) -> Result<Arc<dyn ChunkStore>> {
        let stores = self.stores.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || stores.open(&owned))
            .await
            .map_err(|e| {
                ReproError::Storage(format!("opening store for '{}' failed: {}", name, e))
            })?
    }

    async fn handle_for(&self, name: &str) -> Result<ActorHandle> {
        let cell = self.cell(name);
        let mut cell = cell.lock().await;
        if let Some(handle) = cell.current.as_ref().filter(|handle| handle.is_live()) {
            return Ok(handle.clone());
        }

        if let Some(stale) = cell.current.take() {
            debug!(actor = name, instance = %stale.instance_id, "replacing deactivated actor");
            cell.previous = Some(stale.finished);
        }
        if let Some(previous) = cell.previous.take() {
            wait_finished(previous).await;
        }

        let store = self.open_store(name).await?;
        let slot = self.slot_for(name);
        let context = ActorContext::new(name, self.process_id(slot), store, self.config.settings);
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (done, finished) = watch::channel(false);
        let handle = ActorHandle {
            sender,
            instance_id: context.instance_id().to_string(),
            finished,
        };
        info!(
            actor = name,
            slot,
            instance = %handle.instance_id,
            "activated actor"
        );
        tokio::spawn(run_actor(context, mailbox, self.config.idle_timeout, done));
        cell.current = Some(handle.clone());
        Ok(handle)
    }

    /// Deliver a request body to an actor, activating it if needed.
    pub async fn call(&self, name: &str, body: Vec<u8>) -> Result<ActorEnvelope> {
        let mut body = body;
        for _ in 0..2 {
            let handle = self.handle_for(name).await?;
            let (reply, response) = oneshot::channel();
            let sent = handle.sender.send(ActorMessage { body, reply }).await;
            drop(handle);
            match sent {
                Ok(()) => {
                    return response
                        .await
                        .map_err(|_| ReproError::ActorUnavailable(name.to_string()));
                }
                // closed between lookup and send; the next lookup replaces it
                Err(mpsc::error::SendError(message)) => body = message.body,
            }
        }
        Err(ReproError::ActorUnavailable(name.to_string()))
    }

    /// Activate the actor, then stall the calling task for [`HANG_DURATION`].
    ///
    /// The actor's mailbox is not blocked while this call is pending.
    pub async fn hang(&self, name: &str) -> Result<String> {
        self.handle_for(name).await?;
        warn!(actor = name, "hang requested, stalling caller");
        tokio::time::sleep(HANG_DURATION).await;
        Ok(HANG_REPLY.to_string())
    }

    /// Drop an actor's in-memory state. Its next request starts cold, once
    /// requests already delivered to this incarnation have been answered.
    pub async fn evict(&self, name: &str) -> bool {
        let Some(cell) = self.existing_cell(name) else {
            return false;
        };
        let mut cell = cell.lock().await;
        match cell.current.take() {
            Some(handle) => {
                info!(actor = name, instance = %handle.instance_id, "evicted actor");
                cell.previous = Some(handle.finished);
                true
            }
            None => false,
        }
    }

    pub async fn resident_actors(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, cell) in self.existing_cells() {
            if cell.lock().await.current.as_ref().is_some_and(ActorHandle::is_live) {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    pub async fn instance_id(&self, name: &str) -> Option<String> {
        let cell = self.existing_cell(name)?;
        let cell = cell.lock().await;
        cell.current
            .as_ref()
            .filter(|handle| handle.is_live())
            .map(|handle| handle.instance_id.clone())
    }
}

/// Resolves when the incarnation's task has exited, or was dropped.
async fn wait_finished(mut finished: watch::Receiver<bool>) {
    loop {
        let done = *finished.borrow_and_update();
        if done || finished.changed().await.is_err() {
            break;
        }
    }
}

async fn run_actor(
    mut context: ActorContext,
    mut mailbox: mpsc::Receiver<ActorMessage>,
    idle_timeout: Option<Duration>,
    done: watch::Sender<bool>,
) {
    loop {
        let next = match idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, mailbox.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    mailbox.close();
                    while let Ok(message) = mailbox.try_recv() {
                        let envelope = context.handle(&message.body).await;
                        let _ = message.reply.send(envelope);
                    }
                    debug!(actor = context.name(), "actor idle");
                    None
                }
            },
            None => mailbox.recv().await,
        };
        let Some(message) = next else {
            break;
        };
        let envelope = context.handle(&message.body).await;
        let _ = message.reply.send(envelope);
    }
    info!(
        actor = context.name(),
        instance = context.instance_id(),
        resident_chunks = context.state().len(),
        "deactivated actor"
    );
    drop(context);
    done.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryChunkStore, ListPage, MemoryStoreProvider};
    use crate::core::Chunk;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::sync::Semaphore;

    /// Store whose `list` calls wait on a gate and record their overlap.
    struct GatedStore {
        inner: InMemoryChunkStore,
        gate: Semaphore,
        listing: AtomicUsize,
        peak_listing: AtomicUsize,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: InMemoryChunkStore::new(),
                gate: Semaphore::new(0),
                listing: AtomicUsize::new(0),
                peak_listing: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChunkStore for GatedStore {
        async fn list(&self, prefix: &str, limit: usize, start: Option<&str>) -> Result<ListPage> {
            let now = self.listing.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_listing.fetch_max(now, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            self.listing.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            self.inner.list(prefix, limit, start).await
        }

        async fn put_batch(&self, batch: BTreeMap<String, Chunk>) -> Result<()> {
            self.inner.put_batch(batch).await
        }

        async fn delete_all(&self) -> Result<()> {
            self.inner.delete_all().await
        }
    }

    struct SharedStoreProvider(Arc<GatedStore>);

    impl StoreProvider for SharedStoreProvider {
        fn open(&self, _actor_name: &str) -> Result<Arc<dyn ChunkStore>> {
            Ok(self.0.clone())
        }
    }

    /// Opening one named actor blocks its thread for `delay`.
    struct SlowOpenProvider {
        inner: MemoryStoreProvider,
        slow: &'static str,
        delay: Duration,
    }

    impl StoreProvider for SlowOpenProvider {
        fn open(&self, actor_name: &str) -> Result<Arc<dyn ChunkStore>> {
            if actor_name == self.slow {
                std::thread::sleep(self.delay);
            }
            self.inner.open(actor_name)
        }
    }

    fn host(config: ActorHostConfig) -> ActorHost {
        ActorHost::new(Arc::new(MemoryStoreProvider::new()), config)
    }

    #[test]
    fn slots_are_stable_per_name() {
        let host = host(ActorHostConfig::new().worker_slots(3));
        let slot = host.slot_for("feed-2021-07-01");
        assert!(slot < 3);
        assert_eq!(slot, host.slot_for("feed-2021-07-01"));
    }

    #[tokio::test]
    async fn eviction_rebuilds_state_lazily() {
        let host = host(ActorHostConfig::new());
        let first = host.call("a", br#"{"kind":"put"}"#.to_vec()).await.unwrap();
        let first = first.as_success().unwrap().clone();
        assert_eq!(first.memory_chunks, 1024);

        assert!(host.evict("a").await);
        assert!(host.resident_actors().await.is_empty());

        let second = host.call("a", br#"{"kind":"query"}"#.to_vec()).await.unwrap();
        let second = second.as_success().unwrap();
        assert_ne!(second.instance_id, first.instance_id);
        assert_eq!(second.process_id, first.process_id);
        assert_eq!(second.loaded_chunks, 1024);
        assert_eq!(second.loaded_list_calls, 3);
    }

    #[tokio::test]
    async fn idle_actors_deactivate_and_come_back() {
        let host = host(ActorHostConfig::new().idle_timeout(Some(Duration::from_millis(20))));
        host.call("a", br#"{"kind":"query"}"#.to_vec()).await.unwrap();
        let before = host.instance_id("a").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(host.instance_id("a").await.is_none());

        let envelope = host.call("a", br#"{"kind":"query"}"#.to_vec()).await.unwrap();
        assert_ne!(envelope.as_success().unwrap().instance_id, before);
    }

    #[tokio::test]
    async fn hang_does_not_block_the_mailbox() {
        let host = Arc::new(host(ActorHostConfig::new()));
        let hanging = {
            let host = host.clone();
            tokio::spawn(async move { host.hang("a").await })
        };
        tokio::task::yield_now().await;

        let envelope = host.call("a", br#"{"kind":"query"}"#.to_vec()).await.unwrap();
        assert!(envelope.is_success());
        assert!(!hanging.is_finished());
        hanging.abort();
    }

    #[tokio::test]
    async fn evicted_actor_drains_before_its_replacement_loads() {
        let store = Arc::new(GatedStore::new());
        let host = Arc::new(ActorHost::new(
            Arc::new(SharedStoreProvider(store.clone())),
            ActorHostConfig::new(),
        ));

        let first = {
            let host = host.clone();
            tokio::spawn(async move { host.call("a", br#"{"kind":"put"}"#.to_vec()).await })
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.listing.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "first load never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(host.evict("a").await);
        let second = {
            let host = host.clone();
            tokio::spawn(async move { host.call("a", br#"{"kind":"put"}"#.to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.listing.load(Ordering::SeqCst), 1);

        store.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        let first = first.as_success().unwrap();
        let second = second.as_success().unwrap();

        assert_eq!(store.peak_listing.load(Ordering::SeqCst), 1);
        assert_ne!(first.instance_id, second.instance_id);
        assert_eq!(first.memory_chunks, 1024);
        assert_eq!(second.loaded_chunks, 1024);
        assert_eq!(second.memory_chunks, 2048);
    }

    #[tokio::test]
    async fn slow_store_open_does_not_block_other_actors() {
        let provider = SlowOpenProvider {
            inner: MemoryStoreProvider::new(),
            slow: "slow",
            delay: Duration::from_millis(500),
        };
        let host = Arc::new(ActorHost::new(Arc::new(provider), ActorHostConfig::new()));
        host.call("fast", br#"{"kind":"query"}"#.to_vec()).await.unwrap();

        let slow = {
            let host = host.clone();
            tokio::spawn(async move { host.call("slow", br#"{"kind":"query"}"#.to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let envelope = host.call("fast", br#"{"kind":"query"}"#.to_vec()).await.unwrap();
        assert!(envelope.is_success());
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!slow.is_finished());

        assert!(slow.await.unwrap().unwrap().is_success());
    }
}
