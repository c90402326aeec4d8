//! Realtime sync engine for one remote collection.
//!
//! A [`CollectionSync`] follows one collection key at a time (a channel id
//! for messages, a guild id for channels, [`UNSCOPED_KEY`] for guilds). On
//! selection it shows whatever it already has cached for that key, fetches
//! a snapshot or an incremental catch-up, and opens a push subscription.
//! Failed subscriptions are retried on a bounded exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::record_cache::RecordCache;
use crate::domain::entities::UNSCOPED_KEY;
use crate::domain::ports::{
    ChangeEvent, ChangeKind, Filter, Query, RealtimePort, RemoteDataPort, Subscription,
    SubscriptionHandle, SubscriptionRequest, SubscriptionStatus,
};
use crate::domain::{SubscriptionState, SyncRecord};

/// Keeps one collection of `R` records fresh for the selected key.
///
/// Dropping the engine tears down its subscription and timers.
pub struct CollectionSync<R: SyncRecord> {
    inner: Arc<Inner<R>>,
}

struct Inner<R: SyncRecord> {
    data: Arc<dyn RemoteDataPort>,
    realtime: Arc<dyn RealtimePort>,
    backoff: Backoff,
    state: Mutex<EngineState<R>>,
    setup_in_progress: AtomicBool,
    view: watch::Sender<Vec<R>>,
    status: watch::Sender<SubscriptionState>,
}

struct EngineState<R: SyncRecord> {
    active_key: Option<String>,
    /// Bumped on every selection change; timers and subscriptions created
    /// for an older generation are discarded.
    generation: u64,
    caches: HashMap<String, RecordCache<R>>,
    subscription: Option<Box<dyn SubscriptionHandle>>,
    pump: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    attempts: u32,
}

impl<R: SyncRecord> EngineState<R> {
    fn teardown(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }
    }
}

/// Clears the setup flag when the setup future finishes or is dropped.
struct SetupGuard<'a>(&'a AtomicBool);

impl<'a> SetupGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: SyncRecord> CollectionSync<R> {
    #[must_use]
    pub fn new(
        data: Arc<dyn RemoteDataPort>,
        realtime: Arc<dyn RealtimePort>,
        backoff: Backoff,
    ) -> Self {
        let (view, _) = watch::channel(Vec::new());
        let (status, _) = watch::channel(SubscriptionState::Idle);
        Self {
            inner: Arc::new(Inner {
                data,
                realtime,
                backoff,
                state: Mutex::new(EngineState {
                    active_key: None,
                    generation: 0,
                    caches: HashMap::new(),
                    subscription: None,
                    pump: None,
                    reconnect: None,
                    attempts: 0,
                }),
                setup_in_progress: AtomicBool::new(false),
                view,
                status,
            }),
        }
    }

    /// Switches the engine to `key` (or to nothing).
    ///
    /// The previous subscription and any pending reconnect are dropped
    /// first. Cached records for the new key are published immediately;
    /// the returned future completes once the snapshot or catch-up fetch
    /// and the subscription setup have both finished.
    pub async fn select(&self, key: Option<&str>) {
        let high_water = {
            let mut state = self.inner.state.lock();
            state.teardown();
            state.generation += 1;
            state.attempts = 0;
            state.active_key = key.map(String::from);

            let cached = key.and_then(|k| state.caches.get(k));
            self.inner
                .view
                .send_replace(cached.map(|c| c.items().to_vec()).unwrap_or_default());
            cached.and_then(RecordCache::high_water)
        };
        self.inner.status.send_replace(SubscriptionState::Idle);

        let Some(key) = key else {
            debug!(table = R::TABLE, "Collection deselected");
            return;
        };
        info!(table = R::TABLE, key = %key, "Collection selected");

        match high_water {
            Some(since) => {
                tokio::join!(
                    self.inner.catch_up(key, since),
                    self.inner.setup_subscription()
                );
            }
            None => {
                tokio::join!(
                    self.inner.load_snapshot(key),
                    self.inner.setup_subscription()
                );
            }
        }
    }

    /// Refetches the full snapshot for the active key.
    pub async fn refresh(&self) {
        let key = self.inner.state.lock().active_key.clone();
        if let Some(key) = key {
            self.inner.load_snapshot(&key).await;
        }
    }

    #[must_use]
    pub fn active_key(&self) -> Option<String> {
        self.inner.state.lock().active_key.clone()
    }

    /// Current records for the active key.
    #[must_use]
    pub fn records(&self) -> Vec<R> {
        self.inner.view.borrow().clone()
    }

    /// Receiver notified whenever the visible records change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<R>> {
        self.inner.view.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.inner.status.borrow()
    }

    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<SubscriptionState> {
        self.inner.status.subscribe()
    }

    /// High-water mark of the active key's cache.
    #[must_use]
    pub fn high_water(&self) -> Option<DateTime<Utc>> {
        let state = self.inner.state.lock();
        state
            .active_key
            .as_ref()
            .and_then(|k| state.caches.get(k))
            .and_then(RecordCache::high_water)
    }

    /// Merges a record the caller just wrote into the cache for `key`.
    /// The matching push event is de-duplicated when it arrives.
    pub fn insert_local(&self, key: &str, record: R) {
        self.inner
            .update_cache(key, |cache| cache.apply_insert(record));
    }

    /// Replaces a cached record after a successful remote update.
    pub fn replace_local(&self, key: &str, record: R) {
        self.inner
            .update_cache(key, |cache| cache.apply_update(record));
    }

    /// Drops a cached record after a successful remote delete.
    pub fn remove_local(&self, key: &str, id: &R::Id) {
        self.inner.update_cache(key, |cache| cache.apply_delete(id));
    }

    /// Unsubscribes and cancels timers. Cached records are kept.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.teardown();
        state.generation += 1;
        state.active_key = None;
        drop(state);
        self.inner.status.send_replace(SubscriptionState::Idle);
        debug!(table = R::TABLE, "Collection sync shut down");
    }
}

impl<R: SyncRecord> Drop for CollectionSync<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<R: SyncRecord> std::fmt::Debug for CollectionSync<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSync")
            .field("table", &R::TABLE)
            .field("active_key", &self.active_key())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<R: SyncRecord> Inner<R> {
    fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    fn query_for(key: &str, since: Option<DateTime<Utc>>) -> Query {
        let mut query = Query::table(R::TABLE);
        if let Some(column) = R::KEY_COLUMN.filter(|_| key != UNSCOPED_KEY) {
            query = query.filter(Filter::eq(column, key));
        }
        if let Some(since) = since {
            query = query.filter(Filter::gt(
                R::ORDER_COLUMN,
                since.to_rfc3339_opts(SecondsFormat::Micros, true),
            ));
        }
        query.order_asc(R::ORDER_COLUMN)
    }

    fn request_for(key: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            table: R::TABLE.to_string(),
            filter: R::KEY_COLUMN
                .filter(|_| key != UNSCOPED_KEY)
                .map(|column| Filter::eq(column, key)),
        }
    }

    /// Applies `change` to the cache for `key` and republishes the view if
    /// `key` is active and the change reports a modification.
    fn update_cache(&self, key: &str, change: impl FnOnce(&mut RecordCache<R>) -> bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let cache = state.caches.entry(key.to_string()).or_default();
        if change(cache) && state.active_key.as_deref() == Some(key) {
            self.view.send_replace(cache.items().to_vec());
        }
    }

    async fn load_snapshot(&self, key: &str) {
        match self.data.query(&Self::query_for(key, None)).await {
            Ok(rows) => {
                let records = decode_rows::<R>(rows);
                debug!(table = R::TABLE, key = %key, count = records.len(), "Loaded snapshot");
                self.update_cache(key, |cache| {
                    cache.replace_with_snapshot(records);
                    true
                });
            }
            Err(e) => {
                warn!(table = R::TABLE, key = %key, error = %e, "Snapshot fetch failed, keeping cached records");
            }
        }
    }

    async fn catch_up(&self, key: &str, since: DateTime<Utc>) {
        match self.data.query(&Self::query_for(key, Some(since))).await {
            Ok(rows) => {
                let records = decode_rows::<R>(rows);
                self.update_cache(key, |cache| {
                    let added = cache.merge_catch_up(records);
                    debug!(table = R::TABLE, key = %key, added, "Merged catch-up records");
                    added > 0
                });
            }
            Err(e) => {
                warn!(table = R::TABLE, key = %key, error = %e, "Catch-up fetch failed, keeping cached records");
            }
        }
    }

    /// Subscribes the active key unless a subscription already exists.
    ///
    /// Only one setup runs at a time. A caller that finds one in progress
    /// returns immediately; the running setup loops until it has served the
    /// newest selection.
    async fn setup_subscription(self: &Arc<Self>) {
        loop {
            let Some(guard) = SetupGuard::acquire(&self.setup_in_progress) else {
                trace!(table = R::TABLE, "Subscription setup already in progress");
                return;
            };
            let served = self.run_setup().await;
            drop(guard);

            if served == self.generation() {
                return;
            }
        }
    }

    async fn run_setup(self: &Arc<Self>) -> u64 {
        let (generation, key) = {
            let state = self.state.lock();
            if state.subscription.is_some() {
                return state.generation;
            }
            let Some(key) = state.active_key.clone() else {
                return state.generation;
            };
            (state.generation, key)
        };

        self.status.send_replace(SubscriptionState::Connecting);
        debug!(table = R::TABLE, key = %key, "Setting up realtime subscription");

        let result = self.realtime.subscribe(Self::request_for(&key)).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            if let Ok(subscription) = result {
                subscription.handle.unsubscribe();
            }
            debug!(table = R::TABLE, key = %key, "Discarding subscription for stale selection");
            return generation;
        }

        match result {
            Ok(Subscription {
                events,
                status,
                handle,
            }) => {
                state.subscription = Some(handle);
                state.pump = Some(tokio::spawn(Arc::clone(self).pump(
                    generation, key, events, status,
                )));
            }
            Err(e) => {
                drop(state);
                warn!(table = R::TABLE, key = %key, error = %e, "Realtime subscribe failed");
                self.schedule_reconnect(generation);
            }
        }
        generation
    }

    async fn pump(
        self: Arc<Self>,
        generation: u64,
        key: String,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        mut status: watch::Receiver<SubscriptionStatus>,
    ) {
        let mut events_open = true;
        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        debug!(table = R::TABLE, key = %key, "Subscription status feed closed");
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    if !self.on_status(generation, &key, current).await {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.apply_event(&key, event),
                    None => events_open = false,
                },
            }
        }
    }

    /// Handles a transport status change. Returns false once the pump
    /// should stop.
    async fn on_status(self: &Arc<Self>, generation: u64, key: &str, status: SubscriptionStatus) -> bool {
        match status {
            SubscriptionStatus::Connecting => true,
            SubscriptionStatus::Subscribed => {
                {
                    let mut state = self.state.lock();
                    if state.generation != generation {
                        return false;
                    }
                    state.attempts = 0;
                }
                self.status.send_replace(SubscriptionState::Subscribed);
                info!(table = R::TABLE, key = %key, "Subscribed to realtime updates");
                // Events missed while connecting are picked up here.
                self.load_snapshot(key).await;
                true
            }
            SubscriptionStatus::ChannelError(_)
            | SubscriptionStatus::TimedOut
            | SubscriptionStatus::Closed => {
                warn!(table = R::TABLE, key = %key, status = ?status, "Realtime channel lost");
                {
                    let mut state = self.state.lock();
                    if state.generation == generation {
                        // Detach rather than abort: this is the pump itself.
                        state.pump.take();
                    }
                }
                self.schedule_reconnect(generation);
                false
            }
        }
    }

    fn apply_event(&self, key: &str, event: ChangeEvent) {
        match event.kind {
            ChangeKind::Insert => {
                let Some(record) = decode_record::<R>(event.record) else {
                    return;
                };
                self.update_cache(key, |cache| {
                    let added = cache.apply_insert(record);
                    if !added {
                        trace!(table = R::TABLE, key = %key, "Duplicate insert ignored");
                    }
                    added
                });
            }
            kind if !R::POLICY.applies_mutations() => {
                trace!(table = R::TABLE, key = %key, kind = ?kind, "Ignoring change event");
            }
            ChangeKind::Update => {
                if let Some(record) = decode_record::<R>(event.record) {
                    self.update_cache(key, |cache| cache.apply_update(record));
                }
            }
            ChangeKind::Delete => {
                let id = event
                    .old_record
                    .get("id")
                    .cloned()
                    .and_then(|id| serde_json::from_value::<R::Id>(id).ok());
                match id {
                    Some(id) => self.update_cache(key, |cache| cache.apply_delete(&id)),
                    None => warn!(table = R::TABLE, key = %key, "Delete event without id"),
                }
            }
        }
    }

    /// Drops the failed subscription and arms the next reconnect timer, or
    /// gives up once the attempt budget is spent.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(timer) = state.reconnect.take() {
            timer.abort();
        }
        if let Some(handle) = state.subscription.take() {
            handle.unsubscribe();
        }

        state.attempts += 1;
        let attempt = state.attempts;

        if !self.backoff.allows(attempt) {
            error!(
                table = R::TABLE,
                max_attempts = self.backoff.max_attempts,
                "Exceeded maximum reconnect attempts"
            );
            self.status.send_replace(SubscriptionState::Error {
                attempt: self.backoff.max_attempts,
                exhausted: true,
            });
            return;
        }

        let delay = self.backoff.delay(attempt);
        info!(
            table = R::TABLE,
            attempt,
            delay_ms = delay.as_millis(),
            "Scheduling reconnect"
        );
        self.status.send_replace(SubscriptionState::Error {
            attempt,
            exhausted: false,
        });

        let inner = Arc::clone(self);
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.state.lock();
                if state.generation != generation {
                    return;
                }
                // Detach so a failure inside setup does not abort this task.
                state.reconnect.take();
            }
            info!(table = R::TABLE, attempt, "Reconnect attempt");
            inner.setup_subscription().await;
        }));
    }
}

fn decode_record<R: SyncRecord>(value: Value) -> Option<R> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(table = R::TABLE, error = %e, "Skipping undecodable record");
            None
        }
    }
}

fn decode_rows<R: SyncRecord>(rows: Vec<Value>) -> Vec<R> {
    rows.into_iter().filter_map(decode_record::<R>).collect()
}
