//! In-process realtime document store.
//!
//! Collections of JSON documents keyed by id, with:
//!   - one-shot queries (equality / membership filter + optional ordering)
//!   - push subscriptions that replay current matches as `Added`, then stream
//!     `Added` / `Modified` / `Removed` as documents enter, change in, or leave
//!     the filter
//!   - transactions: reads plus staged writes applied atomically, the only
//!     compare-and-swap primitive clients get
//!
//! All state sits behind one mutex that is never held across an await, so a
//! write and the notifications it produces form a single critical section and
//! every subscriber observes per-document changes in commit order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::error::DuelError;

pub type Fields = Map<String, Value>;

type Collections = HashMap<String, BTreeMap<String, Fields>>;

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// Value written to a single field by a [`Patch`].
#[derive(Clone, Debug)]
pub enum FieldValue {
    Set(Value),
    /// Replaced by the store's clock (ms since epoch) at commit time.
    ServerTimestamp,
    /// Added to the current integer value; a missing field counts as 0.
    Increment(i64),
}

/// Partial field update, applied in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Patch(Vec<(String, FieldValue)>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.push((field.to_string(), FieldValue::Set(value.into())));
        self
    }

    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.0.push((field.to_string(), FieldValue::ServerTimestamp));
        self
    }

    pub fn increment(mut self, field: &str, by: i64) -> Self {
        self.0.push((field.to_string(), FieldValue::Increment(by)));
        self
    }

    fn apply(&self, data: &mut Fields, now: u64) {
        for (field, value) in &self.0 {
            let next = match value {
                FieldValue::Set(v) => v.clone(),
                FieldValue::ServerTimestamp => Value::from(now),
                FieldValue::Increment(by) => {
                    let current = data.get(field).and_then(Value::as_i64).unwrap_or(0);
                    Value::from(current.saturating_add(*by))
                }
            };
            data.insert(field.clone(), next);
        }
    }
}

#[derive(Clone, Debug)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn one_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    fn matches(&self, data: &Fields) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, v) => data.get(field) == Some(v),
            Filter::In(field, vs) => data.get(field).map(|v| vs.contains(v)).unwrap_or(false),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn all() -> Self {
        Self { filter: Filter::All, order_by: None }
    }

    pub fn filter(filter: Filter) -> Self {
        Self { filter, order_by: None }
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    fn sort(&self, docs: &mut [Document]) {
        let Some((field, direction)) = &self.order_by else { return };
        docs.sort_by(|a, b| {
            let ord = compare_values(a.get(field), b.get(field));
            let ord = if *direction == Direction::Desc { ord.reverse() } else { ord };
            ord.then_with(|| a.id.cmp(&b.id))
        });
    }
}

/// Missing/null sorts first, then numbers, then strings.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    /// The document left the subscription's filter; `doc` holds its new state.
    Removed,
}

#[derive(Clone, Debug)]
pub struct Change {
    pub kind: ChangeKind,
    pub doc: Document,
}

struct Subscriber {
    id: u64,
    collection: String,
    query: Query,
    matched: HashSet<String>,
    tx: mpsc::UnboundedSender<Change>,
}

struct Inner {
    collections: Collections,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    online: bool,
}

impl Inner {
    fn ensure_online(&self) -> Result<(), DuelError> {
        if self.online {
            Ok(())
        } else {
            Err(DuelError::StoreUnavailable("store is offline".into()))
        }
    }

    /// Store a document and fan the change out to matching subscribers.
    fn write(&mut self, collection: &str, id: &str, data: Fields) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());

        let doc = Document { id: id.to_string(), data };
        self.subscribers.retain_mut(|sub| {
            if sub.collection != collection {
                return true;
            }
            let was = sub.matched.contains(id);
            let now = sub.query.filter.matches(&doc.data);
            let kind = match (was, now) {
                (false, true) => {
                    sub.matched.insert(id.to_string());
                    ChangeKind::Added
                }
                (true, true) => ChangeKind::Modified,
                (true, false) => {
                    sub.matched.remove(id);
                    ChangeKind::Removed
                }
                (false, false) => return true,
            };
            trace!(target: "store", subscriber = sub.id, %collection, %id, ?kind, "Delivering change");
            // A closed receiver means the subscription is gone; drop it.
            sub.tx.send(Change { kind, doc: doc.clone() }).is_ok()
        });
    }

    fn matching(&self, collection: &str, query: &Query) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, data)| query.filter.matches(data))
                    .map(|(id, data)| Document { id: id.clone(), data: data.clone() })
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut docs);
        docs
    }
}

/// Cheap-to-clone handle to a shared store.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<Mutex<Inner>>,
    latency: Duration,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                collections: HashMap::new(),
                subscribers: Vec::new(),
                next_subscriber: 1,
                online: true,
            })),
            latency: Duration::ZERO,
        }
    }

    /// Simulated network round trip paid before every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Toggle availability; offline stores fail every operation with `StoreUnavailable`.
    #[cfg(test)]
    pub fn set_online(&self, online: bool) {
        self.inner.lock().online = online;
        tracing::warn!(target: "store", %online, "Store availability changed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    #[instrument(level = "debug", skip(self, patch), target = "store")]
    pub async fn create(&self, collection: &str, patch: Patch) -> Result<String, DuelError> {
        self.round_trip().await;
        let mut inner = self.inner.lock();
        inner.ensure_online()?;
        let id = Uuid::new_v4().simple().to_string();
        let mut data = Fields::new();
        patch.apply(&mut data, now_millis());
        inner.write(collection, &id, data);
        debug!(target: "store", %collection, %id, "Document created");
        Ok(id)
    }

    /// Merge `patch` into the document, creating it if absent.
    #[instrument(level = "debug", skip(self, patch), target = "store")]
    pub async fn set(&self, collection: &str, id: &str, patch: Patch) -> Result<(), DuelError> {
        self.round_trip().await;
        let mut inner = self.inner.lock();
        inner.ensure_online()?;
        let mut data = inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id).cloned())
            .unwrap_or_default();
        patch.apply(&mut data, now_millis());
        inner.write(collection, id, data);
        Ok(())
    }

    /// Blind last-write-wins update of an existing document.
    #[cfg(test)]
    #[instrument(level = "debug", skip(self, patch), target = "store")]
    pub async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<(), DuelError> {
        self.round_trip().await;
        let mut inner = self.inner.lock();
        inner.ensure_online()?;
        let mut data = inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id).cloned())
            .ok_or_else(|| DuelError::NotFound(id.to_string()))?;
        patch.apply(&mut data, now_millis());
        inner.write(collection, id, data);
        Ok(())
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, DuelError> {
        self.round_trip().await;
        let inner = self.inner.lock();
        inner.ensure_online()?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document { id: id.to_string(), data: data.clone() }))
    }

    pub async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, DuelError> {
        self.round_trip().await;
        let inner = self.inner.lock();
        inner.ensure_online()?;
        Ok(inner.matching(collection, query))
    }

    /// Register a push subscription. Current matches arrive first as `Added`.
    #[instrument(level = "debug", skip(self, query), target = "store")]
    pub async fn subscribe(&self, collection: &str, query: Query) -> Result<Subscription, DuelError> {
        self.round_trip().await;
        let mut inner = self.inner.lock();
        inner.ensure_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let initial = inner.matching(collection, &query);
        let matched = initial.iter().map(|d| d.id.clone()).collect();
        for doc in initial {
            // The receiver is still in our hands, so this cannot fail.
            let _ = tx.send(Change { kind: ChangeKind::Added, doc });
        }

        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.push(Subscriber {
            id,
            collection: collection.to_string(),
            query,
            matched,
            tx,
        });
        debug!(target: "store", subscriber = id, %collection, "Subscribed");

        Ok(Subscription { id, rx, store: Arc::downgrade(&self.inner) })
    }

    /// Run `f` against a consistent snapshot; its staged writes commit atomically
    /// if it returns `Ok`, and are discarded otherwise.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, DuelError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, DuelError>,
    {
        self.round_trip().await;
        let mut inner = self.inner.lock();
        inner.ensure_online()?;

        let (out, staged) = {
            let mut tx = Transaction { base: &inner.collections, staged: BTreeMap::new(), now: now_millis() };
            let out = f(&mut tx)?;
            (out, tx.staged)
        };
        for ((collection, id), data) in staged {
            inner.write(&collection, &id, data);
        }
        Ok(out)
    }
}

/// View handed to a transaction closure. Reads see the closure's own staged writes.
pub struct Transaction<'a> {
    base: &'a Collections,
    staged: BTreeMap<(String, String), Fields>,
    now: u64,
}

impl Transaction<'_> {
    fn current(&self, collection: &str, id: &str) -> Option<Fields> {
        self.staged
            .get(&(collection.to_string(), id.to_string()))
            .or_else(|| self.base.get(collection).and_then(|c| c.get(id)))
            .cloned()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.current(collection, id).map(|data| Document { id: id.to_string(), data })
    }

    /// Merge `patch` into the document, creating it if absent.
    pub fn set(&mut self, collection: &str, id: &str, patch: Patch) {
        let mut data = self.current(collection, id).unwrap_or_default();
        patch.apply(&mut data, self.now);
        self.staged.insert((collection.to_string(), id.to_string()), data);
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Patch) -> Result<(), DuelError> {
        let mut data = self
            .current(collection, id)
            .ok_or_else(|| DuelError::NotFound(id.to_string()))?;
        patch.apply(&mut data, self.now);
        self.staged.insert((collection.to_string(), id.to_string()), data);
        Ok(())
    }
}

/// Live query handle. Dropping it (or calling [`Subscription::unsubscribe`])
/// deregisters it; nothing is delivered afterwards.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Change>,
    store: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Next change; `None` once the store is gone. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Change> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(inner) = self.store.upgrade() {
            inner.lock().subscribers.retain(|s| s.id != self.id);
            debug!(target: "store", subscriber = self.id, "Unsubscribed");
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLL: &str = "things";

    #[tokio::test]
    async fn create_then_get_applies_patch() {
        let store = DocumentStore::new();
        let id = store
            .create(COLL, Patch::new().set("name", "a").server_timestamp("createdAt").increment("n", 2))
            .await
            .unwrap();
        let doc = store.get(COLL, &id).await.unwrap().expect("doc");
        assert_eq!(doc.get("name"), Some(&json!("a")));
        assert_eq!(doc.get("n"), Some(&json!(2)));
        assert!(doc.get("createdAt").and_then(Value::as_u64).unwrap() > 0);
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = DocumentStore::new();
        let err = store.update(COLL, "nope", Patch::new().set("x", 1)).await.unwrap_err();
        assert_eq!(err, DuelError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = DocumentStore::new();
        for (name, points) in [("a", 5), ("b", 20), ("c", 10)] {
            store.set(COLL, name, Patch::new().set("points", points).set("kind", "x")).await.unwrap();
        }
        store.set(COLL, "d", Patch::new().set("points", 99).set("kind", "y")).await.unwrap();

        let q = Query::filter(Filter::eq("kind", "x")).order_by("points", Direction::Desc);
        let ids: Vec<String> = store.query(COLL, &q).await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn subscription_replays_then_streams_added_modified_removed() {
        let store = DocumentStore::new();
        store.set(COLL, "old", Patch::new().set("status", "open")).await.unwrap();

        let mut sub = store
            .subscribe(COLL, Query::filter(Filter::one_of("status", ["open", "busy"])))
            .await
            .unwrap();
        let first = sub.recv().await.unwrap();
        assert_eq!((first.kind, first.doc.id.as_str()), (ChangeKind::Added, "old"));

        store.update(COLL, "old", Patch::new().set("status", "busy")).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().kind, ChangeKind::Modified);

        store.update(COLL, "old", Patch::new().set("status", "done")).await.unwrap();
        let removed = sub.recv().await.unwrap();
        assert_eq!(removed.kind, ChangeKind::Removed);
        assert_eq!(removed.doc.get("status"), Some(&json!("done")));

        // Further writes outside the filter are invisible.
        store.update(COLL, "old", Patch::new().set("note", "x")).await.unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_deregisters() {
        let store = DocumentStore::new();
        let sub = store.subscribe(COLL, Query::all()).await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
        store.create(COLL, Patch::new().set("a", 1)).await.unwrap();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn failed_transaction_commits_nothing() {
        let store = DocumentStore::new();
        store.set(COLL, "x", Patch::new().set("v", 1)).await.unwrap();
        let mut sub = store.subscribe(COLL, Query::all()).await.unwrap();
        let _ = sub.recv().await;

        let res: Result<(), DuelError> = store
            .transaction(|tx| {
                tx.update(COLL, "x", Patch::new().set("v", 2))?;
                tx.set(COLL, "y", Patch::new().set("v", 3));
                Err(DuelError::ClaimConflict { challenge_id: "x".into() })
            })
            .await;
        assert!(res.is_err());
        assert_eq!(store.get(COLL, "x").await.unwrap().unwrap().get("v"), Some(&json!(1)));
        assert!(store.get(COLL, "y").await.unwrap().is_none());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = DocumentStore::new();
        let seen = store
            .transaction(|tx| {
                tx.set(COLL, "k", Patch::new().increment("n", 1));
                tx.set(COLL, "k", Patch::new().increment("n", 1));
                Ok(tx.get(COLL, "k").and_then(|d| d.get("n").and_then(Value::as_i64)))
            })
            .await
            .unwrap();
        assert_eq!(seen, Some(2));
    }

    #[tokio::test]
    async fn offline_store_rejects_everything() {
        let store = DocumentStore::new();
        store.set_online(false);
        assert!(matches!(store.query(COLL, &Query::all()).await, Err(DuelError::StoreUnavailable(_))));
        assert!(matches!(store.create(COLL, Patch::new()).await, Err(DuelError::StoreUnavailable(_))));
        assert!(store.transaction(|_| Ok(())).await.is_err());
        store.set_online(true);
        assert!(store.query(COLL, &Query::all()).await.is_ok());
    }
}
