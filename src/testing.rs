//! Test support (§4.10): an in-memory [`MorayClient`] with scripted fault
//! injection, and a [`ManualClock`] for deterministic timing. Production
//! code never depends on this module; it exists so callers (including this
//! crate's own tests) can exercise the whole pipeline without a live
//! remote, per the Design Notes' "no monkey-patching -- narrow capability
//! interface" directive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::client::{BatchOp, BucketSchema, Filter, MorayClient, ReindexResult, RemoteBucket, StoredRecord};
use crate::clock::Clock;
use crate::error::{MorayError, MorayErrorKind};

/// A scripted fault: returned instead of the real result for the next `n`
/// matching calls (or forever, if `n` is `None`).
#[derive(Clone)]
pub struct Fault {
    pub error: Arc<dyn Fn() -> MorayError + Send + Sync>,
    pub remaining: Option<u32>,
}

impl Fault {
    pub fn forever(error: impl Fn() -> MorayError + Send + Sync + 'static) -> Self {
        Fault { error: Arc::new(error), remaining: None }
    }

    pub fn times(n: u32, error: impl Fn() -> MorayError + Send + Sync + 'static) -> Self {
        Fault { error: Arc::new(error), remaining: Some(n) }
    }
}

#[derive(Default)]
struct FaultBook {
    get_bucket: Option<Fault>,
    create_bucket: Option<Fault>,
    update_bucket: Option<Fault>,
    reindex_objects: Option<Fault>,
    find_objects: Option<Fault>,
    batch: Option<Fault>,
}

struct BucketState {
    schema: BucketSchema,
    rver: u32,
    reindex_active: bool,
}

/// An in-memory stand-in for the remote storage service.
pub struct FakeMorayClient {
    buckets: Mutex<BTreeMap<String, BucketState>>,
    records: Mutex<BTreeMap<String, BTreeMap<String, StoredRecord>>>,
    faults: Mutex<FaultBook>,
    next_etag: AtomicU64,
}

impl Default for FakeMorayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMorayClient {
    pub fn new() -> Self {
        FakeMorayClient {
            buckets: Mutex::new(BTreeMap::new()),
            records: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(FaultBook::default()),
            next_etag: AtomicU64::new(1),
        }
    }

    fn next_etag(&self) -> String {
        format!("etag-{}", self.next_etag.fetch_add(1, Ordering::SeqCst))
    }

    /// Seeds a bucket directly, bypassing `create_bucket`, for test setup
    /// that needs a pre-existing remote bucket at a given version.
    pub async fn seed_bucket(&self, name: &str, schema: BucketSchema) {
        let version = schema.options.version;
        self.buckets.lock().await.insert(
            name.to_string(),
            BucketState { schema, rver: version, reindex_active: false },
        );
        self.records.lock().await.entry(name.to_string()).or_default();
    }

    /// Seeds a record with an opaque `value`, assigning it a fresh etag.
    pub async fn seed_record(&self, bucket: &str, key: &str, value: serde_json::Value) {
        let etag = self.next_etag();
        self.records
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredRecord { key: key.to_string(), value, etag });
    }

    pub async fn record_count(&self, bucket: &str) -> usize {
        self.records.lock().await.get(bucket).map(|m| m.len()).unwrap_or(0)
    }

    pub async fn all_records(&self, bucket: &str) -> Vec<StoredRecord> {
        self.records.lock().await.get(bucket).map(|m| m.values().cloned().collect()).unwrap_or_default()
    }

    pub async fn bucket_version(&self, bucket: &str) -> Option<u32> {
        self.buckets.lock().await.get(bucket).map(|b| b.schema.options.version)
    }

    pub async fn set_get_bucket_fault(&self, fault: Fault) {
        self.faults.lock().await.get_bucket = Some(fault);
    }

    pub async fn set_batch_fault(&self, fault: Fault) {
        self.faults.lock().await.batch = Some(fault);
    }

    pub async fn set_find_objects_fault(&self, fault: Fault) {
        self.faults.lock().await.find_objects = Some(fault);
    }

    pub async fn clear_faults(&self) {
        *self.faults.lock().await = FaultBook::default();
    }

    /// Consumes one shot of `slot`, returning the synthetic error if armed.
    fn consume(slot: &mut Option<Fault>) -> Option<MorayError> {
        let fault = slot.as_mut()?;
        let err = (fault.error)();
        match &mut fault.remaining {
            None => {}
            Some(0) => unreachable!("a zero-remaining fault should have been cleared"),
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    *slot = None;
                }
            }
        }
        Some(err)
    }
}

fn matches_filter(filter: &Filter, value: &serde_json::Value) -> bool {
    let data_version = value.get("data_version").and_then(|v| v.as_u64());
    if filter.0 == "!(data_version=*)" {
        return data_version.is_none();
    }
    if let Some(rest) = filter.0.strip_prefix("(|(!(data_version=*))(data_version=") {
        let n: u64 = rest.trim_end_matches("))").parse().expect("test filter is well-formed");
        return data_version.is_none() || data_version == Some(n);
    }
    panic!("FakeMorayClient does not understand filter {:?}", filter.0);
}

#[async_trait]
impl MorayClient for FakeMorayClient {
    async fn get_bucket(&self, name: &str) -> Result<RemoteBucket, MorayError> {
        if let Some(err) = Self::consume(&mut self.faults.lock().await.get_bucket) {
            return Err(err);
        }
        let buckets = self.buckets.lock().await;
        match buckets.get(name) {
            Some(b) => Ok(RemoteBucket {
                name: name.to_string(),
                index: b.schema.index.clone(),
                options: b.schema.options.clone(),
                pre: b.schema.pre.clone(),
                post: b.schema.post.clone(),
                reindex_active: if b.reindex_active {
                    BTreeMap::from([("job".to_string(), serde_json::json!(true))])
                } else {
                    BTreeMap::new()
                },
                rver: b.rver,
            }),
            None => Err(MorayError::named(MorayErrorKind::BucketNotFoundError, format!("bucket {name} not found"))),
        }
    }

    async fn create_bucket(&self, name: &str, schema: &BucketSchema) -> Result<(), MorayError> {
        if let Some(err) = Self::consume(&mut self.faults.lock().await.create_bucket) {
            return Err(err);
        }
        let version = schema.options.version;
        self.buckets.lock().await.insert(
            name.to_string(),
            BucketState { schema: schema.clone(), rver: version, reindex_active: true },
        );
        self.records.lock().await.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn update_bucket(&self, name: &str, schema: &BucketSchema) -> Result<(), MorayError> {
        if let Some(err) = Self::consume(&mut self.faults.lock().await.update_bucket) {
            return Err(err);
        }
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(name) {
            Some(b) => {
                b.schema = schema.clone();
                b.rver = schema.options.version;
                b.reindex_active = true;
                Ok(())
            }
            None => Err(MorayError::named(MorayErrorKind::BucketNotFoundError, format!("bucket {name} not found"))),
        }
    }

    async fn reindex_objects(&self, name: &str, count: u32) -> Result<ReindexResult, MorayError> {
        if let Some(err) = Self::consume(&mut self.faults.lock().await.reindex_objects) {
            return Err(err);
        }
        let mut buckets = self.buckets.lock().await;
        let Some(b) = buckets.get_mut(name) else {
            return Err(MorayError::named(MorayErrorKind::BucketNotFoundError, format!("bucket {name} not found")));
        };
        if !b.reindex_active {
            return Ok(ReindexResult { processed: 0 });
        }
        let remaining = self.records.lock().await.get(name).map(|m| m.len()).unwrap_or(0) as u32;
        let processed = remaining.min(count);
        // A real remote would process rows it hasn't yet reindexed; the fake
        // just needs one non-empty call followed by an empty one to exercise
        // the loop (§4.4).
        b.reindex_active = false;
        Ok(ReindexResult { processed })
    }

    async fn find_objects(
        &self,
        bucket: &str,
        filter: &Filter,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, MorayError> {
        if let Some(err) = Self::consume(&mut self.faults.lock().await.find_objects) {
            return Err(err);
        }
        let records = self.records.lock().await;
        let Some(table) = records.get(bucket) else {
            return Err(MorayError::named(MorayErrorKind::BucketNotFoundError, format!("bucket {bucket} not found")));
        };
        Ok(table
            .values()
            .filter(|r| matches_filter(filter, &r.value))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), MorayError> {
        if let Some(err) = Self::consume(&mut self.faults.lock().await.batch) {
            return Err(err);
        }
        let mut records = self.records.lock().await;
        for op in ops {
            let table = records.entry(op.bucket.clone()).or_default();
            let etag = self.next_etag();
            table.insert(op.key.clone(), StoredRecord { key: op.key, value: op.value, etag });
        }
        Ok(())
    }
}

/// A clock that only advances when told to, for deterministic tests of the
/// stale schema-cache retry budget (§4.6, §4.10).
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    notify: Notify,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { elapsed: Mutex::new(Duration::ZERO), notify: Notify::new() }
    }

    pub async fn advance(&self, d: Duration) {
        let mut e = self.elapsed.lock().await;
        *e += d;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        // `try_lock` because `now()` is sync; nothing else holds this lock
        // across an await point for longer than a single statement.
        *self.elapsed.try_lock().expect("ManualClock elapsed lock contended")
    }

    async fn sleep(&self, d: Duration) {
        let target = self.now() + d;
        loop {
            if self.now() >= target {
                return;
            }
            self.notify.notified().await;
        }
    }
}

pub fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
