//! In-process backends for the object and metadata stores.
//!
//! Both keep everything in memory and can be told to fail specific
//! operations, which is how the retry and recycle paths are exercised
//! without S3 or Postgres.

use crate::error::GalleryError;
use crate::metadata_store::PhotoRepository;
use crate::model::{DeleteStatus, ImageRecord, PHOTO_RECORD_TYPE};
use crate::object_store::{ObjectStore, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Injected failures, per operation. `None` fails forever, `Some(n)` fails `n` more times.
#[derive(Debug)]
struct Faults<Op> {
    plan: Mutex<HashMap<Op, Option<u32>>>,
}

impl<Op: Eq + Hash + Copy + std::fmt::Debug> Faults<Op> {
    fn new() -> Self {
        Self {
            plan: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, op: Op, times: Option<u32>) {
        self.plan.lock().insert(op, times);
    }

    fn clear(&self) {
        self.plan.lock().clear();
    }

    fn check(&self, op: Op) -> Result<(), GalleryError> {
        let mut plan = self.plan.lock();
        let fire = match plan.get_mut(&op) {
            None => false,
            Some(None) => true,
            Some(Some(0)) => false,
            Some(Some(remaining)) => {
                *remaining -= 1;
                true
            }
        };
        if fire {
            return Err(GalleryError::TransientStore(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

/// Object store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectOp {
    Get,
    Put,
    Copy,
    Delete,
}

/// Object store held in a map keyed by `(bucket, key)`
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    faults: Faults<ObjectOp>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Faults::new(),
        }
    }

    /// Make `op` fail on every call until cleared
    pub fn fail_always(&self, op: ObjectOp) {
        self.faults.set(op, None);
    }

    /// Make the next `times` calls of `op` fail
    pub fn fail_times(&self, op: ObjectOp, times: u32) {
        self.faults.set(op, Some(times));
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys currently stored in `bucket`, in order
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, GalleryError> {
        self.faults.check(ObjectOp::Get)?;
        self.object(bucket, key)
            .ok_or_else(|| GalleryError::NotFound(format!("{bucket}/{key}")))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GalleryError> {
        self.faults.check(ObjectOp::Put)?;
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), GalleryError> {
        self.faults.check(ObjectOp::Copy)?;
        let mut objects = self.objects.lock();
        let source = objects
            .get(&(bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| GalleryError::NotFound(format!("{bucket}/{src_key}")))?;
        objects.insert((bucket.to_string(), dst_key.to_string()), source);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), GalleryError> {
        self.faults.check(ObjectOp::Delete)?;
        self.objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Metadata operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordOp {
    Upsert,
    Get,
    List,
    UpdateLocation,
    Delete,
}

/// Photo repository held in a map keyed by `(photo_id, owner)`
pub struct MemoryPhotoRepository {
    records: Mutex<BTreeMap<(String, String), ImageRecord>>,
    faults: Faults<RecordOp>,
}

impl MemoryPhotoRepository {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            faults: Faults::new(),
        }
    }

    pub fn fail_always(&self, op: RecordOp) {
        self.faults.set(op, None);
    }

    pub fn fail_times(&self, op: RecordOp, times: u32) {
        self.faults.set(op, Some(times));
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn record(&self, photo_id: &str, owner: &str) -> Option<ImageRecord> {
        self.records
            .lock()
            .get(&(photo_id.to_string(), owner.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for MemoryPhotoRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhotoRepository for MemoryPhotoRepository {
    async fn upsert(&self, record: &ImageRecord) -> Result<(), GalleryError> {
        self.faults.check(RecordOp::Upsert)?;
        self.records.lock().insert(
            (record.photo_id.clone(), record.owner.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn get(&self, photo_id: &str, owner: &str) -> Result<Option<ImageRecord>, GalleryError> {
        self.faults.check(RecordOp::Get)?;
        Ok(self.record(photo_id, owner))
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        status: Option<DeleteStatus>,
    ) -> Result<Vec<ImageRecord>, GalleryError> {
        self.faults.check(RecordOp::List)?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.owner == owner)
            .filter(|r| status.map_or(true, |s| r.delete_status == s))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, GalleryError> {
        self.faults.check(RecordOp::List)?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.record_type == PHOTO_RECORD_TYPE)
            .cloned()
            .collect())
    }

    async fn update_location(
        &self,
        photo_id: &str,
        owner: &str,
        storage_key: &str,
        status: DeleteStatus,
    ) -> Result<(), GalleryError> {
        self.faults.check(RecordOp::UpdateLocation)?;
        let mut records = self.records.lock();
        let record = records
            .get_mut(&(photo_id.to_string(), owner.to_string()))
            .ok_or_else(|| GalleryError::NotFound(format!("photo {photo_id} for owner {owner}")))?;
        record.storage_key = storage_key.to_string();
        record.delete_status = status;
        Ok(())
    }

    async fn delete(&self, photo_id: &str, owner: &str) -> Result<(), GalleryError> {
        self.faults.check(RecordOp::Delete)?;
        self.records
            .lock()
            .remove(&(photo_id.to_string(), owner.to_string()))
            .map(|_| ())
            .ok_or_else(|| GalleryError::NotFound(format!("photo {photo_id} for owner {owner}")))
    }
}
