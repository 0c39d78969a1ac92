#![allow(dead_code)]

//! In-memory stand-ins for the API server used by the reconciliation tests.

use async_trait::async_trait;
use controller::crds::{Labels, NamespaceLabel, NamespaceLabelSpec, NamespaceLabelStatus};
use controller::retry::RetryConfig;
use controller::tasks::label::{
    EventPublisher, LabelEngine, PolicySource, ProtectedSet, RequestStore, Severity,
    TargetSnapshot, TargetStore,
};
use controller::tasks::types::FINALIZER_NAME;
use controller::{Error, RequestKey, Result};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Namespaces with a version counter; stale writes are rejected with a conflict
#[derive(Default)]
pub struct FakeTargets {
    namespaces: Mutex<HashMap<String, (Labels, u64)>>,
    conflicts_to_inject: AtomicU32,
    failures_to_inject: AtomicU32,
    persists: AtomicU32,
}

impl FakeTargets {
    pub fn add(&self, name: &str, initial: Labels) {
        self.namespaces
            .lock()
            .unwrap()
            .insert(name.to_string(), (initial, 1));
    }

    pub fn remove(&self, name: &str) {
        self.namespaces.lock().unwrap().remove(name);
    }

    pub fn labels(&self, name: &str) -> Labels {
        self.namespaces
            .lock()
            .unwrap()
            .get(name)
            .map(|(labels, _)| labels.clone())
            .unwrap_or_default()
    }

    /// Out-of-band write by some other actor
    pub fn set_label(&self, name: &str, key: &str, value: &str) {
        let mut namespaces = self.namespaces.lock().unwrap();
        let entry = namespaces.get_mut(name).unwrap();
        entry.0.insert(key.to_string(), value.to_string());
        entry.1 += 1;
    }

    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    pub fn inject_failures(&self, count: u32) {
        self.failures_to_inject.store(count, Ordering::SeqCst);
    }

    pub fn persist_count(&self) -> u32 {
        self.persists.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TargetStore for FakeTargets {
    async fn fetch(&self, name: &str) -> Result<TargetSnapshot> {
        // Let concurrent reconciliations interleave between read and write
        tokio::task::yield_now().await;

        let namespaces = self.namespaces.lock().unwrap();
        let (labels, version) = namespaces
            .get(name)
            .ok_or_else(|| Error::not_found("Namespace", name))?;
        Ok(TargetSnapshot {
            name: name.to_string(),
            labels: labels.clone(),
            resource_version: version.to_string(),
        })
    }

    async fn persist(&self, snapshot: &TargetSnapshot, labels: &Labels) -> Result<()> {
        tokio::task::yield_now().await;

        if Self::take(&self.failures_to_inject) {
            return Err(Error::TransientIo("injected failure".to_string()));
        }
        if Self::take(&self.conflicts_to_inject) {
            return Err(Error::Conflict {
                kind: "Namespace",
                name: snapshot.name.clone(),
            });
        }

        let mut namespaces = self.namespaces.lock().unwrap();
        let entry = namespaces
            .get_mut(&snapshot.name)
            .ok_or_else(|| Error::not_found("Namespace", snapshot.name.clone()))?;
        if entry.1.to_string() != snapshot.resource_version {
            return Err(Error::Conflict {
                kind: "Namespace",
                name: snapshot.name.clone(),
            });
        }
        entry.0 = labels.clone();
        entry.1 += 1;
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// NamespaceLabel objects, finalized and removed the way the API server does
#[derive(Default)]
pub struct FakeRequests {
    objects: Mutex<BTreeMap<RequestKey, NamespaceLabel>>,
    next_version: AtomicU32,
    status_writes: AtomicU32,
    lost_status_write: AtomicU32,
}

impl FakeRequests {
    fn bump(&self, obj: &mut NamespaceLabel) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        obj.metadata.resource_version = Some(version.to_string());
    }

    pub fn create(&self, namespace: &str, name: &str, desired: Labels) -> RequestKey {
        let mut obj = NamespaceLabel::new(name, NamespaceLabelSpec { labels: desired });
        obj.metadata.namespace = Some(namespace.to_string());
        obj.metadata.generation = Some(1);
        self.insert(obj)
    }

    pub fn insert(&self, mut obj: NamespaceLabel) -> RequestKey {
        let key = obj.key().unwrap();
        self.bump(&mut obj);
        self.objects.lock().unwrap().insert(key.clone(), obj);
        key
    }

    pub fn update_spec(&self, key: &RequestKey, desired: Labels) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).unwrap();
        obj.spec.labels = desired;
        obj.metadata.generation = obj.metadata.generation.map(|g| g + 1);
        self.bump(obj);
    }

    /// Request deletion; objects without finalizers disappear immediately
    pub fn delete(&self, key: &RequestKey) {
        let mut objects = self.objects.lock().unwrap();
        let Some(obj) = objects.get_mut(key) else {
            return;
        };
        if obj.metadata.finalizers.as_ref().map_or(true, Vec::is_empty) {
            objects.remove(key);
            return;
        }
        obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        self.bump(obj);
    }

    pub fn fetch(&self, key: &RequestKey) -> Option<NamespaceLabel> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn status(&self, key: &RequestKey) -> Option<NamespaceLabelStatus> {
        self.fetch(key).and_then(|obj| obj.status)
    }

    pub fn has_finalizer(&self, key: &RequestKey) -> bool {
        self.fetch(key)
            .is_some_and(|obj| obj.has_finalizer(FINALIZER_NAME))
    }

    pub fn status_writes(&self) -> u32 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Fail the `nth` status write from now (1-based) as if the process died
    pub fn lose_status_write(&self, nth: u32) {
        let attempted = self.status_writes.load(Ordering::SeqCst);
        self.lost_status_write.store(attempted + nth, Ordering::SeqCst);
    }

    /// Overwrite a stored status out of band
    pub fn set_status(&self, key: &RequestKey, status: NamespaceLabelStatus) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).unwrap();
        obj.status = Some(status);
        self.bump(obj);
    }
}

#[async_trait]
impl RequestStore for FakeRequests {
    async fn get(&self, key: &RequestKey) -> Result<NamespaceLabel> {
        self.fetch(key)
            .ok_or_else(|| Error::not_found("NamespaceLabel", key.to_string()))
    }

    async fn list_for_target(&self, namespace: &str) -> Result<Vec<NamespaceLabel>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|obj| obj.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn set_finalizers(
        &self,
        request: &NamespaceLabel,
        finalizers: Vec<String>,
    ) -> Result<NamespaceLabel> {
        let key = request.key().unwrap();
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("NamespaceLabel", key.to_string()))?;
        if obj.metadata.resource_version != request.metadata.resource_version {
            return Err(Error::Conflict {
                kind: "NamespaceLabel",
                name: key.to_string(),
            });
        }

        obj.metadata.finalizers = Some(finalizers);
        self.bump(obj);
        let updated = obj.clone();

        let finalized = updated.is_deleting()
            && updated.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
        if finalized {
            objects.remove(&key);
        }
        Ok(updated)
    }

    async fn write_status(
        &self,
        key: &RequestKey,
        _previous: Option<&NamespaceLabelStatus>,
        next: &NamespaceLabelStatus,
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found("NamespaceLabel", key.to_string()))?;

        let attempt = self.status_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.lost_status_write.load(Ordering::SeqCst) {
            return Err(Error::TransientIo("injected status failure".to_string()));
        }

        obj.status = Some(next.clone());
        self.bump(obj);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub severity: Severity,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        severity: Severity,
        reason: &str,
        note: String,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            severity,
            reason: reason.to_string(),
            note,
        });
    }
}

#[derive(Clone)]
pub enum PolicyState {
    Loaded(ProtectedSet),
    Missing,
    Malformed,
}

pub struct StaticPolicy {
    state: Mutex<PolicyState>,
}

impl StaticPolicy {
    pub fn set(&self, state: PolicyState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl PolicySource for StaticPolicy {
    async fn load(&self) -> Result<ProtectedSet> {
        match self.state.lock().unwrap().clone() {
            PolicyState::Loaded(protected) => Ok(protected),
            PolicyState::Missing => Err(Error::ConfigMissing("PROTECTED_LABELS".to_string())),
            PolicyState::Malformed => Err(Error::ConfigMalformed("PROTECTED_LABELS".to_string())),
        }
    }
}

/// Engine wired to fresh fakes
pub struct Harness {
    pub requests: Arc<FakeRequests>,
    pub targets: Arc<FakeTargets>,
    pub events: Arc<RecordingEvents>,
    pub policy: Arc<StaticPolicy>,
    pub engine: LabelEngine,
}

impl Harness {
    pub fn new(protected: ProtectedSet) -> Self {
        Self::with_retry(protected, RetryConfig::with_max_attempts(10).immediate())
    }

    pub fn with_retry(protected: ProtectedSet, retry: RetryConfig) -> Self {
        init_tracing();
        let requests = Arc::new(FakeRequests::default());
        let targets = Arc::new(FakeTargets::default());
        let events = Arc::new(RecordingEvents::default());
        let policy = Arc::new(StaticPolicy {
            state: Mutex::new(PolicyState::Loaded(protected)),
        });

        let engine = LabelEngine::new(
            requests.clone(),
            targets.clone(),
            policy.clone(),
            events.clone(),
            retry,
        );

        Self {
            requests,
            targets,
            events,
            policy,
            engine,
        }
    }
}
