//! Persistent intent store (§4.E): a process-wide client of an external
//! key-value persistence service (out of scope per §1; only its interface
//! is specified). `StorehouseBackend` is that interface — `create` / `list`
//! / `retrieve` / `update`, matching `kytos.storehouse.*` (§6) — and
//! `FileStorehouse` is a concrete adapter so the crate runs standalone, in
//! the spirit of `firezone-firezone/rust/bin-shared/src/device_id.rs`'s
//! read-json-write-json-atomically persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::dpid::Dpid;
use crate::error::FlowManagerError;
use crate::model::{FlowCommand, FlowDescription};

pub const NAMESPACE: &str = "kytos.flow.persistence";
const RESERVED_ID_KEY: &str = "id";
const RESERVED_ID_VALUE: &str = "flow_persistence";

/// One entry of a DPID's `flow_list` (§3): the command that produced it,
/// alongside the flow description it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowListEntry {
    pub command: FlowCommand,
    pub flow: FlowDescription,
}

/// Stored intent for a single DPID (§3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DpidIntent {
    pub flow_list: Vec<FlowListEntry>,
}

/// `DPID → stored intent` (§3), the in-memory shape the orchestrator reads
/// and mutates; `IntentStore` is the only thing that round-trips it through
/// the reserved `id`-keyed persistence document.
pub type IntentMap = HashMap<Dpid, DpidIntent>;

/// The external persistence service's interface (§1, §6), reduced to the
/// four operations `kytos.storehouse.*` exposes. Real backends are async
/// and may be eventually consistent; `get_data`'s bounded poll (§4.E) exists
/// because of that.
#[async_trait]
pub trait StorehouseBackend: Send + Sync {
    async fn list_boxes(&self, namespace: &str) -> Result<Vec<String>, FlowManagerError>;
    async fn create_box(&self, namespace: &str) -> Result<String, FlowManagerError>;
    async fn retrieve_box(
        &self,
        namespace: &str,
        box_id: &str,
    ) -> Result<Option<serde_json::Value>, FlowManagerError>;
    async fn update_box(
        &self,
        namespace: &str,
        box_id: &str,
        data: serde_json::Value,
    ) -> Result<(), FlowManagerError>;
}

/// Single-file JSON backend: one file per namespace, named after the box id.
/// Stands in for the real storehouse the same way `device_id.rs` stands in
/// for a full device-registry service — read/parse/write, no locking beyond
/// what the caller (`IntentStore`) already serializes through its mutex.
pub struct FileStorehouse {
    root: PathBuf,
}

impl FileStorehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn box_path(&self, namespace: &str, box_id: &str) -> PathBuf {
        self.root.join(format!("{namespace}.{box_id}.json"))
    }
}

/// Logs the underlying I/O/serde failure and collapses it to the one error
/// kind §7 defines for an unretrievable persistence box.
fn persistence_unavailable(e: impl std::fmt::Display) -> FlowManagerError {
    tracing::error!(error = %e, "persistence backend operation failed");
    FlowManagerError::PersistenceUnavailable
}

#[async_trait]
impl StorehouseBackend for FileStorehouse {
    async fn list_boxes(&self, namespace: &str) -> Result<Vec<String>, FlowManagerError> {
        let prefix = format!("{namespace}.");
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence_unavailable(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(persistence_unavailable)?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(box_id) = rest.strip_suffix(".json") {
                    ids.push(box_id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn create_box(&self, namespace: &str) -> Result<String, FlowManagerError> {
        let box_id = "default".to_string();
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(persistence_unavailable)?;
        self.update_box(namespace, &box_id, serde_json::json!({}))
            .await?;
        Ok(box_id)
    }

    async fn retrieve_box(
        &self,
        namespace: &str,
        box_id: &str,
    ) -> Result<Option<serde_json::Value>, FlowManagerError> {
        match tokio::fs::read_to_string(self.box_path(namespace, box_id)).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(persistence_unavailable),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence_unavailable(e)),
        }
    }

    async fn update_box(
        &self,
        namespace: &str,
        box_id: &str,
        data: serde_json::Value,
    ) -> Result<(), FlowManagerError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(persistence_unavailable)?;
        let content = serde_json::to_vec_pretty(&data).map_err(persistence_unavailable)?;
        tokio::fs::write(self.box_path(namespace, box_id), content)
            .await
            .map_err(persistence_unavailable)
    }
}

/// Process-wide singleton client of the persistence service (§4.E, §9): one
/// value, constructed once, injected into the orchestrator.
pub struct IntentStore {
    backend: Box<dyn StorehouseBackend>,
    box_id: String,
    box_restore_timer: Duration,
    box_restore_attempts: u32,
    cache: RwLock<IntentMap>,
}

impl IntentStore {
    /// Bootstraps the singleton: list existing boxes under the namespace
    /// (§4.E); retrieve the first if one exists, otherwise create an empty
    /// one. Mirrors `storehouse.py`'s `list_stored_boxes` →
    /// `_get_or_create_a_box_from_list_of_boxes` round trip, which exists so
    /// a restart doesn't stomp an already-persisted intent map with an
    /// empty one.
    pub async fn connect(
        backend: Box<dyn StorehouseBackend>,
        box_restore_timer: Duration,
        box_restore_attempts: u32,
    ) -> Result<Self, FlowManagerError> {
        let existing = backend.list_boxes(NAMESPACE).await?;
        let box_id = match existing.into_iter().next() {
            Some(id) => id,
            None => backend.create_box(NAMESPACE).await?,
        };

        let mut store = Self {
            backend,
            box_id,
            box_restore_timer,
            box_restore_attempts,
            cache: RwLock::new(IntentMap::new()),
        };
        let doc = store.get_data().await?;
        store.cache = RwLock::new(doc);
        Ok(store)
    }

    /// Blocking (within this async context) accessor that polls until the
    /// record materializes, up to `box_restore_attempts` ×
    /// `box_restore_timer` (§4.E, §6). Fails with `PersistenceUnavailable`
    /// after the budget, at which point callers degrade to in-memory-only
    /// operation per §7.
    pub async fn get_data(&self) -> Result<IntentMap, FlowManagerError> {
        for attempt in 0..self.box_restore_attempts {
            match self.backend.retrieve_box(NAMESPACE, &self.box_id).await? {
                Some(doc) => return intent_from_doc(doc),
                None if attempt + 1 == self.box_restore_attempts => break,
                None => tokio::time::sleep(self.box_restore_timer).await,
            }
        }
        Err(FlowManagerError::PersistenceUnavailable)
    }

    /// Returns the currently cached intent map without re-touching the
    /// backend; the cache is kept in lockstep by every `save_flow` call.
    pub async fn cached(&self) -> IntentMap {
        self.cache.read().await.clone()
    }

    /// Overwrites the record's `data` with `doc` and updates the in-process
    /// cache (§4.E). Per `storehouse.py`'s `save_flow`, the *entire* intent
    /// map round-trips on every save, not a per-DPID slice.
    ///
    /// Fire-and-forget: failures are logged, not propagated — per §7,
    /// persistence errors must never block dispatch.
    pub async fn save_flow(&self, doc: IntentMap) {
        *self.cache.write().await = doc.clone();

        let box_id = self.box_id.clone();
        // update_box borrows &self.backend; since IntentStore itself isn't
        // `Clone` and the caller already awaits this, we update in place
        // rather than spawning a detached task (the coarse orchestrator
        // mutex in §5 already prevents callers from invoking `save_flow`
        // back-to-back for the same DPID before the first completes).
        if let Err(e) = self.backend.update_box(NAMESPACE, &box_id, doc_from_intent(&doc)).await {
            tracing::error!(error = %e, box_id, "failed to persist flow intent");
        }
    }
}

fn doc_from_intent(intent: &IntentMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (dpid, entry) in intent {
        map.insert(
            dpid.to_string(),
            serde_json::to_value(entry).expect("DpidIntent always serializes"),
        );
    }
    map.insert(
        RESERVED_ID_KEY.to_string(),
        serde_json::Value::String(RESERVED_ID_VALUE.to_string()),
    );
    serde_json::Value::Object(map)
}

fn intent_from_doc(doc: serde_json::Value) -> Result<IntentMap, FlowManagerError> {
    let serde_json::Value::Object(mut map) = doc else {
        return Ok(IntentMap::new());
    };
    map.remove(RESERVED_ID_KEY);

    let mut intent = IntentMap::new();
    for (key, value) in map {
        let dpid: Dpid = key.parse()?;
        let entry: DpidIntent = serde_json::from_value(value).map_err(persistence_unavailable)?;
        intent.insert(dpid, entry);
    }
    Ok(intent)
}

pub(crate) fn persistence_root(base: &Path) -> PathBuf {
    base.to_path_buf()
}
