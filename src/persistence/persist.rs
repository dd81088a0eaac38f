use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{ForestError, ForestResult};
use crate::graph_utils::graph::{ForestSnapshot, NodeId, TopicEdge, TopicForest, TopicNode};
use crate::graph_utils::visibility::IdSet;

/// The persisted document: `{nodes, edges}` plus the fold state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedForest {
    pub nodes: Vec<TopicNode>,
    pub edges: Vec<TopicEdge>,
    // Older documents carry no fold state
    #[serde(default)]
    pub collapsed: Vec<NodeId>,
}

impl PersistedForest {
    pub fn from_runtime(forest: &TopicForest, collapsed: &IdSet) -> Self {
        Self {
            nodes: forest.nodes().to_vec(),
            edges: forest.edges().to_vec(),
            collapsed: collapsed.iter().cloned().collect(),
        }
    }

    /// Convert into runtime structures, enforcing the forest shape. Collapsed
    /// ids that no longer name a node are dropped.
    pub fn into_runtime(self) -> ForestResult<(TopicForest, IdSet)> {
        let snapshot = ForestSnapshot { nodes: self.nodes, edges: self.edges };
        let forest =
            TopicForest::from_snapshot(snapshot).map_err(|e| ForestError::PersistedStateInvalid(e.to_string()))?;
        let collapsed = self
            .collapsed
            .into_iter()
            .filter(|id| forest.contains(id))
            .collect();
        Ok((forest, collapsed))
    }
}

/// Where a session's forest survives between runs.
///
/// `load` yields `None` both when nothing was saved and when what was saved
/// is not a `{nodes, edges}` document.
pub trait PersistentStore {
    fn load(&self) -> anyhow::Result<Option<PersistedForest>>;
    fn save(&self, state: &PersistedForest) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFormat {
    #[default]
    Ron,
    Json,
}

impl StateFormat {
    pub fn extension(self) -> &'static str {
        match self {
            StateFormat::Ron => "ron",
            StateFormat::Json => "json",
        }
    }

    pub fn encode(self, state: &PersistedForest) -> anyhow::Result<String> {
        let s = match self {
            StateFormat::Ron => {
                let pretty = PrettyConfig::new().separate_tuple_members(true);
                ron::ser::to_string_pretty(state, pretty)?
            }
            StateFormat::Json => serde_json::to_string_pretty(state)?,
        };
        Ok(s)
    }

    pub fn decode(self, text: &str) -> ForestResult<PersistedForest> {
        let decoded = match self {
            StateFormat::Ron => ron::from_str::<PersistedForest>(text).map_err(|e| e.to_string()),
            StateFormat::Json => serde_json::from_str::<PersistedForest>(text).map_err(|e| e.to_string()),
        };
        decoded.map_err(ForestError::PersistedStateInvalid)
    }
}

/// File-backed store: one active state file plus optional timestamped versions.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    format: StateFormat,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, format: StateFormat) -> Self {
        Self { dir: dir.into(), format }
    }

    pub fn active_state_path(&self) -> PathBuf {
        self.dir.join(format!("state.{}", self.format.extension()))
    }

    pub fn versioned_state_path_now(&self) -> PathBuf {
        let now = OffsetDateTime::now_utc();
        let fmt = format_description!("[year][month][day]_[hour][minute][second]");
        let stamp = now.format(fmt).unwrap_or_else(|_| "unknown".to_string());
        self.dir.join(format!("state_{}.{}", stamp, self.format.extension()))
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp_path = path.with_extension(format!("{}.tmp", self.format.extension()));
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(data)?;
            f.flush()?;
        }
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    pub fn save_versioned(&self, state: &PersistedForest) -> anyhow::Result<PathBuf> {
        let s = self.format.encode(state)?;
        let path = self.versioned_state_path_now();
        self.atomic_write(&path, s.as_bytes())?;
        Ok(path)
    }

    pub fn load_from_path(&self, path: &Path) -> anyhow::Result<PersistedForest> {
        let text = fs::read_to_string(path)?;
        Ok(self.format.decode(&text)?)
    }

    pub fn list_versions(&self) -> anyhow::Result<Vec<PathBuf>> {
        let suffix = format!(".{}", self.format.extension());
        let mut entries: Vec<PathBuf> = Vec::new();
        if self.dir.exists() {
            for e in fs::read_dir(&self.dir)? {
                let p = e?.path();
                if let Some(name) = p.file_name().and_then(|s| s.to_str())
                    && name.starts_with("state_")
                    && name.ends_with(&suffix)
                {
                    entries.push(p);
                }
            }
        }
        // newest first; the stamp sorts lexically
        entries.sort();
        entries.reverse();
        Ok(entries)
    }
}

impl PersistentStore for FileStore {
    fn load(&self) -> anyhow::Result<Option<PersistedForest>> {
        let path = self.active_state_path();
        if !path.exists() {
            return Ok(None);
        }
        match self.load_from_path(&path) {
            Ok(state) => Ok(Some(state)),
            Err(e) => match e.downcast_ref::<ForestError>() {
                Some(ForestError::PersistedStateInvalid(reason)) => {
                    log::warn!("discarding {}: {}", path.display(), reason);
                    fs::remove_file(&path)?;
                    Ok(None)
                }
                _ => Err(e),
            },
        }
    }

    fn save(&self, state: &PersistedForest) -> anyhow::Result<()> {
        let s = self.format.encode(state)?;
        let path = self.active_state_path();
        self.atomic_write(&path, s.as_bytes())?;
        log::debug!("saved {} nodes to {}", state.nodes.len(), path.display());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let path = self.active_state_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-process store holding the encoded JSON text. Clones share the slot, so a
/// caller can keep a handle on what a session wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded text currently held, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|g| g.clone())
    }

    /// Replace the held text verbatim.
    pub fn put_raw(&self, text: impl Into<String>) -> anyhow::Result<()> {
        *self.slot.lock().map_err(|_| anyhow!("memory store lock poisoned"))? = Some(text.into());
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> anyhow::Result<Option<PersistedForest>> {
        let mut slot = self.slot.lock().map_err(|_| anyhow!("memory store lock poisoned"))?;
        let Some(text) = slot.as_deref() else {
            return Ok(None);
        };
        match StateFormat::Json.decode(text) {
            Ok(state) => Ok(Some(state)),
            Err(invalid) => {
                log::warn!("discarding in-memory state: {}", invalid);
                *slot = None;
                Ok(None)
            }
        }
    }

    fn save(&self, state: &PersistedForest) -> anyhow::Result<()> {
        let text = StateFormat::Json.encode(state)?;
        *self.slot.lock().map_err(|_| anyhow!("memory store lock poisoned"))? = Some(text);
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.slot.lock().map_err(|_| anyhow!("memory store lock poisoned"))? = None;
        Ok(())
    }
}
