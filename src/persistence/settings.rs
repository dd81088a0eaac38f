use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::persist::{FileStore, StateFormat};
use crate::graph_utils::layout::LayoutPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    // If None, use the OS state directory for the forest file
    #[serde(default)]
    pub autosave_override: Option<PathBuf>,
    #[serde(default)]
    pub state_format: StateFormat,
    // If None, exports land in the OS temporary directory
    #[serde(default)]
    pub export_override: Option<PathBuf>,
    #[serde(default)]
    pub layout: LayoutPolicy,
    // Knowledge source (Ollama-compatible chat endpoint)
    #[serde(default = "AppSettings::default_knowledge_endpoint")]
    pub knowledge_endpoint: String,
    #[serde(default = "AppSettings::default_knowledge_model")]
    pub knowledge_model: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            autosave_override: None,
            state_format: StateFormat::default(),
            export_override: None,
            layout: LayoutPolicy::default(),
            knowledge_endpoint: Self::default_knowledge_endpoint(),
            knowledge_model: Self::default_knowledge_model(),
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/Topic-Loom
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Topic-Loom");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\Topic-Loom
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("Topic-Loom");
            }
            return PathBuf::from("Topic-Loom");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/Topic-Loom or ~/.config/Topic-Loom
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("Topic-Loom");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("Topic-Loom");
        }
    }

    fn autosave_default_dir() -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            let tmp = std::env::var_os("TMPDIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"));
            return tmp.join("Topic-Loom");
        }
        #[cfg(target_os = "windows")]
        {
            // %LOCALAPPDATA%\Topic-Loom\Autosave else TEMP
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("Topic-Loom").join("Autosave");
            }
            if let Ok(temp) = std::env::var("TEMP") {
                return PathBuf::from(temp).join("Topic-Loom");
            }
            return PathBuf::from("Topic-Loom");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_STATE_HOME/topic-loom or ~/.local/state/topic-loom, else /tmp/Topic-Loom
            if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
                return PathBuf::from(xdg).join("topic-loom");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("state").join("topic-loom");
            }
            return PathBuf::from("/tmp").join("Topic-Loom");
        }
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_dir())
    }

    /// Reads `settings.json` from `dir`, migrating a legacy `settings.ron`
    /// when no JSON file exists. A failed migration write is only logged.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let json_path = dir.join("settings.json");
        if json_path.is_file() {
            let s = fs::read_to_string(json_path)?;
            let v: Self = serde_json::from_str(&s)?;
            return Ok(v.sanitized());
        }
        // Migrate from legacy RON if present
        let ron_path = dir.join("settings.ron");
        if ron_path.exists() {
            let s = fs::read_to_string(&ron_path)?;
            let v: Self = ron::from_str(&s)?;
            // Save immediately to JSON for future reads
            if let Err(e) = v.save_to(dir) {
                log::warn!("could not migrate {} to settings.json: {}", ron_path.display(), e);
            }
            return Ok(v.sanitized());
        }
        Ok(Self::default())
    }

    pub fn save_to(&self, dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = fs::File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Falls back to the default layout policy when the configured one has
    /// tiers out of order or non-finite constants.
    pub fn sanitized(mut self) -> Self {
        if !self.layout.is_valid() {
            log::warn!("layout policy in settings is invalid; using defaults");
            self.layout = LayoutPolicy::default();
        }
        self
    }

    pub fn autosave_dir(&self) -> PathBuf {
        if let Some(p) = &self.autosave_override {
            return p.clone();
        }
        Self::autosave_default_dir()
    }

    /// Default export directory when no override is set: {temp_dir}/Topic-Loom/exports
    pub fn export_default_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push("Topic-Loom");
        p.push("exports");
        p
    }

    pub fn export_dir(&self) -> PathBuf {
        if let Some(p) = &self.export_override {
            return p.clone();
        }
        Self::export_default_dir()
    }

    /// The file store these settings point at.
    pub fn file_store(&self) -> FileStore {
        FileStore::new(self.autosave_dir(), self.state_format)
    }

    pub(crate) fn default_knowledge_endpoint() -> String {
        "http://localhost:11434".to_string()
    }

    pub(crate) fn default_knowledge_model() -> String {
        "llama3.1".to_string()
    }
}
