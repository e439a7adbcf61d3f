use crate::services::virtual_desktop::VirtualDesktopId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DESKTOP_PREFIX: &str = "Desktop_";
pub const LAYOUT_PREFIX: &str = "Layout_";
pub const LAYOUT_EXTENSION: &str = "json";
pub const LAYOUTS_DIR: &str = "Layouts";
pub const RECYCLE_DIR: &str = "Recycled";
pub const LOGS_DIR: &str = "Logs";
const STATE_FILE: &str = "state.json";

/// Parses `<prefix><id>`; anything else, including a malformed id, is `None`.
pub fn parse_prefixed(name: &str, prefix: &str) -> Option<VirtualDesktopId> {
    name.strip_prefix(prefix)?.parse().ok()
}

/// Maps desktop ids to folders under the storage root.
///
/// The mapping is a naming convention, `<root>/Desktop_<id>`, so it can be inverted from any
/// path the shell reports. The empty id is special: it always maps to the user's original
/// desktop, which lives outside the root and is never created here.
#[derive(Debug, Clone)]
pub struct DesktopDirectoryRegistry {
    root: PathBuf,
    original: PathBuf,
}

impl DesktopDirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>, original: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            original: original.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn original_desktop(&self) -> &Path {
        &self.original
    }

    pub fn layouts_dir(&self) -> PathBuf {
        self.root.join(LAYOUTS_DIR)
    }

    pub fn recycle_dir(&self) -> PathBuf {
        self.root.join(RECYCLE_DIR)
    }

    /// Where the folder for `id` lives, without touching the disk.
    pub fn path_for(&self, id: VirtualDesktopId) -> PathBuf {
        if id.is_empty() {
            self.original.clone()
        } else {
            self.root.join(format!("{DESKTOP_PREFIX}{id}"))
        }
    }

    /// The folder for `id`, created on first use.
    pub fn folder_for(&self, id: VirtualDesktopId) -> Result<PathBuf> {
        let path = self.path_for(id);
        if !id.is_empty() && !path.is_dir() {
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            log::info!("Created folder {} for desktop {id}", path.display());
        }
        Ok(path)
    }

    /// Recovers the desktop id from a folder path. Anything that doesn't follow the naming
    /// convention, including a renamed managed folder, is taken for the original desktop.
    pub fn id_for(&self, path: &Path) -> VirtualDesktopId {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| parse_prefixed(name, DESKTOP_PREFIX))
            .unwrap_or(VirtualDesktopId::EMPTY)
    }

    pub fn is_managed(&self, path: &Path) -> bool {
        !self.id_for(path).is_empty()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredState {
    #[serde(default)]
    original_desktop: Option<PathBuf>,
}

/// Decides which folder is the user's real desktop and remembers the answer in
/// `<root>/state.json`.
///
/// Preference order: the configured override, the remembered answer, the shell's current
/// location, and `fallback` when the shell still points into a managed folder (a previous run
/// exited without restoring).
pub fn resolve_original(
    root: &Path,
    configured: Option<&Path>,
    current: &Path,
    fallback: &Path,
) -> Result<PathBuf> {
    let state_path = root.join(STATE_FILE);
    let stored = match fs::read_to_string(&state_path) {
        Ok(content) => match serde_json::from_str::<StoredState>(&content) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Ignoring unreadable {}: {e}", state_path.display());
                StoredState::default()
            }
        },
        Err(_) => StoredState::default(),
    };

    let registry = DesktopDirectoryRegistry::new(root, fallback);
    let original = if let Some(configured) = configured {
        configured.to_path_buf()
    } else if let Some(stored) = stored.original_desktop {
        stored
    } else if registry.is_managed(current) {
        log::warn!(
            "Desktop still points to {}, assuming {} is the original",
            current.display(),
            fallback.display()
        );
        fallback.to_path_buf()
    } else {
        current.to_path_buf()
    };

    let state = StoredState {
        original_desktop: Some(original.clone()),
    };
    fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;
    fs::write(&state_path, serde_json::to_string_pretty(&state)?)
        .with_context(|| format!("Failed to write {}", state_path.display()))?;

    Ok(original)
}
