#[cfg(not(windows))]
mod unsupported;
#[cfg(windows)]
mod windows;

#[cfg(not(windows))]
pub use self::unsupported::UnsupportedKnownFolder as PlatformKnownFolder;
#[cfg(windows)]
pub use self::windows::ShellKnownFolder as PlatformKnownFolder;

use crate::events::EventSink;
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

const SOURCE: &str = "known-folder";

/// The OS side of the "Desktop" known folder.
pub trait ShellFolderApi: Send + Sync {
    fn desktop_path(&self) -> Result<PathBuf>;
    fn set_desktop_path(&self, path: &Path) -> Result<()>;
    /// Tells running shells that what they show may be stale.
    fn notify_shell(&self) -> Result<()>;
}

/// `%USERPROFILE%\Desktop`, where the shell puts the desktop unless told otherwise.
pub fn default_desktop_path() -> PathBuf {
    shellexpand::path::tilde(Path::new("~"))
        .into_owned()
        .join("Desktop")
}

/// Compares two paths the way the shell does: case-insensitive, ignoring trailing separators.
pub fn same_path(a: &Path, b: &Path) -> bool {
    fn normalized(path: &Path) -> String {
        path.to_string_lossy()
            .trim_end_matches(['\\', '/'])
            .replace('/', "\\")
            .to_lowercase()
    }

    normalized(a) == normalized(b)
}

/// Reads and rewrites where the shell thinks the desktop lives. Only metadata changes here; no
/// file is ever moved.
#[derive(Clone)]
pub struct KnownFolderRedirector {
    api: Arc<dyn ShellFolderApi>,
    default_path: PathBuf,
    events: EventSink,
}

impl KnownFolderRedirector {
    pub fn new(api: Arc<dyn ShellFolderApi>, events: EventSink) -> Self {
        Self::with_default_path(api, default_desktop_path(), events)
    }

    pub fn with_default_path(
        api: Arc<dyn ShellFolderApi>,
        default_path: PathBuf,
        events: EventSink,
    ) -> Self {
        Self {
            api,
            default_path,
            events,
        }
    }

    pub fn current_path(&self) -> PathBuf {
        match self.api.desktop_path() {
            Ok(path) => path,
            Err(e) => {
                self.events
                    .error(SOURCE, "Failed to read the desktop folder location", &e);
                self.default_path.clone()
            }
        }
    }

    pub fn redirect_to(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        self.api
            .set_desktop_path(path)
            .with_context(|| format!("The shell refused {} as desktop folder", path.display()))?;

        log::debug!("Desktop known folder now points to {}", path.display());
        Ok(())
    }

    pub fn refresh_shell(&self) {
        if let Err(e) = self.api.notify_shell() {
            log::warn!("Shell refresh notification failed: {e:#}");
        }
    }
}
