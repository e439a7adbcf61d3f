use super::ShellFolderApi;
use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct UnsupportedKnownFolder;

impl ShellFolderApi for UnsupportedKnownFolder {
    fn desktop_path(&self) -> Result<PathBuf> {
        bail!("Known folders are a Windows feature")
    }

    fn set_desktop_path(&self, path: &Path) -> Result<()> {
        bail!("Cannot redirect the desktop to {} on this platform", path.display())
    }

    fn notify_shell(&self) -> Result<()> {
        Ok(())
    }
}
