use super::ShellFolderApi;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use windows::{
    Win32::{
        System::Com::CoTaskMemFree,
        UI::Shell::{
            FOLDERID_Desktop, KF_FLAG_DONT_VERIFY, SHCNE_ASSOCCHANGED, SHCNF_IDLIST,
            SHChangeNotify, SHGetKnownFolderPath, SHSetKnownFolderPath,
        },
    },
    core::HSTRING,
};

#[derive(Debug, Default)]
pub struct ShellKnownFolder;

impl ShellFolderApi for ShellKnownFolder {
    fn desktop_path(&self) -> Result<PathBuf> {
        unsafe {
            let raw = SHGetKnownFolderPath(&FOLDERID_Desktop, KF_FLAG_DONT_VERIFY, None)
                .context("SHGetKnownFolderPath failed")?;
            let path = raw.to_string();
            CoTaskMemFree(Some(raw.0 as *const _));

            Ok(PathBuf::from(path.context("Desktop path is not valid UTF-16")?))
        }
    }

    fn set_desktop_path(&self, path: &Path) -> Result<()> {
        unsafe { SHSetKnownFolderPath(&FOLDERID_Desktop, 0, None, &HSTRING::from(path)) }
            .context("SHSetKnownFolderPath failed")
    }

    fn notify_shell(&self) -> Result<()> {
        unsafe { SHChangeNotify(SHCNE_ASSOCCHANGED, SHCNF_IDLIST, None, None) };
        Ok(())
    }
}
