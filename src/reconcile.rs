use crate::{
    events::EventSink,
    folders::{
        DESKTOP_PREFIX, DesktopDirectoryRegistry, LAYOUT_EXTENSION, LAYOUT_PREFIX,
        parse_prefixed,
    },
    services::virtual_desktop::VirtualDesktopId,
};
use anyhow::{Context, Result};
use std::{
    collections::HashSet,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

const SOURCE: &str = "reconcile";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed_folders: usize,
    pub recycled_folders: usize,
    pub recycled_entries: usize,
    pub removed_layouts: usize,
}

/// Retires folders and layouts of desktops that no longer exist. Contents are moved to the
/// recycle folder, never deleted; names outside the `Desktop_<id>` / `Layout_<id>` convention
/// are never touched.
#[derive(Clone)]
pub struct FolderReconciler {
    registry: DesktopDirectoryRegistry,
    events: EventSink,
}

impl FolderReconciler {
    pub fn new(registry: DesktopDirectoryRegistry, events: EventSink) -> Self {
        Self { registry, events }
    }

    /// One best-effort pass. The first error ends the pass and is reported.
    pub fn reconcile(&self, live: &[VirtualDesktopId]) -> ReconcileReport {
        let live: HashSet<VirtualDesktopId> = live.iter().copied().collect();
        let mut report = ReconcileReport::default();

        if let Err(e) = self
            .retire_folders(&live, &mut report)
            .and_then(|_| self.retire_layouts(&live, &mut report))
        {
            self.events
                .error(SOURCE, "Cleaning up stale desktop folders failed", &e);
        }

        if report != ReconcileReport::default() {
            log::info!("Reconciled desktop folders: {report:?}");
        }
        report
    }

    fn is_retired(live: &HashSet<VirtualDesktopId>, id: VirtualDesktopId) -> bool {
        !id.is_empty() && !live.contains(&id)
    }

    fn retire_folders(
        &self,
        live: &HashSet<VirtualDesktopId>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let root = self.registry.root();
        if !root.is_dir() {
            return Ok(());
        }

        let entries =
            fs::read_dir(root).with_context(|| format!("Failed to list {}", root.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_prefixed(name, DESKTOP_PREFIX))
            else {
                continue;
            };

            if Self::is_retired(live, id) {
                self.retire_folder(&entry.path(), report)?;
            }
        }
        Ok(())
    }

    fn retire_folder(&self, folder: &Path, report: &mut ReconcileReport) -> Result<()> {
        let entries = fs::read_dir(folder)
            .with_context(|| format!("Failed to list {}", folder.display()))?
            .collect::<Result<Vec<_>, _>>()?;

        if entries.is_empty() {
            fs::remove_dir(folder)
                .with_context(|| format!("Failed to remove {}", folder.display()))?;
            log::info!("Removed empty folder {}", folder.display());
            report.removed_folders += 1;
            return Ok(());
        }

        let recycle = self.registry.recycle_dir();
        fs::create_dir_all(&recycle)
            .with_context(|| format!("Failed to create {}", recycle.display()))?;

        for entry in &entries {
            let target = unique_target(&recycle, &entry.file_name());
            fs::rename(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to move {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            report.recycled_entries += 1;
        }

        fs::remove_dir(folder).with_context(|| format!("Failed to remove {}", folder.display()))?;
        log::info!(
            "Moved {} entries of {} to {}",
            entries.len(),
            folder.display(),
            recycle.display()
        );
        report.recycled_folders += 1;
        Ok(())
    }

    fn retire_layouts(
        &self,
        live: &HashSet<VirtualDesktopId>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let dir = self.registry.layouts_dir();
        if !dir.is_dir() {
            return Ok(());
        }

        let suffix = format!(".{LAYOUT_EXTENSION}");
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(suffix.as_str()))
                .and_then(|stem| parse_prefixed(stem, LAYOUT_PREFIX))
            else {
                continue;
            };

            if Self::is_retired(live, id) {
                let path = entry.path();
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                log::info!("Removed layout of retired desktop {id}");
                report.removed_layouts += 1;
            }
        }
        Ok(())
    }
}

/// `dir/name`, or `dir/stem (n).ext` with the smallest free `n`.
fn unique_target(dir: &Path, name: &OsStr) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}
