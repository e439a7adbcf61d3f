use crate::{
    events::EventSink,
    folders::DesktopDirectoryRegistry,
    layout::IconLayoutStore,
    reconcile::FolderReconciler,
    services::{
        known_folder::{KnownFolderRedirector, same_path},
        virtual_desktop::{ChangeHandler, DesktopChangeDetector, VirtualDesktopId},
    },
};
use anyhow::{Context, Result};
use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use tokio::task::JoinHandle;

const SOURCE: &str = "switch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchSettings {
    pub refresh_poll_interval: Duration,
    pub refresh_max_attempts: u32,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            refresh_poll_interval: Duration::from_millis(100),
            refresh_max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Completed,
    /// The sequence started but a step failed; cleanup still ran.
    Aborted,
    /// Another switch was in flight, nothing ran.
    Dropped,
}

/// The only state shared between the polling task and manual callers.
#[derive(Debug, Default)]
struct SwitchState {
    processing: AtomicBool,
    last_known: Mutex<VirtualDesktopId>,
}

/// Held for the duration of one sequence; dropping it is the cleanup step.
struct ProcessingGuard<'a> {
    state: &'a SwitchState,
    target: VirtualDesktopId,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        *self
            .state
            .last_known
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = self.target;
        self.state.processing.store(false, Ordering::Release);
    }
}

/// Keeps the "Desktop" folder and icon layout in step with the active virtual desktop.
///
/// Every change runs one sequence: save the outgoing layout, make sure the new folder exists,
/// point the known folder at it, wait for the shell to follow, restore the incoming layout,
/// clean up after deleted desktops, and announce the switch. Sequences never overlap; a change
/// that arrives while one runs is dropped and picked up again by the next poll.
pub struct DesktopSwitchOrchestrator {
    registry: DesktopDirectoryRegistry,
    redirector: KnownFolderRedirector,
    layouts: IconLayoutStore,
    reconciler: FolderReconciler,
    detector: Arc<DesktopChangeDetector>,
    settings: SwitchSettings,
    state: SwitchState,
    poller: Mutex<Option<JoinHandle<()>>>,
    events: EventSink,
}

impl DesktopSwitchOrchestrator {
    pub fn new(
        registry: DesktopDirectoryRegistry,
        redirector: KnownFolderRedirector,
        layouts: IconLayoutStore,
        detector: Arc<DesktopChangeDetector>,
        settings: SwitchSettings,
        events: EventSink,
    ) -> Self {
        let reconciler = FolderReconciler::new(registry.clone(), events.clone());
        Self {
            registry,
            redirector,
            layouts,
            reconciler,
            detector,
            settings,
            state: SwitchState::default(),
            poller: Mutex::new(None),
            events,
        }
    }

    pub fn detector(&self) -> &Arc<DesktopChangeDetector> {
        &self.detector
    }

    pub fn is_switching(&self) -> bool {
        self.state.processing.load(Ordering::Acquire)
    }

    /// Binds the detector, brings the folder of the current desktop into place, then starts
    /// polling. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        self.detector.initialize();

        let current = self.detector.current_id();
        log::info!("Starting on desktop {current}");
        self.switch_to(current);

        let handler: Arc<dyn ChangeHandler> = self.clone();
        let handle = self.detector.start(handler);
        if let Some(previous) = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Stops polling and puts the original desktop back. The final switch is dropped if a
    /// manual switch happens to be running at that moment.
    pub async fn stop(&self) -> SwitchOutcome {
        self.detector.stop();

        let handle = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            log::warn!("Polling task ended abnormally: {e}");
        }

        log::info!("Restoring the original desktop");
        self.switch_to(VirtualDesktopId::EMPTY)
    }

    /// Runs one full sequence towards `id`, unless another one is already running.
    pub fn switch_to(&self, id: VirtualDesktopId) -> SwitchOutcome {
        let Some(_guard) = self.try_acquire(id) else {
            log::info!("Ignoring switch to {id}, another switch is in progress");
            return SwitchOutcome::Dropped;
        };

        log::info!("Switching to desktop {id}");
        match self.run_sequence(id) {
            Ok(()) => SwitchOutcome::Completed,
            Err(e) => {
                self.events
                    .error(SOURCE, format!("Switching to desktop {id} failed"), &e);
                SwitchOutcome::Aborted
            }
        }
    }

    fn try_acquire(&self, target: VirtualDesktopId) -> Option<ProcessingGuard<'_>> {
        self.state
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard {
                state: &self.state,
                target,
            })
    }

    fn run_sequence(&self, id: VirtualDesktopId) -> Result<()> {
        // the known folder still points at the desktop being left
        let outgoing = self.registry.id_for(&self.redirector.current_path());
        self.layouts.save(outgoing);

        let folder = self.registry.folder_for(id)?;
        self.redirector
            .redirect_to(&folder)
            .with_context(|| format!("Failed to redirect the desktop to {}", folder.display()))?;

        self.redirector.refresh_shell();
        if !self.wait_for_shell(&folder) {
            self.events.warn(
                SOURCE,
                format!(
                    "The shell did not report {} in time, continuing anyway",
                    folder.display()
                ),
            );
        }

        self.layouts.load(id);

        let mut live = self.detector.list_ids();
        if live.is_empty() {
            log::warn!("No virtual desktops reported, skipping folder cleanup");
        } else {
            live.push(id);
            live.push(VirtualDesktopId::EMPTY);
            self.reconciler.reconcile(&live);
        }

        self.events.desktop_switched(id);
        Ok(())
    }

    /// Polls until the shell reports `folder` as the desktop, up to the configured ceiling.
    fn wait_for_shell(&self, folder: &Path) -> bool {
        for _ in 0..self.settings.refresh_max_attempts {
            if same_path(&self.redirector.current_path(), folder) {
                return true;
            }
            thread::sleep(self.settings.refresh_poll_interval);
        }
        same_path(&self.redirector.current_path(), folder)
    }
}

impl ChangeHandler for DesktopSwitchOrchestrator {
    fn last_known_id(&self) -> VirtualDesktopId {
        *self
            .state
            .last_known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn desktop_changed(&self, id: VirtualDesktopId) {
        self.switch_to(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{ServiceEvent, Severity},
        services::{
            desktop_icons::{IconPlacement, IconSurface},
            virtual_desktop::KNOWN_CANDIDATES,
        },
        testing::{FakeBinder, FakeDesktops, FakeIconSurface, FakeShellFolder, screen},
    };
    use std::{fs, path::PathBuf};
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    struct Fixture {
        _dir: TempDir,
        original: PathBuf,
        registry: DesktopDirectoryRegistry,
        desktops: FakeDesktops,
        shell: Arc<FakeShellFolder>,
        icons: Arc<FakeIconSurface>,
        orchestrator: Arc<DesktopSwitchOrchestrator>,
        rx: broadcast::Receiver<ServiceEvent>,
        bind_attempts: Arc<Mutex<Vec<&'static str>>>,
    }

    fn id(n: u128) -> VirtualDesktopId {
        VirtualDesktopId::from_u128(n)
    }

    fn fixture(ids: &[u128]) -> Fixture {
        fixture_with_bindings(ids, &["win10"])
    }

    fn fixture_with_bindings(ids: &[u128], accepted: &[&'static str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("Desktop");
        fs::create_dir_all(&original).unwrap();

        let events = EventSink::new(256);
        let rx = events.subscribe();
        let registry = DesktopDirectoryRegistry::new(dir.path().join("root"), &original);
        let desktops = FakeDesktops::new(ids);
        let shell = FakeShellFolder::new(&original);
        let icons = FakeIconSurface::new(
            vec![screen(0, true, 1920, 1080, 0, 0)],
            &[("Docs", 100, 100), ("Notes", 200, 200)],
        );

        let binder = FakeBinder::new(desktops.clone(), accepted);
        let bind_attempts = binder.attempts();
        let detector = Arc::new(DesktopChangeDetector::new(
            Box::new(binder),
            KNOWN_CANDIDATES.to_vec(),
            Duration::from_millis(5),
            events.clone(),
        ));
        let orchestrator = Arc::new(DesktopSwitchOrchestrator::new(
            registry.clone(),
            KnownFolderRedirector::new(shell.clone(), events.clone()),
            IconLayoutStore::new(registry.layouts_dir(), icons.clone(), events.clone()),
            detector,
            SwitchSettings {
                refresh_poll_interval: Duration::from_millis(1),
                refresh_max_attempts: 3,
            },
            events,
        ));

        Fixture {
            _dir: dir,
            original,
            registry,
            desktops,
            shell,
            icons,
            orchestrator,
            rx,
            bind_attempts,
        }
    }

    fn switched(rx: &mut broadcast::Receiver<ServiceEvent>) -> Vec<VirtualDesktopId> {
        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServiceEvent::DesktopSwitched(id) = event {
                ids.push(id);
            }
        }
        ids
    }

    fn notifications(rx: &mut broadcast::Receiver<ServiceEvent>, severity: Severity) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ServiceEvent::Notification(ref n) if n.severity == severity) {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn switch_runs_the_whole_sequence() {
        let mut f = fixture(&[1, 2]);

        assert_eq!(f.orchestrator.switch_to(id(1)), SwitchOutcome::Completed);

        let folder = f.registry.path_for(id(1));
        assert!(folder.is_dir());
        assert_eq!(f.shell.current(), folder);
        assert_eq!(f.orchestrator.last_known_id(), id(1));
        assert!(!f.orchestrator.is_switching());
        // the original desktop's layout was saved on the way out
        assert!(
            f.registry
                .layouts_dir()
                .join(format!("Layout_{}.json", VirtualDesktopId::EMPTY))
                .is_file()
        );
        assert_eq!(switched(&mut f.rx), vec![id(1)]);
    }

    #[test]
    fn layouts_follow_their_desktop() {
        let f = fixture(&[1, 2]);

        f.orchestrator.switch_to(id(1));
        f.icons.scramble();
        let on_one = f.icons.positions();

        f.orchestrator.switch_to(id(2));
        f.icons
            .place(&[IconPlacement {
                slot: 1,
                x: 640,
                y: 480,
            }])
            .unwrap();
        let on_two = f.icons.positions();
        assert_ne!(on_one, on_two);

        f.orchestrator.switch_to(id(1));
        assert_eq!(f.icons.positions(), on_one);

        f.orchestrator.switch_to(id(2));
        assert_eq!(f.icons.positions(), on_two);
    }

    #[test]
    fn concurrent_change_is_dropped() {
        let mut f = fixture(&[1, 2]);
        let (entered, release) = f.shell.hold_next_write();

        let worker = {
            let orchestrator = Arc::clone(&f.orchestrator);
            thread::spawn(move || orchestrator.switch_to(id(1)))
        };

        entered.recv().unwrap();
        assert!(f.orchestrator.is_switching());
        assert_eq!(f.orchestrator.switch_to(id(2)), SwitchOutcome::Dropped);
        f.orchestrator.desktop_changed(id(2));

        release.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), SwitchOutcome::Completed);

        assert_eq!(switched(&mut f.rx), vec![id(1)]);
        assert_eq!(f.shell.history(), vec![f.registry.path_for(id(1))]);
        assert!(!f.orchestrator.is_switching());
    }

    #[test]
    fn dropped_change_is_picked_up_by_the_next_poll() {
        let f = fixture(&[1, 2]);
        f.orchestrator.switch_to(id(1));

        let (entered, release) = f.shell.hold_next_write();
        let worker = {
            let orchestrator = Arc::clone(&f.orchestrator);
            thread::spawn(move || orchestrator.switch_to(id(1)))
        };
        entered.recv().unwrap();

        f.desktops.set_current(2);
        assert!(f.orchestrator.detector().poll_once(&*f.orchestrator));
        assert_eq!(f.orchestrator.last_known_id(), id(1));

        release.send(()).unwrap();
        worker.join().unwrap();

        assert!(f.orchestrator.detector().poll_once(&*f.orchestrator));
        assert_eq!(f.orchestrator.last_known_id(), id(2));
        assert_eq!(f.shell.current(), f.registry.path_for(id(2)));
    }

    #[test]
    fn refused_redirect_aborts_but_cleans_up() {
        let mut f = fixture(&[1, 2]);
        f.shell.reject_writes(true);

        assert_eq!(f.orchestrator.switch_to(id(1)), SwitchOutcome::Aborted);
        assert!(!f.orchestrator.is_switching());
        assert_eq!(f.orchestrator.last_known_id(), id(1));
        assert_eq!(f.shell.current(), f.original);
        assert_eq!(notifications(&mut f.rx, Severity::Error), 1);

        f.shell.reject_writes(false);
        assert_eq!(f.orchestrator.switch_to(id(2)), SwitchOutcome::Completed);
        assert_eq!(switched(&mut f.rx), vec![id(2)]);
    }

    #[test]
    fn slow_shell_only_warns() {
        let mut f = fixture(&[1]);
        f.shell.ignore_writes(true);

        assert_eq!(f.orchestrator.switch_to(id(1)), SwitchOutcome::Completed);
        assert_eq!(notifications(&mut f.rx, Severity::Warning), 1);
    }

    #[test]
    fn deleted_desktops_are_retired_after_a_switch() {
        let f = fixture(&[1, 2, 3]);
        f.orchestrator.switch_to(id(3));
        fs::write(f.registry.path_for(id(3)).join("todo.txt"), "x").unwrap();
        f.orchestrator.switch_to(id(1));

        f.desktops.set_ids(&[1, 2]);
        f.orchestrator.switch_to(id(2));

        assert!(!f.registry.path_for(id(3)).exists());
        assert!(f.registry.recycle_dir().join("todo.txt").is_file());
        assert!(f.registry.path_for(id(1)).is_dir());
        assert!(f.registry.path_for(id(2)).is_dir());
    }

    #[test]
    fn failed_enumeration_does_not_retire_anything() {
        let f = fixture(&[1, 2]);
        f.orchestrator.switch_to(id(1));

        f.desktops.set_ids(&[]);
        f.orchestrator.switch_to(id(2));

        assert!(f.registry.path_for(id(1)).is_dir());
        assert!(f.registry.path_for(id(2)).is_dir());
    }

    #[tokio::test]
    async fn stop_then_start_passes_through_the_original_desktop() {
        let mut f = fixture(&[1, 2]);
        f.desktops.set_current(2);

        f.orchestrator.start();
        assert_eq!(f.shell.current(), f.registry.path_for(id(2)));

        assert_eq!(f.orchestrator.stop().await, SwitchOutcome::Completed);
        assert_eq!(f.shell.current(), f.original);

        f.orchestrator.start();
        assert_eq!(
            f.shell.history(),
            vec![
                f.registry.path_for(id(2)),
                f.original.clone(),
                f.registry.path_for(id(2)),
            ]
        );
        assert_eq!(switched(&mut f.rx), vec![id(2), VirtualDesktopId::EMPTY, id(2)]);

        f.orchestrator.stop().await;
    }

    #[tokio::test]
    async fn polling_follows_desktop_changes() {
        let f = fixture(&[1, 2]);
        f.orchestrator.start();

        f.desktops.set_current(2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.shell.current(), f.registry.path_for(id(2)));
        assert_eq!(f.orchestrator.last_known_id(), id(2));

        f.orchestrator.stop().await;
        assert_eq!(f.shell.current(), f.original);
    }

    #[tokio::test]
    async fn restart_reuses_the_binding_outcome() {
        let mut f = fixture_with_bindings(&[1, 2], &[]);

        f.orchestrator.start();
        f.orchestrator.stop().await;
        f.orchestrator.start();
        f.orchestrator.stop().await;

        assert_eq!(f.bind_attempts.lock().unwrap().len(), KNOWN_CANDIDATES.len());
        assert!(f.orchestrator.detector().is_degraded());

        let degraded_warnings = std::iter::from_fn(|| f.rx.try_recv().ok())
            .filter(|event| {
                matches!(
                    event,
                    ServiceEvent::Notification(n)
                        if n.severity == Severity::Warning && n.source == "detector"
                )
            })
            .count();
        assert_eq!(degraded_warnings, 1);
        assert_eq!(f.shell.current(), f.original);
    }

    #[tokio::test]
    async fn final_switch_is_dropped_while_a_manual_switch_runs() {
        let mut f = fixture(&[1, 2]);
        f.orchestrator.start();
        let _ = switched(&mut f.rx);

        let (entered, release) = f.shell.hold_next_write();
        let worker = {
            let orchestrator = Arc::clone(&f.orchestrator);
            thread::spawn(move || orchestrator.switch_to(id(2)))
        };
        entered.recv().unwrap();

        assert_eq!(f.orchestrator.stop().await, SwitchOutcome::Dropped);

        release.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), SwitchOutcome::Completed);
        assert_eq!(switched(&mut f.rx), vec![id(2)]);
        assert_eq!(f.shell.current(), f.registry.path_for(id(2)));
    }
}
