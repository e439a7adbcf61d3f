//! In-memory stand-ins for the shell, shared by the unit tests.

use crate::services::{
    desktop_icons::{DesktopIcon, IconPlacement, IconSurface, ScreenInfo},
    known_folder::ShellFolderApi,
    virtual_desktop::{BindingCandidate, DesktopEnumerationService, ServiceBinder, VirtualDesktopId},
};
use anyhow::{Result, anyhow, bail};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
};

pub fn screen(
    index: u32,
    is_primary: bool,
    width: i32,
    height: i32,
    left: i32,
    top: i32,
) -> ScreenInfo {
    ScreenInfo {
        index,
        is_primary,
        width,
        height,
        left,
        top,
    }
}

#[derive(Debug, Default)]
struct DesktopsState {
    current: u128,
    ids: Vec<u128>,
    failing: bool,
}

/// Virtual desktops identified by small integers.
#[derive(Debug, Clone, Default)]
pub struct FakeDesktops(Arc<Mutex<DesktopsState>>);

impl FakeDesktops {
    pub fn new(ids: &[u128]) -> Self {
        Self(Arc::new(Mutex::new(DesktopsState {
            current: ids.first().copied().unwrap_or_default(),
            ids: ids.to_vec(),
            failing: false,
        })))
    }

    pub fn set_current(&self, id: u128) {
        self.0.lock().unwrap().current = id;
    }

    pub fn set_ids(&self, ids: &[u128]) {
        self.0.lock().unwrap().ids = ids.to_vec();
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }
}

impl DesktopEnumerationService for FakeDesktops {
    fn current_id(&self) -> Result<VirtualDesktopId> {
        let state = self.0.lock().unwrap();
        if state.failing {
            bail!("RPC server unavailable");
        }
        Ok(VirtualDesktopId::from_u128(state.current))
    }

    fn list_ids(&self) -> Result<Vec<VirtualDesktopId>> {
        let state = self.0.lock().unwrap();
        if state.failing {
            bail!("RPC server unavailable");
        }
        Ok(state.ids.iter().copied().map(VirtualDesktopId::from_u128).collect())
    }

    fn switch_to(&self, id: VirtualDesktopId) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if !state.ids.contains(&id.to_u128()) {
            bail!("No virtual desktop with id {id}");
        }
        state.current = id.to_u128();
        Ok(())
    }
}

/// Accepts only the named candidates and records every attempt.
pub struct FakeBinder {
    desktops: FakeDesktops,
    accepted: Vec<&'static str>,
    attempts: Arc<Mutex<Vec<&'static str>>>,
}

impl FakeBinder {
    pub fn new(desktops: FakeDesktops, accepted: &[&'static str]) -> Self {
        Self {
            desktops,
            accepted: accepted.to_vec(),
            attempts: Arc::default(),
        }
    }

    pub fn attempts(&self) -> Arc<Mutex<Vec<&'static str>>> {
        Arc::clone(&self.attempts)
    }
}

impl ServiceBinder for FakeBinder {
    fn bind(&self, candidate: &BindingCandidate) -> Result<Box<dyn DesktopEnumerationService>> {
        self.attempts.lock().unwrap().push(candidate.name);
        if self.accepted.contains(&candidate.name) {
            Ok(Box::new(self.desktops.clone()))
        } else {
            Err(anyhow!("E_NOINTERFACE"))
        }
    }
}

#[derive(Debug, Default)]
struct ShellState {
    current: PathBuf,
    history: Vec<PathBuf>,
    reject_writes: bool,
    fail_reads: bool,
    ignore_writes: bool,
}

/// The "Desktop" known folder. Writes can be rejected, ignored, or held until released.
#[derive(Debug, Default)]
pub struct FakeShellFolder {
    state: Mutex<ShellState>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl FakeShellFolder {
    pub fn new(current: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ShellState {
                current: current.into(),
                ..Default::default()
            }),
            gate: Mutex::new(None),
        })
    }

    pub fn history(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn current(&self) -> PathBuf {
        self.state.lock().unwrap().current.clone()
    }

    pub fn reject_writes(&self, reject: bool) {
        self.state.lock().unwrap().reject_writes = reject;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Accepts writes without ever reporting the new location.
    pub fn ignore_writes(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_writes = ignore;
    }

    /// Holds the next write. Returns a receiver that fires once the write is waiting and a
    /// sender that lets it continue.
    pub fn hold_next_write(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl ShellFolderApi for FakeShellFolder {
    fn desktop_path(&self) -> Result<PathBuf> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            bail!("SHGetKnownFolderPath failed");
        }
        Ok(state.current.clone())
    }

    fn set_desktop_path(&self, path: &Path) -> Result<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let mut state = self.state.lock().unwrap();
        if state.reject_writes {
            bail!("E_ACCESSDENIED");
        }
        state.history.push(path.to_path_buf());
        if !state.ignore_writes {
            state.current = path.to_path_buf();
        }
        Ok(())
    }

    fn notify_shell(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SurfaceState {
    screens: Vec<ScreenInfo>,
    icons: Vec<DesktopIcon>,
    failing: bool,
    place_calls: usize,
}

#[derive(Debug, Default)]
pub struct FakeIconSurface(Mutex<SurfaceState>);

impl FakeIconSurface {
    pub fn new(screens: Vec<ScreenInfo>, icons: &[(&str, i32, i32)]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(SurfaceState {
            screens,
            icons: icons
                .iter()
                .map(|(name, x, y)| DesktopIcon {
                    name: name.to_string(),
                    x: *x,
                    y: *y,
                })
                .collect(),
            ..Default::default()
        })))
    }

    pub fn positions(&self) -> Vec<(String, i32, i32)> {
        self.0
            .lock()
            .unwrap()
            .icons
            .iter()
            .map(|icon| (icon.name.clone(), icon.x, icon.y))
            .collect()
    }

    /// Piles every icon into the top-left corner.
    pub fn scramble(&self) {
        for icon in &mut self.0.lock().unwrap().icons {
            icon.x = 0;
            icon.y = 0;
        }
    }

    pub fn set_screens(&self, screens: Vec<ScreenInfo>) {
        self.0.lock().unwrap().screens = screens;
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }

    pub fn place_calls(&self) -> usize {
        self.0.lock().unwrap().place_calls
    }
}

impl IconSurface for FakeIconSurface {
    fn screens(&self) -> Result<Vec<ScreenInfo>> {
        let state = self.0.lock().unwrap();
        if state.failing {
            bail!("EnumDisplayMonitors failed");
        }
        Ok(state.screens.clone())
    }

    fn icons(&self) -> Result<Vec<DesktopIcon>> {
        let state = self.0.lock().unwrap();
        if state.failing {
            bail!("The desktop window is not registered");
        }
        Ok(state.icons.clone())
    }

    fn place(&self, placements: &[IconPlacement]) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.failing {
            bail!("SelectAndPositionItems failed");
        }
        state.place_calls += 1;
        for placement in placements {
            let icon = state
                .icons
                .get_mut(placement.slot)
                .ok_or_else(|| anyhow!("no icon in slot {}", placement.slot))?;
            icon.x = placement.x;
            icon.y = placement.y;
        }
        Ok(())
    }
}
