use crate::{
    events::EventSink,
    folders::{LAYOUT_EXTENSION, LAYOUT_PREFIX},
    services::{
        desktop_icons::{DesktopIcon, IconPlacement, IconSurface, ScreenInfo},
        virtual_desktop::VirtualDesktopId,
    },
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, io, path::PathBuf, sync::Arc};

const SOURCE: &str = "layout";
pub const LAYOUT_VERSION: u32 = 1;

/// A saved icon. `x`/`y` are relative to the top-left corner of the screen it was on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IconPosition {
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub screen_index: u32,
    #[serde(default)]
    pub is_primary_screen: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenConfig {
    #[serde(default)]
    pub screens: Vec<ScreenInfo>,
    #[serde(default)]
    pub primary_screen_index: u32,
}

impl ScreenConfig {
    fn primary(&self) -> Option<&ScreenInfo> {
        self.screens
            .iter()
            .find(|s| s.is_primary)
            .or_else(|| self.by_index(self.primary_screen_index))
    }

    fn by_index(&self, index: u32) -> Option<&ScreenInfo> {
        self.screens.iter().find(|s| s.index == index)
    }
}

fn default_version() -> u32 {
    LAYOUT_VERSION
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DesktopLayout {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub icons: Vec<IconPosition>,
    #[serde(default)]
    pub screen_config: ScreenConfig,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

fn primary_screen(screens: &[ScreenInfo]) -> Option<&ScreenInfo> {
    screens.iter().find(|s| s.is_primary).or_else(|| screens.first())
}

/// Builds a layout from what the desktop shows. Icons outside every screen are attributed to
/// the primary one.
pub fn build_layout(screens: Vec<ScreenInfo>, icons: Vec<DesktopIcon>) -> DesktopLayout {
    let primary = primary_screen(&screens).copied();

    let icons = icons
        .into_iter()
        .map(|icon| {
            let screen = screens
                .iter()
                .find(|s| s.contains(icon.x, icon.y))
                .copied()
                .or(primary);

            match screen {
                Some(screen) => IconPosition {
                    name: icon.name,
                    x: icon.x - screen.left,
                    y: icon.y - screen.top,
                    screen_index: screen.index,
                    is_primary_screen: screen.is_primary,
                },
                None => IconPosition {
                    name: icon.name,
                    x: icon.x,
                    y: icon.y,
                    screen_index: 0,
                    is_primary_screen: true,
                },
            }
        })
        .collect();

    DesktopLayout {
        version: LAYOUT_VERSION,
        icons,
        screen_config: ScreenConfig {
            primary_screen_index: primary.map_or(0, |s| s.index),
            screens,
        },
        saved_at: Utc::now(),
    }
}

/// Where a saved icon goes on the current screens.
///
/// Primary icons follow the primary screen. Others keep their screen index, or land on the
/// primary screen when that index is gone. The offset inside the screen is scaled by the size
/// ratio between the target screen and the saved screen playing the same role.
pub fn adapt_position(
    icon: &IconPosition,
    saved: &ScreenConfig,
    current: &[ScreenInfo],
) -> (i32, i32) {
    let same_index = if icon.is_primary_screen {
        None
    } else {
        current.iter().find(|s| s.index == icon.screen_index)
    };

    let (target, reference) = match same_index {
        Some(screen) => (Some(screen), saved.by_index(icon.screen_index)),
        None => (primary_screen(current), saved.primary()),
    };

    let Some(target) = target else {
        return (icon.x, icon.y);
    };

    let (scale_x, scale_y) = match reference {
        Some(reference) if reference.width > 0 && reference.height > 0 => (
            f64::from(target.width) / f64::from(reference.width),
            f64::from(target.height) / f64::from(reference.height),
        ),
        _ => (1.0, 1.0),
    };

    (
        (f64::from(icon.x) * scale_x).round() as i32 + target.left,
        (f64::from(icon.y) * scale_y).round() as i32 + target.top,
    )
}

/// Matches saved icons against the live ones by name, ignoring case. When names repeat, every
/// saved entry goes to the first live icon with that name.
pub fn plan_placements(
    saved: &DesktopLayout,
    current: &[ScreenInfo],
    live: &[DesktopIcon],
) -> Vec<IconPlacement> {
    let live_names: Vec<String> = live.iter().map(|icon| icon.name.to_lowercase()).collect();

    saved
        .icons
        .iter()
        .filter_map(|icon| {
            let name = icon.name.to_lowercase();
            let slot = live_names.iter().position(|live| *live == name)?;
            let (x, y) = adapt_position(icon, &saved.screen_config, current);
            Some(IconPlacement { slot, x, y })
        })
        .collect()
}

/// Per-desktop icon layouts, one JSON document per desktop id.
#[derive(Clone)]
pub struct IconLayoutStore {
    dir: PathBuf,
    surface: Arc<dyn IconSurface>,
    events: EventSink,
}

impl IconLayoutStore {
    pub fn new(dir: impl Into<PathBuf>, surface: Arc<dyn IconSurface>, events: EventSink) -> Self {
        Self {
            dir: dir.into(),
            surface,
            events,
        }
    }

    pub fn layout_path(&self, id: VirtualDesktopId) -> PathBuf {
        self.dir.join(format!("{LAYOUT_PREFIX}{id}.{LAYOUT_EXTENSION}"))
    }

    fn try_capture(&self) -> Result<DesktopLayout> {
        let screens = self.surface.screens().context("Failed to list screens")?;
        let icons = self.surface.icons().context("Failed to list icons")?;
        Ok(build_layout(screens, icons))
    }

    /// The icons as the desktop shows them now; an empty layout when they can't be read.
    pub fn capture(&self) -> DesktopLayout {
        self.try_capture().unwrap_or_else(|e| {
            self.events.error(SOURCE, "Failed to read desktop icons", &e);
            build_layout(Vec::new(), Vec::new())
        })
    }

    /// Stores [`capture`](Self::capture) as the layout of `id`, replacing any previous one.
    pub fn save(&self, id: VirtualDesktopId) {
        let layout = self.capture();
        match self.write(id, &layout) {
            Ok(()) => log::debug!("Saved {} icon positions for desktop {id}", layout.icons.len()),
            Err(e) => self
                .events
                .error(SOURCE, format!("Failed to save the layout of desktop {id}"), &e),
        }
    }

    /// Puts icons back where the layout of `id` had them.
    pub fn load(&self, id: VirtualDesktopId) {
        match self.try_load(id) {
            Ok(Some(count)) => log::debug!("Restored {count} icon positions for desktop {id}"),
            Ok(None) => log::debug!("No saved layout for desktop {id}"),
            Err(e) => self
                .events
                .error(SOURCE, format!("Failed to restore the layout of desktop {id}"), &e),
        }
    }

    fn try_load(&self, id: VirtualDesktopId) -> Result<Option<usize>> {
        let Some(saved) = self.read(id)? else {
            return Ok(None);
        };

        let screens = self.surface.screens().context("Failed to list screens")?;
        let live = self.surface.icons().context("Failed to list icons")?;
        let placements = plan_placements(&saved, &screens, &live);

        self.surface
            .place(&placements)
            .context("Failed to move icons")?;
        Ok(Some(placements.len()))
    }

    pub fn read(&self, id: VirtualDesktopId) -> Result<Option<DesktopLayout>> {
        let path = self.layout_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let layout = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a valid layout", path.display()))?;
        Ok(Some(layout))
    }

    fn write(&self, id: VirtualDesktopId, layout: &DesktopLayout) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.layout_path(id);
        let content = serde_json::to_string_pretty(layout)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }
}
