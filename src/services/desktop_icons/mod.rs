#[cfg(not(windows))]
mod unsupported;
#[cfg(windows)]
mod windows;

#[cfg(not(windows))]
pub use self::unsupported::UnsupportedIconSurface as PlatformIconSurface;
#[cfg(windows)]
pub use self::windows::ShellIconSurface as PlatformIconSurface;

use serde::{Deserialize, Serialize};

/// One monitor, in desktop coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub index: u32,
    pub is_primary: bool,
    pub width: i32,
    pub height: i32,
    pub left: i32,
    pub top: i32,
}

impl ScreenInfo {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }
}

/// An icon as the desktop shows it right now, positioned in desktop coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopIcon {
    pub name: String,
    pub x: i32,
    pub y: i32,
}

/// Moves the icon at `slot` of the latest [`IconSurface::icons`] listing to (`x`, `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconPlacement {
    pub slot: usize,
    pub x: i32,
    pub y: i32,
}

/// The desktop's icon view and the monitors it spans.
pub trait IconSurface: Send + Sync {
    fn screens(&self) -> anyhow::Result<Vec<ScreenInfo>>;
    /// Icons in the view's enumeration order, which is stable between calls.
    fn icons(&self) -> anyhow::Result<Vec<DesktopIcon>>;
    fn place(&self, placements: &[IconPlacement]) -> anyhow::Result<()>;
}
