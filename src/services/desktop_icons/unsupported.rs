use super::{DesktopIcon, IconPlacement, IconSurface, ScreenInfo};
use anyhow::{Result, bail};

#[derive(Debug, Default)]
pub struct UnsupportedIconSurface;

impl IconSurface for UnsupportedIconSurface {
    fn screens(&self) -> Result<Vec<ScreenInfo>> {
        bail!("Desktop icons are only reachable through the Windows shell")
    }

    fn icons(&self) -> Result<Vec<DesktopIcon>> {
        bail!("Desktop icons are only reachable through the Windows shell")
    }

    fn place(&self, _placements: &[IconPlacement]) -> Result<()> {
        bail!("Desktop icons are only reachable through the Windows shell")
    }
}
