use super::types::{BindingCandidate, DesktopEnumerationService, ServiceBinder};
use anyhow::{Result, bail};

/// Virtual desktops only exist on Windows; everywhere else the detector runs degraded.
#[derive(Debug, Default)]
pub struct UnsupportedBinder;

impl ServiceBinder for UnsupportedBinder {
    fn bind(&self, candidate: &BindingCandidate) -> Result<Box<dyn DesktopEnumerationService>> {
        bail!("Binding '{}' requires the Windows shell", candidate.name)
    }
}
