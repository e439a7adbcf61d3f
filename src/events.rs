use crate::services::virtual_desktop::VirtualDesktopId;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub severity: Severity,
    pub source: &'static str,
    pub message: String,
    pub cause: Option<String>,
}

/// Everything the tray/notification layer gets to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    DesktopSwitched(VirtualDesktopId),
    Notification(Notification),
}

/// Fan-out of [`ServiceEvent`]s. Every notification is also written to the log, so nothing is
/// lost when no subscriber is attached.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ServiceEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }

    pub fn desktop_switched(&self, id: VirtualDesktopId) {
        log::info!("Switched to desktop {id}");
        let _ = self.tx.send(ServiceEvent::DesktopSwitched(id));
    }

    pub fn warn(&self, source: &'static str, message: impl Into<String>) {
        self.notify(Severity::Warning, source, message.into(), None);
    }

    pub fn error(&self, source: &'static str, message: impl Into<String>, cause: &anyhow::Error) {
        self.notify(
            Severity::Error,
            source,
            message.into(),
            Some(format!("{cause:#}")),
        );
    }

    fn notify(
        &self,
        severity: Severity,
        source: &'static str,
        message: String,
        cause: Option<String>,
    ) {
        match (&severity, &cause) {
            (Severity::Warning, _) => log::warn!("[{source}] {message}"),
            (Severity::Error, Some(cause)) => log::error!("[{source}] {message}: {cause}"),
            (Severity::Error, None) => log::error!("[{source}] {message}"),
        }

        let _ = self.tx.send(ServiceEvent::Notification(Notification {
            severity,
            source,
            message,
            cause,
        }));
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(64)
    }
}
