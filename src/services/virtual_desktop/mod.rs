pub mod types;
#[cfg(not(windows))]
mod unsupported;
#[cfg(windows)]
mod windows;

pub use self::types::{
    BindingCandidate, BindingKind, DesktopEnumerationService, KNOWN_CANDIDATES, ManagerLayout,
    ServiceBinder, VirtualDesktopId, candidates_by_name, default_candidate_names,
};

#[cfg(not(windows))]
pub use self::unsupported::UnsupportedBinder as PlatformBinder;
#[cfg(windows)]
pub use self::windows::ShellBinder as PlatformBinder;

use crate::events::EventSink;
use anyhow::anyhow;
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

const SOURCE: &str = "detector";

/// Receives the result of each poll tick.
pub trait ChangeHandler: Send + Sync {
    /// The id the handler considers current; a tick fires only when the OS disagrees.
    fn last_known_id(&self) -> VirtualDesktopId;
    fn desktop_changed(&self, id: VirtualDesktopId);
}

enum Binding {
    Unbound,
    Bound {
        candidate: BindingCandidate,
        service: Box<dyn DesktopEnumerationService>,
    },
    /// The winning candidate stopped answering, most likely because explorer restarted.
    Stale(BindingCandidate),
    Degraded,
}

pub struct DesktopChangeDetector {
    binder: Box<dyn ServiceBinder>,
    candidates: Vec<BindingCandidate>,
    poll_interval: Duration,
    binding: RwLock<Binding>,
    shutdown: watch::Sender<bool>,
    events: EventSink,
}

impl DesktopChangeDetector {
    pub fn new(
        binder: Box<dyn ServiceBinder>,
        candidates: Vec<BindingCandidate>,
        poll_interval: Duration,
        events: EventSink,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            binder,
            candidates,
            poll_interval,
            binding: RwLock::new(Binding::Unbound),
            shutdown,
            events,
        }
    }

    /// Tries every candidate in order and keeps the first one the shell accepts. Returns the
    /// name of the winner, or `None` when falling back to degraded mode. Only the first call
    /// binds; later calls answer from the cached outcome.
    pub fn initialize(&self) -> Option<&'static str> {
        match &*self.binding.read().unwrap_or_else(|e| e.into_inner()) {
            Binding::Unbound => {}
            Binding::Bound { candidate, .. } | Binding::Stale(candidate) => {
                return Some(candidate.name);
            }
            Binding::Degraded => return None,
        }

        for candidate in &self.candidates {
            match self.binder.bind(candidate) {
                Ok(service) => {
                    log::info!("Using virtual desktop binding '{}'", candidate.name);
                    *self.binding.write().unwrap_or_else(|e| e.into_inner()) = Binding::Bound {
                        candidate: *candidate,
                        service,
                    };
                    return Some(candidate.name);
                }
                Err(e) => log::debug!("Binding '{}' rejected: {e:#}", candidate.name),
            }
        }

        *self.binding.write().unwrap_or_else(|e| e.into_inner()) = Binding::Degraded;
        self.events.warn(
            SOURCE,
            "No compatible virtual desktop interface, every desktop counts as the original one",
        );
        None
    }

    pub fn is_degraded(&self) -> bool {
        matches!(
            *self.binding.read().unwrap_or_else(|e| e.into_inner()),
            Binding::Degraded
        )
    }

    /// The active desktop, or the empty id when the shell can't be asked.
    pub fn current_id(&self) -> VirtualDesktopId {
        self.try_current_id().unwrap_or(VirtualDesktopId::EMPTY)
    }

    /// Like [`current_id`](Self::current_id) but distinguishes a failed query from the
    /// original desktop. Degraded mode answers `Some(EMPTY)`.
    fn try_current_id(&self) -> Option<VirtualDesktopId> {
        match self.with_service(|s| s.current_id()) {
            None => Some(VirtualDesktopId::EMPTY),
            Some(Ok(id)) => Some(id),
            Some(Err(e)) => {
                self.events
                    .error(SOURCE, "Failed to query the current virtual desktop", &e);
                None
            }
        }
    }

    /// All desktops known to the shell, in the order it reports them.
    pub fn list_ids(&self) -> Vec<VirtualDesktopId> {
        match self.with_service(|s| s.list_ids()) {
            None => Vec::new(),
            Some(Ok(ids)) => ids,
            Some(Err(e)) => {
                self.events
                    .error(SOURCE, "Failed to enumerate virtual desktops", &e);
                Vec::new()
            }
        }
    }

    /// Asks the shell to activate `id`. The change itself is picked up by the next poll.
    pub fn switch_to(&self, id: VirtualDesktopId) -> anyhow::Result<()> {
        self.with_service(|s| s.switch_to(id))
            .unwrap_or_else(|| Err(anyhow!("No virtual desktop interface available")))
    }

    /// One tick: reports a change to `handler` if the shell disagrees with it.
    pub fn poll_once(&self, handler: &dyn ChangeHandler) -> bool {
        let Some(current) = self.try_current_id() else {
            return false;
        };

        let last = handler.last_known_id();
        if current == last {
            return false;
        }

        log::debug!("Desktop changed from {last} to {current}");
        handler.desktop_changed(current);
        true
    }

    /// Starts polling on the current tokio runtime. The handler runs inline on the polling
    /// task, so no tick is processed while it is busy.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn ChangeHandler>) -> JoinHandle<()> {
        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let detector = Arc::clone(self);

        log::info!(
            "Polling virtual desktops every {} ms",
            self.poll_interval.as_millis()
        );

        tokio::spawn(async move {
            let mut ticker = time::interval(detector.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        detector.poll_once(handler.as_ref());
                    }
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            log::info!("Stopped polling virtual desktops");
        })
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Runs `op` against the bound service. `None` means degraded mode.
    fn with_service<T>(
        &self,
        op: impl FnOnce(&dyn DesktopEnumerationService) -> anyhow::Result<T>,
    ) -> Option<anyhow::Result<T>> {
        self.ensure_bound();

        let binding = self.binding.read().unwrap_or_else(|e| e.into_inner());
        let res = match &*binding {
            Binding::Bound { service, .. } => Some(op(service.as_ref())),
            Binding::Stale(candidate) => Some(Err(anyhow!(
                "Virtual desktop binding '{}' is unavailable",
                candidate.name
            ))),
            Binding::Unbound | Binding::Degraded => None,
        };
        drop(binding);

        if matches!(res, Some(Err(_))) {
            self.mark_stale();
        }
        res
    }

    fn ensure_bound(&self) {
        let pending = match &*self.binding.read().unwrap_or_else(|e| e.into_inner()) {
            Binding::Unbound => Some(None),
            Binding::Stale(candidate) => Some(Some(*candidate)),
            Binding::Bound { .. } | Binding::Degraded => None,
        };

        match pending {
            Some(None) => {
                self.initialize();
            }
            Some(Some(candidate)) => match self.binder.bind(&candidate) {
                Ok(service) => {
                    log::info!("Re-bound virtual desktop binding '{}'", candidate.name);
                    *self.binding.write().unwrap_or_else(|e| e.into_inner()) =
                        Binding::Bound { candidate, service };
                }
                Err(e) => log::debug!("Binding '{}' still unavailable: {e:#}", candidate.name),
            },
            None => {}
        }
    }

    fn mark_stale(&self) {
        let mut binding = self.binding.write().unwrap_or_else(|e| e.into_inner());
        if let Binding::Bound { candidate, .. } = &*binding {
            *binding = Binding::Stale(*candidate);
        }
    }
}
