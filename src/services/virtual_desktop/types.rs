use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Identifier of a virtual desktop as reported by the shell.
///
/// The nil value stands for the original desktop, the one the user had before any folder was
/// redirected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualDesktopId(Uuid);

impl VirtualDesktopId {
    pub const EMPTY: Self = Self(Uuid::nil());

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// GUID bytes in the little-endian layout used by COM and the registry.
    pub fn from_guid_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes_le(bytes))
    }

    pub fn to_u128(self) -> u128 {
        self.0.as_u128()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for VirtualDesktopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for VirtualDesktopId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Vtable shape of one `IVirtualDesktopManagerInternal` revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerLayout {
    pub manager_iid: u128,
    pub desktop_iid: u128,
    /// The 21H2 revision takes an `HMONITOR` as first argument on most calls.
    pub takes_monitor: bool,
    pub get_current_desktop: usize,
    pub get_desktops: usize,
    pub switch_desktop: usize,
    pub desktop_get_id: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Com(ManagerLayout),
    /// Explorer mirrors the current desktop and the desktop list into HKCU.
    Registry,
}

/// One way of talking to the shell's virtual desktop manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingCandidate {
    pub name: &'static str,
    pub kind: BindingKind,
}

const WIN11_DESKTOP_IID: u128 = 0x3f07f4be_b107_441a_af0f_39d82529072c;

pub const KNOWN_CANDIDATES: &[BindingCandidate] = &[
    BindingCandidate {
        name: "win11-24h2",
        kind: BindingKind::Com(ManagerLayout {
            manager_iid: 0x53f5ca0b_158f_4124_900c_057158060b27,
            desktop_iid: WIN11_DESKTOP_IID,
            takes_monitor: false,
            get_current_desktop: 6,
            get_desktops: 7,
            switch_desktop: 9,
            desktop_get_id: 4,
        }),
    },
    BindingCandidate {
        name: "win11-23h2",
        kind: BindingKind::Com(ManagerLayout {
            manager_iid: 0xa3175f2d_239c_4bd2_8aa0_eeba8b0b138e,
            desktop_iid: WIN11_DESKTOP_IID,
            takes_monitor: false,
            get_current_desktop: 6,
            get_desktops: 7,
            switch_desktop: 9,
            desktop_get_id: 4,
        }),
    },
    BindingCandidate {
        name: "win11-21h2",
        kind: BindingKind::Com(ManagerLayout {
            manager_iid: 0xb2f925b9_5a0f_4d2e_9f4d_2b1507593c10,
            desktop_iid: 0x536d3495_b208_4cc9_ae26_de8111275bf8,
            takes_monitor: true,
            get_current_desktop: 6,
            get_desktops: 8,
            switch_desktop: 10,
            desktop_get_id: 4,
        }),
    },
    BindingCandidate {
        name: "win10",
        kind: BindingKind::Com(ManagerLayout {
            manager_iid: 0xf31574d6_b682_4cdc_bd56_1827860abec6,
            desktop_iid: 0xff72ffdd_be7e_43fc_9c03_ad81681e88e4,
            takes_monitor: false,
            get_current_desktop: 6,
            get_desktops: 7,
            switch_desktop: 9,
            desktop_get_id: 4,
        }),
    },
    BindingCandidate {
        name: "registry",
        kind: BindingKind::Registry,
    },
];

/// Resolves configured candidate names against the built-in table. Unknown names are skipped
/// with a warning so a typo in the config file doesn't disable detection.
pub fn candidates_by_name<S: AsRef<str>>(names: &[S]) -> Vec<BindingCandidate> {
    names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            let found = KNOWN_CANDIDATES
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .copied();
            if found.is_none() {
                log::warn!("Unknown virtual desktop binding '{name}', ignoring it");
            }
            found
        })
        .collect()
}

pub fn default_candidate_names() -> Vec<String> {
    KNOWN_CANDIDATES.iter().map(|c| c.name.to_owned()).collect()
}

/// Capability interface over the shell's (undocumented) virtual desktop manager.
pub trait DesktopEnumerationService: Send + Sync {
    fn current_id(&self) -> anyhow::Result<VirtualDesktopId>;
    fn list_ids(&self) -> anyhow::Result<Vec<VirtualDesktopId>>;
    fn switch_to(&self, id: VirtualDesktopId) -> anyhow::Result<()>;
}

/// Produces a working service for a candidate, or fails if the running shell doesn't speak it.
pub trait ServiceBinder: Send + Sync {
    fn bind(
        &self,
        candidate: &BindingCandidate,
    ) -> anyhow::Result<Box<dyn DesktopEnumerationService>>;
}
