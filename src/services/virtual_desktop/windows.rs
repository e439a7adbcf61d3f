use super::types::{
    BindingCandidate, BindingKind, DesktopEnumerationService, ManagerLayout, ServiceBinder,
    VirtualDesktopId,
};
use crate::services::com::Apartment;
use anyhow::{Context, Result, anyhow, bail};
use std::{ffi::c_void, mem, ptr};
use windows::{
    Win32::{
        System::{
            Com::{CLSCTX_LOCAL_SERVER, CoCreateInstance, IServiceProvider},
            Registry::{HKEY_CURRENT_USER, RRF_RT_REG_BINARY, RegGetValueW},
            RemoteDesktop::ProcessIdToSessionId,
            Threading::GetCurrentProcessId,
        },
        UI::Shell::Common::IObjectArray,
    },
    core::{GUID, HRESULT, HSTRING, IUnknown, Interface},
};

const CLSID_IMMERSIVE_SHELL: GUID = GUID::from_u128(0xc2f03a33_21f5_47fa_b4bb_156362a2f239);
const SID_VIRTUAL_DESKTOP_MANAGER_INTERNAL: GUID =
    GUID::from_u128(0xc5e0cdca_7b6e_41b2_9fc4_d93975cc467b);

const EXPLORER_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Explorer";

type OutCall = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HRESULT;
type MonitorOutCall =
    unsafe extern "system" fn(*mut c_void, *mut c_void, *mut *mut c_void) -> HRESULT;
type InCall = unsafe extern "system" fn(*mut c_void, *mut c_void) -> HRESULT;
type MonitorInCall = unsafe extern "system" fn(*mut c_void, *mut c_void, *mut c_void) -> HRESULT;
type GetIdCall = unsafe extern "system" fn(*mut c_void, *mut GUID) -> HRESULT;

#[derive(Debug, Default)]
pub struct ShellBinder;

impl ServiceBinder for ShellBinder {
    fn bind(&self, candidate: &BindingCandidate) -> Result<Box<dyn DesktopEnumerationService>> {
        let service: Box<dyn DesktopEnumerationService> = match candidate.kind {
            BindingKind::Com(layout) => Box::new(ComManager { layout }),
            BindingKind::Registry => Box::new(RegistryMirror),
        };

        // a candidate only counts once it has answered a real query
        service
            .current_id()
            .with_context(|| format!("Binding '{}' did not answer", candidate.name))?;

        Ok(service)
    }
}

/// Reads entry `index` of a COM object's vtable as a function pointer of type `F`.
unsafe fn vtable_entry<F: Copy>(object: &IUnknown, index: usize) -> F {
    unsafe {
        let vtable = *(object.as_raw() as *const *const *const c_void);
        let entry = *vtable.add(index);
        mem::transmute_copy(&entry)
    }
}

/// Talks to `IVirtualDesktopManagerInternal` through the slot numbers of one shell revision.
/// The manager is fetched again for every call, so no COM pointer outlives a method.
struct ComManager {
    layout: ManagerLayout,
}

impl ComManager {
    fn with_manager<T>(&self, op: impl FnOnce(&IUnknown) -> Result<T>) -> Result<T> {
        let _apartment = Apartment::enter();

        unsafe {
            let provider: IServiceProvider =
                CoCreateInstance(&CLSID_IMMERSIVE_SHELL, None, CLSCTX_LOCAL_SERVER)
                    .context("ImmersiveShell is not available")?;

            let iid = GUID::from_u128(self.layout.manager_iid);
            let mut raw = ptr::null_mut();
            (Interface::vtable(&provider).QueryService)(
                Interface::as_raw(&provider),
                &SID_VIRTUAL_DESKTOP_MANAGER_INTERNAL,
                &iid,
                &mut raw,
            )
            .ok()
            .context("The shell does not expose this manager revision")?;

            if raw.is_null() {
                bail!("QueryService returned no manager");
            }

            let manager = IUnknown::from_raw(raw);
            op(&manager)
        }
    }

    fn current_desktop(&self, manager: &IUnknown) -> Result<IUnknown> {
        let mut out = ptr::null_mut();
        unsafe {
            if self.layout.takes_monitor {
                let call: MonitorOutCall = vtable_entry(manager, self.layout.get_current_desktop);
                call(manager.as_raw(), ptr::null_mut(), &mut out)
            } else {
                let call: OutCall = vtable_entry(manager, self.layout.get_current_desktop);
                call(manager.as_raw(), &mut out)
            }
            .ok()
            .context("GetCurrentDesktop failed")?;

            if out.is_null() {
                bail!("GetCurrentDesktop returned no desktop");
            }
            Ok(IUnknown::from_raw(out))
        }
    }

    fn desktops(&self, manager: &IUnknown) -> Result<Vec<IUnknown>> {
        let mut out = ptr::null_mut();
        unsafe {
            if self.layout.takes_monitor {
                let call: MonitorOutCall = vtable_entry(manager, self.layout.get_desktops);
                call(manager.as_raw(), ptr::null_mut(), &mut out)
            } else {
                let call: OutCall = vtable_entry(manager, self.layout.get_desktops);
                call(manager.as_raw(), &mut out)
            }
            .ok()
            .context("GetDesktops failed")?;

            if out.is_null() {
                bail!("GetDesktops returned no array");
            }

            let array = IObjectArray::from_raw(out);
            let count = array.GetCount()?;
            let desktop_iid = GUID::from_u128(self.layout.desktop_iid);

            let mut desktops = Vec::with_capacity(count as usize);
            for index in 0..count {
                let mut item = ptr::null_mut();
                (Interface::vtable(&array).GetAt)(array.as_raw(), index, &desktop_iid, &mut item)
                    .ok()
                    .with_context(|| format!("Failed to read desktop {index}"))?;
                if !item.is_null() {
                    desktops.push(IUnknown::from_raw(item));
                }
            }
            Ok(desktops)
        }
    }

    fn desktop_id(&self, desktop: &IUnknown) -> Result<VirtualDesktopId> {
        let mut guid = GUID::zeroed();
        unsafe {
            let call: GetIdCall = vtable_entry(desktop, self.layout.desktop_get_id);
            call(desktop.as_raw(), &mut guid)
                .ok()
                .context("IVirtualDesktop::GetId failed")?;
        }
        Ok(VirtualDesktopId::from_u128(guid.to_u128()))
    }
}

impl DesktopEnumerationService for ComManager {
    fn current_id(&self) -> Result<VirtualDesktopId> {
        self.with_manager(|manager| {
            let desktop = self.current_desktop(manager)?;
            self.desktop_id(&desktop)
        })
    }

    fn list_ids(&self) -> Result<Vec<VirtualDesktopId>> {
        self.with_manager(|manager| {
            self.desktops(manager)?
                .iter()
                .map(|desktop| self.desktop_id(desktop))
                .collect()
        })
    }

    fn switch_to(&self, id: VirtualDesktopId) -> Result<()> {
        self.with_manager(|manager| {
            let mut target = None;
            for desktop in self.desktops(manager)? {
                if self.desktop_id(&desktop)? == id {
                    target = Some(desktop);
                    break;
                }
            }
            let target = target.ok_or_else(|| anyhow!("No virtual desktop with id {id}"))?;

            unsafe {
                if self.layout.takes_monitor {
                    let call: MonitorInCall = vtable_entry(manager, self.layout.switch_desktop);
                    call(manager.as_raw(), ptr::null_mut(), target.as_raw())
                } else {
                    let call: InCall = vtable_entry(manager, self.layout.switch_desktop);
                    call(manager.as_raw(), target.as_raw())
                }
                .ok()
                .context("SwitchDesktop failed")
            }
        })
    }
}

/// Explorer keeps the current desktop and the desktop order in HKCU. Read-only, but it works
/// on builds whose manager interface is not in the table yet.
struct RegistryMirror;

impl RegistryMirror {
    fn read_binary(subkey: &str, value: &str) -> Result<Vec<u8>> {
        let subkey_w = HSTRING::from(subkey);
        let value_w = HSTRING::from(value);
        let mut size = 0u32;

        unsafe {
            RegGetValueW(
                HKEY_CURRENT_USER,
                &subkey_w,
                &value_w,
                RRF_RT_REG_BINARY,
                None,
                None,
                Some(&mut size),
            )
            .ok()
            .with_context(|| format!("Failed to size {subkey}\\{value}"))?;

            let mut data = vec![0u8; size as usize];
            RegGetValueW(
                HKEY_CURRENT_USER,
                &subkey_w,
                &value_w,
                RRF_RT_REG_BINARY,
                None,
                Some(data.as_mut_ptr().cast()),
                Some(&mut size),
            )
            .ok()
            .with_context(|| format!("Failed to read {subkey}\\{value}"))?;

            data.truncate(size as usize);
            Ok(data)
        }
    }

    fn session_key() -> Result<String> {
        let mut session = 0u32;
        unsafe { ProcessIdToSessionId(GetCurrentProcessId(), &mut session) }
            .context("Failed to resolve the session id")?;
        Ok(format!(r"{EXPLORER_KEY}\SessionInfo\{session}\VirtualDesktops"))
    }

    fn to_ids(data: &[u8]) -> Vec<VirtualDesktopId> {
        data.chunks_exact(16)
            .filter_map(|chunk| <[u8; 16]>::try_from(chunk).ok())
            .map(VirtualDesktopId::from_guid_bytes)
            .collect()
    }
}

impl DesktopEnumerationService for RegistryMirror {
    fn current_id(&self) -> Result<VirtualDesktopId> {
        let shared = format!(r"{EXPLORER_KEY}\VirtualDesktops");
        let data = Self::read_binary(&shared, "CurrentVirtualDesktop")
            .or_else(|_| Self::read_binary(&Self::session_key()?, "CurrentVirtualDesktop"))?;

        Self::to_ids(&data)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("CurrentVirtualDesktop holds {} bytes", data.len()))
    }

    fn list_ids(&self) -> Result<Vec<VirtualDesktopId>> {
        let data = Self::read_binary(
            &format!(r"{EXPLORER_KEY}\VirtualDesktops"),
            "VirtualDesktopIDs",
        )?;
        Ok(Self::to_ids(&data))
    }

    fn switch_to(&self, _id: VirtualDesktopId) -> Result<()> {
        bail!("The registry binding cannot switch desktops")
    }
}
