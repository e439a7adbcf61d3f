use super::{DesktopIcon, IconPlacement, IconSurface, ScreenInfo};
use crate::services::com::Apartment;
use anyhow::{Context, Result, bail};
use std::{mem, ptr};
use windows::{
    Win32::{
        Foundation::{LPARAM, POINT, RECT, S_OK, TRUE},
        Graphics::Gdi::{
            EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOF_PRIMARY,
        },
        System::{
            Com::{CLSCTX_ALL, CoCreateInstance, CoTaskMemFree, IServiceProvider},
            Variant::VARIANT,
        },
        UI::{
            Shell::{
                CSIDL_DESKTOP, Common::ITEMIDLIST, IEnumIDList, IFolderView, IShellBrowser,
                IShellFolder, IShellWindows, SHGDN_NORMAL, SID_STopLevelBrowser, SVGIO_ALLVIEW,
                SVSI_POSITIONITEM, SWC_DESKTOP, SWFO_NEEDDISPATCH, ShellWindows, StrRetToStrW,
            },
            WindowsAndMessaging::{GetSystemMetrics, SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN},
        },
    },
    core::{BOOL, Interface, PWSTR},
};

/// Icons of the desktop listview, reached through the shell's `IFolderView`.
#[derive(Debug, Default)]
pub struct ShellIconSurface;

/// A PIDL owned by this process, freed on drop.
struct OwnedPidl(*mut ITEMIDLIST);

impl Drop for OwnedPidl {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
        }
    }
}

struct ViewItem {
    pidl: OwnedPidl,
    name: String,
    /// View coordinates; the listview's origin is the virtual screen's top-left corner.
    position: POINT,
}

fn desktop_view() -> Result<IFolderView> {
    unsafe {
        let shell_windows: IShellWindows = CoCreateInstance(&ShellWindows, None, CLSCTX_ALL)
            .context("ShellWindows is not available")?;

        let location = VARIANT::from(CSIDL_DESKTOP as i32);
        let root = VARIANT::default();
        let mut hwnd = 0i32;
        let dispatch = shell_windows
            .FindWindowSW(&location, &root, SWC_DESKTOP, &mut hwnd, SWFO_NEEDDISPATCH)
            .context("The desktop window is not registered")?;

        let provider: IServiceProvider = dispatch.cast()?;
        let browser: IShellBrowser = provider.QueryService(&SID_STopLevelBrowser)?;
        let view = browser.QueryActiveShellView()?;
        Ok(view.cast()?)
    }
}

fn display_name(folder: &IShellFolder, pidl: *const ITEMIDLIST) -> Result<String> {
    unsafe {
        let mut strret = Default::default();
        folder.GetDisplayNameOf(pidl, SHGDN_NORMAL, &mut strret)?;

        let mut name = PWSTR::null();
        StrRetToStrW(&mut strret, Some(pidl), &mut name)?;
        let text = name.to_string();
        CoTaskMemFree(Some(name.0 as *const _));

        Ok(text?)
    }
}

fn view_items(view: &IFolderView) -> Result<Vec<ViewItem>> {
    unsafe {
        let folder: IShellFolder = view.GetFolder()?;
        let enumerator: IEnumIDList = view.Items(SVGIO_ALLVIEW.0 as u32)?;

        let mut items = Vec::new();
        loop {
            let mut fetched = [ptr::null_mut(); 1];
            let mut count = 0u32;
            if enumerator.Next(&mut fetched, Some(&mut count)) != S_OK || count == 0 {
                break;
            }

            let pidl = OwnedPidl(fetched[0]);
            let position = view.GetItemPosition(pidl.0)?;
            let name = display_name(&folder, pidl.0)?;
            items.push(ViewItem {
                pidl,
                name,
                position,
            });
        }
        Ok(items)
    }
}

fn view_origin() -> (i32, i32) {
    unsafe {
        (
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
        )
    }
}

unsafe extern "system" fn collect_monitor(
    monitor: HMONITOR,
    _hdc: HDC,
    _clip: *mut RECT,
    data: LPARAM,
) -> BOOL {
    unsafe {
        let screens = &mut *(data.0 as *mut Vec<ScreenInfo>);
        let mut info = MONITORINFO {
            cbSize: mem::size_of::<MONITORINFO>() as u32,
            ..Default::default()
        };

        if GetMonitorInfoW(monitor, &mut info).as_bool() {
            let bounds = info.rcMonitor;
            screens.push(ScreenInfo {
                index: screens.len() as u32,
                is_primary: info.dwFlags & MONITORINFOF_PRIMARY != 0,
                width: bounds.right - bounds.left,
                height: bounds.bottom - bounds.top,
                left: bounds.left,
                top: bounds.top,
            });
        }
    }
    TRUE
}

impl IconSurface for ShellIconSurface {
    fn screens(&self) -> Result<Vec<ScreenInfo>> {
        let mut screens: Vec<ScreenInfo> = Vec::new();
        unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(collect_monitor),
                LPARAM(&mut screens as *mut Vec<ScreenInfo> as isize),
            )
            .ok()
            .context("EnumDisplayMonitors failed")?;
        }
        Ok(screens)
    }

    fn icons(&self) -> Result<Vec<DesktopIcon>> {
        let _apartment = Apartment::enter();
        let view = desktop_view()?;
        let (origin_x, origin_y) = view_origin();

        Ok(view_items(&view)?
            .into_iter()
            .map(|item| DesktopIcon {
                name: item.name,
                x: item.position.x + origin_x,
                y: item.position.y + origin_y,
            })
            .collect())
    }

    fn place(&self, placements: &[IconPlacement]) -> Result<()> {
        if placements.is_empty() {
            return Ok(());
        }

        let _apartment = Apartment::enter();
        let view = desktop_view()?;
        let items = view_items(&view)?;
        let (origin_x, origin_y) = view_origin();

        let mut pidls = Vec::with_capacity(placements.len());
        let mut points = Vec::with_capacity(placements.len());
        for placement in placements {
            let Some(item) = items.get(placement.slot) else {
                bail!("Icon slot {} vanished before it could be placed", placement.slot);
            };
            pidls.push(item.pidl.0 as *const ITEMIDLIST);
            points.push(POINT {
                x: placement.x - origin_x,
                y: placement.y - origin_y,
            });
        }

        unsafe {
            view.SelectAndPositionItems(
                pidls.len() as u32,
                pidls.as_ptr(),
                Some(points.as_ptr()),
                SVSI_POSITIONITEM.0 as u32,
            )
            .context("SelectAndPositionItems failed")
        }
    }
}
