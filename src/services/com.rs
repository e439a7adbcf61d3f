use windows::Win32::System::Com::{COINIT_APARTMENTTHREADED, CoInitializeEx, CoUninitialize};

/// Balances `CoInitializeEx` for the duration of one call.
pub struct Apartment {
    owned: bool,
}

impl Apartment {
    pub fn enter() -> Self {
        // S_FALSE still needs a matching CoUninitialize, RPC_E_CHANGED_MODE does not
        let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
        Self { owned: hr.is_ok() }
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}
