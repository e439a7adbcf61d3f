#[cfg(windows)]
pub mod com;
pub mod desktop_icons;
pub mod known_folder;
pub mod virtual_desktop;
