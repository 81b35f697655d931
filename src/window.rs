//! Target-window discovery and controller-window visibility.

use anyhow::Result;
#[cfg(windows)]
use anyhow::anyhow;
#[cfg(windows)]
use std::ffi::OsString;
#[cfg(windows)]
use std::os::windows::ffi::OsStringExt;

#[cfg(windows)]
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE};
#[cfg(windows)]
use windows::Win32::System::Console::GetConsoleWindow;
#[cfg(windows)]
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, IsIconic, IsWindowVisible,
    SetForegroundWindow, ShowWindow, SW_MINIMIZE, SW_RESTORE,
};

/// Window operations the macro engine needs: activate the game window before
/// sending input, and hide/show its own controlling window around a run.
pub trait WindowControl: Send + Sync {
    /// Finds the first visible window whose title starts with `title_prefix`
    /// (case-insensitive), restores it if minimized, and activates it.
    fn activate_target(&self, title_prefix: &str) -> Result<()>;
    /// Minimizes this process's own window (best-effort).
    fn minimize_controller(&self);
    /// Restores and re-focuses this process's own window (best-effort).
    fn restore_controller(&self);
}

/// Win32 implementation. The controller window is the console window.
#[cfg(windows)]
pub struct Win32WindowControl;

/// Finds the first visible, titled window whose title starts with the given
/// prefix, case-insensitively.
#[cfg(windows)]
fn find_window_by_title_prefix(title_prefix: &str) -> Result<HWND> {
    struct EnumData {
        prefix_lower: String,
        hwnd: Option<HWND>,
        title: Option<String>,
    }

    unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let data = unsafe { &mut *(lparam.0 as *mut EnumData) };

        // Skip invisible windows
        if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
            return TRUE;
        }

        let title_len = unsafe { GetWindowTextLengthW(hwnd) };
        if title_len <= 0 {
            return TRUE;
        }
        let mut title_buf: Vec<u16> = vec![0; (title_len + 1) as usize];
        unsafe { GetWindowTextW(hwnd, &mut title_buf) };
        let title = OsString::from_wide(&title_buf[..title_len as usize])
            .to_string_lossy()
            .to_string();

        if title.to_lowercase().starts_with(&data.prefix_lower) {
            data.hwnd = Some(hwnd);
            data.title = Some(title);
            return BOOL(0); // Stop enumeration
        }

        TRUE
    }

    let mut data = EnumData {
        prefix_lower: title_prefix.to_lowercase(),
        hwnd: None,
        title: None,
    };
    unsafe {
        // EnumWindows returns FALSE when the callback stops it early, which
        // is the found case, not an error.
        let _ = EnumWindows(Some(enum_callback), LPARAM(&mut data as *mut _ as isize));
    }

    if let Some(title) = &data.title {
        crate::log(&format!("Found target window: \"{}\"", title));
    }

    data.hwnd.ok_or_else(|| {
        anyhow!(
            "Could not find a window titled \"{}...\". Is the game running?",
            title_prefix
        )
    })
}

#[cfg(windows)]
impl WindowControl for Win32WindowControl {
    fn activate_target(&self, title_prefix: &str) -> Result<()> {
        let hwnd = find_window_by_title_prefix(title_prefix)?;
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            let _ = SetForegroundWindow(hwnd);
        }
        Ok(())
    }

    fn minimize_controller(&self) {
        unsafe {
            let hwnd = GetConsoleWindow();
            if !hwnd.is_invalid() {
                let _ = ShowWindow(hwnd, SW_MINIMIZE);
            }
        }
    }

    fn restore_controller(&self) {
        unsafe {
            let hwnd = GetConsoleWindow();
            if !hwnd.is_invalid() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
                let _ = SetForegroundWindow(hwnd);
            }
        }
    }
}
