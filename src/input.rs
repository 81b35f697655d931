//! Hardware-level mouse/keyboard simulation.
//!
//! All input goes through Win32 `SendInput`, which the game's input layer
//! (DirectInput/RawInput) processes like real hardware events. PostMessage
//! delivery does not work with the game, so it is not offered here.
//!
//! The [`InputDriver`] trait is the seam the sequencer and state machine use;
//! tests substitute a recording implementation.

use anyhow::{anyhow, Result};

#[cfg(windows)]
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYEVENTF_KEYUP,
    MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE,
    MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT, MOUSE_EVENT_FLAGS, VK_CONTROL,
    VK_SHIFT,
};
#[cfg(windows)]
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

/// Mouse buttons the macros use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// Modifier keys the macros hold while clicking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifierKey {
    Ctrl,
    Shift,
}

/// Primitive input operations at OS simulation level.
pub trait InputDriver: Send + Sync {
    /// Moves the cursor to an absolute screen position.
    fn move_cursor(&self, x: i32, y: i32) -> Result<()>;
    fn press_button(&self, button: MouseButton) -> Result<()>;
    fn release_button(&self, button: MouseButton) -> Result<()>;
    fn press_key(&self, key: ModifierKey) -> Result<()>;
    fn release_key(&self, key: ModifierKey) -> Result<()>;
}

/// `SendInput`-backed driver. Moves the real cursor.
#[cfg(windows)]
pub struct SendInputDriver;

/// Normalizes a screen coordinate to the 0-65535 range required by
/// `MOUSEEVENTF_ABSOLUTE`.
fn normalize(coord: i32, extent: i32) -> i32 {
    if extent <= 0 {
        return 0;
    }
    ((coord as i64 * 65535) / extent as i64) as i32
}

#[cfg(windows)]
impl SendInputDriver {
    fn send_mouse(&self, dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> Result<()> {
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        };
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent != 1 {
            return Err(anyhow!("SendInput rejected mouse event"));
        }
        Ok(())
    }

    fn send_key(&self, key: ModifierKey, up: bool) -> Result<()> {
        let vk = match key {
            ModifierKey::Ctrl => VK_CONTROL,
            ModifierKey::Shift => VK_SHIFT,
        };
        let input = INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    dwFlags: if up { KEYEVENTF_KEYUP } else { Default::default() },
                    ..Default::default()
                },
            },
        };
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent != 1 {
            return Err(anyhow!("SendInput rejected key event"));
        }
        Ok(())
    }

    fn button_flags(button: MouseButton, up: bool) -> MOUSE_EVENT_FLAGS {
        match (button, up) {
            (MouseButton::Left, false) => MOUSEEVENTF_LEFTDOWN,
            (MouseButton::Left, true) => MOUSEEVENTF_LEFTUP,
            (MouseButton::Right, false) => MOUSEEVENTF_RIGHTDOWN,
            (MouseButton::Right, true) => MOUSEEVENTF_RIGHTUP,
        }
    }
}

#[cfg(windows)]
impl InputDriver for SendInputDriver {
    fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
        let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        self.send_mouse(
            normalize(x, screen_width),
            normalize(y, screen_height),
            MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE,
        )
    }

    fn press_button(&self, button: MouseButton) -> Result<()> {
        self.send_mouse(0, 0, Self::button_flags(button, false))
    }

    fn release_button(&self, button: MouseButton) -> Result<()> {
        self.send_mouse(0, 0, Self::button_flags(button, true))
    }

    fn press_key(&self, key: ModifierKey) -> Result<()> {
        self.send_key(key, false)
    }

    fn release_key(&self, key: ModifierKey) -> Result<()> {
        self.send_key(key, true)
    }
}
