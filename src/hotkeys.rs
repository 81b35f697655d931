//! Global hotkey polling.
//!
//! A background loop samples the pressed state of each configured hotkey
//! every ~50ms and edge-detects transitions (`pressed_now && !pressed_before`)
//! so a held key fires once. Decisions are not taken on the polling thread:
//! rising edges are dispatched over a channel to the main context, which owns
//! the engine. Polling is deliberate (simple and portable); the sampler sits
//! behind a trait so an OS-native hotkey subscription could replace it
//! without touching the state machine.

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(windows)]
use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

use crate::config::MacroConfig;

/// Sampling interval for hotkey state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pause after a polling error before the next attempt, so a persistent
/// failure (e.g. an unparseable binding) cannot spin the loop or flood logs.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Actions a hotkey edge can request from the main context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Start the inventory-clear macro if idle, stop it if running.
    ToggleInventory,
    StopInventory,
    /// Start the appraisal macro if idle, stop it if running.
    ToggleAppraisal,
    StopAppraisal,
    /// Begin region (re)selection.
    SelectRegion,
}

/// Reads whether a virtual key is currently held. Implemented over
/// `GetAsyncKeyState` in production and scripted in tests.
pub trait KeySampler: Send + Sync {
    fn is_pressed(&self, vk: u16) -> bool;
}

/// `GetAsyncKeyState`-backed sampler; the high bit means currently down.
#[cfg(windows)]
pub struct AsyncKeySampler;

#[cfg(windows)]
impl KeySampler for AsyncKeySampler {
    fn is_pressed(&self, vk: u16) -> bool {
        (unsafe { GetAsyncKeyState(vk as i32) } as u16 & 0x8000) != 0
    }
}

/// Maps a configured key name ("f6", "a", "space", ...) to a Win32 virtual
/// key code. Case-insensitive.
pub fn parse_key_name(name: &str) -> Option<u16> {
    let name = name.trim().to_lowercase();

    // Function keys: VK_F1 = 0x70.
    if let Some(n) = name.strip_prefix('f') {
        if let Ok(n) = n.parse::<u16>() {
            if (1..=12).contains(&n) {
                return Some(0x70 + n - 1);
            }
        }
    }

    if name.len() == 1 {
        let c = name.chars().next()?;
        // Letter and digit VK codes match uppercase ASCII.
        if c.is_ascii_lowercase() {
            return Some(c.to_ascii_uppercase() as u16);
        }
        if c.is_ascii_digit() {
            return Some(c as u16);
        }
    }

    match name.as_str() {
        "space" => Some(0x20),
        "tab" => Some(0x09),
        "esc" | "escape" => Some(0x1B),
        "pause" => Some(0x13),
        "insert" => Some(0x2D),
        "delete" => Some(0x2E),
        "home" => Some(0x24),
        "end" => Some(0x23),
        _ => None,
    }
}

/// One resolved binding: which key fires which event.
#[derive(Clone, Copy, Debug)]
struct Binding {
    vk: u16,
    event: HotkeyEvent,
}

const BINDING_SLOTS: usize = 5;

fn resolve_bindings(config: &MacroConfig) -> Result<[Binding; BINDING_SLOTS]> {
    let resolve = |name: &str, event: HotkeyEvent| -> Result<Binding> {
        let vk = parse_key_name(name)
            .ok_or_else(|| anyhow!("unknown hotkey \"{}\" for {:?}", name, event))?;
        Ok(Binding { vk, event })
    };
    Ok([
        resolve(&config.run_hotkey, HotkeyEvent::ToggleInventory)?,
        resolve(&config.stop_hotkey, HotkeyEvent::StopInventory)?,
        resolve(&config.appraisal_run_hotkey, HotkeyEvent::ToggleAppraisal)?,
        resolve(&config.appraisal_stop_hotkey, HotkeyEvent::StopAppraisal)?,
        resolve(&config.area_select_hotkey, HotkeyEvent::SelectRegion)?,
    ])
}

/// The background polling loop. Reads bindings from the shared config on
/// every tick so changes apply without a restart.
pub struct HotkeyPoller {
    sampler: Arc<dyn KeySampler>,
    config: Arc<Mutex<MacroConfig>>,
    sender: mpsc::Sender<HotkeyEvent>,
}

impl HotkeyPoller {
    pub fn new(
        sampler: Arc<dyn KeySampler>,
        config: Arc<Mutex<MacroConfig>>,
        sender: mpsc::Sender<HotkeyEvent>,
    ) -> Self {
        Self {
            sampler,
            config,
            sender,
        }
    }

    /// Runs the poller for the process lifetime. Returns only when the
    /// receiving side of the channel is gone.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut last = [false; BINDING_SLOTS];
            loop {
                match self.poll_tick(&mut last) {
                    Ok(true) => thread::sleep(POLL_INTERVAL),
                    Ok(false) => return,
                    Err(e) => {
                        crate::log(&format!("Hotkey polling error: {}", e));
                        thread::sleep(ERROR_BACKOFF);
                    }
                }
            }
        })
    }

    /// Samples every binding once and dispatches rising edges.
    ///
    /// Returns `Ok(false)` when the receiver has hung up (the loop should
    /// end) and `Err` for recoverable polling problems.
    fn poll_tick(&self, last: &mut [bool; BINDING_SLOTS]) -> Result<bool> {
        let bindings = {
            let config = self.config.lock().expect("config lock");
            resolve_bindings(&config)?
        };

        for (slot, binding) in bindings.iter().enumerate() {
            let pressed = self.sampler.is_pressed(binding.vk);
            if pressed && !last[slot] && self.sender.send(binding.event).is_err() {
                return Ok(false);
            }
            last[slot] = pressed;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Sampler whose pressed-set the test mutates between ticks.
    struct ScriptedSampler {
        pressed: Mutex<HashSet<u16>>,
    }

    impl ScriptedSampler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pressed: Mutex::new(HashSet::new()),
            })
        }

        fn set_pressed(&self, vks: &[u16]) {
            *self.pressed.lock().unwrap() = vks.iter().copied().collect();
        }
    }

    impl KeySampler for ScriptedSampler {
        fn is_pressed(&self, vk: u16) -> bool {
            self.pressed.lock().unwrap().contains(&vk)
        }
    }

    fn poller_with(
        sampler: Arc<ScriptedSampler>,
    ) -> (HotkeyPoller, mpsc::Receiver<HotkeyEvent>) {
        let (tx, rx) = mpsc::channel();
        let poller = HotkeyPoller::new(
            sampler,
            Arc::new(Mutex::new(MacroConfig::default())),
            tx,
        );
        (poller, rx)
    }

    fn drain(rx: &mpsc::Receiver<HotkeyEvent>) -> Vec<HotkeyEvent> {
        rx.try_iter().collect()
    }

    const VK_F6: u16 = 0x75;
    const VK_F1: u16 = 0x70;
    const VK_F3: u16 = 0x72;

    #[test]
    fn test_parse_key_names() {
        assert_eq!(parse_key_name("f1"), Some(0x70));
        assert_eq!(parse_key_name("F6"), Some(0x75));
        assert_eq!(parse_key_name("f12"), Some(0x7B));
        assert_eq!(parse_key_name("a"), Some(b'A' as u16));
        assert_eq!(parse_key_name("Z"), Some(b'Z' as u16));
        assert_eq!(parse_key_name("7"), Some(b'7' as u16));
        assert_eq!(parse_key_name("space"), Some(0x20));
        assert_eq!(parse_key_name("Escape"), Some(0x1B));
        assert_eq!(parse_key_name("f13"), None);
        assert_eq!(parse_key_name("f0"), None);
        assert_eq!(parse_key_name("nope"), None);
        assert_eq!(parse_key_name(""), None);
    }

    #[test]
    fn test_default_bindings_resolve() {
        let bindings = resolve_bindings(&MacroConfig::default()).unwrap();
        assert_eq!(bindings[0].vk, VK_F6);
        assert_eq!(bindings[0].event, HotkeyEvent::ToggleInventory);
        assert_eq!(bindings[4].vk, VK_F3);
        assert_eq!(bindings[4].event, HotkeyEvent::SelectRegion);
    }

    #[test]
    fn test_unknown_binding_is_an_error() {
        let mut config = MacroConfig::default();
        config.run_hotkey = "superkey".to_string();
        assert!(resolve_bindings(&config).is_err());
    }

    #[test]
    fn test_rising_edge_fires_exactly_once() {
        let sampler = ScriptedSampler::new();
        let (poller, rx) = poller_with(sampler.clone());
        let mut last = [false; BINDING_SLOTS];

        // Key down across three ticks: one event, no repeat-fire.
        sampler.set_pressed(&[VK_F6]);
        for _ in 0..3 {
            assert!(poller.poll_tick(&mut last).unwrap());
        }
        assert_eq!(drain(&rx), vec![HotkeyEvent::ToggleInventory]);

        // Release, then press again: a second edge.
        sampler.set_pressed(&[]);
        poller.poll_tick(&mut last).unwrap();
        sampler.set_pressed(&[VK_F6]);
        poller.poll_tick(&mut last).unwrap();
        assert_eq!(drain(&rx), vec![HotkeyEvent::ToggleInventory]);
    }

    #[test]
    fn test_keys_already_down_at_start_still_edge() {
        // First tick sees pressed with no history: that is a rising edge.
        let sampler = ScriptedSampler::new();
        let (poller, rx) = poller_with(sampler.clone());
        let mut last = [false; BINDING_SLOTS];

        sampler.set_pressed(&[VK_F1]);
        poller.poll_tick(&mut last).unwrap();
        assert_eq!(drain(&rx), vec![HotkeyEvent::ToggleAppraisal]);
    }

    #[test]
    fn test_simultaneous_edges_both_dispatch() {
        let sampler = ScriptedSampler::new();
        let (poller, rx) = poller_with(sampler.clone());
        let mut last = [false; BINDING_SLOTS];

        sampler.set_pressed(&[VK_F6, VK_F3]);
        poller.poll_tick(&mut last).unwrap();
        let events = drain(&rx);
        assert!(events.contains(&HotkeyEvent::ToggleInventory));
        assert!(events.contains(&HotkeyEvent::SelectRegion));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_hung_up_receiver_stops_loop() {
        let sampler = ScriptedSampler::new();
        let (poller, rx) = poller_with(sampler.clone());
        drop(rx);
        let mut last = [false; BINDING_SLOTS];

        sampler.set_pressed(&[VK_F6]);
        assert!(!poller.poll_tick(&mut last).unwrap());
    }
}
