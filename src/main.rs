//! PoE Inventory Macro
//!
//! A Windows console tool that clears or appraises a Path of Exile inventory
//! with simulated clicks. A selected screen region is overlaid with the 12x5
//! inventory grid; item detection compares each cell against an
//! empty-inventory reference screenshot, and global hotkeys toggle the macros.

mod capture;
mod config;
mod detect;
mod grid;
mod hotkeys;
mod input;
mod machine;
mod paths;
mod sequencer;
mod window;

use anyhow::Result;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;

#[cfg(windows)]
use capture::GdiCapture;
#[cfg(windows)]
use config::MacroConfig;
#[cfg(windows)]
use hotkeys::{AsyncKeySampler, HotkeyEvent, HotkeyPoller};
#[cfg(windows)]
use input::SendInputDriver;
#[cfg(windows)]
use machine::{MacroEngine, MacroKind};
#[cfg(windows)]
use window::Win32WindowControl;

/// Logs a message to both console and log file with timestamp.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    print!("{}", line);
    let log_path = paths::get_logs_dir().join("poe_inv_macro.log");
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(line.as_bytes());
    }
}

#[cfg(not(windows))]
fn main() -> Result<()> {
    Err(anyhow::anyhow!("poe-inv-macro only runs on Windows"))
}

#[cfg(windows)]
fn main() -> Result<()> {
    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = if let Some(loc) = panic_info.location() {
            format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column())
        } else {
            String::new()
        };
        // Try to log even if paths module isn't initialized
        let log_msg = format!("[PANIC]{} {}\n", location, msg);
        eprintln!("{}", log_msg);
        if let Ok(exe_dir) = std::env::current_exe().map(|p| p.parent().unwrap().to_path_buf()) {
            let log_path = exe_dir.join("logs").join("poe_inv_macro.log");
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                use std::io::Write;
                let _ = file.write_all(log_msg.as_bytes());
            }
        }
    }));

    paths::ensure_directories()?;

    let config_path = paths::get_config_path();
    let config = MacroConfig::load(&config_path);

    let engine = MacroEngine::new(
        config,
        config_path,
        Arc::new(GdiCapture),
        Arc::new(SendInputDriver),
        Arc::new(Win32WindowControl),
    );

    let (tx, rx) = mpsc::channel();
    let poller = HotkeyPoller::new(Arc::new(AsyncKeySampler), engine.config(), tx);
    let _poller_handle = poller.spawn();

    {
        let config = engine.config();
        let config = config.lock().expect("config lock");
        log("PoE Inventory Macro started");
        log(&format!(
            "Hotkey: {} (toggle inventory clear), {} (stop)",
            config.run_hotkey, config.stop_hotkey
        ));
        log(&format!(
            "Hotkey: {} (toggle appraisal), {} (stop)",
            config.appraisal_run_hotkey, config.appraisal_stop_hotkey
        ));
        log(&format!(
            "Hotkey: {} (re-capture empty-inventory reference)",
            config.area_select_hotkey
        ));
        if config.region().is_none() {
            log("No region configured yet. Set start_pos/end_pos in the config file, then press the reference hotkey.");
        }
    }

    // Dispatch loop: the poller thread only detects edges; every decision is
    // taken here, on the context that owns the engine.
    for event in rx {
        match event {
            HotkeyEvent::ToggleInventory => engine.toggle(MacroKind::InventoryClear),
            HotkeyEvent::StopInventory => engine.stop(MacroKind::InventoryClear),
            HotkeyEvent::ToggleAppraisal => engine.toggle(MacroKind::Appraisal),
            HotkeyEvent::StopAppraisal => engine.stop(MacroKind::Appraisal),
            HotkeyEvent::SelectRegion => {
                if engine.selection_active() {
                    continue;
                }
                if let Err(e) = engine.rebaseline() {
                    log(&format!("Reference capture failed: {}", e));
                }
            }
        }
    }

    Ok(())
}
