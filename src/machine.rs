//! Macro engine: orchestrates capture, differencing, sequencing and cleanup.
//!
//! Two macro kinds exist (inventory clear, appraisal) and are mutually
//! exclusive process-wide: the active kind is a single atomic word, claimed
//! with a compare-exchange, so there is no window in which both could start.
//! A run moves Idle -> Starting -> Running -> Idle; `Starting` validates
//! preconditions and claims the active word before any screenshot or input
//! is produced, and fails back to Idle with a reported reason.

use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::capture::CaptureProvider;
use crate::config::MacroConfig;
use crate::detect::{classify, CellVerdict, DetectionThresholds};
use crate::grid::{Cell, Grid, Region};
use crate::input::{InputDriver, ModifierKey};
use crate::sequencer::{self, SequenceOptions};
use crate::window::WindowControl;

/// Title prefix of the game window (case-insensitive match).
pub const TARGET_WINDOW_TITLE_PREFIX: &str = "Path of Exile";

/// Wait after activating the game window before the first input event.
const WINDOW_SETTLE: Duration = Duration::from_millis(500);

const ACTIVE_NONE: u8 = 0;

/// The two macros the engine can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroKind {
    InventoryClear,
    Appraisal,
}

impl MacroKind {
    fn word(self) -> u8 {
        match self {
            MacroKind::InventoryClear => 1,
            MacroKind::Appraisal => 2,
        }
    }

    fn from_word(word: u8) -> Option<Self> {
        match word {
            1 => Some(MacroKind::InventoryClear),
            2 => Some(MacroKind::Appraisal),
            _ => None,
        }
    }
}

impl std::fmt::Display for MacroKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MacroKind::InventoryClear => write!(f, "inventory clear"),
            MacroKind::Appraisal => write!(f, "appraisal"),
        }
    }
}

/// Shared run state: read by the run thread, written by the UI context and
/// the hotkey poller. Explicitly passed around, never module-global.
pub struct MacroShared {
    /// Which macro kind is running, or [`ACTIVE_NONE`].
    active: AtomicU8,
    cancel_inventory: AtomicBool,
    cancel_appraisal: AtomicBool,
    /// A region selection/re-baseline is in progress.
    selection_active: AtomicBool,
}

impl MacroShared {
    fn new() -> Self {
        Self {
            active: AtomicU8::new(ACTIVE_NONE),
            cancel_inventory: AtomicBool::new(false),
            cancel_appraisal: AtomicBool::new(false),
            selection_active: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self, kind: MacroKind) -> bool {
        self.active.load(Ordering::SeqCst) == kind.word()
    }

    pub fn active_kind(&self) -> Option<MacroKind> {
        MacroKind::from_word(self.active.load(Ordering::SeqCst))
    }

    fn cancel_flag(&self, kind: MacroKind) -> &AtomicBool {
        match kind {
            MacroKind::InventoryClear => &self.cancel_inventory,
            MacroKind::Appraisal => &self.cancel_appraisal,
        }
    }

    /// Atomically claims the active slot for `kind`. Fails if any macro is
    /// already running; resets the kind's cancel flag on success.
    fn try_claim(&self, kind: MacroKind) -> Result<()> {
        match self.active.compare_exchange(
            ACTIVE_NONE,
            kind.word(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.cancel_flag(kind).store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(current) => match MacroKind::from_word(current) {
                Some(running) if running == kind => {
                    Err(anyhow!("{} macro is already running", kind))
                }
                Some(running) => Err(anyhow!(
                    "cannot start {} macro while {} macro is running",
                    kind,
                    running
                )),
                None => Err(anyhow!("macro state is busy")),
            },
        }
    }

    fn release(&self, kind: MacroKind) {
        let _ = self.active.compare_exchange(
            kind.word(),
            ACTIVE_NONE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Terminal status of one macro run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { clicked: usize },
    Cancelled { clicked: usize },
    Failed(String),
}

/// What happened, reported once per run in human-readable form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub kind: MacroKind,
    pub outcome: RunOutcome,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            RunOutcome::Completed { clicked } => {
                write!(f, "{} macro finished: {} cells clicked", self.kind, clicked)
            }
            RunOutcome::Cancelled { clicked } => {
                write!(
                    f,
                    "{} macro stopped after {} cells clicked",
                    self.kind, clicked
                )
            }
            RunOutcome::Failed(reason) => write!(f, "{} macro failed: {}", self.kind, reason),
        }
    }
}

/// The macro engine. Owns the configuration, the empty-inventory reference
/// image and the OS seams, and enforces the run state machine.
pub struct MacroEngine {
    shared: Arc<MacroShared>,
    config: Arc<Mutex<MacroConfig>>,
    config_path: PathBuf,
    reference: Arc<Mutex<Option<RgbaImage>>>,
    capture: Arc<dyn CaptureProvider>,
    input: Arc<dyn InputDriver>,
    window: Arc<dyn WindowControl>,
    grid: Grid,
}

impl MacroEngine {
    pub fn new(
        config: MacroConfig,
        config_path: PathBuf,
        capture: Arc<dyn CaptureProvider>,
        input: Arc<dyn InputDriver>,
        window: Arc<dyn WindowControl>,
    ) -> Self {
        Self {
            shared: Arc::new(MacroShared::new()),
            config: Arc::new(Mutex::new(config)),
            config_path,
            reference: Arc::new(Mutex::new(None)),
            capture,
            input,
            window,
            grid: Grid::default(),
        }
    }

    pub fn shared(&self) -> Arc<MacroShared> {
        self.shared.clone()
    }

    pub fn config(&self) -> Arc<Mutex<MacroConfig>> {
        self.config.clone()
    }

    pub fn is_running(&self, kind: MacroKind) -> bool {
        self.shared.is_running(kind)
    }

    pub fn selection_active(&self) -> bool {
        self.shared.selection_active.load(Ordering::SeqCst)
    }

    /// Commits a freshly selected region: captures the empty-inventory
    /// reference, clears cell markings tied to the old geometry, persists.
    /// The previous region stays untouched if anything fails.
    pub fn commit_region(&self, region: Region) -> Result<()> {
        self.with_selection_guard(|| {
            let reference = self.capture.capture(&region)?;
            {
                let mut config = self.config.lock().expect("config lock");
                config.set_region(region);
                if let Err(e) = config.save(&self.config_path) {
                    crate::log(&format!("Failed to save config: {}", e));
                }
            }
            *self.reference.lock().expect("reference lock") = Some(reference);
            crate::log(&format!(
                "Region committed: {}x{} at ({}, {}); reference captured",
                region.width(),
                region.height(),
                region.start().x,
                region.start().y
            ));
            Ok(())
        })
    }

    /// Re-captures the empty-inventory reference for the configured region.
    pub fn rebaseline(&self) -> Result<()> {
        self.with_selection_guard(|| {
            let region = self
                .config
                .lock()
                .expect("config lock")
                .region()
                .ok_or_else(|| anyhow!("no region selected"))?;
            let reference = self.capture.capture(&region)?;
            *self.reference.lock().expect("reference lock") = Some(reference);
            crate::log("Reference image re-captured");
            Ok(())
        })
    }

    fn with_selection_guard(&self, f: impl FnOnce() -> Result<()>) -> Result<()> {
        if self
            .shared
            .selection_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(anyhow!("a region selection is already in progress"));
        }
        let result = f();
        self.shared.selection_active.store(false, Ordering::SeqCst);
        result
    }

    /// Starts a macro run on a background thread.
    ///
    /// Validates preconditions and claims the run slot before any screenshot
    /// or input is produced; on any failure the state falls back to idle with
    /// nothing touched.
    pub fn start(&self, kind: MacroKind) -> Result<()> {
        let config = self.config.lock().expect("config lock").clone();

        // Precondition checks, reported before any side effect.
        let region = config
            .region()
            .ok_or_else(|| anyhow!("no region selected"))?;
        if kind == MacroKind::Appraisal {
            let scroll = config
                .special_cell()
                .ok_or_else(|| anyhow!("appraisal scroll cell is not set"))?;
            if !self.grid.contains(scroll) {
                return Err(anyhow!("appraisal scroll cell {} is outside the grid", scroll));
            }
        }

        self.shared.try_claim(kind)?;

        // Locate and activate the game window; one-shot, no retry.
        if let Err(e) = self.window.activate_target(TARGET_WINDOW_TITLE_PREFIX) {
            self.shared.release(kind);
            return Err(e);
        }

        crate::log(&format!("Starting {} macro on {}x{} region", kind, region.width(), region.height()));

        let shared = self.shared.clone();
        let reference = self.reference.lock().expect("reference lock").clone();
        let grid = self.grid;
        let capture = self.capture.clone();
        let input = self.input.clone();
        let window = self.window.clone();

        thread::spawn(move || {
            let cancel = shared.cancel_flag(kind);
            let summary = run_once(
                kind,
                &config,
                reference.as_ref(),
                &grid,
                capture.as_ref(),
                input.as_ref(),
                window.as_ref(),
                cancel,
            );
            shared.release(kind);
            crate::log(&format!("{}", summary));
        });

        Ok(())
    }

    /// Requests a stop of a running macro; the run thread winds down on its
    /// own and performs the restore path itself.
    pub fn stop(&self, kind: MacroKind) {
        if self.shared.is_running(kind) {
            self.shared.cancel_flag(kind).store(true, Ordering::SeqCst);
            crate::log(&format!("Stop requested for {} macro", kind));
        } else {
            crate::log(&format!("{} macro is not running", kind));
        }
    }

    /// Hotkey entry point: start if idle, stop if running.
    pub fn toggle(&self, kind: MacroKind) {
        if self.shared.is_running(kind) {
            self.stop(kind);
        } else if let Err(e) = self.start(kind) {
            crate::log(&format!("Cannot start {} macro: {}", kind, e));
        }
    }
}

/// Builds the ordered list of cells a run will click.
///
/// Excluded cells and the appraisal-scroll cell are never targeted, in either
/// macro kind, with or without detection. When detection is enabled and a
/// reference exists, only cells classified as occupied remain; otherwise all
/// eligible cells do. Row-major order is preserved.
fn build_target_set(
    config: &MacroConfig,
    reference: Option<&RgbaImage>,
    current: &RgbaImage,
    grid: &Grid,
) -> Vec<Cell> {
    let excluded = config.excluded();
    let special = config.special_cell();
    let thresholds = DetectionThresholds::from_config(config);

    grid.cells()
        .filter(|cell| !excluded.contains(cell) && special != Some(*cell))
        .filter(|cell| match reference {
            Some(reference) if config.detect_items => {
                let rect = grid.cell_px_rect(current.width(), current.height(), *cell);
                classify(reference, current, rect, &thresholds) == CellVerdict::Occupied
            }
            _ => true,
        })
        .collect()
}

/// One line telling the operator how the target set came to be, including the
/// case where detection is enabled but no baseline exists yet.
fn target_summary(detect_items: bool, have_reference: bool, count: usize) -> String {
    if !detect_items {
        format!("Detection off: targeting {} cells", count)
    } else if !have_reference {
        format!("No reference captured: targeting {} cells", count)
    } else {
        format!("Detected items in {} cells", count)
    }
}

/// Executes one full macro run synchronously: settle, defensive key release,
/// capture, target selection, sequencing, restore. Never panics outward; all
/// failures fold into the returned summary.
#[allow(clippy::too_many_arguments)]
fn run_once(
    kind: MacroKind,
    config: &MacroConfig,
    reference: Option<&RgbaImage>,
    grid: &Grid,
    capture: &dyn CaptureProvider,
    input: &dyn InputDriver,
    window: &dyn WindowControl,
    cancel: &AtomicBool,
) -> RunSummary {
    let minimized = config.minimize_window;
    if minimized {
        window.minimize_controller();
    }

    let result = run_sequence(kind, config, reference, grid, capture, input, cancel);

    if minimized {
        window.restore_controller();
    }

    let outcome = match result {
        Ok(outcome) if outcome.cancelled => RunOutcome::Cancelled {
            clicked: outcome.clicked,
        },
        Ok(outcome) => RunOutcome::Completed {
            clicked: outcome.clicked,
        },
        Err(e) => RunOutcome::Failed(e.to_string()),
    };

    RunSummary { kind, outcome }
}

fn run_sequence(
    kind: MacroKind,
    config: &MacroConfig,
    reference: Option<&RgbaImage>,
    grid: &Grid,
    capture: &dyn CaptureProvider,
    input: &dyn InputDriver,
    cancel: &AtomicBool,
) -> Result<sequencer::SequenceOutcome> {
    // Let the window switch finish before any input goes out.
    thread::sleep(WINDOW_SETTLE);

    // Release possibly-stuck modifiers from an earlier aborted run.
    let _ = input.release_key(ModifierKey::Ctrl);
    if kind == MacroKind::Appraisal {
        let _ = input.release_key(ModifierKey::Shift);
    }

    let region = config
        .region()
        .ok_or_else(|| anyhow!("no region selected"))?;
    let current = capture.capture(&region)?;

    let targets = build_target_set(config, reference, &current, grid);
    crate::log(&target_summary(
        config.detect_items,
        reference.is_some(),
        targets.len(),
    ));

    let options = SequenceOptions {
        delay_between_clicks: config.click_delay(),
        hold_modifier: config.use_ctrl_click,
        ..Default::default()
    };

    match kind {
        MacroKind::InventoryClear => sequencer::execute_bulk(
            &targets,
            &region,
            grid,
            &options,
            input,
            cancel,
            &mut rand::thread_rng(),
        ),
        MacroKind::Appraisal => {
            let scroll = config
                .special_cell()
                .ok_or_else(|| anyhow!("appraisal scroll cell is not set"))?;
            sequencer::execute_appraisal(&targets, scroll, &region, grid, &options, input, cancel)
        }
    }
}
