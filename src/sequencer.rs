//! Action sequencer: drives the input driver over a planned set of cells.
//!
//! Two sequence shapes exist. A bulk run (inventory clear) optionally holds
//! Ctrl for the whole loop and left-clicks a jittered point inside each
//! target cell. An appraisal run right-clicks the appraisal-scroll cell once,
//! then holds Shift while left-clicking each target cell at its exact center.
//!
//! Both shapes poll a shared cancellation flag before every cell and both
//! guarantee the held modifier is released on every exit path, including
//! mid-sequence driver errors, via an RAII guard.

use anyhow::Result;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::grid::{Cell, Grid, Region};
use crate::input::{InputDriver, ModifierKey, MouseButton};

/// Fraction of the cell width/height used as the half-range of the uniform
/// random click offset around the cell center.
pub const JITTER_FRACTION: f64 = 0.2;

/// Pause after right-clicking the appraisal scroll before the first target.
const SCROLL_PICKUP_PAUSE: Duration = Duration::from_millis(50);
/// Pause after pressing a modifier so the key state registers in the game.
const MODIFIER_SETTLE: Duration = Duration::from_millis(100);

/// Timing and modifier options for a sequence run.
#[derive(Clone, Copy, Debug)]
pub struct SequenceOptions {
    /// Extra delay after each cell's click.
    pub delay_between_clicks: Duration,
    /// Hold Ctrl across the whole bulk loop.
    pub hold_modifier: bool,
    /// Delay after moving the cursor, before pressing.
    pub settle: Duration,
    /// How long the button stays down.
    pub hold: Duration,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            delay_between_clicks: Duration::from_millis(100),
            hold_modifier: true,
            settle: Duration::from_millis(20),
            hold: Duration::from_millis(20),
        }
    }
}

/// How a sequence run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceOutcome {
    /// Cells actually clicked.
    pub clicked: usize,
    /// True if the stop flag cut the run short.
    pub cancelled: bool,
}

/// Holds a modifier key down and releases it when dropped, so the key ends up
/// released no matter how the sequence exits.
struct ModifierGuard<'a> {
    driver: &'a dyn InputDriver,
    key: ModifierKey,
}

impl<'a> ModifierGuard<'a> {
    fn hold(driver: &'a dyn InputDriver, key: ModifierKey) -> Result<Self> {
        driver.press_key(key)?;
        Ok(Self { driver, key })
    }
}

impl Drop for ModifierGuard<'_> {
    fn drop(&mut self) {
        // Best-effort: a failed release here has no recovery path anyway.
        let _ = self.driver.release_key(self.key);
    }
}

/// Picks a click point inside `cell`: the cell center plus independent
/// uniform offsets within ±[`JITTER_FRACTION`] of the cell size.
fn jittered_click_point(
    grid: &Grid,
    region: &Region,
    cell: Cell,
    rng: &mut impl Rng,
) -> (i32, i32) {
    let rect = grid.cell_px_rect(region.width(), region.height(), cell);
    let (cx, cy) = grid.cell_center(region, cell);
    let x_range = rect.width() as f64 * JITTER_FRACTION;
    let y_range = rect.height() as f64 * JITTER_FRACTION;
    let dx = rng.gen_range(-x_range..=x_range);
    let dy = rng.gen_range(-y_range..=y_range);
    ((cx + dx) as i32, (cy + dy) as i32)
}

/// One move/press/release cycle at an absolute screen point.
fn click_at(
    driver: &dyn InputDriver,
    button: MouseButton,
    x: i32,
    y: i32,
    options: &SequenceOptions,
) -> Result<()> {
    driver.move_cursor(x, y)?;
    std::thread::sleep(options.settle);
    driver.press_button(button)?;
    std::thread::sleep(options.hold);
    driver.release_button(button)?;
    Ok(())
}

/// Left-clicks a jittered point in each target cell, in the given order,
/// optionally holding Ctrl for the duration.
///
/// The cancellation flag is checked before each cell, so at most the cell in
/// flight completes after a stop request.
pub fn execute_bulk(
    targets: &[Cell],
    region: &Region,
    grid: &Grid,
    options: &SequenceOptions,
    driver: &dyn InputDriver,
    cancel: &AtomicBool,
    rng: &mut impl Rng,
) -> Result<SequenceOutcome> {
    let _guard = if options.hold_modifier {
        let guard = ModifierGuard::hold(driver, ModifierKey::Ctrl)?;
        std::thread::sleep(MODIFIER_SETTLE);
        Some(guard)
    } else {
        None
    };

    let mut clicked = 0;
    for &cell in targets {
        if cancel.load(Ordering::SeqCst) {
            return Ok(SequenceOutcome {
                clicked,
                cancelled: true,
            });
        }

        let (x, y) = jittered_click_point(grid, region, cell, rng);
        click_at(driver, MouseButton::Left, x, y, options)?;
        clicked += 1;

        if !options.delay_between_clicks.is_zero() {
            std::thread::sleep(options.delay_between_clicks);
        }
    }

    Ok(SequenceOutcome {
        clicked,
        cancelled: false,
    })
}

/// Right-clicks the appraisal scroll once, then holds Shift while
/// left-clicking each target cell at its exact center.
pub fn execute_appraisal(
    targets: &[Cell],
    scroll_cell: Cell,
    region: &Region,
    grid: &Grid,
    options: &SequenceOptions,
    driver: &dyn InputDriver,
    cancel: &AtomicBool,
) -> Result<SequenceOutcome> {
    // Pick up the scroll exactly once.
    let (sx, sy) = grid.cell_center(region, scroll_cell);
    click_at(driver, MouseButton::Right, sx as i32, sy as i32, options)?;
    std::thread::sleep(SCROLL_PICKUP_PAUSE);

    let _guard = ModifierGuard::hold(driver, ModifierKey::Shift)?;
    std::thread::sleep(MODIFIER_SETTLE);

    let mut clicked = 0;
    for &cell in targets {
        if cancel.load(Ordering::SeqCst) {
            return Ok(SequenceOutcome {
                clicked,
                cancelled: true,
            });
        }

        let (cx, cy) = grid.cell_center(region, cell);
        click_at(driver, MouseButton::Left, cx as i32, cy as i32, options)?;
        clicked += 1;

        if !options.delay_between_clicks.is_zero() {
            std::thread::sleep(options.delay_between_clicks);
        }
    }

    Ok(SequenceOutcome {
        clicked,
        cancelled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Point;
    use anyhow::anyhow;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Event {
        Move(i32, i32),
        Press(MouseButton),
        Release(MouseButton),
        KeyDown(ModifierKey),
        KeyUp(ModifierKey),
    }

    /// Records every driver call; can set a cancel flag after N button
    /// releases or fail the Nth button press.
    struct RecordingDriver {
        events: Mutex<Vec<Event>>,
        releases: AtomicUsize,
        presses: AtomicUsize,
        cancel_after_releases: Option<(usize, Arc<AtomicBool>)>,
        fail_at_press: Option<usize>,
    }

    impl RecordingDriver {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                releases: AtomicUsize::new(0),
                presses: AtomicUsize::new(0),
                cancel_after_releases: None,
                fail_at_press: None,
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl InputDriver for RecordingDriver {
        fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
            self.record(Event::Move(x, y));
            Ok(())
        }

        fn press_button(&self, button: MouseButton) -> Result<()> {
            let n = self.presses.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at_press == Some(n) {
                return Err(anyhow!("injected press failure"));
            }
            self.record(Event::Press(button));
            Ok(())
        }

        fn release_button(&self, button: MouseButton) -> Result<()> {
            self.record(Event::Release(button));
            let n = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, flag)) = &self.cancel_after_releases {
                if n == *at {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(())
        }

        fn press_key(&self, key: ModifierKey) -> Result<()> {
            self.record(Event::KeyDown(key));
            Ok(())
        }

        fn release_key(&self, key: ModifierKey) -> Result<()> {
            self.record(Event::KeyUp(key));
            Ok(())
        }
    }

    fn test_region() -> Region {
        Region::new(Point { x: 100, y: 200 }, Point { x: 100 + 600, y: 200 + 250 }).unwrap()
    }

    fn fast_options() -> SequenceOptions {
        SequenceOptions {
            delay_between_clicks: Duration::ZERO,
            hold_modifier: true,
            settle: Duration::ZERO,
            hold: Duration::ZERO,
        }
    }

    #[test]
    fn test_bulk_event_order_and_modifier_bracket() {
        let driver = RecordingDriver::new();
        let cancel = AtomicBool::new(false);
        let mut rng = StdRng::seed_from_u64(7);
        let targets = [Cell::new(0, 0), Cell::new(1, 0)];

        let outcome = execute_bulk(
            &targets,
            &test_region(),
            &Grid::default(),
            &fast_options(),
            &driver,
            &cancel,
            &mut rng,
        )
        .unwrap();

        assert_eq!(outcome, SequenceOutcome { clicked: 2, cancelled: false });

        let events = driver.events();
        assert_eq!(events.first(), Some(&Event::KeyDown(ModifierKey::Ctrl)));
        assert_eq!(events.last(), Some(&Event::KeyUp(ModifierKey::Ctrl)));
        // Per cell: move, press, release.
        assert!(matches!(events[1], Event::Move(_, _)));
        assert_eq!(events[2], Event::Press(MouseButton::Left));
        assert_eq!(events[3], Event::Release(MouseButton::Left));
        assert!(matches!(events[4], Event::Move(_, _)));
        assert_eq!(events[5], Event::Press(MouseButton::Left));
        assert_eq!(events[6], Event::Release(MouseButton::Left));
        assert_eq!(events.len(), 8);
    }

    #[test]
    fn test_bulk_without_modifier_sends_no_key_events() {
        let driver = RecordingDriver::new();
        let cancel = AtomicBool::new(false);
        let mut rng = StdRng::seed_from_u64(7);
        let mut options = fast_options();
        options.hold_modifier = false;

        execute_bulk(
            &[Cell::new(3, 2)],
            &test_region(),
            &Grid::default(),
            &options,
            &driver,
            &cancel,
            &mut rng,
        )
        .unwrap();

        assert!(driver
            .events()
            .iter()
            .all(|e| !matches!(e, Event::KeyDown(_) | Event::KeyUp(_))));
    }

    #[test]
    fn test_cancel_stops_before_next_cell_and_releases_modifier() {
        let mut driver = RecordingDriver::new();
        let cancel = Arc::new(AtomicBool::new(false));
        // Flip the stop flag while the second cell's click is in flight.
        driver.cancel_after_releases = Some((2, cancel.clone()));
        let mut rng = StdRng::seed_from_u64(42);
        let targets: Vec<Cell> = Grid::default().cells().collect();

        let outcome = execute_bulk(
            &targets,
            &test_region(),
            &Grid::default(),
            &fast_options(),
            &driver,
            &cancel,
            &mut rng,
        )
        .unwrap();

        // The in-flight cell completed; nothing after it was clicked.
        assert_eq!(outcome, SequenceOutcome { clicked: 2, cancelled: true });
        assert_eq!(driver.events().last(), Some(&Event::KeyUp(ModifierKey::Ctrl)));
    }

    #[test]
    fn test_driver_error_still_releases_modifier() {
        let mut driver = RecordingDriver::new();
        driver.fail_at_press = Some(2);
        let cancel = AtomicBool::new(false);
        let mut rng = StdRng::seed_from_u64(1);
        let targets = [Cell::new(0, 0), Cell::new(1, 0), Cell::new(2, 0)];

        let result = execute_bulk(
            &targets,
            &test_region(),
            &Grid::default(),
            &fast_options(),
            &driver,
            &cancel,
            &mut rng,
        );

        assert!(result.is_err());
        assert_eq!(driver.events().last(), Some(&Event::KeyUp(ModifierKey::Ctrl)));
    }

    #[test]
    fn test_appraisal_right_clicks_scroll_once_then_holds_shift() {
        let driver = RecordingDriver::new();
        let cancel = AtomicBool::new(false);
        let region = test_region();
        let grid = Grid::default();
        let scroll = Cell::new(11, 0);
        let targets = [Cell::new(0, 0), Cell::new(1, 0)];

        let outcome = execute_appraisal(
            &targets,
            scroll,
            &region,
            &grid,
            &fast_options(),
            &driver,
            &cancel,
        )
        .unwrap();

        assert_eq!(outcome, SequenceOutcome { clicked: 2, cancelled: false });

        let events = driver.events();
        let (sx, sy) = grid.cell_center(&region, scroll);
        assert_eq!(events[0], Event::Move(sx as i32, sy as i32));
        assert_eq!(events[1], Event::Press(MouseButton::Right));
        assert_eq!(events[2], Event::Release(MouseButton::Right));
        assert_eq!(events[3], Event::KeyDown(ModifierKey::Shift));
        assert_eq!(events.last(), Some(&Event::KeyUp(ModifierKey::Shift)));
        // Exactly one right-click in the whole stream.
        let right_clicks = events
            .iter()
            .filter(|e| matches!(e, Event::Press(MouseButton::Right)))
            .count();
        assert_eq!(right_clicks, 1);
        // Targets are left-clicked at their exact centers.
        let (cx, cy) = grid.cell_center(&region, targets[0]);
        assert_eq!(events[4], Event::Move(cx as i32, cy as i32));
    }

    #[test]
    fn test_appraisal_error_still_releases_shift() {
        let mut driver = RecordingDriver::new();
        // Press 1 is the scroll right-click; fail the first target click.
        driver.fail_at_press = Some(2);
        let cancel = AtomicBool::new(false);

        let result = execute_appraisal(
            &[Cell::new(0, 0)],
            Cell::new(11, 0),
            &test_region(),
            &Grid::default(),
            &fast_options(),
            &driver,
            &cancel,
        );

        assert!(result.is_err());
        assert_eq!(
            driver.events().last(),
            Some(&Event::KeyUp(ModifierKey::Shift))
        );
    }

    #[test]
    fn test_appraisal_cancel_releases_shift() {
        let mut driver = RecordingDriver::new();
        let cancel = Arc::new(AtomicBool::new(false));
        // Release 1 is the scroll right-click; release 2 is the first target.
        driver.cancel_after_releases = Some((2, cancel.clone()));
        let targets: Vec<Cell> = Grid::default().cells().collect();

        let outcome = execute_appraisal(
            &targets,
            Cell::new(11, 4),
            &test_region(),
            &Grid::default(),
            &fast_options(),
            &driver,
            &cancel,
        )
        .unwrap();

        assert_eq!(outcome, SequenceOutcome { clicked: 1, cancelled: true });
        assert_eq!(
            driver.events().last(),
            Some(&Event::KeyUp(ModifierKey::Shift))
        );
    }

    #[test]
    fn test_jitter_stays_within_cell_fraction() {
        let region = test_region();
        let grid = Grid::default();
        let cell = Cell::new(5, 2);
        let rect = grid.cell_px_rect(region.width(), region.height(), cell);
        let (cx, cy) = grid.cell_center(&region, cell);
        let max_dx = rect.width() as f64 * JITTER_FRACTION;
        let max_dy = rect.height() as f64 * JITTER_FRACTION;

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..1000 {
            let (x, y) = jittered_click_point(&grid, &region, cell, &mut rng);
            assert!((x as f64 - cx).abs() <= max_dx + 1.0);
            assert!((y as f64 - cy).abs() <= max_dy + 1.0);
        }
    }
}
