//! Screen region and inventory grid geometry.
//!
//! A selected screen rectangle is overlaid with a fixed 12x5 grid of cells.
//! The same pixel-rectangle formula is used for cropping cells out of
//! screenshots and for placing clicks, so detection and clicking always agree
//! on cell boundaries.

use anyhow::{anyhow, Result};

/// Number of grid columns (Path of Exile inventory width).
pub const GRID_COLUMNS: u32 = 12;
/// Number of grid rows (Path of Exile inventory height).
pub const GRID_ROWS: u32 = 5;
/// Minimum region edge length in pixels; anything smaller is a mis-drag.
pub const MIN_REGION_EDGE: i32 = 10;

/// A point in absolute screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// A validated screen rectangle: `end` is strictly below and to the right of
/// `start`, and both edges are at least [`MIN_REGION_EDGE`] pixels long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    start: Point,
    end: Point,
}

impl Region {
    /// Creates a region from two corner points, rejecting degenerate or
    /// too-small selections.
    pub fn new(start: Point, end: Point) -> Result<Self> {
        let width = end.x - start.x;
        let height = end.y - start.y;
        if width < MIN_REGION_EDGE || height < MIN_REGION_EDGE {
            return Err(anyhow!(
                "Region too small: {}x{} (minimum {}x{})",
                width,
                height,
                MIN_REGION_EDGE,
                MIN_REGION_EDGE
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn end(&self) -> Point {
        self.end
    }

    pub fn width(&self) -> u32 {
        (self.end.x - self.start.x) as u32
    }

    pub fn height(&self) -> u32 {
        (self.end.y - self.start.y) as u32
    }
}

/// A cell position in the grid, `(col, row)` zero-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub col: u32,
    pub row: u32,
}

impl Cell {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

/// A cell's pixel rectangle, relative to the top-left of the region.
/// Half-open: `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl CellRect {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// The logical grid overlaid on a region.
#[derive(Clone, Copy, Debug)]
pub struct Grid {
    pub columns: u32,
    pub rows: u32,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            columns: GRID_COLUMNS,
            rows: GRID_ROWS,
        }
    }
}

impl Grid {
    pub fn contains(&self, cell: Cell) -> bool {
        cell.col < self.columns && cell.row < self.rows
    }

    /// Iterates all cells in row-major order (rows outer, columns inner).
    pub fn cells(&self) -> impl Iterator<Item = Cell> {
        let columns = self.columns;
        let rows = self.rows;
        (0..rows).flat_map(move |row| (0..columns).map(move |col| Cell { col, row }))
    }

    /// Pixel rectangle of `cell` within a `width` x `height` area.
    ///
    /// Bounds are `floor(col * w/cols)` .. `floor((col+1) * w/cols)` (same for
    /// rows), so cells tile the area exactly with sub-pixel remainders
    /// assigned by truncation.
    ///
    /// Passing a cell outside the grid is a caller contract violation; it is
    /// asserted in debug builds and clamped to the last column/row in release.
    pub fn cell_px_rect(&self, width: u32, height: u32, cell: Cell) -> CellRect {
        debug_assert!(self.contains(cell), "cell {} outside grid", cell);
        let col = cell.col.min(self.columns - 1) as u64;
        let row = cell.row.min(self.rows - 1) as u64;
        let (w, h) = (width as u64, height as u64);
        let (cols, rows) = (self.columns as u64, self.rows as u64);

        // floor(col * w / cols) in exact integer arithmetic; equals the
        // real-valued floor(col * cell_width) without float rounding at the
        // region edges.
        CellRect {
            x0: (col * w / cols) as u32,
            y0: (row * h / rows) as u32,
            x1: ((col + 1) * w / cols) as u32,
            y1: ((row + 1) * h / rows) as u32,
        }
    }

    /// Center of `cell` in absolute screen coordinates.
    pub fn cell_center(&self, region: &Region, cell: Cell) -> (f64, f64) {
        let rect = self.cell_px_rect(region.width(), region.height(), cell);
        (
            region.start().x as f64 + (rect.x0 + rect.x1) as f64 / 2.0,
            region.start().y as f64 + (rect.y0 + rect.y1) as f64 / 2.0,
        )
    }
}
