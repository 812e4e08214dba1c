//! Dashboard placer — assigns each active service a distinct `{col,row}` cell
//! on a logical grid, walking outward from the requested position.

/// Default grid dimensions, matching the 6x6 dashboard the original system
/// assumed.
pub const DEFAULT_COLS: i32 = 6;
pub const DEFAULT_ROWS: i32 = 6;

pub struct DashboardPlacer {
    cols: i32,
    rows: i32,
}

impl DashboardPlacer {
    pub fn new(cols: i32, rows: i32) -> Self {
        Self { cols, rows }
    }

    /// Candidate cells in walk order: first `(want_col..cols, want_row..rows)`
    /// row-major, then the corner rectangle `(0..want_col, 0..want_row)`. This
    /// is not a full grid traversal — cells in rows below `want_row` to the
    /// left of `want_col`, or in rows above `want_row` from `want_col` onward,
    /// are never visited, matching the original placement algorithm exactly.
    fn space_walk(&self, want_col: i32, want_row: i32) -> impl Iterator<Item = (i32, i32)> + '_ {
        let cols = self.cols;
        let first =
            (want_row..self.rows).flat_map(move |row| (want_col..cols).map(move |col| (col, row)));
        let second =
            (0..want_row).flat_map(move |row| (0..want_col).map(move |col| (col, row)));
        first.chain(second)
    }

    /// First unoccupied cell reachable from `(want_col, want_row)` by the walk
    /// order above, or `None` if the grid is full.
    pub fn allocate(
        &self,
        want_col: i32,
        want_row: i32,
        occupied: &std::collections::HashSet<(i32, i32)>,
    ) -> Option<(i32, i32)> {
        self.space_walk(want_col, want_row)
            .find(|cell| !occupied.contains(cell))
    }
}

impl Default for DashboardPlacer {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}
