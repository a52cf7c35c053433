use crate::vecmath::DVec3;
use anyhow::Result;

/// Squared distances below this are treated as coincident/self pairs and never
/// count as within-support interactions.
pub const ALMOST_ZERO: f32 = 1e-18;

/// Cell-grid dimensions of the domain partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub ncx: u32,
    pub ncy: u32,
    pub ncz: u32,
}

impl GridDims {
    pub fn new(ncx: u32, ncy: u32, ncz: u32) -> Self {
        Self { ncx, ncy, ncz }
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.ncx as usize * self.ncy as usize * self.ncz as usize
    }
}

/// Encodes grid coordinates into a cell code, x fastest.
#[inline(always)]
pub fn cell_code(cx: u32, cy: u32, cz: u32, dims: &GridDims) -> u32 {
    (cz * dims.ncy + cy) * dims.ncx + cx
}

/// Assigns a cell code to each position, clamping to the grid bounds like the
/// simulator's grid build does for particles on the domain edge.
pub fn assign_codes(positions: &[DVec3], origin: DVec3, cell_size: f64, dims: &GridDims) -> Vec<u32> {
    if dims.ncx == 0 || dims.ncy == 0 || dims.ncz == 0 {
        return vec![0; positions.len()];
    }
    let inv = if cell_size > 0.0 { 1.0 / cell_size } else { 0.0 };
    positions
        .iter()
        .map(|p| {
            let cx = (((p.x - origin.x) * inv).floor().max(0.0) as u32).min(dims.ncx - 1);
            let cy = (((p.y - origin.y) * inv).floor().max(0.0) as u32).min(dims.ncy - 1);
            let cz = (((p.z - origin.z) * inv).floor().max(0.0) as u32).min(dims.ncz - 1);
            cell_code(cx, cy, cz, dims)
        })
        .collect()
}

/// Clamped neighbor-cell ranges for one probe, produced by
/// [`NeighborQuery::init_query`]. Ranges are half-open; `boundary` selects the
/// boundary or fluid cell map for subsequent row lookups.
#[derive(Debug, Clone, Copy)]
pub struct QueryState {
    pub x_begin: i32,
    pub x_end: i32,
    pub y_begin: i32,
    pub y_end: i32,
    pub z_begin: i32,
    pub z_end: i32,
    pub boundary: bool,
}

/// Packed pair separation: single-precision offset components plus squared
/// distance, matching the precision the interaction kernel evaluates at.
#[derive(Debug, Clone, Copy)]
pub struct PairMetric {
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub dist_sq: f32,
}

/// Computes the packed separation between two particle positions.
#[inline(always)]
pub fn pair_metric(a: DVec3, b: DVec3) -> PairMetric {
    let dx = (a.x - b.x) as f32;
    let dy = (a.y - b.y) as f32;
    let dz = (a.z - b.z) as f32;
    PairMetric {
        dx,
        dy,
        dz,
        dist_sq: dx * dx + dy * dy + dz * dz,
    }
}

/// Read-only neighbor-search contract consumed by the counting pass.
///
/// The underlying spatial index is owned and lifetime-managed by the simulator;
/// the engine only borrows it for the duration of one pass.
pub trait NeighborQuery: Sync {
    /// Starts a scan around `cell_code`, selecting boundary or fluid neighbor
    /// cells, and returns the clamped (x, y, z) cell ranges to visit.
    fn init_query(&self, cell_code: u32, boundary_cells: bool) -> QueryState;

    /// Contiguous `[begin, end)` particle-index sub-range covering the x-span
    /// of row `(y, z)`.
    fn particle_range(&self, y: i32, z: i32, query: &QueryState) -> (u32, u32);
}

/// CPU cell-list partition implementing [`NeighborQuery`].
///
/// Particles are expected in two blocks — boundary in `[0, boundary_count)`,
/// fluid in `[boundary_count, n)` — each sorted by cell code. Because codes
/// run x-fastest, the particles of a row's consecutive x cells are contiguous,
/// which is what makes the `particle_range` contract a single `[begin, end)`.
#[derive(Debug)]
pub struct CellGrid {
    dims: GridDims,
    /// Prefix table over boundary-block particles, length `cells + 1`.
    bound_begin: Vec<u32>,
    /// Prefix table over fluid-block particles (absolute indices), length `cells + 1`.
    fluid_begin: Vec<u32>,
}

impl CellGrid {
    /// Builds the begin tables from per-particle cell codes.
    ///
    /// Fails when a code falls outside the grid or a block is not sorted by
    /// cell code; both indicate a broken upstream sort.
    pub fn build(dims: GridDims, cell_codes: &[u32], boundary_count: usize) -> Result<Self> {
        let cells = dims.cell_count();
        if boundary_count > cell_codes.len() {
            anyhow::bail!(
                "boundary_count {} exceeds particle count {}",
                boundary_count,
                cell_codes.len()
            );
        }
        for (block_name, block) in [
            ("boundary", &cell_codes[..boundary_count]),
            ("fluid", &cell_codes[boundary_count..]),
        ] {
            if let Some(&bad) = block.iter().find(|&&c| c as usize >= cells) {
                anyhow::bail!("{} block cell code {} out of range ({} cells)", block_name, bad, cells);
            }
            if block.windows(2).any(|w| w[0] > w[1]) {
                anyhow::bail!("{} block is not sorted by cell code", block_name);
            }
        }

        let bound_begin = Self::prefix_table(cells, &cell_codes[..boundary_count], 0);
        let fluid_begin =
            Self::prefix_table(cells, &cell_codes[boundary_count..], boundary_count as u32);
        Ok(Self {
            dims,
            bound_begin,
            fluid_begin,
        })
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Count-then-scan over one sorted block, offset to absolute particle
    /// indices. Same two phases as the simulator's grid build.
    fn prefix_table(cells: usize, codes: &[u32], offset: u32) -> Vec<u32> {
        let mut counts = vec![0u32; cells];
        for &code in codes {
            counts[code as usize] += 1;
        }
        let mut begin = Vec::with_capacity(cells + 1);
        let mut total = offset;
        for c in 0..cells {
            begin.push(total);
            total += counts[c];
        }
        begin.push(total);
        begin
    }

    #[inline]
    fn decode(&self, code: u32) -> (u32, u32, u32) {
        let cx = code % self.dims.ncx;
        let cy = (code / self.dims.ncx) % self.dims.ncy;
        let cz = code / (self.dims.ncx * self.dims.ncy);
        (cx, cy, cz)
    }
}

impl NeighborQuery for CellGrid {
    fn init_query(&self, cell_code: u32, boundary_cells: bool) -> QueryState {
        let (cx, cy, cz) = self.decode(cell_code);
        let clamp = |c: u32, dim: u32| -> (i32, i32) {
            let begin = (c as i32 - 1).max(0);
            let end = ((c + 1).min(dim - 1) as i32) + 1;
            (begin, end)
        };
        let (x_begin, x_end) = clamp(cx, self.dims.ncx);
        let (y_begin, y_end) = clamp(cy, self.dims.ncy);
        let (z_begin, z_end) = clamp(cz, self.dims.ncz);
        QueryState {
            x_begin,
            x_end,
            y_begin,
            y_end,
            z_begin,
            z_end,
            boundary: boundary_cells,
        }
    }

    fn particle_range(&self, y: i32, z: i32, query: &QueryState) -> (u32, u32) {
        let row = (z as u32 * self.dims.ncy + y as u32) * self.dims.ncx;
        let first = (row + query.x_begin as u32) as usize;
        let last = (row + query.x_end as u32 - 1) as usize;
        let begin = if query.boundary {
            &self.bound_begin
        } else {
            &self.fluid_begin
        };
        (begin[first], begin[last + 1])
    }
}
