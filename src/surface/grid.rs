//! Uniform grid over a triangle mesh for nearest-triangle searches.
//!
//! The mesh bounding box is split into `cells_per_axis³` cells (fewer on flat
//! axes). Each cell maps to a compact slice of triangle indices: every
//! triangle is listed in all cells its own bounding box overlaps.
//!
//! Query flow:
//! 1. Locate the cell containing the query point (clamped to the grid).
//! 2. Visit cells in shells of growing Chebyshev radius around it.
//! 3. Stop once the best distance found is no larger than the distance from
//!    the query to any cell not yet visited.

use nalgebra::Vector3;

/// Resolution of the surface grid index.
#[derive(Debug, Clone)]
pub struct SurfaceGridConfig {
    /// Number of cells along each axis of the mesh bounding box.
    /// Axes with zero extent always get a single cell. Default: 16.
    pub cells_per_axis: u32,
}

impl Default for SurfaceGridConfig {
    fn default() -> Self {
        Self { cells_per_axis: 16 }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SurfaceGrid {
    origin: Vector3<f32>,
    cell_size: Vector3<f32>,
    dims: [u32; 3],
    cell_offsets: Vec<u32>,
    triangle_indices: Vec<u32>,
}

impl SurfaceGrid {
    pub(crate) fn build(
        vertices: &[Vector3<f32>],
        triangles: &[[u32; 3]],
        config: &SurfaceGridConfig,
    ) -> Self {
        let (lo, hi) = bounding_box(vertices.iter());
        let per_axis = config.cells_per_axis.max(1);

        let mut dims = [1u32; 3];
        let mut cell_size = Vector3::new(1.0, 1.0, 1.0);
        for axis in 0..3 {
            let extent = hi[axis] - lo[axis];
            if extent > 0.0 {
                dims[axis] = per_axis;
                cell_size[axis] = extent / per_axis as f32;
            }
        }

        let mut grid = Self {
            origin: lo,
            cell_size,
            dims,
            cell_offsets: Vec::new(),
            triangle_indices: Vec::new(),
        };

        let n_cells = grid.n_cells();
        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); n_cells];
        for (tri_idx, tri) in triangles.iter().enumerate() {
            let (t_lo, t_hi) = bounding_box(tri.iter().map(|&v| &vertices[v as usize]));
            let c_lo = grid.cell_of(&t_lo);
            let c_hi = grid.cell_of(&t_hi);
            for z in c_lo[2]..=c_hi[2] {
                for y in c_lo[1]..=c_hi[1] {
                    for x in c_lo[0]..=c_hi[0] {
                        bins[grid.flat([x, y, z])].push(tri_idx as u32);
                    }
                }
            }
        }

        let mut cell_offsets = Vec::with_capacity(n_cells + 1);
        let mut triangle_indices = Vec::new();
        cell_offsets.push(0);
        for cell_bin in bins {
            triangle_indices.extend(cell_bin);
            cell_offsets.push(triangle_indices.len() as u32);
        }
        grid.cell_offsets = cell_offsets;
        grid.triangle_indices = triangle_indices;

        tracing::debug!(
            "surface grid: dims {:?}, {} triangles, {} cell entries",
            grid.dims,
            triangles.len(),
            grid.triangle_indices.len()
        );
        grid
    }

    fn n_cells(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    fn flat(&self, cell: [u32; 3]) -> usize {
        (cell[2] as usize * self.dims[1] as usize + cell[1] as usize) * self.dims[0] as usize
            + cell[0] as usize
    }

    /// Cell containing `p`, clamped to the grid.
    fn cell_of(&self, p: &Vector3<f32>) -> [u32; 3] {
        let mut cell = [0u32; 3];
        for axis in 0..3 {
            let f = ((p[axis] - self.origin[axis]) / self.cell_size[axis]).floor();
            let max = (self.dims[axis] - 1) as f32;
            cell[axis] = f.clamp(0.0, max) as u32;
        }
        cell
    }

    fn cell_triangles(&self, cell: [u32; 3]) -> &[u32] {
        let flat = self.flat(cell);
        let start = self.cell_offsets[flat] as usize;
        let end = self.cell_offsets[flat + 1] as usize;
        &self.triangle_indices[start..end]
    }

    /// Find the triangle nearest to `p`.
    ///
    /// `distance` evaluates the exact point-to-triangle distance for a
    /// triangle index. Returns `(triangle, distance)`, or `None` when the grid
    /// holds no triangles. Ties go to the lower triangle index.
    pub(crate) fn nearest<F>(&self, p: &Vector3<f32>, mut distance: F) -> Option<(usize, f32)>
    where
        F: FnMut(usize) -> f32,
    {
        let center = self.cell_of(p);
        let max_radius = (0..3)
            .map(|a| center[a].max(self.dims[a] - 1 - center[a]))
            .max()
            .unwrap_or(0);

        let mut best: Option<(usize, f32)> = None;
        for radius in 0..=max_radius {
            self.for_each_shell_cell(center, radius, |cell| {
                for &tri in self.cell_triangles(cell) {
                    let tri = tri as usize;
                    let d = distance(tri);
                    let better = match best {
                        None => true,
                        Some((best_tri, best_d)) => d < best_d || (d == best_d && tri < best_tri),
                    };
                    if better {
                        best = Some((tri, d));
                    }
                }
            });

            if let Some((_, best_d)) = best {
                match self.clearance(p, center, radius) {
                    Some(gap) if best_d > gap => {}
                    _ => break,
                }
            }
        }
        best
    }

    /// Visit every in-grid cell at Chebyshev distance exactly `radius`.
    fn for_each_shell_cell<F>(&self, center: [u32; 3], radius: u32, mut f: F)
    where
        F: FnMut([u32; 3]),
    {
        let r = radius as i64;
        let range = |axis: usize| {
            let c = center[axis] as i64;
            let lo = (c - r).max(0);
            let hi = (c + r).min(self.dims[axis] as i64 - 1);
            lo..=hi
        };
        for z in range(2) {
            for y in range(1) {
                for x in range(0) {
                    let dz = (z - center[2] as i64).abs();
                    let dy = (y - center[1] as i64).abs();
                    let dx = (x - center[0] as i64).abs();
                    if dx.max(dy).max(dz) == r {
                        f([x as u32, y as u32, z as u32]);
                    }
                }
            }
        }
    }

    /// Lower bound on the distance from `p` to any cell outside the visited
    /// box of the given radius, or `None` when every cell has been visited.
    fn clearance(&self, p: &Vector3<f32>, center: [u32; 3], radius: u32) -> Option<f32> {
        let mut gap: Option<f32> = None;
        let mut consider = |g: f32| {
            let g = g.max(0.0);
            gap = Some(gap.map_or(g, |cur| cur.min(g)));
        };
        for axis in 0..3 {
            let c = center[axis];
            if c + radius < self.dims[axis] - 1 {
                let face = self.origin[axis] + (c + radius + 1) as f32 * self.cell_size[axis];
                consider(face - p[axis]);
            }
            if c > radius {
                let face = self.origin[axis] + (c - radius) as f32 * self.cell_size[axis];
                consider(p[axis] - face);
            }
        }
        gap
    }
}

fn bounding_box<'a, I>(points: I) -> (Vector3<f32>, Vector3<f32>)
where
    I: Iterator<Item = &'a Vector3<f32>>,
{
    let mut lo = Vector3::repeat(f32::INFINITY);
    let mut hi = Vector3::repeat(f32::NEG_INFINITY);
    for p in points {
        lo = lo.inf(p);
        hi = hi.sup(p);
    }
    if lo.x > hi.x {
        return (Vector3::zeros(), Vector3::zeros());
    }
    (lo, hi)
}
