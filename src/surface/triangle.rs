//! Triangulated reference surface with a grid-accelerated closest-point query.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::grid::{SurfaceGrid, SurfaceGridConfig};
use super::{ClosestPoints, SurfaceIndex};
use crate::{CoregError, PointSet, Result, RigidTransform};

/// Closest point on a surface for a single query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub point: Vector3<f32>,
    /// Index of the triangle the point lies on.
    pub triangle: usize,
    pub distance: f32,
}

/// Triangle mesh answering closest-point queries.
///
/// The mesh must be indexed with [`TriangleSurface::build_index`] before it
/// can be queried; until then queries fail with
/// [`CoregError::SurfaceNotReady`].
#[derive(Debug, Clone)]
pub struct TriangleSurface {
    vertices: Vec<Vector3<f32>>,
    triangles: Vec<[u32; 3]>,
    grid: Option<SurfaceGrid>,
}

impl TriangleSurface {
    /// Create an unindexed surface.
    ///
    /// Fails with [`CoregError::InvalidSurface`] when there are no triangles
    /// or a triangle refers to a vertex that does not exist.
    pub fn new(vertices: Vec<Vector3<f32>>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        if triangles.is_empty() {
            return Err(CoregError::InvalidSurface("no triangles".into()));
        }
        let n = vertices.len();
        if let Some((i, tri)) = triangles
            .iter()
            .enumerate()
            .find(|(_, tri)| tri.iter().any(|&v| v as usize >= n))
        {
            return Err(CoregError::InvalidSurface(format!(
                "triangle {} {:?} references a vertex outside 0..{}",
                i, tri, n
            )));
        }
        Ok(Self {
            vertices,
            triangles,
            grid: None,
        })
    }

    /// Sphere mesh built from a subdivided octahedron.
    ///
    /// Each subdivision splits every triangle in four, so the mesh has
    /// `8 · 4^subdivisions` triangles.
    pub fn sphere(center: Vector3<f32>, radius: f32, subdivisions: u32) -> Self {
        Self::ellipsoid(center, Vector3::repeat(radius), subdivisions)
    }

    /// Axis-aligned ellipsoid mesh with semi-axes `radii`.
    ///
    /// A handy stand-in for a scalp surface: unlike a sphere it pins down
    /// rotation for registration.
    pub fn ellipsoid(center: Vector3<f32>, radii: Vector3<f32>, subdivisions: u32) -> Self {
        let (unit, triangles) = unit_sphere(subdivisions);
        let vertices = unit
            .into_iter()
            .map(|v| center + v.component_mul(&radii))
            .collect();
        Self {
            vertices,
            triangles,
            grid: None,
        }
    }

    /// Copy of this mesh with every vertex mapped through `transform`.
    ///
    /// The copy is unindexed.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        Self {
            vertices: self
                .vertices
                .iter()
                .map(|v| transform.apply_point(v))
                .collect(),
            triangles: self.triangles.clone(),
            grid: None,
        }
    }

    pub fn vertices(&self) -> &[Vector3<f32>] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// (Re)build the spatial index.
    pub fn build_index(&mut self, config: &SurfaceGridConfig) {
        self.grid = Some(SurfaceGrid::build(
            &self.vertices,
            &self.triangles,
            config,
        ));
    }

    /// Builder-style [`TriangleSurface::build_index`].
    pub fn with_index(mut self, config: &SurfaceGridConfig) -> Self {
        self.build_index(config);
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.grid.is_some()
    }

    /// Closest point on the surface to `query`.
    pub fn closest_point(&self, query: &Vector3<f32>) -> Result<SurfacePoint> {
        let grid = self.grid.as_ref().ok_or(CoregError::SurfaceNotReady)?;
        self.nearest(grid, query)
    }

    fn nearest(&self, grid: &SurfaceGrid, query: &Vector3<f32>) -> Result<SurfacePoint> {
        let (triangle, distance) = grid
            .nearest(query, |tri| self.closest_on(tri, query).1)
            .ok_or_else(|| CoregError::SurfaceQueryFailure("surface grid is empty".into()))?;
        let (point, _) = self.closest_on(triangle, query);
        Ok(SurfacePoint {
            point,
            triangle,
            distance,
        })
    }

    fn closest_on(&self, tri: usize, query: &Vector3<f32>) -> (Vector3<f32>, f32) {
        let [a, b, c] = self.triangles[tri];
        closest_point_on_triangle(
            query,
            &self.vertices[a as usize],
            &self.vertices[b as usize],
            &self.vertices[c as usize],
        )
    }
}

impl SurfaceIndex for TriangleSurface {
    fn closest_points(&self, query: &PointSet) -> Result<ClosestPoints> {
        let grid = self.grid.as_ref().ok_or(CoregError::SurfaceNotReady)?;
        let rows: Vec<Vector3<f32>> = query.row_iter().map(|r| r.transpose()).collect();

        #[cfg(feature = "parallel")]
        let hits: Vec<Result<SurfacePoint>> = {
            use rayon::prelude::*;
            rows.par_iter().map(|p| self.nearest(grid, p)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let hits: Vec<Result<SurfacePoint>> = rows.iter().map(|p| self.nearest(grid, p)).collect();

        let mut points = PointSet::zeros(rows.len());
        let mut element_ids = Vec::with_capacity(rows.len());
        let mut distances = Vec::with_capacity(rows.len());
        for (i, hit) in hits.into_iter().enumerate() {
            let hit = hit?;
            points.set_row(i, &hit.point.transpose());
            element_ids.push(hit.triangle);
            distances.push(hit.distance);
        }
        Ok(ClosestPoints {
            points,
            element_ids,
            distances,
        })
    }
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Closest point on triangle `abc` to `p`, with its distance.
///
/// Voronoi-region test (Ericson, *Real-Time Collision Detection* §5.1.5).
/// Degenerate triangles fall back to the nearest point on their edges.
fn closest_point_on_triangle(
    p: &Vector3<f32>,
    a: &Vector3<f32>,
    b: &Vector3<f32>,
    c: &Vector3<f32>,
) -> (Vector3<f32>, f32) {
    let ab = b - a;
    let ac = c - a;
    if ab.cross(&ac).norm_squared() <= f32::EPSILON * ab.norm_squared() * ac.norm_squared() {
        return [
            closest_point_on_segment(p, a, b),
            closest_point_on_segment(p, b, c),
            closest_point_on_segment(p, c, a),
        ]
        .into_iter()
        .fold((*a, f32::INFINITY), |best, cand| if cand.1 < best.1 { cand } else { best });
    }
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, (p - a).norm());
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, (p - b).norm());
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        let q = a + ab * v;
        return (q, (p - q).norm());
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, (p - c).norm());
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        let q = a + ac * w;
        return (q, (p - q).norm());
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let q = b + (c - b) * w;
        return (q, (p - q).norm());
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    let q = a + ab * v + ac * w;
    (q, (p - q).norm())
}

fn closest_point_on_segment(
    p: &Vector3<f32>,
    a: &Vector3<f32>,
    b: &Vector3<f32>,
) -> (Vector3<f32>, f32) {
    let ab = b - a;
    let len2 = ab.norm_squared();
    let t = if len2 > 0.0 {
        ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let q = a + ab * t;
    (q, (p - q).norm())
}

/// Unit sphere from an octahedron with `subdivisions` rounds of midpoint
/// splitting. Shared edge midpoints are cached so the mesh stays watertight.
fn unit_sphere(subdivisions: u32) -> (Vec<Vector3<f32>>, Vec<[u32; 3]>) {
    let mut vertices = vec![
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(-1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, -1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
        Vector3::new(0.0, 0.0, -1.0),
    ];
    let mut triangles: Vec<[u32; 3]> = vec![
        [0, 2, 4],
        [2, 1, 4],
        [1, 3, 4],
        [3, 0, 4],
        [2, 0, 5],
        [1, 2, 5],
        [3, 1, 5],
        [0, 3, 5],
    ];

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut midpoint = |i: u32, j: u32, vertices: &mut Vec<Vector3<f32>>| -> u32 {
            let key = (i.min(j), i.max(j));
            *midpoints.entry(key).or_insert_with(|| {
                let m = (vertices[i as usize] + vertices[j as usize]).normalize();
                vertices.push(m);
                (vertices.len() - 1) as u32
            })
        };

        let mut next = Vec::with_capacity(triangles.len() * 4);
        for &[a, b, c] in &triangles {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        triangles = next;
    }
    (vertices, triangles)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn brute_force(surface: &TriangleSurface, p: &Vector3<f32>) -> (usize, f32) {
        (0..surface.triangles.len())
            .map(|t| (t, surface.closest_on(t, p).1))
            .fold((0, f32::INFINITY), |best, cand| if cand.1 < best.1 { cand } else { best })
    }

    #[test]
    fn test_new_rejects_bad_index() {
        let vertices = vec![Vector3::zeros(), Vector3::x(), Vector3::y()];
        let err = TriangleSurface::new(vertices.clone(), vec![[0, 1, 3]]).unwrap_err();
        assert!(matches!(err, CoregError::InvalidSurface(_)));
        assert!(TriangleSurface::new(vertices.clone(), vec![]).is_err());
        assert!(TriangleSurface::new(vertices, vec![[0, 1, 2]]).is_ok());
    }

    #[test]
    fn test_query_before_index() {
        let surface = TriangleSurface::sphere(Vector3::zeros(), 1.0, 1);
        assert!(!surface.is_indexed());
        assert_eq!(
            surface.closest_points(&PointSet::zeros(2)),
            Err(CoregError::SurfaceNotReady)
        );
        assert_eq!(
            surface.closest_point(&Vector3::zeros()),
            Err(CoregError::SurfaceNotReady)
        );
    }

    #[test]
    fn test_sphere_mesh_counts() {
        let surface = TriangleSurface::sphere(Vector3::zeros(), 2.0, 2);
        assert_eq!(surface.triangles().len(), 8 * 16);
        // Closed mesh: V - E + F = 2 with E = 3F/2.
        let f = surface.triangles().len() as i64;
        let v = surface.vertices().len() as i64;
        assert_eq!(v - 3 * f / 2 + f, 2);
        for vertex in surface.vertices() {
            assert_relative_eq!(vertex.norm(), 2.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_triangle_regions() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 1.0, 0.0);

        // Face interior: straight down.
        let (q, d) = closest_point_on_triangle(&Vector3::new(0.2, 0.2, 0.5), &a, &b, &c);
        assert_relative_eq!(q, Vector3::new(0.2, 0.2, 0.0), epsilon = 1e-6);
        assert_relative_eq!(d, 0.5, epsilon = 1e-6);

        // Vertex region.
        let (q, _) = closest_point_on_triangle(&Vector3::new(-1.0, -1.0, 0.0), &a, &b, &c);
        assert_eq!(q, a);

        // Hypotenuse edge region.
        let (q, d) = closest_point_on_triangle(&Vector3::new(1.0, 1.0, 0.0), &a, &b, &c);
        assert_relative_eq!(q, Vector3::new(0.5, 0.5, 0.0), epsilon = 1e-6);
        assert_relative_eq!(d, 0.5_f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_triangle() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(2.0, 0.0, 0.0);
        let c = Vector3::new(1.0, 0.0, 0.0);
        let (q, d) = closest_point_on_triangle(&Vector3::new(1.5, 1.0, 0.0), &a, &b, &c);
        assert!(d.is_finite());

        let (q0, d0) = closest_point_on_triangle(&Vector3::new(0.0, 0.0, 2.0), &a, &a, &a);
        assert_eq!(q0, a);
        assert_relative_eq!(d0, 2.0);
        assert_relative_eq!(q, Vector3::new(1.5, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(d, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_grid_matches_brute_force() {
        let surface = TriangleSurface::ellipsoid(
            Vector3::new(0.01, -0.02, 0.03),
            Vector3::new(0.08, 0.1, 0.09),
            3,
        )
        .with_index(&SurfaceGridConfig { cells_per_axis: 8 });

        // Probe points inside, on and well outside the mesh.
        let mut samples = Vec::new();
        for i in 0..7 {
            for j in 0..7 {
                for k in 0..7 {
                    samples.push(Vector3::new(
                        -0.2 + 0.06 * i as f32,
                        -0.2 + 0.06 * j as f32,
                        -0.2 + 0.06 * k as f32,
                    ));
                }
            }
        }

        for p in &samples {
            let hit = surface.closest_point(p).unwrap();
            let (_, d_ref) = brute_force(&surface, p);
            assert!(
                (hit.distance - d_ref).abs() < 1e-6,
                "grid distance {} vs brute force {} at {:?}",
                hit.distance,
                d_ref,
                p
            );
            assert_relative_eq!((hit.point - p).norm(), hit.distance, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_batch_query_order() {
        let surface =
            TriangleSurface::sphere(Vector3::zeros(), 1.0, 3).with_index(&Default::default());
        let query = PointSet::from_row_slice(&[
            2.0, 0.0, 0.0, //
            0.0, 0.0, 1.5, //
            0.0, -3.0, 0.0,
        ]);
        let res = surface.closest_points(&query).unwrap();
        assert_eq!(res.len(), 3);
        assert_relative_eq!(res.distances[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(res.distances[1], 0.5, epsilon = 1e-5);
        assert_relative_eq!(res.distances[2], 2.0, epsilon = 1e-5);
        assert_relative_eq!(res.points[(2, 1)], -1.0, epsilon = 1e-5);
        for (i, &tri) in res.element_ids.iter().enumerate() {
            let p = query.row(i).transpose();
            let d = surface.closest_on(tri, &p).1;
            assert_relative_eq!(d, res.distances[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_transformed_mesh() {
        let surface = TriangleSurface::sphere(Vector3::zeros(), 1.0, 1);
        let shift = RigidTransform::from_translation(&Vector3::new(0.0, 0.0, 5.0));
        let moved = surface.transformed(&shift).with_index(&Default::default());
        let hit = moved.closest_point(&Vector3::new(0.0, 0.0, 7.0)).unwrap();
        assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-5);
    }
}
