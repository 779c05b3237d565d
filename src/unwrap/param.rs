//! Per-chart conformal parameterization.
//!
//! Each disk chart is flattened independently by minimizing the discrete
//! conformal energy (least squares conformal maps): every triangle is
//! expressed in a local 2D frame, the gradient operators couple the u and v
//! channels through the Cauchy-Riemann conditions, and two boundary vertices
//! are pinned to remove the similarity-transform degrees of freedom. The
//! normal equations are solved with preconditioned conjugate gradient.
//!
//! When the conformal solve stalls, produces non-finite coordinates, or folds
//! triangles over, the chart falls back to a harmonic parameterization with
//! its boundary loop fixed to a circle; only if that also fails is the chart
//! reported as a per-chart failure.
//!
//! # References
//!
//! - Lévy, B., Petitjean, S., Ray, N., & Maillot, J. (2002). "Least squares
//!   conformal maps for automatic texture atlas generation." ACM SIGGRAPH.
//! - Tutte, W. T. (1963). "How to draw a graph." Proc. London Math. Society.

use nalgebra::{DVector, Point2};

use crate::error::{Result, UnwrapError};
use crate::mesh::{ChartId, MeshIndex};

use super::chart::ChartSurface;
use super::options::UnwrapOptions;
use super::sparse::{conjugate_gradient, CsrMatrix};

const AREA_EPSILON: f64 = 1e-12;

/// Which solver produced a chart's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Least squares conformal maps.
    Conformal,
    /// Harmonic (Laplacian) fallback with a circular boundary.
    Harmonic,
}

/// Distortion metrics of a parameterized chart.
///
/// Stretch is the per-triangle ratio of parametric to 3D area, normalized by
/// the chart-wide scale so an isometric flattening scores 1.0 everywhere,
/// and folded per-triangle ratios below one are inverted so shrinkage and
/// stretch are penalized alike.
#[derive(Debug, Clone, Copy)]
pub struct DistortionStats {
    /// Worst per-triangle stretch.
    pub max_stretch: f64,
    /// Mean per-triangle stretch.
    pub mean_stretch: f64,
    /// Final relative residual of the linear solve.
    pub residual: f64,
}

/// A chart with solved 2D coordinates in chart-local parameter space.
#[derive(Debug, Clone)]
pub struct ParameterizedChart<I: MeshIndex = u32> {
    /// The chart this parameterization belongs to.
    pub chart: ChartId<I>,
    /// UV coordinate per chart-local vertex.
    pub uvs: Vec<Point2<f64>>,
    /// Distortion metrics.
    pub distortion: DistortionStats,
    /// Which solver produced the coordinates.
    pub solver: SolverKind,
}

/// Flatten one disk chart.
///
/// Tries the conformal solve first and falls back to harmonic; returns
/// [`UnwrapError::ParameterizationFailed`] when both fail.
pub(crate) fn parameterize_chart<I: MeshIndex>(
    chart: ChartId<I>,
    surface: &ChartSurface<I>,
    options: &UnwrapOptions,
) -> Result<ParameterizedChart<I>> {
    let boundary = surface.boundary_vertices();
    if surface.num_vertices() < 3 || boundary.is_empty() {
        return Err(UnwrapError::ParameterizationFailed {
            chart: chart.index(),
            iterations: 0,
            residual: f64::INFINITY,
        });
    }

    // Conformal attempt
    let (pin0, pin1) = select_pins(surface, &boundary);
    let system = build_conformal_system(surface, pin0, pin1);
    let outcome = conjugate_gradient(
        &system.matrix,
        &system.rhs,
        options.solver_max_iterations,
        options.solver_residual_tolerance,
    );

    let n = surface.num_vertices();
    if outcome.converged {
        let mut full = vec![0.0; 2 * n];
        full[pin0.vertex] = pin0.u;
        full[n + pin0.vertex] = pin0.v;
        full[pin1.vertex] = pin1.u;
        full[n + pin1.vertex] = pin1.v;
        for (slot, &idx) in system.free.iter().enumerate() {
            full[idx] = outcome.x[slot];
        }

        let mut uvs: Vec<Point2<f64>> =
            (0..n).map(|i| Point2::new(full[i], full[n + i])).collect();
        fix_orientation(surface, &mut uvs);

        if coords_valid(surface, &uvs) {
            let distortion = measure_distortion(surface, &uvs, outcome.residual);
            return Ok(ParameterizedChart {
                chart,
                uvs,
                distortion,
                solver: SolverKind::Conformal,
            });
        }
    }

    // Harmonic fallback: boundary on a circle, interior relaxed.
    let fallback = solve_harmonic(surface, options);
    match fallback {
        Some((uvs, residual)) if coords_valid(surface, &uvs) => {
            let distortion = measure_distortion(surface, &uvs, residual);
            Ok(ParameterizedChart {
                chart,
                uvs,
                distortion,
                solver: SolverKind::Harmonic,
            })
        }
        _ => Err(UnwrapError::ParameterizationFailed {
            chart: chart.index(),
            iterations: outcome.iterations + options.solver_max_iterations,
            residual: outcome.residual,
        }),
    }
}

/// Pick the two most distant boundary vertices (by 3D Euclidean distance,
/// ties resolved toward lower indices) and pin them along the u axis at their
/// mesh-space distance, preserving the chart's world scale.
fn select_pins<I: MeshIndex>(surface: &ChartSurface<I>, boundary: &[usize]) -> (Pin, Pin) {
    let mut best = (boundary[0], boundary[0]);
    let mut max_sq = -1.0;
    for (i, &a) in boundary.iter().enumerate() {
        for &b in boundary.iter().skip(i + 1) {
            let d = (surface.positions[b] - surface.positions[a]).norm_squared();
            if d > max_sq {
                max_sq = d;
                best = (a, b);
            }
        }
    }

    let distance = max_sq.max(0.0).sqrt();
    let span = if distance > AREA_EPSILON { distance } else { 1.0 };
    (
        Pin {
            vertex: best.0,
            u: 0.0,
            v: 0.0,
        },
        Pin {
            vertex: best.1,
            u: span,
            v: 0.0,
        },
    )
}

/// A vertex pinned to a fixed UV position.
#[derive(Debug, Clone, Copy)]
struct Pin {
    vertex: usize,
    u: f64,
    v: f64,
}

/// The reduced conformal system: pinned unknowns eliminated.
struct ConformalSystem {
    matrix: CsrMatrix,
    rhs: DVector<f64>,
    /// Original unknown index (u in 0..n, v in n..2n) per free slot.
    free: Vec<usize>,
}

/// Assemble the conformal energy's quadratic form and eliminate the pinned
/// unknowns.
///
/// The full form has 2n unknowns (u coordinates in 0..n, v in n..2n) and a
/// four-dimensional similarity null space; substituting the four pinned
/// values and solving only for the free unknowns keeps the system positive
/// definite and unit-scaled, so the solver's relative residual is meaningful.
fn build_conformal_system<I: MeshIndex>(
    surface: &ChartSurface<I>,
    pin0: Pin,
    pin1: Pin,
) -> ConformalSystem {
    let n = surface.num_vertices();
    let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(surface.faces.len() * 36);

    for &[i, j, k] in &surface.faces {
        let pi = &surface.positions[i];
        let pj = &surface.positions[j];
        let pk = &surface.positions[k];

        // Local 2D frame in the triangle's plane, x axis along the first edge
        let e1 = pj - pi;
        let e2 = pk - pi;

        let e1_len = e1.norm();
        if e1_len < AREA_EPSILON {
            continue; // degenerate
        }

        let x_axis = e1 / e1_len;
        let normal = e1.cross(&e2);
        let area = normal.norm() * 0.5;
        if area < AREA_EPSILON {
            continue; // degenerate
        }

        let y_axis = normal.cross(&e1).normalize();

        // Local coordinates: qi at the origin, qj on the x axis
        let qjx = e1_len;
        let qkx = e2.dot(&x_axis);
        let qky = e2.dot(&y_axis);

        // Piecewise-linear gradient coefficients: for vertex m,
        // coeff_x = (y_next - y_prev) / 2A, coeff_y = (x_prev - x_next) / 2A.
        // The conformal energy is (du/dx - dv/dy)^2 + (du/dy + dv/dx)^2.
        let inv_2a = 1.0 / (2.0 * area);

        let ai_x = (0.0 - qky) * inv_2a;
        let ai_y = (qkx - qjx) * inv_2a;
        let aj_x = qky * inv_2a;
        let aj_y = -qkx * inv_2a;
        let ak_x = 0.0;
        let ak_y = qjx * inv_2a;

        let verts = [(i, ai_x, ai_y), (j, aj_x, aj_y), (k, ak_x, ak_y)];

        // Area-weighted accumulation into the u-u, v-v, and u-v blocks of
        // the normal equations.
        let weight = area;
        for &(vi, ax_i, ay_i) in &verts {
            for &(vj, ax_j, ay_j) in &verts {
                let uu = (ax_i * ax_j + ay_i * ay_j) * weight;
                let uv = (ay_i * ax_j - ax_i * ay_j) * weight;

                triplets.push((vi, vj, uu));
                triplets.push((n + vi, n + vj, uu));
                triplets.push((vi, n + vj, uv));
                triplets.push((n + vi, vj, -uv));
            }
        }
    }

    // Eliminate the pinned unknowns: Q_ff f = -Q_fp p
    let mut pinned_value: Vec<Option<f64>> = vec![None; 2 * n];
    pinned_value[pin0.vertex] = Some(pin0.u);
    pinned_value[n + pin0.vertex] = Some(pin0.v);
    pinned_value[pin1.vertex] = Some(pin1.u);
    pinned_value[n + pin1.vertex] = Some(pin1.v);

    let mut free_slot = vec![usize::MAX; 2 * n];
    let mut free: Vec<usize> = Vec::with_capacity(2 * n - 4);
    for (i, pinned) in pinned_value.iter().enumerate() {
        if pinned.is_none() {
            free_slot[i] = free.len();
            free.push(i);
        }
    }

    let m = free.len();
    let mut reduced: Vec<(usize, usize, f64)> = Vec::with_capacity(triplets.len());
    let mut rhs = DVector::zeros(m);
    for (r, c, val) in triplets {
        match (pinned_value[r], pinned_value[c]) {
            (Some(_), _) => {} // pinned row: its equation is dropped
            (None, Some(pc)) => rhs[free_slot[r]] -= val * pc,
            (None, None) => reduced.push((free_slot[r], free_slot[c], val)),
        }
    }

    ConformalSystem {
        matrix: CsrMatrix::from_triplets(m, m, reduced),
        rhs,
        free,
    }
}

/// Harmonic parameterization: the boundary loop is laid out on a circle by
/// 3D arc length and the interior solved with uniform Laplacian weights.
///
/// Returns the coordinates and the worst relative residual of the two
/// channel solves, or `None` if a solve diverges.
fn solve_harmonic<I: MeshIndex>(
    surface: &ChartSurface<I>,
    options: &UnwrapOptions,
) -> Option<(Vec<Point2<f64>>, f64)> {
    let n = surface.num_vertices();
    let cycle = surface.boundary_loops.first()?;
    if cycle.len() < 3 {
        return None;
    }

    // Circle radius matching the boundary length keeps world scale roughly
    // intact for the packer's texel density.
    let mut lengths = Vec::with_capacity(cycle.len());
    let mut total = 0.0;
    for i in 0..cycle.len() {
        let a = cycle[i];
        let b = cycle[(i + 1) % cycle.len()];
        let len = (surface.positions[b] - surface.positions[a]).norm().max(AREA_EPSILON);
        lengths.push(len);
        total += len;
    }
    let radius = total / std::f64::consts::TAU;

    let mut uvs = vec![Point2::origin(); n];
    let mut is_boundary = vec![false; n];
    let mut arc = 0.0;
    for (i, &v) in cycle.iter().enumerate() {
        let angle = arc / total * std::f64::consts::TAU;
        uvs[v] = Point2::new(radius * angle.cos(), radius * angle.sin());
        is_boundary[v] = true;
        arc += lengths[i];
    }
    // Vertices of secondary loops (none after seam resolution, but keep the
    // solve well-posed if one slips through) are treated as interior.

    let interior: Vec<usize> = (0..n).filter(|&v| !is_boundary[v]).collect();
    if interior.is_empty() {
        return Some((uvs, 0.0));
    }
    let slot_of: std::collections::HashMap<usize, usize> = interior
        .iter()
        .enumerate()
        .map(|(s, &v)| (v, s))
        .collect();

    // Undirected neighbor lists
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
    {
        let mut seen = std::collections::HashSet::new();
        for face in &surface.faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                let key = if a < b { (a, b) } else { (b, a) };
                if seen.insert(key) {
                    neighbors[a].push(b);
                    neighbors[b].push(a);
                }
            }
        }
    }

    let m = interior.len();
    let mut triplets = Vec::new();
    let mut rhs_u = DVector::zeros(m);
    let mut rhs_v = DVector::zeros(m);
    for (s, &v) in interior.iter().enumerate() {
        triplets.push((s, s, neighbors[v].len() as f64));
        for &w in &neighbors[v] {
            match slot_of.get(&w) {
                Some(&t) => triplets.push((s, t, -1.0)),
                None => {
                    rhs_u[s] += uvs[w].x;
                    rhs_v[s] += uvs[w].y;
                }
            }
        }
    }

    let matrix = CsrMatrix::from_triplets(m, m, triplets);
    let sol_u = conjugate_gradient(
        &matrix,
        &rhs_u,
        options.solver_max_iterations,
        options.solver_residual_tolerance,
    );
    let sol_v = conjugate_gradient(
        &matrix,
        &rhs_v,
        options.solver_max_iterations,
        options.solver_residual_tolerance,
    );
    if !sol_u.converged || !sol_v.converged {
        return None;
    }

    for (s, &v) in interior.iter().enumerate() {
        uvs[v] = Point2::new(sol_u.x[s], sol_v.x[s]);
    }
    Some((uvs, sol_u.residual.max(sol_v.residual)))
}

/// Signed parametric area of a local triangle.
fn signed_area(uvs: &[Point2<f64>], [a, b, c]: [usize; 3]) -> f64 {
    let p0 = uvs[a];
    let p1 = uvs[b];
    let p2 = uvs[c];
    0.5 * ((p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y))
}

/// 3D area of a local triangle.
fn area3d<I: MeshIndex>(surface: &ChartSurface<I>, [a, b, c]: [usize; 3]) -> f64 {
    let e1 = surface.positions[b] - surface.positions[a];
    let e2 = surface.positions[c] - surface.positions[a];
    0.5 * e1.cross(&e2).norm()
}

/// Flip the v axis if the parameterization came out mirrored overall.
fn fix_orientation<I: MeshIndex>(surface: &ChartSurface<I>, uvs: &mut [Point2<f64>]) {
    let total: f64 = surface.faces.iter().map(|&f| signed_area(uvs, f)).sum();
    if total < 0.0 {
        for uv in uvs.iter_mut() {
            uv.y = -uv.y;
        }
    }
}

/// Coordinates are acceptable when finite and free of local fold-over:
/// every non-degenerate triangle keeps positive parametric area.
fn coords_valid<I: MeshIndex>(surface: &ChartSurface<I>, uvs: &[Point2<f64>]) -> bool {
    if uvs.iter().any(|uv| !uv.x.is_finite() || !uv.y.is_finite()) {
        return false;
    }

    let total_uv: f64 = surface
        .faces
        .iter()
        .map(|&f| signed_area(uvs, f).abs())
        .sum();
    let tolerance = -1e-9 * total_uv.max(AREA_EPSILON);

    for &face in &surface.faces {
        if area3d(surface, face) < AREA_EPSILON {
            continue;
        }
        if signed_area(uvs, face) <= tolerance {
            return false;
        }
    }
    true
}

/// Aggregate per-triangle stretch into max and mean, normalized so an
/// isometric flattening scores exactly 1.0.
fn measure_distortion<I: MeshIndex>(
    surface: &ChartSurface<I>,
    uvs: &[Point2<f64>],
    residual: f64,
) -> DistortionStats {
    let mut total_3d = 0.0;
    let mut total_uv = 0.0;
    for &face in &surface.faces {
        let a3 = area3d(surface, face);
        if a3 < AREA_EPSILON {
            continue;
        }
        total_3d += a3;
        total_uv += signed_area(uvs, face).abs();
    }

    if total_3d < AREA_EPSILON || total_uv < AREA_EPSILON {
        // Degenerate chart: nothing meaningful to measure.
        return DistortionStats {
            max_stretch: 1.0,
            mean_stretch: 1.0,
            residual,
        };
    }

    let scale = total_uv / total_3d;
    let mut max_stretch: f64 = 1.0;
    let mut sum = 0.0;
    let mut count = 0usize;
    for &face in &surface.faces {
        let a3 = area3d(surface, face);
        if a3 < AREA_EPSILON {
            continue;
        }
        let ratio = signed_area(uvs, face).abs() / (a3 * scale);
        let stretch = if ratio > AREA_EPSILON {
            ratio.max(1.0 / ratio)
        } else {
            f64::INFINITY
        };
        max_stretch = max_stretch.max(stretch);
        sum += stretch;
        count += 1;
    }

    DistortionStats {
        max_stretch,
        mean_stretch: sum / count as f64,
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, ChartId, FaceId, HalfEdgeMesh};
    use crate::unwrap::chart::Chart;
    use nalgebra::Point3;

    fn surface_of(mesh: &HalfEdgeMesh) -> ChartSurface {
        let faces: Vec<FaceId> = mesh.face_ids().collect();
        let chart = Chart::new(ChartId::new(0), faces);
        let chart_of = vec![ChartId::new(0); mesh.num_faces()];
        chart.extract_surface(mesh, &chart_of)
    }

    fn grid_mesh(n: usize) -> HalfEdgeMesh {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                vertices.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                let v10 = v00 + 1;
                let v01 = v00 + (n + 1);
                let v11 = v01 + 1;
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            }
        }
        build_from_triangles(&vertices, &faces).unwrap()
    }

    fn bent_strip() -> HalfEdgeMesh {
        // An L-shaped strip folded 90 degrees; developable, so conformal
        // flattening is near-isometric.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
        ];
        let faces = vec![[0, 1, 3], [0, 3, 2], [2, 3, 5], [2, 5, 4]];
        build_from_triangles(&vertices, &faces).unwrap()
    }

    #[test]
    fn test_planar_grid_is_isometric() {
        let mesh = grid_mesh(3);
        let surface = surface_of(&mesh);
        let options = UnwrapOptions::default();

        let result =
            parameterize_chart(ChartId::new(0), &surface, &options).expect("solve succeeds");

        assert_eq!(result.solver, SolverKind::Conformal);
        assert_eq!(result.uvs.len(), surface.num_vertices());
        assert!((result.distortion.max_stretch - 1.0).abs() < 1e-6);
        assert!((result.distortion.mean_stretch - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_foldover_on_grid() {
        let mesh = grid_mesh(4);
        let surface = surface_of(&mesh);
        let options = UnwrapOptions::default();

        let result = parameterize_chart(ChartId::new(0), &surface, &options).unwrap();
        for &face in &surface.faces {
            assert!(signed_area(&result.uvs, face) > 0.0);
        }
    }

    #[test]
    fn test_developable_fold_flattens_cleanly() {
        let mesh = bent_strip();
        let surface = surface_of(&mesh);
        let options = UnwrapOptions::default();

        let result = parameterize_chart(ChartId::new(0), &surface, &options).unwrap();
        assert!(result.distortion.max_stretch < 1.01);
    }

    #[test]
    fn test_world_scale_preserved() {
        // The pinned span keeps the chart at mesh scale: a 3x3 world-unit
        // grid should come out roughly 3 units wide in UV space.
        let mesh = grid_mesh(3);
        let surface = surface_of(&mesh);
        let options = UnwrapOptions::default();

        let result = parameterize_chart(ChartId::new(0), &surface, &options).unwrap();
        let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
        for uv in &result.uvs {
            min_x = min_x.min(uv.x);
            max_x = max_x.max(uv.x);
        }
        let diag = 3.0 * (2.0f64).sqrt();
        assert!((max_x - min_x) > 0.5 * diag && (max_x - min_x) < 1.5 * diag);
    }

    #[test]
    fn test_single_triangle() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(1.0, 1.5, 0.0),
        ];
        let faces = vec![[0, 1, 2]];
        let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
        let surface = surface_of(&mesh);

        let result =
            parameterize_chart(ChartId::new(0), &surface, &UnwrapOptions::default()).unwrap();
        assert!((result.distortion.max_stretch - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_closed_surface_fails() {
        // No boundary: parameterization must report failure, not panic.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
        let surface = surface_of(&mesh);

        let result = parameterize_chart(ChartId::new(0), &surface, &UnwrapOptions::default());
        assert!(matches!(
            result,
            Err(UnwrapError::ParameterizationFailed { chart: 0, .. })
        ));
    }

    #[test]
    fn test_deterministic() {
        let mesh = bent_strip();
        let surface = surface_of(&mesh);
        let options = UnwrapOptions::default();

        let a = parameterize_chart(ChartId::new(0), &surface, &options).unwrap();
        let b = parameterize_chart(ChartId::new(0), &surface, &options).unwrap();
        for (ua, ub) in a.uvs.iter().zip(b.uvs.iter()) {
            assert_eq!(ua, ub);
        }
    }

    #[test]
    fn test_harmonic_fallback_square() {
        let mesh = grid_mesh(2);
        let surface = surface_of(&mesh);
        let options = UnwrapOptions::default();

        let (uvs, _residual) = solve_harmonic(&surface, &options).expect("harmonic solves");
        assert!(coords_valid(&surface, &uvs));

        // Boundary vertices lie on a circle
        let cycle = &surface.boundary_loops[0];
        let r0 = uvs[cycle[0]].coords.norm();
        for &v in cycle {
            assert!((uvs[v].coords.norm() - r0).abs() < 1e-9);
        }
    }
}
