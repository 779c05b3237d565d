//! Chart segmentation via priority-driven region growing.
//!
//! Faces are clustered over the dual graph (one node per face, edges between
//! faces sharing a mesh edge). Growth is driven by a single global priority
//! queue: the globally cheapest frontier merge wins each step. The cost of
//! merging a face into a region combines the dihedral angle across the shared
//! edge with the increase of the region's normal dispersion, a cheap proxy for
//! the planarity fit error of the grown region.
//!
//! Edges whose dihedral angle reaches the configured seam threshold, and edges
//! through non-manifold vertices, are hard seams that growth never crosses.
//!
//! All tie-breaks are resolved on indices, so segmentation is deterministic
//! for identical input.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::Vector3;

use crate::mesh::{ChartId, FaceId, HalfEdgeMesh, MeshIndex};

use super::chart::Chart;
use super::options::UnwrapOptions;

/// Result of the segmentation stage.
#[derive(Debug, Clone)]
pub(crate) struct Segmentation<I: MeshIndex = u32> {
    /// Chart assignment per face.
    pub chart_of: Vec<ChartId<I>>,
    /// Charts, ordered by their smallest face index.
    pub charts: Vec<Chart<I>>,
}

/// A dual-graph neighbor of a face.
#[derive(Debug, Clone, Copy)]
struct DualEdge {
    /// The neighboring face.
    face: usize,
    /// Dihedral angle across the shared edge, in radians.
    dihedral: f64,
    /// Hard seam: growth never crosses this edge.
    hard: bool,
}

/// A frontier merge candidate in the growth queue.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    face: usize,
    chart: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.face == other.face && self.chart == other.chart
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the smallest (cost, face, chart).
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.face.cmp(&self.face))
            .then_with(|| other.chart.cmp(&self.chart))
    }
}

/// Per-region accumulator for the normal-dispersion distortion proxy.
///
/// Dispersion is `1 - |Σ A·n| / Σ A`, zero for a planar region and
/// approaching one for a region whose normals cancel out.
#[derive(Debug, Clone)]
struct RegionProxy {
    normal_sum: Vector3<f64>,
    area_sum: f64,
}

impl RegionProxy {
    fn new() -> Self {
        Self {
            normal_sum: Vector3::zeros(),
            area_sum: 0.0,
        }
    }

    fn dispersion(&self) -> f64 {
        if self.area_sum <= 1e-12 {
            return 0.0;
        }
        (1.0 - self.normal_sum.norm() / self.area_sum).max(0.0)
    }

    fn dispersion_with(&self, area_normal: &Vector3<f64>) -> f64 {
        let area = area_normal.norm();
        let denom = self.area_sum + area;
        if denom <= 1e-12 {
            return 0.0;
        }
        (1.0 - (self.normal_sum + area_normal).norm() / denom).max(0.0)
    }

    fn add(&mut self, area_normal: &Vector3<f64>) {
        self.area_sum += area_normal.norm();
        self.normal_sum += area_normal;
    }
}

const AREA_EPSILON: f64 = 1e-12;

/// Partition all faces of the mesh into charts.
///
/// Every face is assigned to exactly one chart; charts are edge-connected.
pub(crate) fn segment<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    options: &UnwrapOptions,
) -> Segmentation<I> {
    let num_faces = mesh.num_faces();
    let threshold = options.seam_angle_threshold.to_radians();

    // Per-face geometry. Zero-area faces get a zero area-normal and free
    // merges so they tag along with whichever region reaches them first.
    let area_normals: Vec<Vector3<f64>> = mesh
        .face_ids()
        .map(|f| mesh.face_area_normal(f))
        .collect();

    let dual = build_dual_graph(mesh, &area_normals, threshold);

    // Seed preference: flattest faces first (smallest summed dihedral over
    // their edges), ties by face index.
    let mut seed_order: Vec<usize> = (0..num_faces).collect();
    let flatness: Vec<f64> = dual
        .iter()
        .map(|edges| edges.iter().flatten().map(|e| e.dihedral).sum::<f64>())
        .collect();
    seed_order.sort_by(|&a, &b| {
        flatness[a]
            .partial_cmp(&flatness[b])
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });

    let mut assigned: Vec<Option<usize>> = vec![None; num_faces];
    let mut regions: Vec<RegionProxy> = Vec::new();
    let mut region_faces: Vec<Vec<usize>> = Vec::new();
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut next_seed = 0usize;

    loop {
        // Grow from the current frontier until it is exhausted.
        while let Some(candidate) = heap.pop() {
            if assigned[candidate.face].is_some() {
                continue; // stale entry
            }

            // Respect the distortion bound; a rejected face stays frontier
            // material for other regions or a later seed.
            let after = regions[candidate.chart].dispersion_with(&area_normals[candidate.face]);
            if after > options.max_chart_distortion {
                continue;
            }

            assign_face(
                candidate.face,
                candidate.chart,
                &mut assigned,
                &mut regions,
                &mut region_faces,
                &area_normals,
                &dual,
                &mut heap,
                options,
            );
        }

        // Start the next region at the flattest unassigned face.
        while next_seed < num_faces && assigned[seed_order[next_seed]].is_some() {
            next_seed += 1;
        }
        if next_seed >= num_faces {
            break;
        }

        let seed = seed_order[next_seed];
        let chart = regions.len();
        regions.push(RegionProxy::new());
        region_faces.push(Vec::new());
        assign_face(
            seed,
            chart,
            &mut assigned,
            &mut regions,
            &mut region_faces,
            &area_normals,
            &dual,
            &mut heap,
            options,
        );
    }

    // Defensive: enforce edge-connectivity per chart (growth preserves it,
    // but the invariant is cheap to guarantee outright).
    let mut assignment: Vec<usize> = assigned.into_iter().map(|a| a.unwrap()).collect();
    split_disconnected(&dual, &mut assignment);

    merge_small_charts(&dual, &area_normals, &mut assignment, options);

    renumber(mesh, assignment)
}

/// Build the dual adjacency: up to three neighbors per face.
fn build_dual_graph<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    area_normals: &[Vector3<f64>],
    threshold: f64,
) -> Vec<[Option<DualEdge>; 3]> {
    let safe_normal = |f: usize| -> Option<Vector3<f64>> {
        let n = area_normals[f];
        let norm = n.norm();
        if norm > AREA_EPSILON {
            Some(n / norm)
        } else {
            None
        }
    };

    mesh.face_ids()
        .map(|f| {
            let mut edges: [Option<DualEdge>; 3] = [None; 3];
            for (i, he) in mesh.face_halfedges(f).enumerate() {
                let g = mesh.face_of(mesh.twin(he));
                if !g.is_valid() {
                    continue;
                }

                let dihedral = match (safe_normal(f.index()), safe_normal(g.index())) {
                    (Some(n0), Some(n1)) => n0.dot(&n1).clamp(-1.0, 1.0).acos(),
                    // A degenerate face on either side folds flat for free.
                    _ => 0.0,
                };

                let nonmanifold_endpoint = mesh.is_nonmanifold_vertex(mesh.origin(he))
                    || mesh.is_nonmanifold_vertex(mesh.dest(he));
                let hard = dihedral + 1e-9 >= threshold || nonmanifold_endpoint;

                edges[i] = Some(DualEdge {
                    face: g.index(),
                    dihedral,
                    hard,
                });
            }
            edges
        })
        .collect()
}

/// Assign a face to a chart and push its unassigned neighbors as candidates.
#[allow(clippy::too_many_arguments)]
fn assign_face(
    face: usize,
    chart: usize,
    assigned: &mut [Option<usize>],
    regions: &mut [RegionProxy],
    region_faces: &mut [Vec<usize>],
    area_normals: &[Vector3<f64>],
    dual: &[[Option<DualEdge>; 3]],
    heap: &mut BinaryHeap<Candidate>,
    options: &UnwrapOptions,
) {
    assigned[face] = Some(chart);
    regions[chart].add(&area_normals[face]);
    region_faces[chart].push(face);

    let before = regions[chart].dispersion();
    for edge in dual[face].iter().flatten() {
        if edge.hard || assigned[edge.face].is_some() {
            continue;
        }
        let growth = (regions[chart].dispersion_with(&area_normals[edge.face]) - before).max(0.0);
        let cost = (1.0 - edge.dihedral.cos()) + options.planarity_weight * growth;
        heap.push(Candidate {
            cost,
            face: edge.face,
            chart,
        });
    }
}

/// Split charts whose faces are not edge-connected into separate charts.
fn split_disconnected(dual: &[[Option<DualEdge>; 3]], assignment: &mut [usize]) {
    let num_faces = assignment.len();
    let mut component: Vec<Option<usize>> = vec![None; num_faces];
    let mut next = 0usize;

    for start in 0..num_faces {
        if component[start].is_some() {
            continue;
        }
        let chart = assignment[start];
        let id = next;
        next += 1;

        let mut stack = vec![start];
        component[start] = Some(id);
        while let Some(f) = stack.pop() {
            for edge in dual[f].iter().flatten() {
                if assignment[edge.face] == chart && component[edge.face].is_none() {
                    component[edge.face] = Some(id);
                    stack.push(edge.face);
                }
            }
        }
    }

    for (f, c) in component.into_iter().enumerate() {
        assignment[f] = c.unwrap();
    }
}

/// Merge charts smaller than the configured minimum into a neighboring chart,
/// cheapest shared boundary first, when the distortion bound allows it and no
/// hard seam separates them.
fn merge_small_charts(
    dual: &[[Option<DualEdge>; 3]],
    area_normals: &[Vector3<f64>],
    assignment: &mut [usize],
    options: &UnwrapOptions,
) {
    loop {
        let num_charts = assignment.iter().copied().max().map_or(0, |m| m + 1);
        let mut faces_of: Vec<Vec<usize>> = vec![Vec::new(); num_charts];
        for (f, &c) in assignment.iter().enumerate() {
            faces_of[c].push(f);
        }

        // Smallest chart first, chart-id tie-break.
        let mut small: Vec<usize> = (0..num_charts)
            .filter(|&c| !faces_of[c].is_empty() && faces_of[c].len() < options.min_chart_faces)
            .collect();
        small.sort_by_key(|&c| (faces_of[c].len(), c));

        let mut merged_any = false;
        for &c in &small {
            // Per neighboring chart: total boundary weight and hard-seam flag.
            let mut weight: Vec<Option<(f64, bool)>> = vec![None; num_charts];
            for &f in &faces_of[c] {
                for edge in dual[f].iter().flatten() {
                    let other = assignment[edge.face];
                    if other == c {
                        continue;
                    }
                    let entry = weight[other].get_or_insert((0.0, false));
                    entry.0 += 1.0 - edge.dihedral.cos();
                    entry.1 |= edge.hard;
                }
            }

            let mut best: Option<(f64, usize)> = None;
            for (other, entry) in weight.iter().enumerate() {
                if let Some((w, hard)) = entry {
                    if *hard {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((bw, bc)) => {
                            *w < bw || (*w == bw && other < bc)
                        }
                    };
                    if better {
                        best = Some((*w, other));
                    }
                }
            }

            let Some((_, target)) = best else { continue };

            // Check the merged region against the distortion bound.
            let mut proxy = RegionProxy::new();
            for &f in faces_of[c].iter().chain(faces_of[target].iter()) {
                proxy.add(&area_normals[f]);
            }
            if proxy.dispersion() > options.max_chart_distortion {
                continue;
            }

            for &f in &faces_of[c] {
                assignment[f] = target;
            }
            merged_any = true;
            break; // recompute chart tables after each merge
        }

        if !merged_any {
            break;
        }
    }
}

/// Renumber charts by ascending smallest face index and build chart structs.
fn renumber<I: MeshIndex>(mesh: &HalfEdgeMesh<I>, assignment: Vec<usize>) -> Segmentation<I> {
    let num_charts = assignment.iter().copied().max().map_or(0, |m| m + 1);
    let mut faces_of: Vec<Vec<usize>> = vec![Vec::new(); num_charts];
    for (f, &c) in assignment.iter().enumerate() {
        faces_of[c].push(f);
    }

    let mut order: Vec<usize> = (0..num_charts).filter(|&c| !faces_of[c].is_empty()).collect();
    order.sort_by_key(|&c| faces_of[c][0]);

    let mut chart_of: Vec<ChartId<I>> = vec![ChartId::invalid(); mesh.num_faces()];
    let mut charts: Vec<Chart<I>> = Vec::with_capacity(order.len());
    for (new_id, &c) in order.iter().enumerate() {
        let id = ChartId::new(new_id);
        let faces: Vec<FaceId<I>> = faces_of[c].iter().map(|&f| FaceId::new(f)).collect();
        for face in &faces {
            chart_of[face.index()] = id;
        }
        charts.push(Chart::new(id, faces));
    }

    Segmentation { chart_of, charts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;
    use nalgebra::Point3;

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

    fn cube_mesh() -> HalfEdgeMesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2], // bottom
            [4, 5, 6],
            [4, 6, 7], // top
            [0, 1, 5],
            [0, 5, 4], // front
            [1, 2, 6],
            [1, 6, 5], // right
            [2, 3, 7],
            [2, 7, 6], // back
            [3, 0, 4],
            [3, 4, 7], // left
        ];
        build_from_triangles(&vertices, &faces).unwrap()
    }

    fn coverage_ok(seg: &Segmentation, num_faces: usize) -> bool {
        let mut seen = vec![false; num_faces];
        for chart in &seg.charts {
            for f in &chart.faces {
                if seen[f.index()] {
                    return false; // face in two charts
                }
                seen[f.index()] = true;
                if seg.chart_of[f.index()] != chart.id {
                    return false;
                }
            }
        }
        seen.into_iter().all(|s| s)
    }

    #[test]
    fn test_planar_grid_single_chart() {
        let mesh = grid_mesh(4);
        let options = UnwrapOptions::default();
        let seg = segment(&mesh, &options);

        assert_eq!(seg.charts.len(), 1);
        assert_eq!(seg.charts[0].num_faces(), 32);
        assert!(coverage_ok(&seg, mesh.num_faces()));
    }

    #[test]
    fn test_cube_six_charts() {
        let mesh = cube_mesh();
        let options = UnwrapOptions::default().with_seam_angle_threshold(90.0);
        let seg = segment(&mesh, &options);

        assert_eq!(seg.charts.len(), 6);
        for chart in &seg.charts {
            assert_eq!(chart.num_faces(), 2);
        }
        assert!(coverage_ok(&seg, mesh.num_faces()));
    }

    #[test]
    fn test_cube_charts_not_merged_across_hard_seams() {
        // min_chart_faces larger than any cube side's face count: the merge
        // pass must still refuse to cross the 90-degree seams.
        let mesh = cube_mesh();
        let options = UnwrapOptions::default()
            .with_seam_angle_threshold(90.0)
            .with_min_chart_faces(6);
        let seg = segment(&mesh, &options);

        assert_eq!(seg.charts.len(), 6);
    }

    #[test]
    fn test_closed_shape_respects_distortion_bound() {
        // A closed tetrahedron has full normal dispersion; one chart cannot
        // hold all faces under the default bound.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();

        let options = UnwrapOptions::default().with_min_chart_faces(1);
        let seg = segment(&mesh, &options);

        assert!(seg.charts.len() > 1);
        assert!(coverage_ok(&seg, mesh.num_faces()));
    }

    #[test]
    fn test_deterministic() {
        let mesh = cube_mesh();
        let options = UnwrapOptions::default();

        let a = segment(&mesh, &options);
        let b = segment(&mesh, &options);

        assert_eq!(a.chart_of, b.chart_of);
        assert_eq!(a.charts.len(), b.charts.len());
        for (ca, cb) in a.charts.iter().zip(b.charts.iter()) {
            assert_eq!(ca.faces, cb.faces);
        }
    }

    #[test]
    fn test_charts_numbered_by_first_face() {
        let mesh = cube_mesh();
        let seg = segment(&mesh, &UnwrapOptions::default());

        let mut prev = None;
        for chart in &seg.charts {
            let first = chart.faces[0].index();
            if let Some(p) = prev {
                assert!(first > p, "charts must be ordered by first face");
            }
            prev = Some(first);
        }
    }

    fn sphere_mesh(rings: usize, segments: usize) -> HalfEdgeMesh {
        use std::f64::consts::{PI, TAU};

        let mut vertices = vec![Point3::new(0.0, 0.0, 1.0)];
        for r in 1..rings {
            let phi = PI * (r as f64) / (rings as f64);
            for s in 0..segments {
                let theta = TAU * (s as f64) / (segments as f64);
                vertices.push(Point3::new(
                    phi.sin() * theta.cos(),
                    phi.sin() * theta.sin(),
                    phi.cos(),
                ));
            }
        }
        vertices.push(Point3::new(0.0, 0.0, -1.0));
        let south = vertices.len() - 1;

        let ring = |r: usize, s: usize| 1 + (r - 1) * segments + (s % segments);

        let mut faces = Vec::new();
        for s in 0..segments {
            faces.push([0, ring(1, s), ring(1, s + 1)]);
        }
        for r in 1..rings - 1 {
            for s in 0..segments {
                let a = ring(r, s);
                let b = ring(r, s + 1);
                let c = ring(r + 1, s);
                let d = ring(r + 1, s + 1);
                faces.push([a, c, d]);
                faces.push([a, d, b]);
            }
        }
        for s in 0..segments {
            faces.push([ring(rings - 1, s), south, ring(rings - 1, s + 1)]);
        }

        build_from_triangles(&vertices, &faces).unwrap()
    }

    #[test]
    fn test_sphere_charts_respect_distortion_bound() {
        let mesh = sphere_mesh(8, 12);
        let options = UnwrapOptions::default();
        let seg = segment(&mesh, &options);

        // A smooth sphere splits into a handful of charts, far fewer than
        // one per face.
        assert!(seg.charts.len() > 1);
        assert!(seg.charts.len() < mesh.num_faces() / 4);
        assert!(coverage_ok(&seg, mesh.num_faces()));

        // Every chart's normal dispersion stays within the configured bound.
        for chart in &seg.charts {
            let mut proxy = RegionProxy::new();
            for f in &chart.faces {
                proxy.add(&mesh.face_area_normal(*f));
            }
            assert!(
                proxy.dispersion() <= options.max_chart_distortion + 1e-9,
                "chart {:?} exceeds the distortion bound",
                chart.id
            );
        }
    }

    #[test]
    fn test_bowtie_vertex_is_hard_seam() {
        // Two coplanar triangles touching only at vertex 2: must not end up
        // in the same chart even though they are... they share no edge, so
        // they are separate charts by connectivity alone.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [2, 4, 3]];
        let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();

        let options = UnwrapOptions::default().with_min_chart_faces(1);
        let seg = segment(&mesh, &options);
        assert_eq!(seg.charts.len(), 2);
    }
}
