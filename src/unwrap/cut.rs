//! Seam resolution: cutting charts into topological disks.
//!
//! Parameterization needs every chart to be a disk (Euler characteristic 1,
//! one boundary loop). Charts that come out of segmentation closed (a whole
//! sphere-like component), as annuli, or with handles are cut open along
//! edge-weighted shortest paths:
//!
//! - a **closed** chart is slit along the path between its two most distant
//!   vertices (found by a double Dijkstra sweep);
//! - a chart with **several boundary loops** gets a cut connecting two loops,
//!   removing one hole per cut;
//! - a chart with **one loop but a handle** gets a cut from the boundary,
//!   around the handle, back to the boundary.
//!
//! Each cut raises the Euler characteristic by one (closed charts first drop
//! to a bounded surface), so the iteration count is bounded by the chart's
//! topological complexity; a configured hard cap turns pathological charts
//! into per-chart `UnresolvableTopology` failures instead of a hang.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::error::UnwrapError;
use crate::mesh::{ChartId, HalfEdgeMesh, MeshIndex};

use super::chart::{Chart, ChartSurface};
use super::options::UnwrapOptions;

/// Result of the seam-resolution stage.
#[derive(Debug)]
pub(crate) struct SeamResolution<I: MeshIndex = u32> {
    /// The extracted (and possibly cut) surface of every chart, in chart
    /// order. Non-disk surfaces correspond to entries in `failures`.
    pub surfaces: Vec<ChartSurface<I>>,

    /// Per-chart failures; processing of the other charts continues.
    pub failures: Vec<UnwrapError>,
}

/// Cut every chart into a disk, or record a failure for it.
pub(crate) fn resolve_seams<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    charts: &mut [Chart<I>],
    chart_of: &[ChartId<I>],
    options: &UnwrapOptions,
) -> SeamResolution<I> {
    let mut surfaces = Vec::with_capacity(charts.len());
    let mut failures = Vec::new();

    for chart in charts.iter_mut() {
        let mut surface = chart.extract_surface(mesh, chart_of);
        let mut iterations = 0usize;

        while !surface.is_disk() && iterations < options.max_cut_iterations {
            match plan_cut(&surface) {
                Some(path) => {
                    let mesh_path: Vec<_> =
                        path.iter().map(|&v| surface.vertex_source[v]).collect();
                    chart.add_cut_path(&mesh_path);
                }
                None => break,
            }
            surface = chart.extract_surface(mesh, chart_of);
            iterations += 1;
        }

        if !surface.is_disk() {
            failures.push(UnwrapError::UnresolvableTopology {
                chart: chart.id.index(),
                iterations,
            });
        }
        surfaces.push(surface);
    }

    SeamResolution { surfaces, failures }
}

/// Choose the next cut path (as chart-local vertex indices) for a non-disk
/// surface, or `None` if no useful cut can be found.
fn plan_cut<I: MeshIndex>(surface: &ChartSurface<I>) -> Option<Vec<usize>> {
    let graph = LocalGraph::new(surface);
    if graph.adjacency.iter().all(|a| a.is_empty()) {
        return None;
    }

    if surface.is_closed() {
        return plan_opening_cut(&graph);
    }

    let loops = &surface.boundary_loops;
    if loops.len() >= 2 {
        // Connect the first loop to the nearest vertex of any other loop.
        let sources: Vec<usize> = loops[0].clone();
        let targets: HashSet<usize> = loops[1..].iter().flatten().copied().collect();
        let sweep = dijkstra(&graph, &sources, &HashSet::new());
        let target = nearest_of(&sweep, &targets)?;
        return sweep.path_to(target);
    }

    // Single loop with a handle: cut from the boundary, around the handle,
    // and back. First leg reaches the vertex farthest from the boundary;
    // the second leg returns while avoiding the first leg's edges.
    let sources: Vec<usize> = loops[0].clone();
    let boundary: HashSet<usize> = sources.iter().copied().collect();
    let out = dijkstra(&graph, &sources, &HashSet::new());
    let (far, dist) = out.farthest()?;
    if dist <= 0.0 {
        return None;
    }
    let leg_out = out.path_to(far)?;

    let banned: HashSet<(usize, usize)> = leg_out
        .windows(2)
        .map(|w| edge_key(w[0], w[1]))
        .collect();
    let back = dijkstra(&graph, &[far], &banned);
    let target = nearest_of(&back, &boundary)?;
    let leg_back = back.path_to(target)?;

    // Concatenate boundary -> far -> boundary.
    let mut path = leg_out;
    path.extend(leg_back.into_iter().skip(1));
    Some(path)
}

/// Cut a closed surface along the path between its two most distant vertices.
///
/// The path must have an interior vertex: a single shared edge does not split
/// any vertex fan, so a one-edge slit would not open the surface.
fn plan_opening_cut(graph: &LocalGraph) -> Option<Vec<usize>> {
    // Double sweep: farthest vertex from an arbitrary start, then farthest
    // from there.
    let first = dijkstra(graph, &[0], &HashSet::new());
    let (u, _) = first.farthest()?;
    let second = dijkstra(graph, &[u], &HashSet::new());
    let (w, _) = second.farthest()?;

    let path = second.path_to(w)?;
    if path.len() >= 3 {
        return Some(path);
    }

    // u and w are adjacent; route around the direct edge to get an interior
    // vertex on the path.
    let banned: HashSet<(usize, usize)> = [edge_key(u, w)].into_iter().collect();
    let detour = dijkstra(graph, &[u], &banned);
    let path = detour.path_to(w)?;
    if path.len() >= 3 {
        Some(path)
    } else {
        None
    }
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Edge-weighted adjacency over a chart surface's local vertices.
struct LocalGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl LocalGraph {
    fn new<I: MeshIndex>(surface: &ChartSurface<I>) -> Self {
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); surface.num_vertices()];
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for face in &surface.faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                if seen.insert(edge_key(a, b)) {
                    let len = (surface.positions[b] - surface.positions[a]).norm();
                    adjacency[a].push((b, len));
                    adjacency[b].push((a, len));
                }
            }
        }
        // Deterministic relaxation order.
        for list in &mut adjacency {
            list.sort_by(|x, y| x.0.cmp(&y.0));
        }
        Self { adjacency }
    }
}

/// Entry in the Dijkstra priority queue.
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    vertex: usize,
    distance: f64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.vertex == other.vertex
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior, vertex index as tie-break.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

/// Shortest-path sweep result with predecessors for path reconstruction.
struct Sweep {
    distances: Vec<f64>,
    predecessors: Vec<Option<usize>>,
}

impl Sweep {
    /// The reachable vertex with the largest finite distance.
    fn farthest(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (v, &d) in self.distances.iter().enumerate() {
            if d.is_finite() {
                let better = match best {
                    None => true,
                    Some((_, bd)) => d > bd,
                };
                if better {
                    best = Some((v, d));
                }
            }
        }
        best
    }

    /// Reconstruct the path from the nearest source to `target`.
    fn path_to(&self, target: usize) -> Option<Vec<usize>> {
        if !self.distances[target].is_finite() {
            return None;
        }
        let mut path = vec![target];
        let mut current = target;
        while let Some(pred) = self.predecessors[current] {
            path.push(pred);
            current = pred;
            if path.len() > self.distances.len() {
                return None;
            }
        }
        path.reverse();
        Some(path)
    }
}

/// Multi-source Dijkstra over the local graph, skipping banned edges.
fn dijkstra(graph: &LocalGraph, sources: &[usize], banned: &HashSet<(usize, usize)>) -> Sweep {
    let n = graph.adjacency.len();
    let mut distances = vec![f64::INFINITY; n];
    let mut predecessors: Vec<Option<usize>> = vec![None; n];
    let mut heap = BinaryHeap::new();

    for &s in sources {
        distances[s] = 0.0;
        heap.push(QueueEntry {
            vertex: s,
            distance: 0.0,
        });
    }

    while let Some(QueueEntry { vertex, distance }) = heap.pop() {
        if distance > distances[vertex] {
            continue; // stale entry
        }
        for &(next, len) in &graph.adjacency[vertex] {
            if banned.contains(&edge_key(vertex, next)) {
                continue;
            }
            let candidate = distance + len;
            if candidate < distances[next] {
                distances[next] = candidate;
                predecessors[next] = Some(vertex);
                heap.push(QueueEntry {
                    vertex: next,
                    distance: candidate,
                });
            }
        }
    }

    Sweep {
        distances,
        predecessors,
    }
}

/// The vertex of `targets` nearest to the sweep's sources.
fn nearest_of(sweep: &Sweep, targets: &HashSet<usize>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    let mut candidates: Vec<usize> = targets.iter().copied().collect();
    candidates.sort_unstable();
    for v in candidates {
        let d = sweep.distances[v];
        if !d.is_finite() {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, bd)) => d < bd,
        };
        if better {
            best = Some((v, d));
        }
    }
    best.map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_from_triangles, FaceId};
    use nalgebra::Point3;

    fn whole_mesh_chart(mesh: &HalfEdgeMesh) -> (Vec<Chart>, Vec<ChartId>) {
        let faces: Vec<FaceId> = mesh.face_ids().collect();
        let charts = vec![Chart::new(ChartId::new(0), faces)];
        let chart_of = vec![ChartId::new(0); mesh.num_faces()];
        (charts, chart_of)
    }

    fn octahedron() -> HalfEdgeMesh {
        let vertices = vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, -1.0),
        ];
        let faces = vec![
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ];
        build_from_triangles(&vertices, &faces).unwrap()
    }

    fn annulus() -> HalfEdgeMesh {
        // A square ring: outer 4x4 corners, inner hole, 8 vertices in two
        // concentric squares, 8 quads split into 16 triangles.
        let vertices = vec![
            // outer square
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            // inner square
            Point3::new(0.5, 0.5, 0.0),
            Point3::new(1.5, 0.5, 0.0),
            Point3::new(1.5, 1.5, 0.0),
            Point3::new(0.5, 1.5, 0.0),
        ];
        let faces = vec![
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        build_from_triangles(&vertices, &faces).unwrap()
    }

    #[test]
    fn test_closed_chart_cut_to_disk() {
        let mesh = octahedron();
        let (mut charts, chart_of) = whole_mesh_chart(&mesh);
        let options = UnwrapOptions::default();

        let resolution = resolve_seams(&mesh, &mut charts, &chart_of, &options);

        assert!(resolution.failures.is_empty());
        assert_eq!(resolution.surfaces.len(), 1);
        assert!(resolution.surfaces[0].is_disk());
    }

    #[test]
    fn test_annulus_cut_to_disk() {
        let mesh = annulus();
        let (mut charts, chart_of) = whole_mesh_chart(&mesh);

        // Sanity: the uncut chart is an annulus (chi = 0, two loops).
        let uncut = charts[0].extract_surface(&mesh, &chart_of);
        assert_eq!(uncut.euler_characteristic(), 0);
        assert_eq!(uncut.boundary_loops.len(), 2);

        let options = UnwrapOptions::default();
        let resolution = resolve_seams(&mesh, &mut charts, &chart_of, &options);

        assert!(resolution.failures.is_empty());
        assert!(resolution.surfaces[0].is_disk());
    }

    #[test]
    fn test_disk_chart_untouched() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2]];
        let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
        let (mut charts, chart_of) = whole_mesh_chart(&mesh);

        let resolution = resolve_seams(&mesh, &mut charts, &chart_of, &UnwrapOptions::default());

        assert!(resolution.failures.is_empty());
        assert!(charts[0].cut_edges.is_empty());
        assert!(resolution.surfaces[0].is_disk());
    }

    #[test]
    fn test_unresolvable_reported_not_panicked() {
        // A closed genus-1 surface needs more than one cut; capping the
        // iterations at 1 must surface a failure for the chart, not hang or
        // panic.
        let mesh = torus_mesh();
        let (mut charts, chart_of) = whole_mesh_chart(&mesh);
        let options = UnwrapOptions::default().with_max_cut_iterations(1);

        let resolution = resolve_seams(&mesh, &mut charts, &chart_of, &options);

        assert_eq!(resolution.failures.len(), 1);
        assert!(matches!(
            resolution.failures[0],
            UnwrapError::UnresolvableTopology {
                chart: 0,
                iterations: 1
            }
        ));
    }

    #[test]
    fn test_torus_resolves_with_enough_iterations() {
        let mesh = torus_mesh();
        let (mut charts, chart_of) = whole_mesh_chart(&mesh);

        let uncut = charts[0].extract_surface(&mesh, &chart_of);
        assert_eq!(uncut.euler_characteristic(), 0);
        assert!(uncut.is_closed());

        let options = UnwrapOptions::default();
        let resolution = resolve_seams(&mesh, &mut charts, &chart_of, &options);

        assert!(resolution.failures.is_empty());
        assert!(resolution.surfaces[0].is_disk());
    }

    #[test]
    fn test_deterministic_cuts() {
        let mesh = octahedron();

        let run = || {
            let (mut charts, chart_of) = whole_mesh_chart(&mesh);
            let options = UnwrapOptions::default();
            resolve_seams(&mesh, &mut charts, &chart_of, &options);
            charts[0].cut_edges.clone()
        };

        assert_eq!(run(), run());
    }

    /// A coarse torus: 4x4 grid of quads with wraparound, split to triangles.
    fn torus_mesh() -> HalfEdgeMesh {
        let n = 4usize;
        let m = 4usize;
        let mut vertices = Vec::new();
        for j in 0..m {
            for i in 0..n {
                let theta = (i as f64) / (n as f64) * std::f64::consts::TAU;
                let phi = (j as f64) / (m as f64) * std::f64::consts::TAU;
                let r = 1.0 + 0.35 * phi.cos();
                vertices.push(Point3::new(
                    r * theta.cos(),
                    r * theta.sin(),
                    0.35 * phi.sin(),
                ));
            }
        }
        let mut faces = Vec::new();
        for j in 0..m {
            for i in 0..n {
                let v00 = j * n + i;
                let v10 = j * n + (i + 1) % n;
                let v01 = ((j + 1) % m) * n + i;
                let v11 = ((j + 1) % m) * n + (i + 1) % n;
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            }
        }
        build_from_triangles(&vertices, &faces).unwrap()
    }
}
