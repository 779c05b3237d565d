//! Charts: connected face groups and their extracted surfaces.
//!
//! A [`Chart`] is a set of mesh faces flattened as one unit. For everything
//! downstream of segmentation the chart is materialized as a [`ChartSurface`]:
//! a compact chart-local face-vertex mesh in which vertices are split along
//! seams. A mesh vertex whose incident chart faces are separated by the chart
//! boundary or by a cut edge appears once per fan sector, so the extracted
//! surface directly reflects the cut topology — its Euler characteristic is
//! the one that decides disk-ness, and its vertices are the ones that receive
//! UV coordinates.

use std::collections::{BTreeSet, HashMap};

use nalgebra::Point3;

use crate::mesh::{ChartId, FaceId, HalfEdgeMesh, MeshIndex, VertexId};

/// A connected group of faces flattened as one unit.
#[derive(Debug, Clone)]
pub struct Chart<I: MeshIndex = u32> {
    /// The chart's index.
    pub id: ChartId<I>,

    /// Faces belonging to this chart, in ascending face-index order.
    pub faces: Vec<FaceId<I>>,

    /// Cut edges added by the seam resolver, as mesh vertex index pairs
    /// (smaller index first). Ordered for deterministic extraction.
    pub(crate) cut_edges: BTreeSet<(usize, usize)>,
}

impl<I: MeshIndex> Chart<I> {
    /// Create a chart over the given faces.
    pub fn new(id: ChartId<I>, mut faces: Vec<FaceId<I>>) -> Self {
        faces.sort();
        Self {
            id,
            faces,
            cut_edges: BTreeSet::new(),
        }
    }

    /// Number of faces in the chart.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Record a cut path through the chart. Consecutive path vertices become
    /// cut edges; vertex fans crossing them are split on extraction.
    pub(crate) fn add_cut_path(&mut self, path: &[VertexId<I>]) {
        for pair in path.windows(2) {
            let a = pair[0].index();
            let b = pair[1].index();
            let key = if a < b { (a, b) } else { (b, a) };
            self.cut_edges.insert(key);
        }
    }

    /// Check whether an edge (as a mesh vertex index pair) is cut.
    #[inline]
    pub(crate) fn is_cut(&self, a: usize, b: usize) -> bool {
        let key = if a < b { (a, b) } else { (b, a) };
        self.cut_edges.contains(&key)
    }

    /// Extract the chart-local surface, splitting vertices along seams.
    ///
    /// `chart_of` maps every mesh face to its chart id and defines membership.
    pub fn extract_surface(
        &self,
        mesh: &HalfEdgeMesh<I>,
        chart_of: &[ChartId<I>],
    ) -> ChartSurface<I> {
        let face_slot: HashMap<usize, usize> = self
            .faces
            .iter()
            .enumerate()
            .map(|(slot, f)| (f.index(), slot))
            .collect();

        // Union-find over face corners: corner (slot, c) has flat id slot*3+c.
        let mut parent: Vec<usize> = (0..self.faces.len() * 3).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        fn union(parent: &mut [usize], a: usize, b: usize) {
            let ra = find(parent, a);
            let rb = find(parent, b);
            if ra != rb {
                // Attach the larger root to the smaller for deterministic
                // representatives.
                if ra < rb {
                    parent[rb] = ra;
                } else {
                    parent[ra] = rb;
                }
            }
        }

        // Corner index of a vertex within a face, via the face's triangle.
        let corner_of = |f: FaceId<I>, v: VertexId<I>| -> usize {
            let tri = mesh.face_triangle(f);
            tri.iter().position(|&x| x == v).expect("vertex in face")
        };

        // Merge corners across every interior, non-cut edge of the chart.
        for (slot, &f) in self.faces.iter().enumerate() {
            for he in mesh.face_halfedges(f) {
                let g = mesh.face_of(mesh.twin(he));
                if !g.is_valid() || chart_of[g.index()] != self.id {
                    continue;
                }
                let v = mesh.origin(he);
                let w = mesh.dest(he);
                if self.is_cut(v.index(), w.index()) {
                    continue;
                }
                let g_slot = face_slot[&g.index()];
                union(
                    &mut parent,
                    slot * 3 + corner_of(f, v),
                    g_slot * 3 + corner_of(g, v),
                );
                union(
                    &mut parent,
                    slot * 3 + corner_of(f, w),
                    g_slot * 3 + corner_of(g, w),
                );
            }
        }

        // Number local vertices in first-encounter order.
        let mut local_of_root: HashMap<usize, usize> = HashMap::new();
        let mut positions: Vec<Point3<f64>> = Vec::new();
        let mut vertex_source: Vec<VertexId<I>> = Vec::new();
        let mut faces_local: Vec<[usize; 3]> = Vec::with_capacity(self.faces.len());

        for (slot, &f) in self.faces.iter().enumerate() {
            let tri = mesh.face_triangle(f);
            let mut local = [0usize; 3];
            for c in 0..3 {
                let root = find(&mut parent, slot * 3 + c);
                let id = *local_of_root.entry(root).or_insert_with(|| {
                    positions.push(*mesh.position(tri[c]));
                    vertex_source.push(tri[c]);
                    positions.len() - 1
                });
                local[c] = id;
            }
            faces_local.push(local);
        }

        ChartSurface::new(positions, faces_local, vertex_source)
    }
}

/// A chart materialized as a compact face-vertex mesh with seam-split vertices.
#[derive(Debug, Clone)]
pub struct ChartSurface<I: MeshIndex = u32> {
    /// Positions of the chart-local vertices.
    pub positions: Vec<Point3<f64>>,

    /// Chart-local triangles, parallel to the chart's face list.
    pub faces: Vec<[usize; 3]>,

    /// Mesh vertex each local vertex originated from.
    pub vertex_source: Vec<VertexId<I>>,

    /// Boundary loops as ordered local vertex cycles.
    pub boundary_loops: Vec<Vec<usize>>,

    /// Number of distinct undirected edges.
    num_edges: usize,
}

impl<I: MeshIndex> ChartSurface<I> {
    fn new(
        positions: Vec<Point3<f64>>,
        faces: Vec<[usize; 3]>,
        vertex_source: Vec<VertexId<I>>,
    ) -> Self {
        let mut undirected: BTreeSet<(usize, usize)> = BTreeSet::new();
        let mut directed: HashMap<(usize, usize), usize> = HashMap::new();
        for (fi, face) in faces.iter().enumerate() {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                undirected.insert(if a < b { (a, b) } else { (b, a) });
                directed.insert((a, b), fi);
            }
        }

        // Boundary directed edges have no reverse counterpart. Walk them into
        // loops via a successor keyed on the origin vertex, built in sorted
        // edge order so the walk is deterministic.
        let mut boundary_starts: Vec<(usize, usize)> = directed
            .keys()
            .filter(|&&(a, b)| !directed.contains_key(&(b, a)))
            .copied()
            .collect();
        boundary_starts.sort();
        let mut successor: HashMap<usize, usize> = HashMap::new();
        for &(a, b) in &boundary_starts {
            successor.entry(a).or_insert(b);
        }

        let mut boundary_loops = Vec::new();
        let mut visited: BTreeSet<usize> = BTreeSet::new();
        for (start, _) in boundary_starts {
            if visited.contains(&start) {
                continue;
            }
            let mut cycle = Vec::new();
            let mut current = start;
            loop {
                if !visited.insert(current) {
                    break;
                }
                cycle.push(current);
                match successor.get(&current) {
                    Some(&next) => current = next,
                    None => break,
                }
                if current == start {
                    break;
                }
            }
            if cycle.len() >= 2 {
                boundary_loops.push(cycle);
            }
        }

        Self {
            positions,
            faces,
            vertex_source,
            boundary_loops,
            num_edges: undirected.len(),
        }
    }

    /// Number of local vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    /// Number of distinct undirected edges.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Euler characteristic V - E + F of the extracted surface.
    pub fn euler_characteristic(&self) -> i64 {
        self.positions.len() as i64 - self.num_edges as i64 + self.faces.len() as i64
    }

    /// A disk has Euler characteristic 1 and at least one boundary loop.
    pub fn is_disk(&self) -> bool {
        self.euler_characteristic() == 1 && !self.boundary_loops.is_empty()
    }

    /// Whether the surface is closed (no boundary at all).
    pub fn is_closed(&self) -> bool {
        self.boundary_loops.is_empty()
    }

    /// All local vertices lying on some boundary loop.
    pub fn boundary_vertices(&self) -> Vec<usize> {
        let mut vs: Vec<usize> = self.boundary_loops.iter().flatten().copied().collect();
        vs.sort_unstable();
        vs.dedup();
        vs
    }

    /// Boundary edges as local vertex pairs (smaller index first).
    pub fn boundary_edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for cycle in &self.boundary_loops {
            for i in 0..cycle.len() {
                let a = cycle[i];
                let b = cycle[(i + 1) % cycle.len()];
                edges.push(if a < b { (a, b) } else { (b, a) });
            }
        }
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Total 3D area of the surface.
    pub fn total_area(&self) -> f64 {
        self.faces
            .iter()
            .map(|&[a, b, c]| {
                let e1 = self.positions[b] - self.positions[a];
                let e2 = self.positions[c] - self.positions[a];
                0.5 * e1.cross(&e2).norm()
            })
            .sum()
    }
}
