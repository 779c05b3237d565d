//! Mesh construction utilities.
//!
//! This module builds half-edge meshes from the raw vertex/face lists supplied
//! by the caller, validating topology along the way: out-of-range indices,
//! degenerate faces, and non-manifold edges are rejected up front, while
//! non-manifold vertices are tolerated and flagged for the segmentation stage.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use super::halfedge::HalfEdgeMesh;
use super::index::{FaceId, HalfEdgeId, MeshIndex, VertexId};
use crate::error::{Result, UnwrapError};

/// Build a half-edge mesh from vertices and triangle faces.
///
/// Vertex normals are derived area-weighted from incident faces. Use
/// [`build_from_triangles_with_normals`] to supply caller-provided normals.
///
/// # Arguments
/// * `positions` - List of vertex positions
/// * `faces` - List of triangle faces, each as [v0, v1, v2] indices
///   (counter-clockwise)
///
/// # Returns
/// A half-edge mesh, or an error if the input is invalid.
///
/// # Errors
///
/// - [`UnwrapError::EmptyMesh`] if `faces` is empty
/// - [`UnwrapError::InvalidVertexIndex`] for an out-of-range index
/// - [`UnwrapError::DegenerateFace`] for a face with repeated indices
/// - [`UnwrapError::NonManifoldEdge`] if an edge has more than two incident
///   faces, or two incident faces with the same winding
///
/// # Example
/// ```
/// use peel::mesh::{build_from_triangles, HalfEdgeMesh};
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ];
/// let faces = vec![[0, 1, 2]];
///
/// let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
/// assert_eq!(mesh.num_vertices(), 3);
/// assert_eq!(mesh.num_faces(), 1);
/// ```
pub fn build_from_triangles<I: MeshIndex>(
    positions: &[Point3<f64>],
    faces: &[[usize; 3]],
) -> Result<HalfEdgeMesh<I>> {
    build(positions, None, faces)
}

/// Build a half-edge mesh from vertices, per-vertex normals, and triangle faces.
///
/// Same validation as [`build_from_triangles`]; `normals` must have one entry
/// per vertex.
pub fn build_from_triangles_with_normals<I: MeshIndex>(
    positions: &[Point3<f64>],
    normals: &[Vector3<f64>],
    faces: &[[usize; 3]],
) -> Result<HalfEdgeMesh<I>> {
    if normals.len() != positions.len() {
        return Err(UnwrapError::invalid_param(
            "normals",
            normals.len(),
            "must have one entry per vertex",
        ));
    }
    build(positions, Some(normals), faces)
}

fn build<I: MeshIndex>(
    positions: &[Point3<f64>],
    normals: Option<&[Vector3<f64>]>,
    faces: &[[usize; 3]],
) -> Result<HalfEdgeMesh<I>> {
    if faces.is_empty() {
        return Err(UnwrapError::EmptyMesh);
    }

    // Validate vertex indices and degeneracy
    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= positions.len() {
                return Err(UnwrapError::InvalidVertexIndex {
                    face: fi,
                    vertex: vi,
                });
            }
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(UnwrapError::DegenerateFace { face: fi });
        }
    }

    // Validate edge manifoldness: at most two incident faces per undirected
    // edge, and opposite windings on the two sides.
    let mut undirected_count: HashMap<(usize, usize), usize> = HashMap::new();
    let mut directed_seen: HashMap<(usize, usize), usize> = HashMap::new();
    for (fi, face) in faces.iter().enumerate() {
        for i in 0..3 {
            let v0 = face[i];
            let v1 = face[(i + 1) % 3];
            let key = if v0 < v1 { (v0, v1) } else { (v1, v0) };
            let count = undirected_count.entry(key).or_insert(0);
            *count += 1;
            if *count > 2 {
                return Err(UnwrapError::NonManifoldEdge { v0: key.0, v1: key.1 });
            }
            // Same directed edge twice means two faces wind the same way
            // across it; the twin relation cannot be established.
            if directed_seen.insert((v0, v1), fi).is_some() {
                return Err(UnwrapError::NonManifoldEdge { v0: key.0, v1: key.1 });
            }
        }
    }

    let mut mesh = HalfEdgeMesh::with_capacity(positions.len(), faces.len());

    // Add vertices
    let vertex_ids: Vec<VertexId<I>> = positions.iter().map(|&pos| mesh.add_vertex(pos)).collect();

    // Map from directed edge (v0, v1) to half-edge ID
    let mut edge_map: HashMap<(usize, usize), HalfEdgeId<I>> = HashMap::new();

    // First pass: create all half-edges and faces
    for face in faces {
        let v0 = face[0];
        let v1 = face[1];
        let v2 = face[2];

        // Create three half-edges for this face
        let he0 = HalfEdgeId::<I>::new(mesh.num_halfedges());
        let he1 = HalfEdgeId::<I>::new(mesh.num_halfedges() + 1);
        let he2 = HalfEdgeId::<I>::new(mesh.num_halfedges() + 2);

        for _ in 0..3 {
            mesh.halfedges.push(super::halfedge::HalfEdge::new());
        }

        let face_id = FaceId::<I>::new(mesh.num_faces());
        mesh.faces.push(super::halfedge::Face::new(he0));

        // Set up half-edge connectivity within the face
        {
            let he = mesh.halfedge_mut(he0);
            he.origin = vertex_ids[v0];
            he.next = he1;
            he.prev = he2;
            he.face = face_id;
        }
        {
            let he = mesh.halfedge_mut(he1);
            he.origin = vertex_ids[v1];
            he.next = he2;
            he.prev = he0;
            he.face = face_id;
        }
        {
            let he = mesh.halfedge_mut(he2);
            he.origin = vertex_ids[v2];
            he.next = he0;
            he.prev = he1;
            he.face = face_id;
        }

        // Set vertex half-edges (will be overwritten for shared vertices)
        mesh.vertex_mut(vertex_ids[v0]).halfedge = he0;
        mesh.vertex_mut(vertex_ids[v1]).halfedge = he1;
        mesh.vertex_mut(vertex_ids[v2]).halfedge = he2;

        // Record edges for twin linking
        edge_map.insert((v0, v1), he0);
        edge_map.insert((v1, v2), he1);
        edge_map.insert((v2, v0), he2);
    }

    // Second pass: link twins
    for (&(v0, v1), &he) in &edge_map {
        if let Some(&twin) = edge_map.get(&(v1, v0)) {
            mesh.halfedge_mut(he).twin = twin;
        } else {
            // Boundary edge - create boundary half-edge
            let boundary_he = HalfEdgeId::<I>::new(mesh.num_halfedges());
            mesh.halfedges.push(super::halfedge::HalfEdge::new());

            mesh.halfedge_mut(he).twin = boundary_he;
            {
                let bhe = mesh.halfedge_mut(boundary_he);
                bhe.origin = vertex_ids[v1];
                bhe.twin = he;
                // Face is invalid (boundary)
            }
        }
    }

    // Third pass: link boundary half-edges into loops
    link_boundary_loops(&mut mesh);

    // Fourth pass: ensure boundary vertices point to boundary half-edges
    fix_boundary_vertex_halfedges(&mut mesh);

    // Vertex normals: caller-supplied or derived area-weighted
    match normals {
        Some(normals) => {
            for (i, n) in normals.iter().enumerate() {
                mesh.vertices[i].normal = *n;
            }
        }
        None => derive_vertex_normals(&mut mesh, faces),
    }

    // Flag non-manifold (bow-tie) vertices for the segmentation stage
    mesh.nonmanifold_vertices = flag_nonmanifold_vertices(positions.len(), faces);

    Ok(mesh)
}

/// Link boundary half-edges into proper loops.
fn link_boundary_loops<I: MeshIndex>(mesh: &mut HalfEdgeMesh<I>) {
    // Find all boundary half-edges
    let boundary_hes: Vec<HalfEdgeId<I>> = mesh
        .halfedge_ids()
        .filter(|&he| mesh.is_boundary_halfedge(he))
        .collect();

    // Group by origin vertex for quick lookup
    let mut outgoing: HashMap<usize, HalfEdgeId<I>> = HashMap::new();
    for he in &boundary_hes {
        let origin = mesh.origin(*he).index();
        outgoing.insert(origin, *he);
    }

    // Link next/prev for boundary half-edges
    for &he in &boundary_hes {
        // The next boundary half-edge starts where this one ends
        let dest = mesh.dest(he).index();
        if let Some(&next_he) = outgoing.get(&dest) {
            mesh.halfedge_mut(he).next = next_he;
            mesh.halfedge_mut(next_he).prev = he;
        }
    }
}

/// Ensure boundary vertices point to a boundary half-edge.
fn fix_boundary_vertex_halfedges<I: MeshIndex>(mesh: &mut HalfEdgeMesh<I>) {
    for vid in mesh.vertex_ids().collect::<Vec<_>>() {
        let start_he = mesh.vertex(vid).halfedge;
        if !start_he.is_valid() {
            continue;
        }

        // Walk around the vertex to find a boundary half-edge
        // Uses the same iteration pattern as VertexHalfEdgeIter: twin -> next
        let mut he = start_he;
        loop {
            if mesh.is_boundary_halfedge(he) {
                mesh.vertex_mut(vid).halfedge = he;
                break;
            }
            he = mesh.next(mesh.twin(he));
            if he == start_he {
                break;
            }
        }
    }
}

/// Accumulate area-weighted face normals onto vertices and normalize.
fn derive_vertex_normals<I: MeshIndex>(mesh: &mut HalfEdgeMesh<I>, faces: &[[usize; 3]]) {
    let mut accum = vec![Vector3::zeros(); mesh.num_vertices()];
    for (fi, face) in faces.iter().enumerate() {
        let n = mesh.face_area_normal(FaceId::new(fi));
        for &vi in face {
            accum[vi] += n;
        }
    }
    for (i, n) in accum.into_iter().enumerate() {
        let norm = n.norm();
        if norm > 1e-12 {
            mesh.vertices[i].normal = n / norm;
        }
    }
}

/// Detect vertices whose incident faces form more than one edge-connected fan.
///
/// Two faces incident to a vertex are in the same fan when they share an edge
/// incident to that vertex. A manifold vertex has exactly one fan; bow-tie
/// vertices have several.
fn flag_nonmanifold_vertices(num_vertices: usize, faces: &[[usize; 3]]) -> Vec<bool> {
    let mut face_of_directed: HashMap<(usize, usize), usize> = HashMap::new();
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); num_vertices];

    for (fi, face) in faces.iter().enumerate() {
        for i in 0..3 {
            let v0 = face[i];
            let v1 = face[(i + 1) % 3];
            face_of_directed.insert((v0, v1), fi);
            incident[v0].push(fi);
        }
    }

    let mut flags = vec![false; num_vertices];
    let mut slot: HashMap<usize, usize> = HashMap::new();
    for (v, incident_faces) in incident.iter().enumerate() {
        if incident_faces.len() <= 1 {
            continue;
        }

        slot.clear();
        for (s, &f) in incident_faces.iter().enumerate() {
            slot.insert(f, s);
        }

        // BFS over the incident faces, crossing edges that touch v
        let mut visited = vec![false; incident_faces.len()];
        let mut stack = vec![0usize];
        visited[0] = true;
        while let Some(s) = stack.pop() {
            let face = faces[incident_faces[s]];
            // The two edges of this face incident to v, as directed edges
            // owned by this face: (v, a) outgoing and (b, v) incoming.
            let corner = face.iter().position(|&x| x == v).unwrap();
            let a = face[(corner + 1) % 3];
            let b = face[(corner + 2) % 3];

            for neighbor in [
                face_of_directed.get(&(a, v)).copied(),
                face_of_directed.get(&(v, b)).copied(),
            ]
            .into_iter()
            .flatten()
            {
                if let Some(&s2) = slot.get(&neighbor) {
                    if !visited[s2] {
                        visited[s2] = true;
                        stack.push(s2);
                    }
                }
            }
        }

        if visited.iter().any(|&seen| !seen) {
            flags[v] = true;
        }
    }

    flags
}

/// Convert a half-edge mesh back to a face-vertex representation.
///
/// Returns (vertices, faces) tuple.
pub fn to_face_vertex<I: MeshIndex>(mesh: &HalfEdgeMesh<I>) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let vertices: Vec<Point3<f64>> = mesh.vertex_ids().map(|v| *mesh.position(v)).collect();

    let faces: Vec<[usize; 3]> = mesh
        .face_ids()
        .map(|f| {
            let [v0, v1, v2] = mesh.face_triangle(f);
            [v0.index(), v1.index(), v2.index()]
        })
        .collect();

    (vertices, faces)
}
