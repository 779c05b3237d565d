//! Core mesh data structures.
//!
//! This module provides the half-edge mesh representation consumed by the
//! unwrapping pipeline.
//!
//! # Overview
//!
//! The primary type is [`HalfEdgeMesh`], which represents a triangle mesh using
//! a half-edge (doubly-connected edge list) data structure. This representation
//! provides O(1) adjacency queries, which the segmentation and seam-resolution
//! stages lean on heavily.
//!
//! # Index Types
//!
//! Mesh elements are identified by type-safe index wrappers:
//! - [`VertexId`] - Identifies a vertex
//! - [`HalfEdgeId`] - Identifies a half-edge
//! - [`FaceId`] - Identifies a face
//! - [`ChartId`] - Identifies a chart produced by segmentation
//!
//! These indices are generic over the underlying integer type ([`MeshIndex`]
//! trait), allowing you to choose `u16`, `u32`, or `u64` based on mesh size.
//!
//! # Construction
//!
//! Meshes are constructed from the caller's face-vertex lists:
//!
//! ```
//! use peel::mesh::{HalfEdgeMesh, build_from_triangles};
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2]];
//!
//! let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
//! ```

mod builder;
mod halfedge;
mod index;

pub use builder::{build_from_triangles, build_from_triangles_with_normals, to_face_vertex};
pub use halfedge::{Face, HalfEdge, HalfEdgeMesh, Vertex};
pub use index::{ChartId, FaceId, HalfEdgeId, MeshIndex, VertexId};
