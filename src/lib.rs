//! # Peel
//!
//! A UV unwrapping engine for triangle meshes: chart segmentation, conformal
//! parameterization, and atlas packing.
//!
//! Peel takes an in-memory mesh (vertex positions, optional normals, and
//! triangle indices) and produces a UV atlas: per-corner texture coordinates
//! in [0,1]x[0,1], a chart id per face, and per-chart diagnostics. It does
//! not read or write any file format; mesh import/export, CLI surfaces, and
//! bindings are the caller's concern.
//!
//! ## Pipeline
//!
//! - **Segmentation**: faces are clustered into charts by priority-driven
//!   region growing over the dual graph, steered by dihedral angles and a
//!   planarity proxy. Sharp edges and non-manifold vertices become hard
//!   seams.
//! - **Seam resolution**: every chart is cut into a topological disk along
//!   edge-weighted shortest paths.
//! - **Parameterization**: each disk chart is flattened with least squares
//!   conformal maps (harmonic fallback), independently and in parallel.
//! - **Packing**: chart footprints are placed into the unit square with a
//!   skyline heuristic, rotated to their minimal-area bounding rectangles.
//!
//! ## Quick Start
//!
//! ```
//! use peel::mesh::{build_from_triangles, HalfEdgeMesh};
//! use peel::{unwrap, UnwrapOptions};
//! use nalgebra::Point3;
//!
//! // A unit square in the plane
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2], [0, 2, 3]];
//!
//! let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
//! let result = unwrap(&mesh, &UnwrapOptions::default()).unwrap();
//!
//! // One flat chart, every face covered, all UVs inside the atlas
//! assert_eq!(result.charts.len(), 1);
//! for (face, corners) in result.indices.iter().enumerate() {
//!     assert!(result.chart_of_face[face].is_valid());
//!     for &corner in corners {
//!         let uv = result.vertices[corner].uv;
//!         assert!((0.0..=1.0).contains(&uv.x));
//!         assert!((0.0..=1.0).contains(&uv.y));
//!     }
//! }
//! ```
//!
//! ## Error Handling
//!
//! Malformed input (out-of-range indices, non-manifold edges) fails mesh
//! construction up front. Per-chart problems — topology that cannot be cut
//! within the iteration budget, solves that do not converge even after the
//! fallback — are reported in [`UnwrapResult::failures`] while the healthy
//! charts complete. Only atlas overflow aborts a whole invocation, and only
//! after bounded growth attempts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mesh;
pub mod unwrap;

pub use error::{Result, UnwrapError};
pub use unwrap::{
    unwrap, ChartInfo, DistortionStats, OutputVertex, PlacedChart, Progress, SolverKind,
    UnwrapOptions, UnwrapResult,
};

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::mesh::{build_from_triangles, HalfEdgeMesh};
    use super::{unwrap, UnwrapOptions};
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron_end_to_end() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];

        let mesh: HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
        let result = unwrap(&mesh, &UnwrapOptions::default()).unwrap();

        assert!(result.failures.is_empty());
        assert_eq!(result.indices.len(), 4);
        for corners in &result.indices {
            for &corner in corners {
                let uv = result.vertices[corner].uv;
                assert!(uv.x.is_finite() && uv.y.is_finite());
                assert!((-1e-9..=1.0 + 1e-9).contains(&uv.x));
                assert!((-1e-9..=1.0 + 1e-9).contains(&uv.y));
            }
        }
    }
}
