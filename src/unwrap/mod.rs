//! The unwrapping pipeline.
//!
//! This module wires the stages of the engine together:
//!
//! 1. **Segmentation** partitions the faces into charts over the dual graph
//!    (single-threaded; the chart assignment array is shared mutable state).
//! 2. **Seam resolution** cuts every chart into a topological disk.
//! 3. **Parameterization** flattens each chart independently; this stage is
//!    embarrassingly parallel and runs on a rayon worker pool, each solve
//!    writing to its own output slot.
//! 4. **Packing** places all chart footprints into the unit UV square
//!    (sequential; the free-space structure is shared state), after a barrier
//!    on the parallel stage.
//!
//! Per-chart topology and solver failures are collected in
//! [`UnwrapResult::failures`] while the remaining charts proceed; only
//! malformed input and atlas overflow abort the invocation.
//!
//! # Example
//!
//! ```
//! use peel::mesh::build_from_triangles;
//! use peel::{unwrap, UnwrapOptions};
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2], [0, 2, 3]];
//! let mesh: peel::mesh::HalfEdgeMesh = build_from_triangles(&vertices, &faces).unwrap();
//!
//! let result = unwrap(&mesh, &UnwrapOptions::default()).unwrap();
//! assert_eq!(result.chart_of_face.len(), 2);
//! for vertex in &result.vertices {
//!     assert!(vertex.uv.x >= 0.0 && vertex.uv.x <= 1.0);
//!     assert!(vertex.uv.y >= 0.0 && vertex.uv.y <= 1.0);
//! }
//! ```

mod chart;
mod cut;
mod options;
mod pack;
mod param;
mod progress;
mod segment;
mod sparse;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::Point2;
use rayon::prelude::*;

use crate::error::{Result, UnwrapError};
use crate::mesh::{ChartId, FaceId, HalfEdgeMesh, MeshIndex, VertexId};

pub use chart::{Chart, ChartSurface};
pub use options::UnwrapOptions;
pub use pack::PlacedChart;
pub use param::{DistortionStats, ParameterizedChart, SolverKind};
pub use progress::Progress;

/// One output vertex of the unwrapped mesh.
///
/// Vertices are split along seams: a mesh vertex shared by several charts
/// appears once per chart, each copy with its own UV coordinate.
#[derive(Debug, Clone, Copy)]
pub struct OutputVertex<I: MeshIndex = u32> {
    /// Atlas UV coordinate, in [0,1]x[0,1].
    pub uv: Point2<f64>,
    /// The input mesh vertex this output vertex originated from.
    pub source: VertexId<I>,
    /// The chart this copy belongs to.
    pub chart: ChartId<I>,
}

/// Per-chart diagnostics.
#[derive(Debug, Clone)]
pub struct ChartInfo<I: MeshIndex = u32> {
    /// The chart's id.
    pub id: ChartId<I>,
    /// Faces belonging to the chart.
    pub faces: Vec<FaceId<I>>,
    /// Distortion metrics; `None` when the chart failed before solving.
    pub distortion: Option<DistortionStats>,
    /// Solver that produced the coordinates; `None` on failure.
    pub solver: Option<SolverKind>,
    /// Atlas placement; `None` when the chart was not packed.
    pub placement: Option<PlacedChart>,
}

/// Output of the unwrapping pipeline.
#[derive(Debug, Clone)]
pub struct UnwrapResult<I: MeshIndex = u32> {
    /// Seam-split output vertices with atlas UVs.
    pub vertices: Vec<OutputVertex<I>>,
    /// Per input face, the three output-vertex indices of its corners.
    /// Parallel to the mesh's face ids.
    pub indices: Vec<[usize; 3]>,
    /// Chart id per input face.
    pub chart_of_face: Vec<ChartId<I>>,
    /// Per-chart diagnostics, indexed by chart id.
    pub charts: Vec<ChartInfo<I>>,
    /// Seam edges (chart boundaries, cuts, and mesh boundary), as mesh
    /// vertex pairs with the smaller index first.
    pub seams: Vec<(VertexId<I>, VertexId<I>)>,
    /// Fraction of the atlas covered by chart area.
    pub utilization: f64,
    /// Suggested raster resolution (width, height) for the atlas.
    pub resolution: (u32, u32),
    /// Per-chart failures: unresolvable topology or failed solves. The
    /// affected charts keep their faces in the output with zeroed UVs.
    pub failures: Vec<UnwrapError>,
}

/// Unwrap a mesh: segment into charts, cut to disks, flatten, and pack into
/// a UV atlas.
///
/// The mesh is read-only; results reference it through ids. Identical input
/// and options produce identical output.
///
/// # Errors
///
/// Returns an error for invalid options ([`UnwrapError::InvalidParameter`]),
/// an empty mesh, or an atlas overflow. Per-chart failures do not abort the
/// invocation; they are reported in [`UnwrapResult::failures`].
pub fn unwrap<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    options: &UnwrapOptions,
) -> Result<UnwrapResult<I>> {
    options.validate()?;
    if mesh.num_faces() == 0 {
        return Err(UnwrapError::EmptyMesh);
    }
    let progress = &options.progress;

    // Stage 1: segmentation
    progress.report(0, 4, "segmenting faces into charts");
    let segmentation = segment::segment(mesh, options);
    let segment::Segmentation {
        chart_of,
        mut charts,
    } = segmentation;

    // Stage 2: seam resolution
    progress.report(1, 4, "cutting charts into disks");
    let resolution = cut::resolve_seams(mesh, &mut charts, &chart_of, options);
    let mut failures = resolution.failures;
    let surfaces = resolution.surfaces;

    let unresolved: Vec<bool> = {
        let mut flags = vec![false; charts.len()];
        for failure in &failures {
            if let UnwrapError::UnresolvableTopology { chart, .. } = failure {
                flags[*chart] = true;
            }
        }
        flags
    };

    // Stage 3: per-chart solves, parallel with indexed output slots
    progress.report(2, 4, "solving chart parameterizations");
    let solved_count = AtomicUsize::new(0);
    let total = charts.len();
    let solves: Vec<Option<Result<ParameterizedChart<I>>>> = (0..charts.len())
        .into_par_iter()
        .map(|i| {
            if unresolved[i] {
                return None;
            }
            let outcome = param::parameterize_chart(charts[i].id, &surfaces[i], options);
            let done = solved_count.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report_sub(done, total, 2, 4, "solving chart parameterizations");
            Some(outcome)
        })
        .collect();

    let mut params: Vec<Option<ParameterizedChart<I>>> = Vec::with_capacity(charts.len());
    for solve in solves {
        match solve {
            Some(Ok(param)) => params.push(Some(param)),
            Some(Err(err)) => {
                failures.push(err);
                params.push(None);
            }
            None => params.push(None),
        }
    }

    // Stage 4: packing, after the parallel barrier
    progress.report(3, 4, "packing atlas");
    let inputs: Vec<pack::PackInput<'_>> = params
        .iter()
        .enumerate()
        .filter_map(|(i, param)| {
            param.as_ref().map(|p| pack::PackInput {
                chart: i,
                uvs: &p.uvs,
                area: parametric_area(&surfaces[i], &p.uvs),
            })
        })
        .collect();
    let atlas = pack::pack_charts(&inputs, options)?;
    let placement_of: HashMap<usize, PlacedChart> = atlas
        .placements
        .iter()
        .map(|p| (p.chart, *p))
        .collect();

    // Assemble the split output vertices and per-face corner indices
    let mut vertices: Vec<OutputVertex<I>> = Vec::new();
    let mut indices: Vec<[usize; 3]> = vec![[0; 3]; mesh.num_faces()];
    let mut chart_infos: Vec<ChartInfo<I>> = Vec::with_capacity(charts.len());

    for (i, chart) in charts.iter().enumerate() {
        let surface = &surfaces[i];
        let placement = placement_of.get(&i).copied();
        let base = vertices.len();

        for (local, &source) in surface.vertex_source.iter().enumerate() {
            let uv = match (&params[i], &placement) {
                (Some(param), Some(placed)) => placed.apply(param.uvs[local]),
                _ => Point2::origin(),
            };
            vertices.push(OutputVertex {
                uv,
                source,
                chart: chart.id,
            });
        }

        for (face, local) in chart.faces.iter().zip(surface.faces.iter()) {
            indices[face.index()] = [base + local[0], base + local[1], base + local[2]];
        }

        chart_infos.push(ChartInfo {
            id: chart.id,
            faces: chart.faces.clone(),
            distortion: params[i].as_ref().map(|p| p.distortion),
            solver: params[i].as_ref().map(|p| p.solver),
            placement,
        });
    }

    let seams = collect_seams(&surfaces);

    progress.report(4, 4, "unwrap finished");
    Ok(UnwrapResult {
        vertices,
        indices,
        chart_of_face: chart_of,
        charts: chart_infos,
        seams,
        utilization: atlas.utilization,
        resolution: atlas.resolution,
        failures,
    })
}

/// Total unsigned parametric area of a chart.
fn parametric_area<I: MeshIndex>(surface: &ChartSurface<I>, uvs: &[Point2<f64>]) -> f64 {
    surface
        .faces
        .iter()
        .map(|&[a, b, c]| {
            let p0 = uvs[a];
            let p1 = uvs[b];
            let p2 = uvs[c];
            0.5 * ((p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y)).abs()
        })
        .sum()
}

/// All seam edges as deduplicated mesh vertex pairs.
fn collect_seams<I: MeshIndex>(
    surfaces: &[ChartSurface<I>],
) -> Vec<(VertexId<I>, VertexId<I>)> {
    let mut seams: Vec<(VertexId<I>, VertexId<I>)> = Vec::new();
    for surface in surfaces {
        for (a, b) in surface.boundary_edges() {
            let va = surface.vertex_source[a];
            let vb = surface.vertex_source[b];
            let pair = if va.index() < vb.index() {
                (va, vb)
            } else {
                (vb, va)
            };
            seams.push(pair);
        }
    }
    seams.sort_by_key(|&(a, b)| (a.index(), b.index()));
    seams.dedup();
    seams
}
