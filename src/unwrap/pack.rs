//! Atlas packing: placing chart footprints into the unit UV square.
//!
//! Each chart's 2D footprint is reduced to its minimal-area oriented bounding
//! rectangle (convex hull + rotating calipers), optionally rotated by one of
//! the configured angles, and placed with a skyline bottom-left heuristic:
//! among all skyline positions and rotations, the one yielding the lowest top
//! edge wins (ties toward the left edge, then the lower rotation index).
//!
//! Packing runs at mesh-world scale inside a square working extent. When a
//! chart does not fit, the extent doubles and packing restarts from scratch;
//! packing is deterministic for a fixed input order and extent, so growth is
//! the only source of iteration. The realized occupied extent finally
//! rescales every placement into [0,1]x[0,1].

use nalgebra::{Point2, Vector2};

use crate::error::{Result, UnwrapError};

use super::options::UnwrapOptions;

/// One chart's footprint handed to the packer.
#[derive(Debug, Clone)]
pub(crate) struct PackInput<'a> {
    /// Chart index (into the pipeline's chart list).
    pub chart: usize,
    /// Chart-local UV coordinates.
    pub uvs: &'a [Point2<f64>],
    /// Total parametric area, for the utilization metric.
    pub area: f64,
}

/// A chart's placement in the atlas.
///
/// Applies as `p_atlas = (R(rotation) * p + offset) * scale`; the result lies
/// in [0,1]x[0,1].
#[derive(Debug, Clone, Copy)]
pub struct PlacedChart {
    /// Chart index.
    pub chart: usize,
    /// Rotation applied to chart-local coordinates, in radians.
    pub rotation: f64,
    /// Translation applied after rotation, in working-extent units.
    pub offset: Vector2<f64>,
    /// Final uniform scale into the unit square.
    pub scale: f64,
}

impl PlacedChart {
    /// Map a chart-local UV coordinate into the atlas.
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let (sin, cos) = self.rotation.sin_cos();
        let x = cos * p.x - sin * p.y;
        let y = sin * p.x + cos * p.y;
        Point2::new((x + self.offset.x) * self.scale, (y + self.offset.y) * self.scale)
    }
}

/// The packed atlas.
#[derive(Debug, Clone)]
pub(crate) struct PackedAtlas {
    /// One placement per pack input, in input order.
    pub placements: Vec<PlacedChart>,
    /// Fraction of the atlas covered by chart area, in (0, 1].
    pub utilization: f64,
    /// Realized square extent in mesh-world units before normalization.
    pub extent: f64,
    /// Suggested raster resolution (width, height).
    pub resolution: (u32, u32),
}

/// Pack all chart footprints into the unit square.
pub(crate) fn pack_charts(
    inputs: &[PackInput<'_>],
    options: &UnwrapOptions,
) -> Result<PackedAtlas> {
    if inputs.is_empty() {
        return Ok(PackedAtlas {
            placements: Vec::new(),
            utilization: 0.0,
            extent: 0.0,
            resolution: resolution_hint(1.0, options),
        });
    }

    // Canonical footprint per chart: hull, minimal-area OBB, and the bounding
    // dimensions for every allowed rotation on top of the OBB alignment.
    let footprints: Vec<Footprint> = inputs
        .iter()
        .map(|input| Footprint::new(input.uvs, &options.allowed_rotations))
        .collect();

    // Largest footprint first; ties by chart index for reproducibility.
    let mut order: Vec<usize> = (0..inputs.len()).collect();
    order.sort_by(|&a, &b| {
        footprints[b]
            .obb_area
            .partial_cmp(&footprints[a].obb_area)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| inputs[a].chart.cmp(&inputs[b].chart))
    });

    // Working extent: start near the total footprint area, never below the
    // largest single footprint's best side.
    let total_area: f64 = footprints.iter().map(|f| f.obb_area).sum();
    let mut extent = (total_area.sqrt() * 1.1).max(1e-6);
    for f in &footprints {
        let best_side = f
            .rotated
            .iter()
            .map(|r| r.width.max(r.height))
            .fold(f64::INFINITY, f64::min);
        extent = extent.max(best_side * (1.0 + 2.0 * options.atlas_padding) * 1.001);
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_pack(&footprints, &order, extent, options) {
            Ok(raw) => {
                return Ok(finalize(inputs, raw, options));
            }
            Err(unplaced) => {
                if attempt >= options.max_pack_attempts {
                    return Err(UnwrapError::PackingOverflow {
                        chart: inputs[unplaced].chart,
                        extent,
                    });
                }
                extent *= 2.0;
            }
        }
    }
}

/// A raw placement before normalization.
#[derive(Debug, Clone, Copy)]
struct RawPlacement {
    rotation: f64,
    offset: Vector2<f64>,
    /// Top-right corner of the padded rectangle, for the realized extent.
    corner: Vector2<f64>,
}

/// One deterministic packing pass at a fixed extent. On failure returns the
/// index of the first chart that did not fit.
fn try_pack(
    footprints: &[Footprint],
    order: &[usize],
    extent: f64,
    options: &UnwrapOptions,
) -> std::result::Result<Vec<RawPlacement>, usize> {
    let pad = options.atlas_padding * extent;
    let mut skyline = Skyline::new(extent);
    let mut placements: Vec<Option<RawPlacement>> = vec![None; footprints.len()];

    for &idx in order {
        let footprint = &footprints[idx];

        // Best (top, x, rotation) across all rotations and skyline slots.
        let mut best: Option<(f64, f64, usize)> = None;
        for (ri, rotated) in footprint.rotated.iter().enumerate() {
            let w = rotated.width + 2.0 * pad;
            let h = rotated.height + 2.0 * pad;
            if let Some((x, y)) = skyline.find(w, h) {
                let candidate = (y + h, x, ri);
                let better = match best {
                    None => true,
                    Some(b) => candidate < b,
                };
                if better {
                    best = Some(candidate);
                }
            }
        }

        let Some((top, x, ri)) = best else {
            return Err(idx);
        };

        let rotated = &footprint.rotated[ri];
        let w = rotated.width + 2.0 * pad;
        let h = rotated.height + 2.0 * pad;
        let y = top - h;
        skyline.place(x, w, top);

        placements[idx] = Some(RawPlacement {
            rotation: rotated.angle,
            // Content origin sits inside the padding; min is the rotated
            // footprint's lower-left in rotated coordinates.
            offset: Vector2::new(x + pad - rotated.min.x, y + pad - rotated.min.y),
            corner: Vector2::new(x + w, y + h),
        });
    }

    Ok(placements.into_iter().map(|p| p.unwrap()).collect())
}

/// Rescale raw placements so the occupied extent fills [0,1]x[0,1].
fn finalize(
    inputs: &[PackInput<'_>],
    raw: Vec<RawPlacement>,
    options: &UnwrapOptions,
) -> PackedAtlas {
    let mut realized: f64 = 0.0;
    for p in &raw {
        realized = realized.max(p.corner.x).max(p.corner.y);
    }
    if realized <= 0.0 {
        realized = 1.0;
    }
    let scale = 1.0 / realized;

    let placements: Vec<PlacedChart> = inputs
        .iter()
        .zip(raw.iter())
        .map(|(input, p)| PlacedChart {
            chart: input.chart,
            rotation: p.rotation,
            offset: p.offset,
            scale,
        })
        .collect();

    let chart_area: f64 = inputs.iter().map(|i| i.area).sum();
    let utilization = (chart_area / (realized * realized)).clamp(0.0, 1.0);

    PackedAtlas {
        placements,
        utilization,
        extent: realized,
        resolution: resolution_hint(realized, options),
    }
}

/// Suggested raster size for the atlas, aligned to 4-texel blocks.
///
/// With no configured density the hint targets a 1024x1024 atlas.
fn resolution_hint(extent: f64, options: &UnwrapOptions) -> (u32, u32) {
    let side = if options.texels_per_unit > 0.0 {
        (options.texels_per_unit * extent).ceil().max(4.0)
    } else {
        1024.0
    };
    let side = ((side / 4.0).ceil() * 4.0).min(u32::MAX as f64) as u32;
    (side, side)
}

/// A chart footprint in canonical orientation plus its per-rotation bounds.
#[derive(Debug, Clone)]
struct Footprint {
    /// Area of the minimal oriented bounding rectangle.
    obb_area: f64,
    /// Bounding data per allowed rotation.
    rotated: Vec<RotatedBounds>,
}

/// Axis-aligned bounds of the footprint under one candidate rotation.
#[derive(Debug, Clone, Copy)]
struct RotatedBounds {
    /// Total rotation (OBB alignment plus the configured angle), radians.
    angle: f64,
    min: Vector2<f64>,
    width: f64,
    height: f64,
}

impl Footprint {
    fn new(uvs: &[Point2<f64>], allowed_rotations: &[f64]) -> Self {
        let hull = convex_hull(uvs);
        let obb = min_area_obb(&hull);

        let rotated = allowed_rotations
            .iter()
            .map(|deg| {
                let angle = obb.angle + deg.to_radians();
                let (min, max) = rotated_bounds(uvs, angle);
                RotatedBounds {
                    angle,
                    min,
                    width: (max.x - min.x).max(0.0),
                    height: (max.y - min.y).max(0.0),
                }
            })
            .collect();

        Self {
            obb_area: obb.area,
            rotated,
        }
    }
}

fn rotated_bounds(uvs: &[Point2<f64>], angle: f64) -> (Vector2<f64>, Vector2<f64>) {
    let (sin, cos) = angle.sin_cos();
    let mut min = Vector2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Vector2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in uvs {
        let x = cos * p.x - sin * p.y;
        let y = sin * p.x + cos * p.y;
        min.x = min.x.min(x);
        min.y = min.y.min(y);
        max.x = max.x.max(x);
        max.y = max.y.max(y);
    }
    if uvs.is_empty() {
        return (Vector2::zeros(), Vector2::zeros());
    }
    (min, max)
}

/// Result of the rotating-calipers sweep.
#[derive(Debug, Clone, Copy)]
struct Obb {
    /// Rotation that aligns the minimal rectangle with the axes.
    angle: f64,
    area: f64,
}

/// Convex hull by Andrew's monotone chain, counter-clockwise.
fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup_by(|a, b| a == b);

    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };

    let mut lower: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point2<f64>> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }

    // Endpoints of each chain duplicate the other chain's start
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Minimal-area oriented bounding rectangle over the hull edges.
///
/// For every hull edge the hull is projected into the edge-aligned frame; one
/// of these frames realizes the minimal-area rectangle.
fn min_area_obb(hull: &[Point2<f64>]) -> Obb {
    if hull.len() < 2 {
        return Obb { angle: 0.0, area: 0.0 };
    }

    let mut best = Obb {
        angle: 0.0,
        area: f64::INFINITY,
    };
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let edge = Vector2::new(b.x - a.x, b.y - a.y);
        let len = edge.norm();
        if len < 1e-12 {
            continue;
        }
        // Rotation aligning this edge with the x axis
        let angle = -edge.y.atan2(edge.x);
        let (min, max) = rotated_bounds(hull, angle);
        let area = (max.x - min.x) * (max.y - min.y);
        if area < best.area {
            best = Obb { angle, area };
        }
    }

    if best.area.is_infinite() {
        // Degenerate hull (all points coincident)
        return Obb { angle: 0.0, area: 0.0 };
    }
    best
}

/// Skyline packing structure over a square extent.
struct Skyline {
    extent: f64,
    /// Contiguous nodes covering [0, extent), sorted by x.
    nodes: Vec<SkylineNode>,
}

#[derive(Debug, Clone, Copy)]
struct SkylineNode {
    x: f64,
    y: f64,
    width: f64,
}

impl Skyline {
    fn new(extent: f64) -> Self {
        Self {
            extent,
            nodes: vec![SkylineNode {
                x: 0.0,
                y: 0.0,
                width: extent,
            }],
        }
    }

    /// Find the lowest-top position for a w x h rectangle; ties toward the
    /// left. Returns the rectangle's lower-left corner.
    fn find(&self, w: f64, h: f64) -> Option<(f64, f64)> {
        let mut best: Option<(f64, f64)> = None; // (top, x)
        for i in 0..self.nodes.len() {
            let x = self.nodes[i].x;
            if x + w > self.extent + 1e-9 {
                break;
            }
            let Some(y) = self.support_height(i, w) else {
                continue;
            };
            if y + h > self.extent + 1e-9 {
                continue;
            }
            let candidate = (y + h, x);
            let better = match best {
                None => true,
                Some(b) => candidate < b,
            };
            if better {
                best = Some(candidate);
            }
        }
        best.map(|(top, x)| (x, top - h))
    }

    /// Height the rectangle rests on when left-aligned at node `i`.
    fn support_height(&self, i: usize, w: f64) -> Option<f64> {
        let x0 = self.nodes[i].x;
        let x1 = x0 + w;
        let mut y = self.nodes[i].y;
        let mut j = i;
        loop {
            let node = &self.nodes[j];
            if node.x >= x1 - 1e-12 {
                break;
            }
            y = y.max(node.y);
            j += 1;
            if j >= self.nodes.len() {
                break;
            }
        }
        if x1 > self.extent + 1e-9 {
            None
        } else {
            Some(y)
        }
    }

    /// Raise the skyline over [x, x+w) to `top`.
    fn place(&mut self, x: f64, w: f64, top: f64) {
        let x1 = x + w;
        let mut rebuilt: Vec<SkylineNode> = Vec::with_capacity(self.nodes.len() + 2);
        let mut inserted = false;

        for node in &self.nodes {
            let nx0 = node.x;
            let nx1 = node.x + node.width;

            // Part left of the placement
            if nx0 < x - 1e-12 {
                rebuilt.push(SkylineNode {
                    x: nx0,
                    y: node.y,
                    width: (nx1.min(x) - nx0).max(0.0),
                });
            }

            if !inserted && nx1 > x - 1e-12 {
                rebuilt.push(SkylineNode { x, y: top, width: w });
                inserted = true;
            }

            // Part right of the placement
            if nx1 > x1 + 1e-12 {
                let start = nx0.max(x1);
                rebuilt.push(SkylineNode {
                    x: start,
                    y: node.y,
                    width: nx1 - start,
                });
            }
        }
        if !inserted {
            rebuilt.push(SkylineNode { x, y: top, width: w });
        }

        // Merge adjacent nodes of equal height
        let mut merged: Vec<SkylineNode> = Vec::with_capacity(rebuilt.len());
        for node in rebuilt {
            if node.width <= 1e-12 {
                continue;
            }
            match merged.last_mut() {
                Some(last) if (last.y - node.y).abs() < 1e-12 => {
                    last.width = node.x + node.width - last.x;
                }
                _ => merged.push(node),
            }
        }
        self.nodes = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_uvs(side: f64) -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(side, 0.0),
            Point2::new(side, side),
            Point2::new(0.0, side),
        ]
    }

    fn options_no_padding() -> UnwrapOptions {
        UnwrapOptions::default().with_atlas_padding(0.0)
    }

    #[test]
    fn test_convex_hull_square() {
        let hull = convex_hull(&square_uvs(1.0));
        assert_eq!(hull.len(), 4);
    }

    #[test]
    fn test_convex_hull_with_interior_point() {
        let mut pts = square_uvs(1.0);
        pts.push(Point2::new(0.5, 0.5));
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!(!hull.contains(&Point2::new(0.5, 0.5)));
    }

    #[test]
    fn test_obb_recovers_rotated_rectangle() {
        // A 2x1 rectangle rotated 30 degrees: the minimal OBB area must be 2.
        let angle = 30.0f64.to_radians();
        let (sin, cos) = angle.sin_cos();
        let rect = [(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0)];
        let pts: Vec<Point2<f64>> = rect
            .iter()
            .map(|&(x, y)| Point2::new(cos * x - sin * y, sin * x + cos * y))
            .collect();

        let obb = min_area_obb(&convex_hull(&pts));
        assert!((obb.area - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_chart_fills_unit_square() {
        let uvs = square_uvs(2.0);
        let inputs = vec![PackInput {
            chart: 0,
            uvs: &uvs,
            area: 4.0,
        }];

        let atlas = pack_charts(&inputs, &options_no_padding()).unwrap();
        assert_eq!(atlas.placements.len(), 1);

        for p in &uvs {
            let q = atlas.placements[0].apply(*p);
            assert!(q.x >= -1e-9 && q.x <= 1.0 + 1e-9);
            assert!(q.y >= -1e-9 && q.y <= 1.0 + 1e-9);
        }
        assert!(atlas.utilization > 0.9);
    }

    #[test]
    fn test_two_charts_no_overlap() {
        let a = square_uvs(1.0);
        let b = square_uvs(1.0);
        let inputs = vec![
            PackInput {
                chart: 0,
                uvs: &a,
                area: 1.0,
            },
            PackInput {
                chart: 1,
                uvs: &b,
                area: 1.0,
            },
        ];

        let atlas = pack_charts(&inputs, &options_no_padding()).unwrap();

        // Transform both unit squares and check the interiors do not overlap:
        // sample the two placed centers and corners.
        let rect = |placement: &PlacedChart| {
            let corners: Vec<Point2<f64>> = square_uvs(1.0)
                .iter()
                .map(|p| placement.apply(*p))
                .collect();
            let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
            let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
            let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
            let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
            (min_x, max_x, min_y, max_y)
        };

        let (a0, a1, a2, a3) = rect(&atlas.placements[0]);
        let (b0, b1, b2, b3) = rect(&atlas.placements[1]);

        let x_overlap = (a1.min(b1) - a0.max(b0)).max(0.0);
        let y_overlap = (a3.min(b3) - a2.max(b2)).max(0.0);
        assert!(x_overlap * y_overlap < 1e-9, "footprints must not overlap");
    }

    #[test]
    fn test_many_charts_all_inside_unit_square() {
        let uvs: Vec<Vec<Point2<f64>>> = (0..9).map(|_| square_uvs(1.0)).collect();
        let inputs: Vec<PackInput> = uvs
            .iter()
            .enumerate()
            .map(|(i, u)| PackInput {
                chart: i,
                uvs: u,
                area: 1.0,
            })
            .collect();

        let options = UnwrapOptions::default().with_atlas_padding(0.01);
        let atlas = pack_charts(&inputs, &options).unwrap();

        for (input, placement) in inputs.iter().zip(atlas.placements.iter()) {
            for p in input.uvs {
                let q = placement.apply(*p);
                assert!(q.x >= -1e-9 && q.x <= 1.0 + 1e-9);
                assert!(q.y >= -1e-9 && q.y <= 1.0 + 1e-9);
            }
        }
        assert!(atlas.utilization > 0.5);
    }

    #[test]
    fn test_packing_deterministic() {
        let uvs: Vec<Vec<Point2<f64>>> = (0..5)
            .map(|i| square_uvs(1.0 + i as f64 * 0.3))
            .collect();
        let inputs: Vec<PackInput> = uvs
            .iter()
            .enumerate()
            .map(|(i, u)| PackInput {
                chart: i,
                uvs: u,
                area: (1.0 + i as f64 * 0.3) * (1.0 + i as f64 * 0.3),
            })
            .collect();

        let run = || {
            let atlas = pack_charts(&inputs, &options_no_padding()).unwrap();
            atlas
                .placements
                .iter()
                .map(|p| (p.rotation, p.offset.x, p.offset.y, p.scale))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_resolution_hint_default_and_density() {
        let uvs = square_uvs(2.0);
        let inputs = vec![PackInput {
            chart: 0,
            uvs: &uvs,
            area: 4.0,
        }];

        let atlas = pack_charts(&inputs, &options_no_padding()).unwrap();
        assert_eq!(atlas.resolution, (1024, 1024));

        let options = options_no_padding().with_texels_per_unit(100.0);
        let atlas = pack_charts(&inputs, &options).unwrap();
        // Extent is about 2 world units; 100 texels each, aligned to 4.
        assert!(atlas.resolution.0 >= 200 && atlas.resolution.0 % 4 == 0);
    }

    #[test]
    fn test_empty_input() {
        let atlas = pack_charts(&[], &UnwrapOptions::default()).unwrap();
        assert!(atlas.placements.is_empty());
        assert_eq!(atlas.utilization, 0.0);
    }

    #[test]
    fn test_skyline_basics() {
        let mut skyline = Skyline::new(10.0);
        let (x, y) = skyline.find(4.0, 2.0).unwrap();
        assert_eq!((x, y), (0.0, 0.0));
        skyline.place(x, 4.0, 2.0);

        // Next block lands beside the first, not on top
        let (x, y) = skyline.find(4.0, 2.0).unwrap();
        assert_eq!((x, y), (4.0, 0.0));
        skyline.place(x, 4.0, 2.0);

        // Too wide for the remaining gap at ground level: stacks on top
        let (x, y) = skyline.find(6.0, 2.0).unwrap();
        assert_eq!((x, y), (0.0, 2.0));
    }

    #[test]
    fn test_skyline_rejects_oversize() {
        let skyline = Skyline::new(10.0);
        assert!(skyline.find(11.0, 1.0).is_none());
        assert!(skyline.find(1.0, 11.0).is_none());
    }
}
