//! Configuration for the unwrapping pipeline.

use crate::error::{Result, UnwrapError};

use super::progress::Progress;

/// Options controlling segmentation, parameterization, and packing.
///
/// All options have sensible defaults; use the `with_*` builders to override
/// individual values:
///
/// ```
/// use peel::unwrap::UnwrapOptions;
///
/// let options = UnwrapOptions::default()
///     .with_seam_angle_threshold(60.0)
///     .with_min_chart_faces(8);
/// ```
#[derive(Debug)]
pub struct UnwrapOptions {
    /// Maximum per-chart distortion proxy accepted during region growing.
    ///
    /// The proxy is the chart's normal dispersion, `1 - |Σ A·n| / Σ A`, which
    /// is 0 for a planar region and approaches 1 for a region covering a full
    /// sphere. Growing stops merging into a chart once the bound would be
    /// exceeded.
    pub max_chart_distortion: f64,

    /// Charts with fewer faces are merged into a neighboring chart when the
    /// distortion bound allows it.
    pub min_chart_faces: usize,

    /// Dihedral angle, in degrees, at or above which an edge is a hard seam
    /// that region growing never crosses.
    pub seam_angle_threshold: f64,

    /// Weight of the planarity term in the dual-graph edge cost, relative to
    /// the dihedral term.
    pub planarity_weight: f64,

    /// Padding around each chart footprint in the atlas, in atlas-relative
    /// units.
    pub atlas_padding: f64,

    /// Rotations, in degrees, the packer may apply to a chart on top of its
    /// oriented-bounding-box alignment.
    pub allowed_rotations: Vec<f64>,

    /// Texel density used to suggest a raster resolution for the atlas,
    /// in texels per mesh unit. Zero selects an automatic density that
    /// targets a 1024x1024 atlas.
    pub texels_per_unit: f64,

    /// Relative residual at which the per-chart linear solves are considered
    /// converged.
    pub solver_residual_tolerance: f64,

    /// Maximum iterations for the per-chart linear solves.
    pub solver_max_iterations: usize,

    /// Maximum seam-resolution cut iterations per chart before giving up
    /// with an unresolvable-topology failure.
    pub max_cut_iterations: usize,

    /// Maximum atlas growth attempts before packing fails.
    pub max_pack_attempts: usize,

    /// Progress callback invoked at stage transitions and per-chart
    /// completion.
    pub progress: Progress,
}

impl Default for UnwrapOptions {
    fn default() -> Self {
        Self {
            max_chart_distortion: 0.5,
            min_chart_faces: 4,
            seam_angle_threshold: 88.0,
            planarity_weight: 1.0,
            atlas_padding: 0.01,
            allowed_rotations: vec![0.0, 90.0, 180.0, 270.0],
            texels_per_unit: 0.0,
            solver_residual_tolerance: 1e-8,
            solver_max_iterations: 1000,
            max_cut_iterations: 8,
            max_pack_attempts: 8,
            progress: Progress::none(),
        }
    }
}

impl UnwrapOptions {
    /// Set the maximum per-chart distortion bound.
    pub fn with_max_chart_distortion(mut self, bound: f64) -> Self {
        self.max_chart_distortion = bound;
        self
    }

    /// Set the minimum chart face count.
    pub fn with_min_chart_faces(mut self, count: usize) -> Self {
        self.min_chart_faces = count;
        self
    }

    /// Set the hard seam dihedral threshold, in degrees.
    pub fn with_seam_angle_threshold(mut self, degrees: f64) -> Self {
        self.seam_angle_threshold = degrees;
        self
    }

    /// Set the planarity weight of the dual-graph edge cost.
    pub fn with_planarity_weight(mut self, weight: f64) -> Self {
        self.planarity_weight = weight;
        self
    }

    /// Set the atlas padding, in atlas-relative units.
    pub fn with_atlas_padding(mut self, padding: f64) -> Self {
        self.atlas_padding = padding;
        self
    }

    /// Set the rotations the packer may apply, in degrees.
    pub fn with_allowed_rotations(mut self, degrees: Vec<f64>) -> Self {
        self.allowed_rotations = degrees;
        self
    }

    /// Set the texel density used for the resolution hint.
    pub fn with_texels_per_unit(mut self, texels: f64) -> Self {
        self.texels_per_unit = texels;
        self
    }

    /// Set the solver convergence tolerance.
    pub fn with_solver_tolerance(mut self, tol: f64) -> Self {
        self.solver_residual_tolerance = tol;
        self
    }

    /// Set the maximum solver iterations.
    pub fn with_solver_max_iterations(mut self, max_iter: usize) -> Self {
        self.solver_max_iterations = max_iter;
        self
    }

    /// Set the maximum seam-resolution cut iterations.
    pub fn with_max_cut_iterations(mut self, max_iter: usize) -> Self {
        self.max_cut_iterations = max_iter;
        self
    }

    /// Set the maximum atlas growth attempts.
    pub fn with_max_pack_attempts(mut self, attempts: usize) -> Self {
        self.max_pack_attempts = attempts;
        self
    }

    /// Set the progress callback.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Validate the options, returning `InvalidParameter` for nonsense values.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_chart_distortion > 0.0 && self.max_chart_distortion <= 1.0) {
            return Err(UnwrapError::invalid_param(
                "max_chart_distortion",
                self.max_chart_distortion,
                "must be in (0, 1]",
            ));
        }
        if self.min_chart_faces == 0 {
            return Err(UnwrapError::invalid_param(
                "min_chart_faces",
                self.min_chart_faces,
                "must be at least 1",
            ));
        }
        if !(self.seam_angle_threshold > 0.0 && self.seam_angle_threshold <= 180.0) {
            return Err(UnwrapError::invalid_param(
                "seam_angle_threshold",
                self.seam_angle_threshold,
                "must be in (0, 180] degrees",
            ));
        }
        if !(self.planarity_weight >= 0.0 && self.planarity_weight.is_finite()) {
            return Err(UnwrapError::invalid_param(
                "planarity_weight",
                self.planarity_weight,
                "must be finite and non-negative",
            ));
        }
        if !(self.atlas_padding >= 0.0 && self.atlas_padding < 0.25) {
            return Err(UnwrapError::invalid_param(
                "atlas_padding",
                self.atlas_padding,
                "must be in [0, 0.25)",
            ));
        }
        if self.allowed_rotations.is_empty() {
            return Err(UnwrapError::invalid_param(
                "allowed_rotations",
                "[]",
                "must contain at least one angle",
            ));
        }
        if self.allowed_rotations.iter().any(|r| !r.is_finite()) {
            return Err(UnwrapError::invalid_param(
                "allowed_rotations",
                "non-finite",
                "angles must be finite",
            ));
        }
        if !(self.texels_per_unit >= 0.0 && self.texels_per_unit.is_finite()) {
            return Err(UnwrapError::invalid_param(
                "texels_per_unit",
                self.texels_per_unit,
                "must be finite and non-negative",
            ));
        }
        if !(self.solver_residual_tolerance > 0.0) {
            return Err(UnwrapError::invalid_param(
                "solver_residual_tolerance",
                self.solver_residual_tolerance,
                "must be positive",
            ));
        }
        if self.solver_max_iterations == 0 {
            return Err(UnwrapError::invalid_param(
                "solver_max_iterations",
                self.solver_max_iterations,
                "must be at least 1",
            ));
        }
        if self.max_cut_iterations == 0 {
            return Err(UnwrapError::invalid_param(
                "max_cut_iterations",
                self.max_cut_iterations,
                "must be at least 1",
            ));
        }
        if self.max_pack_attempts == 0 {
            return Err(UnwrapError::invalid_param(
                "max_pack_attempts",
                self.max_pack_attempts,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        assert!(UnwrapOptions::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let options = UnwrapOptions::default()
            .with_seam_angle_threshold(45.0)
            .with_min_chart_faces(10)
            .with_atlas_padding(0.02)
            .with_solver_max_iterations(500);

        assert_eq!(options.seam_angle_threshold, 45.0);
        assert_eq!(options.min_chart_faces, 10);
        assert_eq!(options.atlas_padding, 0.02);
        assert_eq!(options.solver_max_iterations, 500);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_distortion_rejected() {
        let options = UnwrapOptions::default().with_max_chart_distortion(0.0);
        assert!(matches!(
            options.validate(),
            Err(UnwrapError::InvalidParameter {
                name: "max_chart_distortion",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_rotations_rejected() {
        let options = UnwrapOptions::default().with_allowed_rotations(Vec::new());
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_negative_padding_rejected() {
        let options = UnwrapOptions::default().with_atlas_padding(-0.01);
        assert!(options.validate().is_err());
    }
}
