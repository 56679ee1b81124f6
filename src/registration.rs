//! Contract with the external imaging registration engine.
//!
//! The engine owns every numerical kernel (resampling, similarity metric,
//! optimiser). This crate only configures it and sequences the calls.

use crate::volume::Volume;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The series can't be registered (e.g. zero usable slices); skip it
    #[error("No usable data: {0}")]
    NoUsableData(String),

    #[error("Registration engine failure: {0}")]
    Engine(String),
}

impl RegistrationError {
    pub fn is_skippable(&self) -> bool {
        matches!(self, RegistrationError::NoUsableData(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolator {
    NearestNeighbor,
    #[default]
    Linear,
}

/// One level of a multi-resolution schedule
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct ResolutionLevel {
    pub shrink_factor: u32,
    pub smoothing_sigma: f64,
}

/// Mutual information driven rigid registration parameters
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub histogram_bins: u32,
    /// Fraction of voxels randomly sampled by the metric
    pub sampling_percentage: f64,
    pub learning_rate: f64,
    pub iterations: u32,
    pub convergence_tolerance: f64,
    pub interpolator: Interpolator,
    /// Value of voxels mapped outside the moving volume
    pub default_value: f32,
    /// Coarse to fine; empty means single resolution
    pub schedule: Vec<ResolutionLevel>,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            histogram_bins: 50,
            sampling_percentage: 0.01,
            learning_rate: 1.0,
            iterations: 60,
            convergence_tolerance: 1e-6,
            interpolator: Interpolator::Linear,
            default_value: 0.0,
            schedule: Vec::new(),
        }
    }
}

pub trait RegistrationEngine {
    /// Opaque spatial transform produced by the engine
    type Transform;

    /// Resample `moving` onto the grid of `fixed`, through `transform` if any
    fn resample(
        &self,
        moving: &Volume,
        fixed: &Volume,
        transform: Option<&Self::Transform>,
        interpolator: Interpolator,
        default_value: f32,
    ) -> Result<Volume, RegistrationError>;

    /// Rigid transform aligning the geometric centres of both volumes
    fn initial_transform(
        &self,
        fixed: &Volume,
        moving: &Volume,
    ) -> Result<Self::Transform, RegistrationError>;

    /// Iterative intensity based optimisation seeded with `initial`
    fn optimize(
        &self,
        fixed: &Volume,
        moving: &Volume,
        initial: &Self::Transform,
        settings: &RegistrationSettings,
    ) -> Result<Self::Transform, RegistrationError>;

    /// Register `moving` onto `fixed` and return it resampled on the fixed
    /// grid: grid resampling, centred initial transform, optimisation, then
    /// a final linear resampling.
    fn coregister(
        &self,
        fixed: &Volume,
        moving: &Volume,
        settings: &RegistrationSettings,
    ) -> Result<Volume, RegistrationError> {
        for (role, volume) in [("fixed", fixed), ("moving", moving)] {
            if volume.data.is_empty() {
                return Err(RegistrationError::NoUsableData(format!(
                    "{role} {} volume has no voxels",
                    volume.modality
                )));
            }
        }

        let resampled = self.resample(
            moving,
            fixed,
            None,
            settings.interpolator,
            settings.default_value,
        )?;

        let initial = self.initial_transform(fixed, &resampled)?;
        let resampled = self.resample(
            &resampled,
            fixed,
            Some(&initial),
            Interpolator::Linear,
            settings.default_value,
        )?;

        let transform = self.optimize(fixed, &resampled, &initial, settings)?;
        log::debug!(
            "Optimised {} onto {} ({} iterations max)",
            moving.modality,
            fixed.modality,
            settings.iterations
        );

        self.resample(
            &resampled,
            fixed,
            Some(&transform),
            Interpolator::Linear,
            settings.default_value,
        )
    }
}
