//! Per-patient batch driver.
//!
//! Every patient is independent: it reads its own subtree of `root_dir` and
//! writes to its own subdirectory of `output_dir`. A patient that fails is
//! logged and reported, never aborting the batch.

use crate::enums::{BatchMode, OutputFormat, SortBy};
use crate::export::{self, ExportError};
use crate::mask::{MASK_MODALITY, generate_mask};
use crate::registration::{
    Interpolator, RegistrationEngine, RegistrationError, RegistrationSettings,
};
use crate::scanner::{self, LeafReport, MODALITY_RTSTRUCT, ScanError};
use crate::selector::{SelectError, SelectionPolicy, SelectionResult, select_report};
use crate::structure_set::{BoundingBox, StructureSetError, StructureSetReader, load_rois};
use crate::volume::Volume;
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

use rayon::prelude::*;
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failure confined to one patient
#[derive(Debug, Error)]
enum PatientError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("Loading {path}: {source}")]
    Load {
        path: PathBuf,
        source: VolumeLoaderError,
    },

    #[error(transparent)]
    StructureSet(#[from] StructureSetError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Export(#[from] ExportError),

    /// Two exports of one patient rendered the same file name
    #[error("{} would overwrite an earlier output", .0.display())]
    DuplicateOutput(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// One subdirectory per patient
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(flatten)]
    pub policy: SelectionPolicy,
    /// Output file stem; `{patient}`, `{modality}` and `{series}` are
    /// expanded. Defaults to [`BatchMode::default_template`].
    #[serde(default)]
    pub file_template: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub mode: BatchMode,
    /// Crop exported volumes to the ROI box padded by this many mm
    #[serde(default)]
    pub roi_margin_mm: Option<f64>,
    #[serde(default)]
    pub parallel: bool,
    /// Also write the middle axial slice of every volume as PNG
    #[serde(default)]
    pub preview: bool,
    #[serde(default)]
    pub registration: RegistrationSettings,
}

impl BatchConfig {
    pub fn new(root_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            output_dir: output_dir.into(),
            policy: SelectionPolicy::default(),
            file_template: None,
            format: OutputFormat::default(),
            mode: BatchMode::default(),
            roi_margin_mm: None,
            parallel: false,
            preview: false,
            registration: RegistrationSettings::default(),
        }
    }

    pub fn file_template(&self) -> &str {
        self.file_template
            .as_deref()
            .unwrap_or(self.mode.default_template())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BatchError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientStatus {
    Completed,
    /// Nothing usable for this patient
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientOutcome {
    pub patient: String,
    /// Only set in [`BatchMode::PetCt`]
    pub selection: Option<SelectionResult>,
    pub outputs: Vec<PathBuf>,
    pub status: PatientStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<PatientOutcome>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == PatientStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, PatientStatus::Failed(_)))
            .count()
    }
}

/// Stand-in engine type for runs without registration; it has no values.
enum Unregistered {}

impl RegistrationEngine for Unregistered {
    type Transform = ();

    fn resample(
        &self,
        _: &Volume,
        _: &Volume,
        _: Option<&()>,
        _: Interpolator,
        _: f32,
    ) -> Result<Volume, RegistrationError> {
        match *self {}
    }

    fn initial_transform(&self, _: &Volume, _: &Volume) -> Result<(), RegistrationError> {
        match *self {}
    }

    fn optimize(
        &self,
        _: &Volume,
        _: &Volume,
        _: &(),
        _: &RegistrationSettings,
    ) -> Result<(), RegistrationError> {
        match *self {}
    }
}

/// Select, convert and export every patient without registering anything
pub fn survey(config: &BatchConfig) -> Result<BatchReport, BatchError> {
    run(config, None::<&Unregistered>)
}

/// Select, register the moving series onto the fixed one and export
pub fn run_batch<E>(config: &BatchConfig, engine: &E) -> Result<BatchReport, BatchError>
where
    E: RegistrationEngine + Sync,
{
    run(config, Some(engine))
}

fn run<E>(config: &BatchConfig, engine: Option<&E>) -> Result<BatchReport, BatchError>
where
    E: RegistrationEngine + Sync,
{
    if !config.root_dir.is_dir() {
        return Err(ScanError::NotFound(config.root_dir.clone()).into());
    }
    let patients = scanner::subdirectories(&config.root_dir)?;
    log::info!(
        "Processing {} patients from {}",
        patients.len(),
        config.root_dir.display()
    );

    let outcomes = if config.parallel {
        patients
            .par_iter()
            .map(|dir| process_patient(config, dir, engine))
            .collect()
    } else {
        patients
            .iter()
            .map(|dir| process_patient(config, dir, engine))
            .collect()
    };

    let report = BatchReport { outcomes };
    log::info!(
        "Done: {} completed, {} failed, {} total",
        report.completed(),
        report.failed(),
        report.outcomes.len()
    );
    Ok(report)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn process_patient<E: RegistrationEngine>(
    config: &BatchConfig,
    dir: &Path,
    engine: Option<&E>,
) -> PatientOutcome {
    let patient = file_name(dir);
    log::info!("Patient {patient}");

    let mut job = PatientJob {
        config,
        patient: &patient,
        output_dir: config.output_dir.join(&patient),
        outputs: Vec::new(),
    };

    let (selection, result) = match config.mode {
        BatchMode::PetCt => {
            let mut selection = None;
            let result = job.pet_ct(dir, engine, &mut selection);
            (selection, result)
        }
        BatchMode::AllSeries => (None, job.all_series(dir, engine)),
    };

    let status = match result {
        Ok(status) => status,
        Err(err) => {
            log::error!("{patient}: {err}");
            PatientStatus::Failed(err.to_string())
        }
    };

    let PatientJob { outputs, .. } = job;
    PatientOutcome {
        patient,
        selection,
        outputs,
        status,
    }
}

struct PatientJob<'a> {
    config: &'a BatchConfig,
    patient: &'a str,
    output_dir: PathBuf,
    outputs: Vec<PathBuf>,
}

impl PatientJob<'_> {
    fn pet_ct<E: RegistrationEngine>(
        &mut self,
        dir: &Path,
        engine: Option<&E>,
        selection_out: &mut Option<SelectionResult>,
    ) -> Result<PatientStatus, PatientError> {
        let report = scanner::scan(dir)?.flatten();
        let selection = select_report(&report, &self.config.policy, &StructureSetReader)?;
        for warning in &selection.warnings {
            log::warn!("{}: {warning}", self.patient);
        }
        *selection_out = Some(selection.clone());

        let (Some(ct_dir), Some(pt_dir)) = (&selection.ct_dir, &selection.pt_dir) else {
            return Ok(PatientStatus::Skipped("no CT/PT pair".to_string()));
        };

        let ct = load(ct_dir)?;
        let mut pt = load(pt_dir)?;

        let rois = match &selection.rt_dir {
            Some(rt_dir) => load_rois(rt_dir, Some(&self.config.policy.roi_name))?,
            None => Vec::new(),
        };
        // named after the structure set so it never shares a stem with the CT
        let mask = match &selection.rt_dir {
            Some(rt_dir) if !rois.is_empty() => {
                Some((generate_mask(&ct, &rois), file_name(rt_dir)))
            }
            _ => None,
        };
        let bbox = rois
            .iter()
            .fold(BoundingBox::default(), |acc, roi| acc.union(&roi.bounding_box));

        if let Some(engine) = engine {
            match engine.coregister(&ct, &pt, &self.config.registration) {
                Ok(registered) => pt = registered,
                Err(err) if err.is_skippable() => {
                    log::warn!("{}: PT skipped, {err}", self.patient);
                    self.export(&ct, &file_name(ct_dir), &bbox)?;
                    if let Some((mask, rt_name)) = &mask {
                        self.export(mask, rt_name, &bbox)?;
                    }
                    return Ok(PatientStatus::Skipped(err.to_string()));
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.export(&ct, &file_name(ct_dir), &bbox)?;
        self.export(&pt, &file_name(pt_dir), &bbox)?;
        if let Some((mask, rt_name)) = &mask {
            self.export(mask, rt_name, &bbox)?;
        }

        Ok(PatientStatus::Completed)
    }

    /// Largest image series is fixed, every other one is moving
    fn all_series<E: RegistrationEngine>(
        &mut self,
        dir: &Path,
        engine: Option<&E>,
    ) -> Result<PatientStatus, PatientError> {
        let tree = scanner::scan(dir)?;
        let series: Vec<&LeafReport> = tree
            .leaves()
            .into_iter()
            .filter(|leaf| {
                leaf.file_count > 0
                    && !leaf.modality.is_empty()
                    && !leaf.has_modality(MODALITY_RTSTRUCT)
            })
            .collect();

        let Some(fixed_index) = fixed_series(&series) else {
            return Ok(PatientStatus::Skipped("no image series".to_string()));
        };
        let fixed_leaf = series[fixed_index];
        let fixed = load(&fixed_leaf.path)?;
        let no_box = BoundingBox::default();
        self.export(&fixed, &file_name(&fixed_leaf.path), &no_box)?;

        for (index, leaf) in series.iter().enumerate() {
            if index == fixed_index {
                continue;
            }
            let name = file_name(&leaf.path);
            // one broken series must not stop the others
            let moving = match load(&leaf.path) {
                Ok(moving) => moving,
                Err(err) => {
                    log::error!("{}: {err}", self.patient);
                    continue;
                }
            };
            let output = match engine {
                Some(engine) => match engine.coregister(&fixed, &moving, &self.config.registration)
                {
                    Ok(registered) => registered,
                    Err(err) if err.is_skippable() => {
                        log::warn!("{}: series {name} skipped, {err}", self.patient);
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                },
                None => moving,
            };
            self.export(&output, &name, &no_box)?;
        }

        Ok(PatientStatus::Completed)
    }

    fn export(
        &mut self,
        volume: &Volume,
        series: &str,
        bbox: &BoundingBox,
    ) -> Result<(), PatientError> {
        let cropped = match self.config.roi_margin_mm {
            Some(margin) if !bbox.is_empty() => volume.crop_to_box(bbox, margin),
            _ => None,
        };
        let volume = cropped.as_ref().unwrap_or(volume);

        let stem = export::render_template(
            self.config.file_template(),
            &[
                ("patient", self.patient),
                ("modality", volume.modality.as_str()),
                ("series", series),
            ],
        )?;
        let format = self.config.format;
        self.claim(format!("{stem}.{}", format.extension()))?;
        let path = export::write_volume(volume, &self.output_dir, &stem, format)?;
        self.outputs.push(path);

        if self.config.preview && volume.modality != MASK_MODALITY {
            let preview_stem = format!("{stem}_preview");
            self.claim(format!("{preview_stem}.png"))?;
            let preview = export::write_preview(volume, &self.output_dir, &preview_stem)?;
            self.outputs.push(preview);
        }
        Ok(())
    }

    /// Refuse a file name already written for this patient
    fn claim(&self, file_name: String) -> Result<(), PatientError> {
        let path = self.output_dir.join(file_name);
        if self.outputs.contains(&path) {
            return Err(PatientError::DuplicateOutput(path));
        }
        Ok(())
    }
}

fn load(dir: &Path) -> Result<Volume, PatientError> {
    VolumeLoader::load_from_directory(dir, SortBy::ImagePositionPatient).map_err(|source| {
        PatientError::Load {
            path: dir.to_path_buf(),
            source,
        }
    })
}

/// Index of the series with the most files, first one on ties
fn fixed_series(series: &[&LeafReport]) -> Option<usize> {
    let first = series.first()?;
    let (index, _) = series
        .iter()
        .enumerate()
        .skip(1)
        .fold((0, first.file_count), |(best, count), (i, leaf)| {
            if leaf.file_count > count {
                (i, leaf.file_count)
            } else {
                (best, count)
            }
        });
    Some(index)
}
