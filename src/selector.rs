use crate::scanner::{MODALITY_CT, MODALITY_PT, MODALITY_RTSTRUCT, ScanReport};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NO_PT: &str = "No PT scans";
pub const MULTIPLE_PT: &str = "Multiple PT scans";
pub const NO_CT: &str = "No CT scans";
pub const SINGLE_CT_SLICE_MISMATCH: &str =
    "One CT scan set found. With different slices number as PT";
pub const MULTIPLE_CT_NO_MATCH: &str =
    "Multiple CT scans, none with same slices number as PT, picking the set with more slices";
pub const NO_RTSTRUCT: &str = "No RTSTRUCT";
pub const RTSTRUCT_WITHOUT_ROI: &str = "RTSTRUCT found but none with requested ROI";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("Length mismatch: {paths} paths, {file_counts} file counts, {modalities} modalities")]
    LengthMismatch {
        paths: usize,
        file_counts: usize,
        modalities: usize,
    },
}

/// Source of the ROI names defined by an RTSTRUCT leaf
pub trait RoiNameLookup {
    fn roi_names(&self, dir: &Path) -> Vec<String>;
}

impl<F> RoiNameLookup for F
where
    F: Fn(&Path) -> Vec<String>,
{
    fn roi_names(&self, dir: &Path) -> Vec<String> {
        self(dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Substring an ROI name must contain (case-sensitive)
    pub roi_name: String,
    /// Path marker preferred when several RTSTRUCT leaves qualify
    /// (case-insensitive)
    pub preferred_rt_marker: String,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            roi_name: "GTV".to_string(),
            preferred_rt_marker: "petpet".to_string(),
        }
    }
}

impl SelectionPolicy {
    pub fn new(roi_name: impl Into<String>) -> Self {
        Self {
            roi_name: roi_name.into(),
            ..Self::default()
        }
    }

    fn multiple_rt_warning(&self) -> String {
        format!("Multiple RT scans, searching {}", self.preferred_rt_marker)
    }

    fn marker_missing_warning(&self) -> String {
        format!(
            "{} not found using the first valid",
            self.preferred_rt_marker
        )
    }
}

/// Directories chosen for one patient plus every anomaly met on the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionResult {
    pub ct_dir: Option<PathBuf>,
    pub pt_dir: Option<PathBuf>,
    pub rt_dir: Option<PathBuf>,
    /// In detection order
    pub warnings: Vec<String>,
}

impl SelectionResult {
    pub fn is_complete(&self) -> bool {
        self.ct_dir.is_some() && self.pt_dir.is_some() && self.rt_dir.is_some()
    }
}

pub fn select_report(
    report: &ScanReport,
    policy: &SelectionPolicy,
    lookup: &impl RoiNameLookup,
) -> Result<SelectionResult, SelectError> {
    select(
        &report.paths,
        &report.file_counts,
        &report.modalities,
        policy,
        lookup,
    )
}

/// Pick one PT, one CT and one RTSTRUCT directory out of a flattened scan.
///
/// Ambiguities never fail: they resolve to the first candidate in traversal
/// order (or the documented heuristic) and append a warning. Only parallel
/// arrays of different lengths are rejected.
pub fn select(
    paths: &[PathBuf],
    file_counts: &[usize],
    modalities: &[String],
    policy: &SelectionPolicy,
    lookup: &impl RoiNameLookup,
) -> Result<SelectionResult, SelectError> {
    if paths.len() != file_counts.len() || paths.len() != modalities.len() {
        return Err(SelectError::LengthMismatch {
            paths: paths.len(),
            file_counts: file_counts.len(),
            modalities: modalities.len(),
        });
    }

    let indices_of = |modality: &str| -> Vec<usize> {
        modalities
            .iter()
            .enumerate()
            .filter(|(_, m)| m.as_str() == modality)
            .map(|(i, _)| i)
            .collect()
    };

    let mut result = SelectionResult::default();

    let pt = indices_of(MODALITY_PT);
    let n_pt = match pt.as_slice() {
        [] => {
            result.warnings.push(NO_PT.to_string());
            None
        }
        [first, rest @ ..] => {
            if !rest.is_empty() {
                result.warnings.push(MULTIPLE_PT.to_string());
            }
            result.pt_dir = Some(paths[*first].clone());
            Some(file_counts[*first])
        }
    };

    let ct = indices_of(MODALITY_CT);
    match n_pt {
        Some(n_pt) if !ct.is_empty() => {
            let chosen = pick_ct(&ct, file_counts, n_pt, &mut result.warnings);
            result.ct_dir = Some(paths[chosen].clone());
        }
        _ => result.warnings.push(NO_CT.to_string()),
    }

    let rt = indices_of(MODALITY_RTSTRUCT);
    if rt.is_empty() || result.pt_dir.is_none() || result.ct_dir.is_none() {
        result.warnings.push(NO_RTSTRUCT.to_string());
        return Ok(result);
    }

    let qualifying: Vec<&PathBuf> = rt
        .iter()
        .map(|&i| &paths[i])
        .filter(|dir| {
            lookup
                .roi_names(dir)
                .iter()
                .any(|name| name.contains(policy.roi_name.as_str()))
        })
        .collect();

    result.rt_dir = match qualifying.as_slice() {
        [] => {
            result.warnings.push(RTSTRUCT_WITHOUT_ROI.to_string());
            None
        }
        [only] => Some((*only).clone()),
        [first, ..] => {
            result.warnings.push(policy.multiple_rt_warning());
            let marker = policy.preferred_rt_marker.to_lowercase();
            let preferred = qualifying
                .iter()
                .find(|dir| dir.to_string_lossy().to_lowercase().contains(&marker));
            match preferred {
                Some(dir) => Some((*dir).clone()),
                None => {
                    result.warnings.push(policy.marker_missing_warning());
                    Some((*first).clone())
                }
            }
        }
    };

    Ok(result)
}

/// Index of the CT leaf to use given the PT slice count
fn pick_ct(ct: &[usize], file_counts: &[usize], n_pt: usize, warnings: &mut Vec<String>) -> usize {
    if let [only] = ct {
        if file_counts[*only] != n_pt {
            warnings.push(SINGLE_CT_SLICE_MISMATCH.to_string());
        }
        return *only;
    }

    if let Some(&matching) = ct.iter().find(|&&i| file_counts[i] == n_pt) {
        log::debug!("Multiple CT scans, picked the first with {n_pt} slices");
        return matching;
    }

    warnings.push(MULTIPLE_CT_NO_MATCH.to_string());
    // strict comparison keeps the first occurrence of the maximum
    ct.iter().skip(1).fold(ct[0], |best, &i| {
        if file_counts[i] > file_counts[best] {
            i
        } else {
            best
        }
    })
}
