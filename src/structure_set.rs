use crate::scanner::{self, is_rtstruct_leaf};
use crate::selector::RoiNameLookup;

use dicom::object::{DefaultDicomObject, InMemDicomObject, ReadError, open_file};
use dicom_dictionary_std::tags;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Point3 = [f64; 3];

#[derive(Debug, Error)]
pub enum StructureSetError {
    #[error("Not a RTSTRUCT leaf: {0}")]
    NotStructureSet(PathBuf),

    #[error("Missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Contour data of ROI {roi} has {len} values, not a multiple of 3")]
    MalformedContour { roi: String, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] ReadError),
}

/// Axis-aligned box in patient coordinates (mm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub max_x: f64,
    pub min_x: f64,
    pub max_y: f64,
    pub min_y: f64,
    pub max_z: f64,
    pub min_z: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            max_x: f64::NEG_INFINITY,
            min_x: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_z: f64::NEG_INFINITY,
            min_z: f64::INFINITY,
        }
    }
}

impl BoundingBox {
    pub fn include(&mut self, [x, y, z]: Point3) {
        self.max_x = self.max_x.max(x);
        self.min_x = self.min_x.min(x);
        self.max_y = self.max_y.max(y);
        self.min_y = self.min_y.min(y);
        self.max_z = self.max_z.max(z);
        self.min_z = self.min_z.min(z);
    }

    /// True until at least one point has been included
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            max_x: self.max_x.max(other.max_x),
            min_x: self.min_x.min(other.min_x),
            max_y: self.max_y.max(other.max_y),
            min_y: self.min_y.min(other.min_y),
            max_z: self.max_z.max(other.max_z),
            min_z: self.min_z.min(other.min_z),
        }
    }

    pub fn padded(&self, margin: f64) -> Self {
        Self {
            max_x: self.max_x + margin,
            min_x: self.min_x - margin,
            max_y: self.max_y + margin,
            min_y: self.min_y - margin,
            max_z: self.max_z + margin,
            min_z: self.min_z - margin,
        }
    }
}

/// One named ROI of a structure set
#[derive(Debug, Clone, PartialEq)]
pub struct RoiContour {
    pub name: String,
    /// One closed polygon per contour item, usually one per axial slice
    pub slices: Vec<Vec<Point3>>,
    pub bounding_box: BoundingBox,
}

/// Reads ROI names straight from RTSTRUCT leaves on disk
#[derive(Debug, Default, Clone, Copy)]
pub struct StructureSetReader;

impl RoiNameLookup for StructureSetReader {
    fn roi_names(&self, dir: &Path) -> Vec<String> {
        roi_names(dir).unwrap_or_else(|err| {
            log::warn!("{}: unable to read ROI names ({err})", dir.display());
            Vec::new()
        })
    }
}

fn open_structure_set(dir: &Path) -> Result<DefaultDicomObject, StructureSetError> {
    if !is_rtstruct_leaf(dir) {
        return Err(StructureSetError::NotStructureSet(dir.to_path_buf()));
    }
    let files = scanner::files(dir)?;
    let file = files
        .first()
        .ok_or_else(|| StructureSetError::NotStructureSet(dir.to_path_buf()))?;
    Ok(open_file(file)?)
}

fn sequence<'a>(
    object: &'a InMemDicomObject,
    tag: dicom::core::Tag,
    name: &'static str,
) -> Result<&'a [InMemDicomObject], StructureSetError> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.items())
        .ok_or(StructureSetError::MissingAttribute(name))
}

fn roi_number(item: &InMemDicomObject, tag: dicom::core::Tag) -> Option<i32> {
    item.element(tag).ok()?.to_int::<i32>().ok()
}

fn roi_name(item: &InMemDicomObject) -> String {
    item.element(tags::ROI_NAME)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

/// Names of all ROIs defined by the structure set in `dir`
pub fn roi_names(dir: &Path) -> Result<Vec<String>, StructureSetError> {
    let object = open_structure_set(dir)?;
    let structure_set = sequence(
        &object,
        tags::STRUCTURE_SET_ROI_SEQUENCE,
        "StructureSetROISequence",
    )?;
    Ok(structure_set.iter().map(roi_name).collect())
}

/// Load the contours of every ROI whose name contains `name_filter`, or of
/// every ROI when no filter is given.
pub fn load_rois(
    dir: &Path,
    name_filter: Option<&str>,
) -> Result<Vec<RoiContour>, StructureSetError> {
    let object = open_structure_set(dir)?;
    let structure_set = sequence(
        &object,
        tags::STRUCTURE_SET_ROI_SEQUENCE,
        "StructureSetROISequence",
    )?;
    let contours = sequence(&object, tags::ROI_CONTOUR_SEQUENCE, "ROIContourSequence")?;

    let by_number: HashMap<i32, &InMemDicomObject> = contours
        .iter()
        .filter_map(|item| Some((roi_number(item, tags::REFERENCED_ROI_NUMBER)?, item)))
        .collect();

    let mut rois = Vec::new();
    for (index, structure) in structure_set.iter().enumerate() {
        let name = roi_name(structure);
        if name_filter.is_some_and(|filter| !name.contains(filter)) {
            continue;
        }

        // pair by ROI number, falling back to position when numbers are absent
        let contour = match roi_number(structure, tags::ROI_NUMBER) {
            Some(number) if !by_number.is_empty() => by_number.get(&number).copied(),
            _ => contours.get(index),
        };

        let mut roi = RoiContour {
            name,
            slices: Vec::new(),
            bounding_box: BoundingBox::default(),
        };
        if let Some(contour) = contour {
            read_contour_slices(contour, &mut roi)?;
        }
        log::debug!(
            "{}: ROI {} with {} contours",
            dir.display(),
            roi.name,
            roi.slices.len()
        );
        rois.push(roi);
    }

    Ok(rois)
}

fn read_contour_slices(
    contour: &InMemDicomObject,
    roi: &mut RoiContour,
) -> Result<(), StructureSetError> {
    // an ROI without contour items is valid, it just stays empty
    let Some(items) = contour
        .element(tags::CONTOUR_SEQUENCE)
        .ok()
        .and_then(|element| element.items())
    else {
        return Ok(());
    };

    for item in items {
        let data = item
            .element(tags::CONTOUR_DATA)
            .ok()
            .and_then(|element| element.to_multi_float64().ok())
            .ok_or(StructureSetError::MissingAttribute("ContourData"))?;

        if data.len() % 3 != 0 {
            return Err(StructureSetError::MalformedContour {
                roi: roi.name.clone(),
                len: data.len(),
            });
        }

        let points: Vec<Point3> = data
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect();
        for &point in &points {
            roi.bounding_box.include(point);
        }
        roi.slices.push(points);
    }

    Ok(())
}
