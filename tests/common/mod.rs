//! Synthetic patient corpora written as real Part 10 files

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use std::{fs, path::Path};

pub const ROWS: u16 = 4;
pub const COLUMNS: u16 = 5;
pub const SPACING: f64 = 2.0;
pub const ORIGIN: (f64, f64) = (-4.0, -4.0);

fn ds(values: &[f64]) -> PrimitiveValue {
    let text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    PrimitiveValue::from(text.join("\\"))
}

fn write_object(
    path: &Path,
    modality: &str,
    sop_class: &str,
    elements: Vec<DataElement<InMemDicomObject>>,
) {
    let sop_instance = format!(
        "2.25.{}",
        path.to_string_lossy()
            .bytes()
            .fold(11u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b as u64))
    );
    let mut object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class)),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance.as_str()),
        ),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from(modality)),
    ]);
    for element in elements {
        object.put(element);
    }
    object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sop_instance.as_str()),
        )
        .unwrap()
        .write_to_file(path)
        .unwrap();
}

/// Stored value of every pixel of the slice at `z`
pub fn pixel_value(modality: &str, z: f64) -> u16 {
    let base = if modality == "PT" { 1000 } else { 0 };
    base + (z as u16) * 10
}

pub fn write_image_series(dir: &Path, modality: &str, z_positions: &[f64]) {
    fs::create_dir_all(dir).unwrap();
    let sop_class = if modality == "PT" {
        uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE
    } else {
        uids::CT_IMAGE_STORAGE
    };

    for (i, &z) in z_positions.iter().enumerate() {
        let value = pixel_value(modality, z);
        let pixels: Vec<u8> = (0..ROWS as usize * COLUMNS as usize)
            .flat_map(|_| value.to_le_bytes())
            .collect();
        let elements = vec![
            DataElement::new(
                tags::INSTANCE_NUMBER,
                VR::IS,
                PrimitiveValue::from((i + 1).to_string()),
            ),
            DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                ds(&[ORIGIN.0, ORIGIN.1, z]),
            ),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, ds(&[SPACING, SPACING])),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from("MONOCHROME2"),
            ),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(ROWS)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(COLUMNS)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(pixels)),
        ];
        write_object(&dir.join(format!("IM{i:04}")), modality, sop_class, elements);
    }
}

/// RTSTRUCT with a single ROI made of one contour per entry of `contours`
pub fn write_structure_set(dir: &Path, roi_name: &str, contours: &[Vec<f64>]) {
    fs::create_dir_all(dir).unwrap();
    let contour_items: Vec<InMemDicomObject> = contours
        .iter()
        .map(|points| {
            InMemDicomObject::from_element_iter([DataElement::new(
                tags::CONTOUR_DATA,
                VR::DS,
                ds(points),
            )])
        })
        .collect();

    let elements = vec![
        DataElement::new(
            tags::STRUCTURE_SET_ROI_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![InMemDicomObject::from_element_iter([
                DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from("1")),
                DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from(roi_name)),
            ])]),
        ),
        DataElement::new(
            tags::ROI_CONTOUR_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![InMemDicomObject::from_element_iter([
                DataElement::new(tags::REFERENCED_ROI_NUMBER, VR::IS, PrimitiveValue::from("1")),
                DataElement::new(
                    tags::CONTOUR_SEQUENCE,
                    VR::SQ,
                    DataSetSequence::from(contour_items),
                ),
            ])]),
        ),
    ];
    write_object(
        &dir.join("RS0001"),
        "RTSTRUCT",
        uids::RT_STRUCTURE_SET_STORAGE,
        elements,
    );
}

/// Axial square from (x0, y0) to (x1, y1) at height z
pub fn square(x0: f64, y0: f64, x1: f64, y1: f64, z: f64) -> Vec<f64> {
    vec![x0, y0, z, x1, y0, z, x1, y1, z, x0, y1, z]
}
