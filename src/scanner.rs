use dicom::core::dictionary::DataDictionary;
use dicom::core::header::Header;
use dicom::core::value::Value;
use dicom::core::VR;
use dicom::object::{OpenFileOptions, ReadError};
use dicom_dictionary_std::{StandardDataDictionary, tags};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const MODALITY_CT: &str = "CT";
pub const MODALITY_PT: &str = "PT";
pub const MODALITY_RTSTRUCT: &str = "RTSTRUCT";

/// Offset of the "DICM" magic in a Part 10 file, after the 128 byte preamble
const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Root directory not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Classification of a single leaf directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafReport {
    pub path: PathBuf,
    pub file_count: usize,
    /// Modality tag of the representative file, empty when the leaf is not a
    /// readable uniform DICOM collection
    pub modality: String,
}

impl LeafReport {
    pub fn has_modality(&self, modality: &str) -> bool {
        self.modality == modality
    }
}

/// Directory tree mirrored by [`scan`]. Children are keyed by file name, so
/// iteration is lexicographic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanNode {
    Leaf(LeafReport),
    Branch {
        path: PathBuf,
        children: BTreeMap<OsString, ScanNode>,
    },
}

impl ScanNode {
    /// Leaves in pre-order depth-first order
    pub fn leaves(&self) -> Vec<&LeafReport> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafReport>) {
        match self {
            ScanNode::Leaf(report) => out.push(report),
            ScanNode::Branch { children, .. } => {
                for child in children.values() {
                    child.collect_leaves(out);
                }
            }
        }
    }

    pub fn flatten(&self) -> ScanReport {
        ScanReport::from_leaves(self.leaves().into_iter().cloned())
    }
}

/// Flattened scan result as three parallel sequences in traversal order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub paths: Vec<PathBuf>,
    pub file_counts: Vec<usize>,
    pub modalities: Vec<String>,
}

impl ScanReport {
    pub fn from_leaves(leaves: impl IntoIterator<Item = LeafReport>) -> Self {
        let mut report = Self::default();
        for leaf in leaves {
            report.paths.push(leaf.path);
            report.file_counts.push(leaf.file_count);
            report.modalities.push(leaf.modality);
        }
        report
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn leaves(&self) -> impl Iterator<Item = LeafReport> + '_ {
        self.paths
            .iter()
            .zip(&self.file_counts)
            .zip(&self.modalities)
            .map(|((path, &file_count), modality)| LeafReport {
                path: path.clone(),
                file_count,
                modality: modality.clone(),
            })
    }
}

/// Recursively scan `root`, classifying every leaf directory exactly once.
///
/// A directory is a leaf iff it has no visible subdirectory. Read failures
/// of individual files never propagate; the leaf reports an empty modality.
pub fn scan(root: impl AsRef<Path>) -> Result<ScanNode, ScanError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ScanError::NotFound(root.to_path_buf()));
    }
    scan_directory(root)
}

fn scan_directory(dir: &Path) -> Result<ScanNode, ScanError> {
    log::trace!("Scanning {}", dir.display());
    let subdirs = subdirectories(dir)?;

    if subdirs.is_empty() {
        let (file_count, modality) = leaf_info(dir)?;
        return Ok(ScanNode::Leaf(LeafReport {
            path: dir.to_path_buf(),
            file_count,
            modality,
        }));
    }

    let mut children = BTreeMap::new();
    for subdir in subdirs {
        let name = subdir.file_name().map(OsString::from).unwrap_or_default();
        children.insert(name, scan_directory(&subdir)?);
    }

    Ok(ScanNode::Branch {
        path: dir.to_path_buf(),
        children,
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.as_encoded_bytes().first() == Some(&b'.'))
}

/// Visible entries of `dir`, sorted by file name
fn visible_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| !is_hidden(path))
        .collect();
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

pub fn subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(visible_entries(dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect())
}

/// Visible files of `dir` in traversal order; the first one is the
/// representative file of the leaf.
pub fn files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(visible_entries(dir)?
        .into_iter()
        .filter(|path| !path.is_dir())
        .collect())
}

/// Whether the file starts with a Part 10 preamble followed by "DICM"
pub fn has_dicom_preamble(path: &Path) -> bool {
    let mut header = [0u8; PREAMBLE_LEN + 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map(|_| &header[PREAMBLE_LEN..] == MAGIC)
        .unwrap_or(false)
}

/// Whether `dir` has no subdirectory and holds DICOM files only
pub fn is_dicom_leaf(dir: &Path) -> io::Result<bool> {
    if !subdirectories(dir)?.is_empty() {
        return Ok(false);
    }
    Ok(files(dir)?.iter().all(|path| has_dicom_preamble(path)))
}

/// Whether `dir` is a DICOM leaf holding a single RTSTRUCT file
pub fn is_rtstruct_leaf(dir: &Path) -> bool {
    let Ok(true) = is_dicom_leaf(dir) else {
        return false;
    };
    match files(dir) {
        Ok(files) if files.len() == 1 => {
            read_modality(&files[0]).is_some_and(|modality| modality == MODALITY_RTSTRUCT)
        }
        _ => false,
    }
}

/// Number of files in a leaf and the modality of its representative file
pub fn leaf_info(dir: &Path) -> io::Result<(usize, String)> {
    let files = files(dir)?;
    let uniform = files.iter().all(|path| has_dicom_preamble(path));

    let modality = match files.first() {
        Some(first) if uniform => read_modality(first).unwrap_or_default(),
        Some(_) => {
            log::debug!("{}: mixed file types, modality left empty", dir.display());
            String::new()
        }
        None => String::new(),
    };

    Ok((files.len(), modality))
}

/// Modality of a single file, `None` if it can't be read
pub fn read_modality(path: &Path) -> Option<String> {
    let object = match OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
    {
        Ok(object) => object,
        Err(err) => {
            log::debug!("{}: unreadable DICOM file ({err})", path.display());
            return None;
        }
    };

    object
        .element(tags::MODALITY)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
}

/// Text and numeric value representations; binary ones (OB, OW, UN...) and
/// sequences are left out of [`describe_file`]
fn is_readable_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::AE
            | VR::AS
            | VR::CS
            | VR::DA
            | VR::DS
            | VR::DT
            | VR::IS
            | VR::LO
            | VR::LT
            | VR::PN
            | VR::SH
            | VR::ST
            | VR::TM
            | VR::UC
            | VR::UI
            | VR::UR
            | VR::UT
            | VR::FL
            | VR::FD
            | VR::SL
            | VR::SS
            | VR::SV
            | VR::UL
            | VR::US
            | VR::UV
    )
}

/// String and numeric attributes of one file as (keyword, value) pairs
pub fn describe_file(path: &Path) -> Result<Vec<(String, String)>, ReadError> {
    let object = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)?;

    let rows = object
        .iter()
        .filter_map(|element| {
            if !is_readable_vr(element.vr()) {
                return None;
            }
            let Value::Primitive(value) = element.value() else {
                return None;
            };
            let alias = StandardDataDictionary.by_tag(element.tag())?.alias;
            Some((alias.to_string(), value.to_str().trim().to_string()))
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
    use dicom_dictionary_std::uids;
    use tempfile::TempDir;

    fn sop_class(modality: &str) -> &'static str {
        match modality {
            MODALITY_PT => uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
            MODALITY_RTSTRUCT => uids::RT_STRUCTURE_SET_STORAGE,
            _ => uids::CT_IMAGE_STORAGE,
        }
    }

    /// Write a Part 10 file made of `elements` plus the modality and SOP tags
    pub(crate) fn write_dicom(
        path: &Path,
        modality: &str,
        elements: Vec<DataElement<InMemDicomObject>>,
    ) {
        let sop_instance = format!("1.2.826.0.1.3680043.2.1125.{}", path_uid(path));
        let mut object = InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(sop_class(modality)),
            ),
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

        let file = object
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(sop_class(modality))
                    .media_storage_sop_instance_uid(sop_instance.as_str()),
            )
            .unwrap();
        file.write_to_file(path).unwrap();
    }

    fn path_uid(path: &Path) -> u64 {
        path.to_string_lossy()
            .bytes()
            .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
            % 1_000_000_000
    }

    pub(crate) fn write_series(dir: &Path, modality: &str, count: usize) {
        fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            write_dicom(&dir.join(format!("{i:03}.dcm")), modality, Vec::new());
        }
    }

    #[test]
    fn missing_root_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(scan(&missing), Err(ScanError::NotFound(p)) if p == missing));
    }

    #[test]
    fn classifies_every_leaf_once_in_lexicographic_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_series(&root.join("b_study/ct"), MODALITY_CT, 3);
        write_series(&root.join("a_study/pet"), MODALITY_PT, 2);
        write_series(&root.join("a_study/ct"), MODALITY_CT, 4);
        write_series(&root.join("b_study/nested/deeper/pet"), MODALITY_PT, 1);

        let report = scan(root).unwrap().flatten();

        assert_eq!(
            report.paths,
            vec![
                root.join("a_study/ct"),
                root.join("a_study/pet"),
                root.join("b_study/ct"),
                root.join("b_study/nested/deeper/pet"),
            ]
        );
        assert_eq!(report.file_counts, vec![4, 2, 3, 1]);
        assert_eq!(report.modalities, vec!["CT", "PT", "CT", "PT"]);
    }

    #[test]
    fn hidden_entries_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_series(&root.join("ct"), MODALITY_CT, 2);
        fs::write(root.join("ct/.DS_Store"), b"junk").unwrap();
        fs::create_dir_all(root.join("ct/.thumbnails")).unwrap();
        write_series(&root.join(".trash/ct"), MODALITY_CT, 5);

        let tree = scan(root).unwrap();
        let leaves = tree.leaves();

        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, root.join("ct"));
        assert_eq!(leaves[0].file_count, 2);
        assert_eq!(leaves[0].modality, MODALITY_CT);
    }

    #[cfg(unix)]
    #[test]
    fn hidden_entries_with_non_utf8_names_are_ignored() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_series(&root.join("pt"), MODALITY_PT, 1);
        let hidden = root.join(OsStr::from_bytes(b".cache\xff"));
        write_series(&hidden, MODALITY_CT, 2);
        fs::write(root.join("pt").join(OsStr::from_bytes(b".\xfe")), b"junk").unwrap();

        let leaves = scan(root).unwrap().flatten();
        assert_eq!(leaves.paths, vec![root.join("pt")]);
        assert_eq!(leaves.file_counts, vec![1]);
        assert_eq!(leaves.modalities, vec![MODALITY_PT]);
    }

    #[test]
    fn mixed_leaf_degrades_to_empty_modality() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_series(&root.join("ct"), MODALITY_CT, 2);
        fs::write(root.join("ct/notes.txt"), b"not a dicom file").unwrap();

        let report = scan(root).unwrap().flatten();

        assert_eq!(report.file_counts, vec![3]);
        assert_eq!(report.modalities, vec![String::new()]);
    }

    #[test]
    fn corrupt_representative_file_degrades_to_empty_modality() {
        let temp_dir = TempDir::new().unwrap();
        let leaf = temp_dir.path().join("broken");
        fs::create_dir_all(&leaf).unwrap();
        let mut bytes = vec![0u8; PREAMBLE_LEN];
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&[0xff; 16]);
        fs::write(leaf.join("000.dcm"), bytes).unwrap();

        let (count, modality) = leaf_info(&leaf).unwrap();
        assert_eq!(count, 1);
        assert!(modality.is_empty());
    }

    #[test]
    fn empty_leaf_is_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("patient/empty")).unwrap();

        let report = scan(temp_dir.path()).unwrap().flatten();
        assert_eq!(report.len(), 1);
        assert_eq!(report.file_counts, vec![0]);
        assert_eq!(report.modalities, vec![String::new()]);
    }

    #[test]
    fn branch_is_never_a_leaf() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_series(&root.join("series"), MODALITY_CT, 1);
        write_series(&root.join("series/inner"), MODALITY_PT, 1);

        let tree = scan(root).unwrap();
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, root.join("series/inner"));
        assert!(!is_dicom_leaf(&root.join("series")).unwrap());
    }

    #[test]
    fn rtstruct_leaf_needs_a_single_rtstruct_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_series(&root.join("rt"), MODALITY_RTSTRUCT, 1);
        write_series(&root.join("rt_twice"), MODALITY_RTSTRUCT, 2);
        write_series(&root.join("ct"), MODALITY_CT, 1);

        assert!(is_rtstruct_leaf(&root.join("rt")));
        assert!(!is_rtstruct_leaf(&root.join("rt_twice")));
        assert!(!is_rtstruct_leaf(&root.join("ct")));
    }

    #[test]
    fn describe_file_lists_keywords() {
        let temp_dir = TempDir::new().unwrap();
        write_series(temp_dir.path(), MODALITY_PT, 1);

        let rows = describe_file(&temp_dir.path().join("000.dcm")).unwrap();
        assert!(rows.contains(&("Modality".to_string(), "PT".to_string())));
    }

    #[test]
    fn describe_file_skips_binary_attributes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.dcm");
        write_dicom(
            &path,
            MODALITY_CT,
            vec![
                DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(512_u16)),
                DataElement::new(
                    tags::ENCAPSULATED_DOCUMENT,
                    VR::OB,
                    PrimitiveValue::from(vec![0x25_u8, 0x50, 0x44, 0x46]),
                ),
            ],
        );

        let rows = describe_file(&path).unwrap();
        assert!(rows.contains(&("Rows".to_string(), "512".to_string())));
        assert!(rows.iter().all(|(keyword, _)| keyword != "EncapsulatedDocument"));
    }
}
