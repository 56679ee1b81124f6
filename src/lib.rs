//! # PET/CT co-registration library
//!
//! This crate prepares head and neck PET/CT studies for co-registration.
//! It is built on the dicom-rs ecosystem and works on a corpus laid out as
//! one directory per patient, each holding an arbitrary tree of DICOM
//! series directories.
//!
//! For every patient it:
//!  - scans the tree and classifies every leaf directory by modality
//!  - selects one PT, one CT and one RTSTRUCT directory, recording a
//!    warning for every ambiguity instead of failing
//!  - loads the image series into volumes sorted by slice position
//!  - rasterises the contours of the requested ROI into a binary mask on
//!    the CT grid
//!  - hands the PT volume to a registration engine, then writes every
//!    volume as NIfTI or MetaImage
//!
//! Registration itself is delegated to an implementation of
//! [`RegistrationEngine`]. Without one, [`survey`] runs everything else.
//! Patients can be processed in parallel using rayon.
//!
//!   Contributions are highly welcome!
//!
//! # Examples
//!
//! ## Selecting the series of one patient
//!
//! ```no_run
//! # use petct_coreg::{scanner, selector::{select_report, SelectionPolicy}};
//! # use petct_coreg::structure_set::StructureSetReader;
//! let report = scanner::scan("data/HN-CHUM-001")
//!     .expect("should have scanned the patient directory")
//!     .flatten();
//! let selection = select_report(&report, &SelectionPolicy::new("GTV"), &StructureSetReader)
//!     .expect("scan report arrays have equal length");
//! for warning in &selection.warnings {
//!     println!("{warning}");
//! }
//! ```
//!
//! ## Loading a series and masking an ROI
//!
//! ```no_run
//! # use petct_coreg::{SortBy, VolumeLoader, mask::generate_mask, structure_set::load_rois};
//! # use std::path::Path;
//! let ct = VolumeLoader::load_from_directory("data/HN-CHUM-001/CT", SortBy::ImagePositionPatient)
//!     .expect("should have loaded files from directory");
//! let rois = load_rois(Path::new("data/HN-CHUM-001/RTSTRUCT"), Some("GTV"))
//!     .expect("should have read the structure set");
//! let mask = generate_mask(&ct, &rois);
//! assert_eq!(mask.dim(), ct.dim());
//! ```

pub mod batch;
pub mod enums;
pub mod export;
pub mod mask;
pub mod registration;
pub mod scanner;
pub mod selector;
pub mod structure_set;
pub mod volume;
pub mod volume_loader;

pub use batch::{BatchConfig, BatchReport, run_batch, survey};
pub use enums::{BatchMode, Orientation, OutputFormat, SortBy};
pub use registration::{RegistrationEngine, RegistrationSettings};
pub use volume::Volume;
pub use volume_loader::VolumeLoader;
