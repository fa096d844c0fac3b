//! # DICOM-reslice library
//!
//! This crate rebuilds a 3D volume from a zip archive of DICOM slices and
//! lets the caller inspect it in two ways: orthogonal re-slicing and
//! iso-surface extraction.

//!
//! Loading is tolerant of the usual clutter found in exported studies.
//! Directory entries, OS metadata (`__MACOSX/`, `._*`, `.DS_Store`) and
//! files with foreign extensions are skipped, and every remaining entry is
//! decoded on its own. Entries that fail to decode, or that decode but carry
//! no pixel data or no Image Position (Patient), are dropped without
//! aborting the load. The surviving slices are filtered to the most common
//! image shape, sorted along the through-plane axis and stacked into an
//! array with axis order (slice, row, column).
//!
//! The volume can be sliced in the three different medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//! Coronal and sagittal planes are returned with the slice axis reversed so
//! the last slice is at the top, and can optionally be resampled to square
//! pixels when rendered to an image. Iso-surfaces are extracted with
//! marching cubes at a chosen stride; mesh vertices are in voxel units with
//! x = column, y = row and z = slice.
//!
//! # Examples
//!
//! ## Loading an archive and cutting a plane
//!
//! ```no_run
//! # use dicom_reslice::{enums::Orientation, volume_loader::{LoaderOptions, VolumeLoader}, window::apply_window};
//! let bytes = std::fs::read("study.zip").expect("should have read archive");
//! let volume = VolumeLoader::load_from_zip_bytes(&bytes, &LoaderOptions::default())
//!     .expect("should have found slices in archive");
//! let plane = volume
//!     .get_plane(Orientation::Sagittal, volume.dim().2 / 2)
//!     .expect("centre index is in range");
//! let windowed = apply_window(plane.view(), -200.0, 1500.0);
//! assert_eq!(windowed.dim(), plane.extent());
//! ```
//!
//! ## Extracting a surface
//!
//! ```no_run
//! # use dicom_reslice::{enums::QualityTier, volume_loader::{LoaderOptions, VolumeLoader}};
//! # let volume = VolumeLoader::load_from_path("study.zip", &LoaderOptions::default()).unwrap();
//! match volume.extract_mesh_with_quality(300.0, QualityTier::Medium) {
//!     Ok(mesh) if mesh.is_empty() => println!("no surface at this threshold"),
//!     Ok(mesh) => println!("{} triangles", mesh.face_count()),
//!     Err(err) => println!("try another threshold: {err}"),
//! }
//! ```

pub mod cache;
pub mod enums;
pub mod frame;
mod interpolator;
pub mod marching_cubes;
pub mod mesh;
mod tables;
pub mod volume;
pub mod volume_loader;
pub mod window;
