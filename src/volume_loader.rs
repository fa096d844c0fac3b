use crate::{
    cache::{ArchiveKey, VolumeCache},
    frame::{DecodeError, FrameCandidate, InvalidReason, RawFrame, Validity},
    volume::Volume,
};

use ndarray::{Array3, s};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Cursor, Read, Seek},
    path::Path,
    sync::Arc,
};
use thiserror::Error;
use web_time::Instant;
use zip::ZipArchive;

// Upper bound on the buffer reserved from an entry's declared size.
const PREALLOC_LIMIT: u64 = 64 << 20;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    EmptyInput,

    #[error("No slices left to assemble")]
    NoValidSlices,

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VolumeLoaderError {
    /// The archive was readable but yielded nothing to stack.
    pub fn is_no_volume(&self) -> bool {
        matches!(
            self,
            VolumeLoaderError::EmptyInput | VolumeLoaderError::NoValidSlices
        )
    }
}

/// How archive entries are selected and decoded.
#[derive(Clone, Debug)]
pub struct LoaderOptions {
    /// Path prefixes (of the full entry name or of its file name) that mark
    /// OS-generated metadata.
    pub junk_prefixes: Vec<String>,
    /// File names that are always metadata.
    pub junk_names: Vec<String>,
    /// When set, only entries with one of these extensions (or with no
    /// extension at all) are decoded. `None` decodes every entry that is
    /// neither a directory nor junk.
    pub accepted_extensions: Option<Vec<String>>,
    /// Retry data sets without a file meta group as implicit VR little endian.
    pub force_decode: bool,
    /// Entries larger than this many uncompressed bytes are not read.
    pub max_entry_size: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            junk_prefixes: vec!["__MACOSX/".to_string(), "._".to_string()],
            junk_names: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ],
            accepted_extensions: None,
            force_decode: true,
            max_entry_size: 1 << 30,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Junk,
    SkippedExtension,
    Candidate,
}

impl LoaderOptions {
    pub fn classify_entry(&self, name: &str, is_dir: bool) -> EntryKind {
        if is_dir || name.ends_with('/') {
            return EntryKind::Directory;
        }

        let file_name = name.rsplit('/').next().unwrap_or(name);
        let is_junk = self
            .junk_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()) || file_name.starts_with(prefix.as_str()))
            || self.junk_names.iter().any(|junk| junk == file_name);
        if is_junk {
            return EntryKind::Junk;
        }

        let Some(accepted_extensions) = &self.accepted_extensions else {
            return EntryKind::Candidate;
        };
        match Path::new(file_name).extension().and_then(|ext| ext.to_str()) {
            None => EntryKind::Candidate,
            Some(ext)
                if accepted_extensions
                    .iter()
                    .any(|accepted| accepted.eq_ignore_ascii_case(ext)) =>
            {
                EntryKind::Candidate
            }
            Some(_) => EntryKind::SkippedExtension,
        }
    }
}

/// Per-load bookkeeping of what happened to each archive entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub entries: usize,
    pub directories: usize,
    pub junk: usize,
    pub skipped_extension: usize,
    pub decode_failures: usize,
    pub invalid_by_reason: HashMap<InvalidReason, usize>,
    pub accepted: usize,
    pub shape_rejected: usize,
}

impl LoadReport {
    /// Frames that decoded but failed validation, whatever the reason.
    pub fn invalid(&self) -> usize {
        self.invalid_by_reason.values().sum()
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from the bytes of a zip archive
    ///
    /// # Errors
    ///
    /// Returns [`VolumeLoaderError::Archive`] if the bytes are not a zip
    /// archive and [`VolumeLoaderError::EmptyInput`] if no entry yields a
    /// valid slice.
    pub fn load_from_zip_bytes(
        bytes: &[u8],
        options: &LoaderOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        Self::load_from_reader(Cursor::new(bytes), options)
    }

    /// Load a volume from a zip archive on disk
    pub fn load_from_path(
        path: impl AsRef<Path>,
        options: &LoaderOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        let file = File::open(path.as_ref())?;
        Self::load_from_reader(BufReader::new(file), options)
    }

    pub fn load_from_reader<R: Read + Seek>(
        reader: R,
        options: &LoaderOptions,
    ) -> Result<Volume, VolumeLoaderError> {
        let started = Instant::now();
        let (frames, mut report) = Self::scan_archive(reader, options)?;
        let volume = Self::load_from_frames(frames, &mut report)?;

        let (depth, height, width) = volume.dim();
        log::info!(
            "Loaded volume {depth}x{height}x{width} from {} entries in {:?} ({report:?})",
            report.entries,
            started.elapsed()
        );
        Ok(volume)
    }

    /// Load through `cache`, decoding the archive only on a miss.
    ///
    /// Without a cache this is [`VolumeLoader::load_from_zip_bytes`]. Failed
    /// loads are never cached.
    pub fn load_cached(
        bytes: &[u8],
        options: &LoaderOptions,
        cache: Option<&mut dyn VolumeCache>,
    ) -> Result<Arc<Volume>, VolumeLoaderError> {
        let Some(cache) = cache else {
            return Self::load_from_zip_bytes(bytes, options).map(Arc::new);
        };

        let key = ArchiveKey::from_bytes(bytes);
        if let Some(volume) = cache.get(&key) {
            log::debug!("Volume cache hit for {key:?}");
            return Ok(volume);
        }

        let volume = Arc::new(Self::load_from_zip_bytes(bytes, options)?);
        cache.insert(key, Arc::clone(&volume));
        Ok(volume)
    }

    /// Decode every candidate entry of the archive and keep the valid frames,
    /// in archive order.
    ///
    /// A bad entry never aborts the scan; it is logged and counted instead.
    pub fn scan_archive<R: Read + Seek>(
        reader: R,
        options: &LoaderOptions,
    ) -> Result<(Vec<RawFrame>, LoadReport), VolumeLoaderError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut report = LoadReport {
            entries: archive.len(),
            ..LoadReport::default()
        };
        let mut frames = Vec::new();

        for index in 0..archive.len() {
            let (name, bytes) = match Self::read_entry(&mut archive, index, options, &mut report) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    log::debug!("Skipping archive entry #{index}: {err}");
                    report.decode_failures += 1;
                    continue;
                }
            };

            let candidate = match FrameCandidate::from_bytes(&bytes, options.force_decode) {
                Ok(candidate) => candidate,
                Err(err) => {
                    log::debug!("Skipping {name}: {err}");
                    report.decode_failures += 1;
                    continue;
                }
            };

            match candidate.validate() {
                Validity::Valid(frame) => {
                    report.accepted += 1;
                    frames.push(frame);
                }
                Validity::Invalid(reason) => {
                    log::debug!("Skipping {name}: {reason}");
                    *report.invalid_by_reason.entry(reason).or_insert(0) += 1;
                }
            }
        }

        Ok((frames, report))
    }

    fn read_entry<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        index: usize,
        options: &LoaderOptions,
        report: &mut LoadReport,
    ) -> Result<Option<(String, Vec<u8>)>, DecodeError> {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        match options.classify_entry(&name, entry.is_dir()) {
            EntryKind::Directory => {
                report.directories += 1;
                Ok(None)
            }
            EntryKind::Junk => {
                report.junk += 1;
                Ok(None)
            }
            EntryKind::SkippedExtension => {
                log::debug!("Skipping {name}: not a DICOM extension");
                report.skipped_extension += 1;
                Ok(None)
            }
            EntryKind::Candidate => {
                let limit = options.max_entry_size;
                let declared = entry.size();
                if declared > limit {
                    return Err(DecodeError::EntryTooLarge { size: declared, limit });
                }

                // The declared size is only a hint; the read itself is bounded too.
                let mut bytes = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
                entry
                    .by_ref()
                    .take(limit.saturating_add(1))
                    .read_to_end(&mut bytes)?;
                let size = bytes.len() as u64;
                if size > limit {
                    return Err(DecodeError::EntryTooLarge { size, limit });
                }
                Ok(Some((name, bytes)))
            }
        }
    }

    /// Filter, sort and stack already decoded frames.
    pub fn load_from_frames(
        frames: Vec<RawFrame>,
        report: &mut LoadReport,
    ) -> Result<Volume, VolumeLoaderError> {
        let before = frames.len();
        let mut frames = Self::filter_consistent_shape(frames)?;
        report.shape_rejected = before - frames.len();

        Self::sort_by_position(&mut frames);
        Self::assemble(frames)
    }

    /// Most common `(rows, columns)`; ties go to the shape seen first.
    pub fn modal_shape(frames: &[RawFrame]) -> Option<(usize, usize)> {
        let mut tally: Vec<((usize, usize), usize)> = Vec::new();
        for frame in frames {
            let shape = frame.shape();
            match tally.iter_mut().find(|(seen, _)| *seen == shape) {
                Some((_, count)) => *count += 1,
                None => tally.push((shape, 1)),
            }
        }

        let mut best: Option<((usize, usize), usize)> = None;
        for (shape, count) in tally {
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((shape, count));
            }
        }
        best.map(|(shape, _)| shape)
    }

    /// Keep only the frames sharing the modal shape.
    pub fn filter_consistent_shape(
        frames: Vec<RawFrame>,
    ) -> Result<Vec<RawFrame>, VolumeLoaderError> {
        let shape = Self::modal_shape(&frames).ok_or(VolumeLoaderError::EmptyInput)?;
        let total = frames.len();
        let kept: Vec<_> = frames
            .into_iter()
            .filter(|frame| frame.shape() == shape)
            .collect();

        if kept.len() < total {
            log::warn!(
                "Dropped {} of {total} slices not matching the {}x{} majority shape",
                total - kept.len(),
                shape.0,
                shape.1
            );
        }
        Ok(kept)
    }

    /// Stable ascending sort on the through-plane position.
    pub fn sort_by_position(frames: &mut [RawFrame]) {
        frames.sort_by(|a, b| {
            a.through_plane_position()
                .total_cmp(&b.through_plane_position())
        });
    }

    /// Stack ordered, equally shaped frames along axis 0.
    pub fn assemble(frames: Vec<RawFrame>) -> Result<Volume, VolumeLoaderError> {
        let Some(anchor) = frames.first() else {
            return Err(VolumeLoaderError::NoValidSlices);
        };
        let anchor = anchor.clone();
        let shape = anchor.shape();
        if frames.iter().any(|frame| frame.shape() != shape) {
            // Unfiltered input: keep the invariant rather than panic in assign.
            return Self::assemble(Self::filter_consistent_shape(frames)?);
        }

        let positions: Vec<f64> = frames.iter().map(RawFrame::through_plane_position).collect();
        let spacing = Self::get_spacing(&anchor, &positions);
        let volume_array = Self::build_volume_array(&frames);

        Ok(Volume::new(volume_array, spacing, anchor, positions))
    }

    fn build_volume_array(frames: &[RawFrame]) -> Array3<f32> {
        let (height, width) = frames[0].shape();
        let depth = frames.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, frame) in frames.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&frame.pixels);
        }

        volume
    }

    // (slice, row, column) spacing in millimetres.
    fn get_spacing(anchor: &RawFrame, positions: &[f64]) -> (f32, f32, f32) {
        let slice_spacing = Self::median_gap(positions)
            .or(anchor.slice_thickness)
            .unwrap_or(1.0);

        let (row_spacing, col_spacing) = anchor.pixel_spacing.unwrap_or((1.0, 1.0));
        (slice_spacing as f32, row_spacing as f32, col_spacing as f32)
    }

    /// Median of the positive gaps between consecutive sorted positions.
    ///
    /// A stray slice far along the axis moves the median by at most one gap.
    fn median_gap(positions: &[f64]) -> Option<f64> {
        let mut gaps: Vec<f64> = positions
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|gap| gap.is_finite() && *gap > 0.0)
            .collect();
        if gaps.is_empty() {
            return None;
        }

        gaps.sort_by(f64::total_cmp);
        let mid = gaps.len() / 2;
        if gaps.len() % 2 == 0 {
            Some((gaps[mid - 1] + gaps[mid]) / 2.0)
        } else {
            Some(gaps[mid])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn frame(shape: (usize, usize), z: f64, fill: f32) -> RawFrame {
        RawFrame {
            pixels: Array2::from_elem(shape, fill),
            position: [0.0, 0.0, z],
            patient_name: Some("TEST^PATIENT".to_string()),
            pixel_spacing: Some((0.7, 0.7)),
            slice_thickness: Some(2.0),
        }
    }

    #[test]
    fn entries_are_classified_by_name() {
        let options = LoaderOptions::default();
        assert_eq!(options.classify_entry("series/", true), EntryKind::Directory);
        assert_eq!(options.classify_entry("series/", false), EntryKind::Directory);
        assert_eq!(
            options.classify_entry("__MACOSX/series/._IM0001", false),
            EntryKind::Junk
        );
        assert_eq!(options.classify_entry("series/._IM0001.dcm", false), EntryKind::Junk);
        assert_eq!(options.classify_entry("series/.DS_Store", false), EntryKind::Junk);
        assert_eq!(options.classify_entry("series/report.pdf", false), EntryKind::Candidate);
        assert_eq!(options.classify_entry("series/IM0001.DCM", false), EntryKind::Candidate);
        assert_eq!(options.classify_entry("DICOM/IM0001", false), EntryKind::Candidate);
        assert_eq!(options.classify_entry("DICOMDIR", false), EntryKind::Candidate);
    }

    #[test]
    fn uid_named_entries_are_candidates() {
        let options = LoaderOptions::default();
        assert_eq!(
            options.classify_entry("DICOM/1.2.840.113619.2.55.3.604688.1", false),
            EntryKind::Candidate
        );
    }

    #[test]
    fn extension_filter_is_opt_in() {
        let options = LoaderOptions {
            accepted_extensions: Some(vec!["dcm".to_string(), "ima".to_string()]),
            ..LoaderOptions::default()
        };
        assert_eq!(
            options.classify_entry("series/report.pdf", false),
            EntryKind::SkippedExtension
        );
        assert_eq!(options.classify_entry("series/IM0001.IMA", false), EntryKind::Candidate);
        assert_eq!(options.classify_entry("series/IM0001", false), EntryKind::Candidate);
        assert_eq!(options.classify_entry("series/._IM0001.dcm", false), EntryKind::Junk);
    }

    #[test]
    fn modal_shape_prefers_majority_then_first_seen() {
        let frames = vec![
            frame((2, 2), 0.0, 0.0),
            frame((3, 3), 1.0, 0.0),
            frame((3, 3), 2.0, 0.0),
            frame((2, 2), 3.0, 0.0),
        ];
        assert_eq!(VolumeLoader::modal_shape(&frames), Some((2, 2)));
        assert_eq!(VolumeLoader::modal_shape(&frames[1..]), Some((3, 3)));
        assert_eq!(VolumeLoader::modal_shape(&[]), None);
    }

    #[test]
    fn minority_shape_is_dropped() {
        let mut frames: Vec<_> = (0..5).map(|i| frame((4, 4), i as f64, 1.0)).collect();
        frames.insert(2, frame((8, 8), 10.0, 2.0));
        frames.push(frame((8, 8), 11.0, 2.0));

        let mut report = LoadReport::default();
        let volume = VolumeLoader::load_from_frames(frames, &mut report).unwrap();
        assert_eq!(volume.dim(), (5, 4, 4));
        assert_eq!(report.shape_rejected, 2);
    }

    #[test]
    fn empty_candidate_set_is_empty_input() {
        let err = VolumeLoader::filter_consistent_shape(Vec::new()).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::EmptyInput));
        assert!(err.is_no_volume());
    }

    #[test]
    fn assembling_nothing_is_no_valid_slices() {
        let err = VolumeLoader::assemble(Vec::new()).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::NoValidSlices));
        assert!(err.is_no_volume());
    }

    #[test]
    fn sort_is_ascending_and_stable() {
        let mut frames = vec![
            frame((1, 1), 3.0, 30.0),
            frame((1, 1), -1.0, 10.0),
            frame((1, 1), 3.0, 31.0),
            frame((1, 1), 0.5, 20.0),
        ];
        VolumeLoader::sort_by_position(&mut frames);
        let order: Vec<f32> = frames.iter().map(|f| f.pixels[[0, 0]]).collect();
        assert_eq!(order, vec![10.0, 20.0, 30.0, 31.0]);
    }

    #[test]
    fn any_permutation_gives_the_same_stack() {
        let base: Vec<_> = (0..6).map(|i| frame((2, 2), i as f64 * 1.5, i as f32)).collect();
        let permutations: [[usize; 6]; 3] = [[0, 1, 2, 3, 4, 5], [5, 4, 3, 2, 1, 0], [3, 0, 5, 1, 4, 2]];

        let stacks: Vec<_> = permutations
            .iter()
            .map(|perm| {
                let frames = perm.iter().map(|&i| base[i].clone()).collect();
                let mut report = LoadReport::default();
                VolumeLoader::load_from_frames(frames, &mut report)
                    .unwrap()
                    .data()
                    .clone()
            })
            .collect();

        assert!(stacks.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(stacks[0][[0, 0, 0]], 0.0);
        assert_eq!(stacks[0][[5, 1, 1]], 5.0);
    }

    #[test]
    fn assembled_volume_keeps_anchor_and_spacing() {
        let frames = vec![frame((2, 3), 4.0, 1.0), frame((2, 3), 6.5, 2.0), frame((2, 3), 9.0, 3.0)];
        let volume = VolumeLoader::assemble(frames).unwrap();

        assert_eq!(volume.dim(), (3, 2, 3));
        assert_eq!(volume.anchor().through_plane_position(), 4.0);
        let (slice, row, col) = volume.spacing();
        assert_relative_eq!(slice, 2.5);
        assert_relative_eq!(row, 0.7);
        assert_relative_eq!(col, 0.7);
    }

    #[test]
    fn outlying_slice_does_not_stretch_spacing() {
        let frames = [0.0, 1.0, 2.0, 3.0, 100.0]
            .into_iter()
            .map(|z| frame((2, 2), z, 1.0))
            .collect();
        let volume = VolumeLoader::assemble(frames).unwrap();
        assert_relative_eq!(volume.spacing().0, 1.0);
    }

    #[test]
    fn even_gap_count_averages_the_middle_gaps() {
        assert_eq!(VolumeLoader::median_gap(&[0.0, 1.0, 3.0, 6.0, 10.0]), Some(2.5));
        assert_eq!(VolumeLoader::median_gap(&[2.0, 2.0]), None);
        assert_eq!(VolumeLoader::median_gap(&[5.0]), None);
    }

    #[test]
    fn single_slice_falls_back_to_thickness() {
        let volume = VolumeLoader::assemble(vec![frame((2, 2), 0.0, 1.0)]).unwrap();
        assert_relative_eq!(volume.spacing().0, 2.0);
    }
}
