use crate::header::{Calibration, DataType, NiftiHeader};
use crate::source::FetchOutcome;
use crate::volume::{Dimensions, EXPECTED_DIM_RANGE, Histogram, Volume};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::borrow::Cow;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Voxels converted per parallel work item.
const CONVERT_BLOCK: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("decompression failed: {0}")]
    DecompressionFailed(#[source] std::io::Error),

    #[error("missing or unrecognized NIfTI header ({len} bytes available)")]
    MissingHeader { len: usize },

    #[error("invalid NIfTI header: {0}")]
    InvalidHeader(String),

    #[error("missing image payload")]
    MissingImage,

    #[error("image payload truncated: expected {expected} bytes, got {actual}")]
    TruncatedImage { expected: usize, actual: usize },

    #[error("unsupported datatype {code} with {bitpix} bits per voxel")]
    UnsupportedDatatype { code: i16, bitpix: i16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VolumeLoaderError {
    /// Stable short identifier for user-facing messaging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DecompressionFailed(_) => "decompression-failed",
            Self::MissingHeader { .. } => "missing-header",
            Self::InvalidHeader(_) => "invalid-header",
            Self::MissingImage => "missing-image",
            Self::TruncatedImage { .. } => "truncated-image",
            Self::UnsupportedDatatype { .. } => "unsupported-datatype",
            Self::Io(_) => "io",
        }
    }

    /// Everything except an unsupported datatype is a decode error.
    pub fn is_decode_error(&self) -> bool {
        !matches!(self, Self::UnsupportedDatatype { .. } | Self::Io(_))
    }
}

/// An axis whose voxel count is outside the usual range. Decoding continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionWarning {
    pub axis: char,
    pub size: usize,
}

impl std::fmt::Display for DimensionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-axis has {} voxels, outside the expected {}..={}",
            self.axis,
            self.size,
            EXPECTED_DIM_RANGE.start(),
            EXPECTED_DIM_RANGE.end()
        )
    }
}

#[derive(Debug, Clone)]
pub struct DecodedVolume {
    pub volume: Arc<Volume>,
    pub calibration: Calibration,
    pub datatype: DataType,
    pub bitpix: i16,
    pub warnings: Vec<DimensionWarning>,
}

/// Result of feeding an upstream fetch outcome to the loader.
#[derive(Debug, Clone)]
pub enum LoadStatus {
    Ready(DecodedVolume),
    /// Upstream is still processing; informational.
    Pending(String),
    /// Upstream failed; blocking, nothing was decoded.
    Unavailable(String),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Decode a `.nii` or `.nii.gz` byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error for undecompressable input, a missing or invalid
    /// header, an unsupported datatype, or a missing or short payload.
    pub fn decode(bytes: &[u8]) -> Result<DecodedVolume, VolumeLoaderError> {
        let raw = Self::decompress(bytes)?;
        let header = NiftiHeader::from_bytes(&raw)?;
        let warnings = Self::check_dimensions(&header);
        Self::build(&raw, &header, warnings)
    }

    /// Same as [`VolumeLoader::decode`], yielding to the runtime between phases.
    pub async fn decode_async(bytes: &[u8]) -> Result<DecodedVolume, VolumeLoaderError> {
        let raw = Self::decompress(bytes)?;
        tokio::task::yield_now().await;
        let header = NiftiHeader::from_bytes(&raw)?;
        let warnings = Self::check_dimensions(&header);
        tokio::task::yield_now().await;
        Self::build(&raw, &header, warnings)
    }

    /// Load a volume from a file path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<DecodedVolume, VolumeLoaderError> {
        let bytes = std::fs::read(path.as_ref())?;
        debug!("read {} bytes from {}", bytes.len(), path.as_ref().display());
        Self::decode(&bytes)
    }

    /// Decode only when upstream actually delivered bytes.
    pub async fn load(outcome: FetchOutcome) -> Result<LoadStatus, VolumeLoaderError> {
        match outcome {
            FetchOutcome::Bytes(bytes) => Ok(LoadStatus::Ready(Self::decode_async(&bytes).await?)),
            FetchOutcome::Processing { message } => Ok(LoadStatus::Pending(message)),
            FetchOutcome::Failed { message } => Ok(LoadStatus::Unavailable(message)),
        }
    }

    pub fn is_gzip(bytes: &[u8]) -> bool {
        bytes.starts_with(&GZIP_MAGIC)
    }

    fn decompress(bytes: &[u8]) -> Result<Cow<'_, [u8]>, VolumeLoaderError> {
        if !Self::is_gzip(bytes) {
            return Ok(Cow::Borrowed(bytes));
        }
        let mut output = Vec::with_capacity(bytes.len() * 4);
        MultiGzDecoder::new(bytes)
            .read_to_end(&mut output)
            .map_err(VolumeLoaderError::DecompressionFailed)?;
        debug!("decompressed {} -> {} bytes", bytes.len(), output.len());
        Ok(Cow::Owned(output))
    }

    fn check_dimensions(header: &NiftiHeader) -> Vec<DimensionWarning> {
        let (x, y, z) = header.dimensions();
        let warnings: Vec<_> = [('x', x), ('y', y), ('z', z)]
            .into_iter()
            .filter(|(_, size)| !EXPECTED_DIM_RANGE.contains(size))
            .map(|(axis, size)| DimensionWarning { axis, size })
            .collect();
        for warning in &warnings {
            warn!("{warning}");
        }
        if header.volume_count() > 1 {
            info!(
                "{} volumes stacked in file, decoding the first",
                header.volume_count()
            );
        }
        warnings
    }

    fn build(
        raw: &[u8],
        header: &NiftiHeader,
        warnings: Vec<DimensionWarning>,
    ) -> Result<DecodedVolume, VolumeLoaderError> {
        let (x, y, z) = header.dimensions();
        let dimensions = Dimensions::new(x, y, z);
        let sample_size = header.datatype.byte_size();
        let (voxel_count, expected) = dimensions
            .checked_voxel_count()
            .and_then(|count| Some((count, count.checked_mul(sample_size)?)))
            .filter(|&(_, bytes)| bytes <= isize::MAX as usize)
            .ok_or_else(|| {
                VolumeLoaderError::InvalidHeader(format!(
                    "{x}x{y}x{z} voxels of {sample_size} bytes overflow the addressable size"
                ))
            })?;

        let offset = header.data_offset();
        if raw.len() <= offset {
            return Err(VolumeLoaderError::MissingImage);
        }
        let payload = &raw[offset..];
        if payload.len() < expected {
            return Err(VolumeLoaderError::TruncatedImage {
                expected,
                actual: payload.len(),
            });
        }
        let payload = &payload[..expected];

        let calibration = header.calibration();
        let (data, histogram) = if header.little_endian {
            convert::<LittleEndian>(payload, header.datatype, voxel_count, calibration)
        } else {
            convert::<BigEndian>(payload, header.datatype, voxel_count, calibration)
        };

        let volume = Volume::from_parts(dimensions, header.spacing(), data, histogram)
            .ok_or(VolumeLoaderError::MissingImage)?;
        info!(
            "decoded {}x{}x{} {} volume, calibrated range [{}, {}]",
            x, y, z, header.datatype, histogram.min, histogram.max
        );

        Ok(DecodedVolume {
            volume: Arc::new(volume),
            calibration,
            datatype: header.datatype,
            bitpix: header.bitpix,
            warnings,
        })
    }
}

#[inline]
fn read_sample<E: ByteOrder>(datatype: DataType, bytes: &[u8]) -> f64 {
    match datatype {
        DataType::UInt8 => bytes[0] as f64,
        DataType::Int8 => bytes[0] as i8 as f64,
        DataType::Int16 => E::read_i16(bytes) as f64,
        DataType::UInt16 => E::read_u16(bytes) as f64,
        DataType::Int32 => E::read_i32(bytes) as f64,
        DataType::UInt32 => E::read_u32(bytes) as f64,
        DataType::Float16 => half::f16::from_bits(E::read_u16(bytes)).to_f64(),
        DataType::Float32 => E::read_f32(bytes) as f64,
        DataType::Float64 => E::read_f64(bytes),
    }
}

/// Calibrate every sample and accumulate extrema in the same pass.
fn convert<E: ByteOrder>(
    payload: &[u8],
    datatype: DataType,
    voxel_count: usize,
    calibration: Calibration,
) -> (Vec<f32>, Histogram) {
    let sample_size = datatype.byte_size();
    let mut data = vec![0f32; voxel_count];

    let histogram = data
        .par_chunks_mut(CONVERT_BLOCK)
        .zip(payload.par_chunks(CONVERT_BLOCK * sample_size))
        .map(|(out, raw)| {
            let mut histogram = Histogram::default();
            for (value, bytes) in out.iter_mut().zip(raw.chunks_exact(sample_size)) {
                let sample = read_sample::<E>(datatype, bytes);
                let calibrated = if sample.is_finite() {
                    calibration.apply(sample)
                } else {
                    f32::NAN
                };
                if calibrated.is_finite() {
                    histogram.observe(calibrated);
                    *value = calibrated;
                }
            }
            histogram
        })
        .reduce(Histogram::default, Histogram::merge);

    (data, histogram)
}
