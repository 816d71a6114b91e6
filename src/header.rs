//! NIfTI header parsing.
//!
//! Both NIfTI-1 (348-byte) and NIfTI-2 (540-byte) headers are recognized, in
//! either byte order. Only the fields the volume pipeline needs are kept.

use crate::volume_loader::VolumeLoaderError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NiftiVersion {
    #[default]
    Nifti1,
    Nifti2,
}

impl NiftiVersion {
    pub const fn header_size(self) -> usize {
        match self {
            Self::Nifti1 => 348,
            Self::Nifti2 => 540,
        }
    }

    /// Smallest offset at which voxel data may start in a single-file image.
    pub const fn min_vox_offset(self) -> usize {
        match self {
            Self::Nifti1 => 352,
            Self::Nifti2 => 544,
        }
    }
}

mod offsets_v1 {
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const XYZT_UNITS: usize = 123;
    pub const DESCRIP: usize = 148;
    pub const AUX_FILE: usize = 228;
    pub const MAGIC: usize = 344;
}

mod offsets_v2 {
    pub const MAGIC: usize = 4;
    pub const DATATYPE: usize = 12;
    pub const BITPIX: usize = 14;
    pub const DIM: usize = 16;
    pub const PIXDIM: usize = 104;
    pub const VOX_OFFSET: usize = 168;
    pub const SCL_SLOPE: usize = 176;
    pub const SCL_INTER: usize = 184;
    pub const DESCRIP: usize = 240;
    pub const AUX_FILE: usize = 320;
    pub const XYZT_UNITS: usize = 500;
}

/// Voxel storage types the decoder can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum DataType {
    UInt8 = 2,
    Int16 = 4,
    Int32 = 8,
    Float32 = 16,
    Float64 = 64,
    Int8 = 256,
    UInt16 = 512,
    UInt32 = 768,
    Float16 = 16384,
}

impl DataType {
    /// Resolve a datatype code, checking it against the declared bits per voxel.
    pub fn from_code(code: i16, bitpix: i16) -> Result<Self, VolumeLoaderError> {
        let datatype = match code {
            2 => Self::UInt8,
            4 => Self::Int16,
            8 => Self::Int32,
            16 => Self::Float32,
            64 => Self::Float64,
            256 => Self::Int8,
            512 => Self::UInt16,
            768 => Self::UInt32,
            16384 => Self::Float16,
            _ => return Err(VolumeLoaderError::UnsupportedDatatype { code, bitpix }),
        };
        if datatype.bits() != bitpix {
            return Err(VolumeLoaderError::UnsupportedDatatype { code, bitpix });
        }
        Ok(datatype)
    }

    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    pub const fn bits(self) -> i16 {
        (self.byte_size() * 8) as i16
    }

    pub const fn type_name(self) -> &'static str {
        match self {
            Self::UInt8 => "u8",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::UInt16 => "u16",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::Float16 => "f16",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Linear mapping from stored samples to calibrated intensities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub slope: f32,
    pub intercept: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Calibration {
    /// Build a calibration, falling back to the identity parts that are unusable.
    pub fn new(slope: f64, intercept: f64) -> Self {
        let slope = if slope.is_finite() && slope != 0.0 {
            slope as f32
        } else {
            1.0
        };
        let intercept = if intercept.is_finite() {
            intercept as f32
        } else {
            0.0
        };
        Self { slope, intercept }
    }

    #[inline]
    pub fn apply(&self, raw: f64) -> f32 {
        (raw * self.slope as f64 + self.intercept as f64) as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    pub version: NiftiVersion,
    pub little_endian: bool,
    pub ndim: u8,
    /// `dim[1..=7]` as declared.
    pub dim: [i64; 7],
    pub datatype: DataType,
    pub bitpix: i16,
    pub pixdim: [f64; 8],
    pub vox_offset: i64,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub xyzt_units: u8,
    pub descrip: String,
}

impl NiftiHeader {
    /// Read a header with automatic version and byte order detection.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VolumeLoaderError> {
        if bytes.len() < 4 {
            return Err(VolumeLoaderError::MissingHeader { len: bytes.len() });
        }

        let sizeof_hdr_le = LittleEndian::read_i32(&bytes[0..4]);
        let sizeof_hdr_be = BigEndian::read_i32(&bytes[0..4]);

        let (version, little_endian) = if sizeof_hdr_le == 348 {
            (NiftiVersion::Nifti1, true)
        } else if sizeof_hdr_be == 348 {
            (NiftiVersion::Nifti1, false)
        } else if sizeof_hdr_le == 540 {
            (NiftiVersion::Nifti2, true)
        } else if sizeof_hdr_be == 540 {
            (NiftiVersion::Nifti2, false)
        } else {
            return Err(VolumeLoaderError::MissingHeader { len: bytes.len() });
        };

        if bytes.len() < version.header_size() {
            return Err(VolumeLoaderError::MissingHeader { len: bytes.len() });
        }

        match (version, little_endian) {
            (NiftiVersion::Nifti1, true) => Self::parse_v1::<LittleEndian>(bytes, true),
            (NiftiVersion::Nifti1, false) => Self::parse_v1::<BigEndian>(bytes, false),
            (NiftiVersion::Nifti2, true) => Self::parse_v2::<LittleEndian>(bytes, true),
            (NiftiVersion::Nifti2, false) => Self::parse_v2::<BigEndian>(bytes, false),
        }
    }

    #[allow(clippy::wildcard_imports)]
    fn parse_v1<E: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<Self, VolumeLoaderError> {
        use offsets_v1::*;

        let magic = &bytes[MAGIC..MAGIC + 4];
        if magic != b"n+1\0" && magic != b"ni1\0" {
            return Err(invalid_magic(magic));
        }

        let ndim = parse_ndim(E::read_i16(&bytes[DIM..DIM + 2]) as i64)?;
        let mut dim = [0i64; 7];
        for (i, value) in dim.iter_mut().enumerate() {
            let offset = DIM + 2 + i * 2;
            *value = E::read_i16(&bytes[offset..offset + 2]) as i64;
        }
        check_dims(&dim, ndim)?;

        let bitpix = E::read_i16(&bytes[BITPIX..BITPIX + 2]);
        let datatype = DataType::from_code(E::read_i16(&bytes[DATATYPE..DATATYPE + 2]), bitpix)?;

        let mut pixdim = [0.0f64; 8];
        for (i, value) in pixdim.iter_mut().enumerate() {
            let offset = PIXDIM + i * 4;
            *value = E::read_f32(&bytes[offset..offset + 4]) as f64;
        }

        let vox_offset = parse_vox_offset(E::read_f32(&bytes[VOX_OFFSET..VOX_OFFSET + 4]) as f64)?;

        Ok(Self {
            version: NiftiVersion::Nifti1,
            little_endian,
            ndim,
            dim,
            datatype,
            bitpix,
            pixdim,
            vox_offset,
            scl_slope: E::read_f32(&bytes[SCL_SLOPE..SCL_SLOPE + 4]) as f64,
            scl_inter: E::read_f32(&bytes[SCL_INTER..SCL_INTER + 4]) as f64,
            xyzt_units: bytes[XYZT_UNITS],
            descrip: read_text(&bytes[DESCRIP..AUX_FILE]),
        })
    }

    #[allow(clippy::wildcard_imports)]
    fn parse_v2<E: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<Self, VolumeLoaderError> {
        use offsets_v2::*;

        let magic = &bytes[MAGIC..MAGIC + 4];
        if magic != b"n+2\0" && magic != b"ni2\0" {
            return Err(invalid_magic(magic));
        }

        let ndim = parse_ndim(E::read_i64(&bytes[DIM..DIM + 8]))?;
        let mut dim = [0i64; 7];
        for (i, value) in dim.iter_mut().enumerate() {
            let offset = DIM + 8 + i * 8;
            *value = E::read_i64(&bytes[offset..offset + 8]);
        }
        check_dims(&dim, ndim)?;

        let bitpix = E::read_i16(&bytes[BITPIX..BITPIX + 2]);
        let datatype = DataType::from_code(E::read_i16(&bytes[DATATYPE..DATATYPE + 2]), bitpix)?;

        let mut pixdim = [0.0f64; 8];
        for (i, value) in pixdim.iter_mut().enumerate() {
            let offset = PIXDIM + i * 8;
            *value = E::read_f64(&bytes[offset..offset + 8]);
        }

        let vox_offset = E::read_i64(&bytes[VOX_OFFSET..VOX_OFFSET + 8]);
        if vox_offset < 0 {
            return Err(VolumeLoaderError::InvalidHeader(format!(
                "vox_offset must not be negative, got {vox_offset}"
            )));
        }

        Ok(Self {
            version: NiftiVersion::Nifti2,
            little_endian,
            ndim,
            dim,
            datatype,
            bitpix,
            pixdim,
            vox_offset,
            scl_slope: E::read_f64(&bytes[SCL_SLOPE..SCL_SLOPE + 8]),
            scl_inter: E::read_f64(&bytes[SCL_INTER..SCL_INTER + 8]),
            xyzt_units: bytes[XYZT_UNITS],
            descrip: read_text(&bytes[DESCRIP..AUX_FILE]),
        })
    }

    /// Spatial voxel counts `(x, y, z)`; undeclared axes count as 1.
    pub fn dimensions(&self) -> (usize, usize, usize) {
        let axis = |i: usize| {
            if i < self.ndim as usize {
                self.dim[i].max(1) as usize
            } else {
                1
            }
        };
        (axis(0), axis(1), axis(2))
    }

    /// Number of 3D volumes stacked along the higher dimensions.
    pub fn volume_count(&self) -> usize {
        self.dim
            .iter()
            .take(self.ndim as usize)
            .skip(3)
            .map(|&d| d.max(1) as usize)
            .fold(1usize, usize::saturating_mul)
    }

    /// Physical voxel size `(x, y, z)`; unusable entries become 1.0.
    pub fn spacing(&self) -> (f32, f32, f32) {
        let sanitize = |v: f64| {
            let v = v.abs();
            if v.is_finite() && v > 0.0 { v as f32 } else { 1.0 }
        };
        (
            sanitize(self.pixdim[1]),
            sanitize(self.pixdim[2]),
            sanitize(self.pixdim[3]),
        )
    }

    pub fn calibration(&self) -> Calibration {
        Calibration::new(self.scl_slope, self.scl_inter)
    }

    /// Byte offset of the first voxel in a single-file image.
    pub fn data_offset(&self) -> usize {
        (self.vox_offset as usize).max(self.version.min_vox_offset())
    }
}

fn invalid_magic(magic: &[u8]) -> VolumeLoaderError {
    VolumeLoaderError::InvalidHeader(format!("invalid NIfTI magic {magic:?}"))
}

fn parse_ndim(raw: i64) -> Result<u8, VolumeLoaderError> {
    if !(1..=7).contains(&raw) {
        return Err(VolumeLoaderError::InvalidHeader(format!(
            "ndim must be 1..=7, got {raw}"
        )));
    }
    Ok(raw as u8)
}

fn check_dims(dim: &[i64; 7], ndim: u8) -> Result<(), VolumeLoaderError> {
    for (i, &d) in dim.iter().take(ndim as usize).enumerate() {
        if d < 0 {
            return Err(VolumeLoaderError::InvalidHeader(format!(
                "dimension {} has negative value: {d}",
                i + 1
            )));
        }
    }
    Ok(())
}

fn parse_vox_offset(raw: f64) -> Result<i64, VolumeLoaderError> {
    if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 {
        return Err(VolumeLoaderError::InvalidHeader(format!(
            "vox_offset must be a non-negative integer, got {raw}"
        )));
    }
    Ok(raw as i64)
}

fn read_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn v1_header<E: ByteOrder>(dims: [i16; 3], datatype: i16, bitpix: i16) -> Vec<u8> {
        let mut bytes = vec![0u8; 352];
        E::write_i32(&mut bytes[0..4], 348);
        E::write_i16(&mut bytes[40..42], 3);
        for (i, d) in dims.iter().enumerate() {
            E::write_i16(&mut bytes[42 + i * 2..44 + i * 2], *d);
        }
        E::write_i16(&mut bytes[70..72], datatype);
        E::write_i16(&mut bytes[72..74], bitpix);
        for i in 0..4 {
            E::write_f32(&mut bytes[76 + i * 4..80 + i * 4], 1.0);
        }
        E::write_f32(&mut bytes[108..112], 352.0);
        bytes[344..348].copy_from_slice(b"n+1\0");
        bytes
    }

    #[test]
    fn test_parse_little_endian_v1() {
        let bytes = v1_header::<LittleEndian>([12, 13, 14], 4, 16);
        let header = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.version, NiftiVersion::Nifti1);
        assert!(header.little_endian);
        assert_eq!(header.dimensions(), (12, 13, 14));
        assert_eq!(header.datatype, DataType::Int16);
        assert_eq!(header.data_offset(), 352);
    }

    #[test]
    fn test_parse_big_endian_v1() {
        let bytes = v1_header::<BigEndian>([20, 21, 22], 512, 16);
        let header = NiftiHeader::from_bytes(&bytes).unwrap();
        assert!(!header.little_endian);
        assert_eq!(header.dimensions(), (20, 21, 22));
        assert_eq!(header.datatype, DataType::UInt16);
    }

    #[test]
    fn test_parse_v2() {
        let mut bytes = vec![0u8; 544];
        LittleEndian::write_i32(&mut bytes[0..4], 540);
        bytes[4..8].copy_from_slice(b"n+2\0");
        LittleEndian::write_i16(&mut bytes[12..14], 16);
        LittleEndian::write_i16(&mut bytes[14..16], 32);
        let mut dims = &mut bytes[16..48];
        for d in [3i64, 30, 31, 32] {
            dims.write_i64::<LittleEndian>(d).unwrap();
        }
        for i in 0..4 {
            LittleEndian::write_f64(&mut bytes[104 + i * 8..112 + i * 8], 0.5);
        }
        LittleEndian::write_i64(&mut bytes[168..176], 544);
        LittleEndian::write_f64(&mut bytes[176..184], 2.0);
        LittleEndian::write_f64(&mut bytes[184..192], -5.0);

        let header = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.version, NiftiVersion::Nifti2);
        assert_eq!(header.dimensions(), (30, 31, 32));
        assert_eq!(header.datatype, DataType::Float32);
        assert_eq!(header.spacing(), (0.5, 0.5, 0.5));
        assert_eq!(header.calibration(), Calibration::new(2.0, -5.0));
    }

    #[test]
    fn test_short_buffer_is_missing_header() {
        let err = NiftiHeader::from_bytes(&[0u8; 100]).unwrap_err();
        assert_eq!(err.code(), "missing-header");
    }

    #[test]
    fn test_bitpix_mismatch_is_unsupported() {
        let bytes = v1_header::<LittleEndian>([12, 12, 12], 4, 8);
        let err = NiftiHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            VolumeLoaderError::UnsupportedDatatype { code: 4, bitpix: 8 }
        ));
    }

    #[test]
    fn test_unknown_datatype_is_unsupported() {
        let bytes = v1_header::<LittleEndian>([12, 12, 12], 128, 24);
        let err = NiftiHeader::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.code(), "unsupported-datatype");
    }

    #[test]
    fn test_zero_slope_defaults_to_identity() {
        let bytes = v1_header::<LittleEndian>([12, 12, 12], 2, 8);
        let header = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.calibration(), Calibration::default());
    }

    #[test]
    fn test_four_dimensional_volume_count() {
        let mut bytes = v1_header::<LittleEndian>([12, 12, 12], 2, 8);
        LittleEndian::write_i16(&mut bytes[40..42], 4);
        LittleEndian::write_i16(&mut bytes[48..50], 3);
        let header = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.volume_count(), 3);
        assert_eq!(header.dimensions(), (12, 12, 12));
    }
}
