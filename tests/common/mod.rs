#![allow(dead_code)]

use std::io::Write;

use byteorder::ByteOrder;
use flate2::Compression;
use flate2::write::GzEncoder;

pub const UINT8: i16 = 2;
pub const INT16: i16 = 4;
pub const FLOAT32: i16 = 16;
pub const FLOAT64: i16 = 64;

/// Minimal single-file NIfTI-1 image: 348-byte header, 4 extension bytes, payload.
pub struct Nifti1 {
    pub dims: [i16; 3],
    pub datatype: i16,
    pub bitpix: i16,
    pub spacing: [f32; 3],
    pub slope: f32,
    pub intercept: f32,
}

impl Nifti1 {
    pub fn new(dims: [i16; 3], datatype: i16, bitpix: i16) -> Self {
        Self {
            dims,
            datatype,
            bitpix,
            spacing: [1.0; 3],
            slope: 1.0,
            intercept: 0.0,
        }
    }

    pub fn calibrated(mut self, slope: f32, intercept: f32) -> Self {
        self.slope = slope;
        self.intercept = intercept;
        self
    }

    pub fn spacing(mut self, spacing: [f32; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    pub fn header<E: ByteOrder>(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 352];
        E::write_i32(&mut bytes[0..4], 348);
        E::write_i16(&mut bytes[40..42], 3);
        for (i, d) in self.dims.iter().enumerate() {
            E::write_i16(&mut bytes[42 + i * 2..44 + i * 2], *d);
        }
        E::write_i16(&mut bytes[70..72], self.datatype);
        E::write_i16(&mut bytes[72..74], self.bitpix);
        E::write_f32(&mut bytes[76..80], 1.0);
        for (i, s) in self.spacing.iter().enumerate() {
            E::write_f32(&mut bytes[80 + i * 4..84 + i * 4], *s);
        }
        E::write_f32(&mut bytes[108..112], 352.0);
        E::write_f32(&mut bytes[112..116], self.slope);
        E::write_f32(&mut bytes[116..120], self.intercept);
        bytes[344..348].copy_from_slice(b"n+1\0");
        bytes
    }

    /// Header followed by `payload` verbatim.
    pub fn file<E: ByteOrder>(&self, payload: &[u8]) -> Vec<u8> {
        let mut bytes = self.header::<E>();
        bytes.extend_from_slice(payload);
        bytes
    }

    pub fn uint8_file<E: ByteOrder>(&self, value: u8) -> Vec<u8> {
        self.file::<E>(&vec![value; self.voxel_count()])
    }

    pub fn int16_file<E: ByteOrder>(&self, f: impl Fn(usize, usize, usize) -> i16) -> Vec<u8> {
        let [nx, ny, nz] = self.dims.map(|d| d as usize);
        let mut payload = vec![0u8; self.voxel_count() * 2];
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let i = x + y * nx + z * nx * ny;
                    E::write_i16(&mut payload[i * 2..i * 2 + 2], f(x, y, z));
                }
            }
        }
        self.file::<E>(&payload)
    }
}

/// Single-file NIfTI-2 header (540 bytes plus 4 extension bytes) with 64-bit dims.
pub fn nifti2_header<E: ByteOrder>(dims: [i64; 3], datatype: i16, bitpix: i16) -> Vec<u8> {
    let mut bytes = vec![0u8; 544];
    E::write_i32(&mut bytes[0..4], 540);
    bytes[4..8].copy_from_slice(b"n+2\0");
    E::write_i16(&mut bytes[12..14], datatype);
    E::write_i16(&mut bytes[14..16], bitpix);
    E::write_i64(&mut bytes[16..24], 3);
    for (i, d) in dims.iter().enumerate() {
        E::write_i64(&mut bytes[24 + i * 8..32 + i * 8], *d);
    }
    for i in 0..4 {
        E::write_f64(&mut bytes[104 + i * 8..112 + i * 8], 1.0);
    }
    E::write_i64(&mut bytes[168..176], 544);
    E::write_f64(&mut bytes[176..184], 1.0);
    bytes
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}
