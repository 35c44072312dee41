//! In-memory LAS fixtures for unit tests.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub const SCALE: f64 = 0.001;

pub fn record_length(format: u8) -> u16 {
    match format {
        0 => 20,
        1 => 28,
        2 => 26,
        3 => 34,
        4 => 57,
        5 => 63,
        6 => 30,
        7 => 36,
        8 => 38,
        9 => 59,
        10 => 67,
        _ => panic!("unknown point format {format}"),
    }
}

/// All the encodable fields of a LAS point record. Fields not present in the
/// target format are ignored by [RawPoint::encode].
#[derive(Clone, Debug, Default)]
pub struct RawPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u16,
    pub flags1: u8,
    pub flags2: u8,
    pub classification: u8,
    pub scan_angle_rank: i8,
    pub user_data: u8,
    pub scan_angle: i16,
    pub point_source_id: u16,
    pub gps_time: f64,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub nir: u16,
    pub wave_descriptor_index: u8,
    pub waveform_data_offset: u64,
    pub waveform_packet_size: u32,
    pub waveform_location: f32,
    pub parametric_dx: f32,
    pub parametric_dy: f32,
    pub parametric_dz: f32,
    pub extra: Vec<u8>,
}

impl RawPoint {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        RawPoint {
            x,
            y,
            z,
            ..Default::default()
        }
    }

    pub fn encode(&self, format: u8) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_i32::<LittleEndian>((self.x / SCALE).round() as i32)
            .unwrap();
        w.write_i32::<LittleEndian>((self.y / SCALE).round() as i32)
            .unwrap();
        w.write_i32::<LittleEndian>((self.z / SCALE).round() as i32)
            .unwrap();
        w.write_u16::<LittleEndian>(self.intensity).unwrap();
        w.write_u8(self.flags1).unwrap();
        if format >= 6 {
            w.write_u8(self.flags2).unwrap();
        }
        w.write_u8(self.classification).unwrap();
        if format < 6 {
            w.write_i8(self.scan_angle_rank).unwrap();
        }
        w.write_u8(self.user_data).unwrap();
        if format >= 6 {
            w.write_i16::<LittleEndian>(self.scan_angle).unwrap();
        }
        w.write_u16::<LittleEndian>(self.point_source_id).unwrap();
        if matches!(format, 1 | 3..=10) {
            w.write_f64::<LittleEndian>(self.gps_time).unwrap();
        }
        if matches!(format, 2 | 3 | 5 | 7 | 8 | 10) {
            w.write_u16::<LittleEndian>(self.red).unwrap();
            w.write_u16::<LittleEndian>(self.green).unwrap();
            w.write_u16::<LittleEndian>(self.blue).unwrap();
        }
        if matches!(format, 8 | 10) {
            w.write_u16::<LittleEndian>(self.nir).unwrap();
        }
        if matches!(format, 4 | 5 | 9 | 10) {
            w.write_u8(self.wave_descriptor_index).unwrap();
            w.write_u64::<LittleEndian>(self.waveform_data_offset).unwrap();
            w.write_u32::<LittleEndian>(self.waveform_packet_size).unwrap();
            w.write_f32::<LittleEndian>(self.waveform_location).unwrap();
            w.write_f32::<LittleEndian>(self.parametric_dx).unwrap();
            w.write_f32::<LittleEndian>(self.parametric_dy).unwrap();
            w.write_f32::<LittleEndian>(self.parametric_dz).unwrap();
        }
        w.extend_from_slice(&self.extra);
        w
    }
}

/// Builds a syntactically valid LAS byte stream for tests.
pub struct LasBuilder {
    minor: u8,
    format: u8,
    global_encoding: u16,
    extra_bytes: u16,
    vlrs: Vec<(String, u16, Vec<u8>)>,
    evlrs: Vec<(String, u16, Vec<u8>)>,
    points: Vec<Vec<u8>>,
}

impl LasBuilder {
    pub fn new(major: u8, minor: u8) -> Self {
        assert_eq!(major, 1);
        LasBuilder {
            minor,
            format: 0,
            global_encoding: 0,
            extra_bytes: 0,
            vlrs: Vec::new(),
            evlrs: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn format(mut self, format: u8) -> Self {
        self.format = format;
        self
    }

    pub fn global_encoding(mut self, bits: u16) -> Self {
        self.global_encoding = bits;
        self
    }

    pub fn extra_bytes(mut self, n: u16) -> Self {
        self.extra_bytes = n;
        self
    }

    pub fn vlr(mut self, user_id: &str, record_id: u16, data: Vec<u8>) -> Self {
        self.vlrs.push((user_id.to_string(), record_id, data));
        self
    }

    pub fn evlr(mut self, user_id: &str, record_id: u16, data: Vec<u8>) -> Self {
        self.evlrs.push((user_id.to_string(), record_id, data));
        self
    }

    pub fn point(mut self, xyz: &[f64; 3], intensity: u16, classification: u8) -> Self {
        let raw = RawPoint {
            intensity,
            classification,
            ..RawPoint::at(xyz[0], xyz[1], xyz[2])
        };
        self.points.push(raw.encode(self.format));
        self
    }

    pub fn raw_point(mut self, raw: &RawPoint) -> Self {
        self.points.push(raw.encode(self.format));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header_size: u16 = match self.minor {
            3 => 235,
            4 => 375,
            _ => 227,
        };
        let vlr_bytes: usize = self.vlrs.iter().map(|(_, _, d)| 54 + d.len()).sum();
        let offset_to_points = header_size as u32 + vlr_bytes as u32;
        let record_length = record_length(self.format) + self.extra_bytes;
        let point_bytes: usize = self.points.iter().map(|p| p.len()).sum();
        let start_of_first_evlr = offset_to_points as u64 + point_bytes as u64;

        let mut w = Vec::new();
        w.extend_from_slice(b"LASF");
        w.write_u16::<LittleEndian>(0).unwrap(); // file source id
        w.write_u16::<LittleEndian>(self.global_encoding).unwrap();
        w.write_u32::<LittleEndian>(0).unwrap(); // guid 1
        w.write_u16::<LittleEndian>(0).unwrap(); // guid 2
        w.write_u16::<LittleEndian>(0).unwrap(); // guid 3
        w.extend_from_slice(&[0u8; 8]); // guid 4
        w.write_u8(1).unwrap();
        w.write_u8(self.minor).unwrap();
        w.extend_from_slice(&pad(b"test system", 32));
        w.extend_from_slice(&pad(b"cesium-tiler tests", 32));
        w.write_u16::<LittleEndian>(1).unwrap(); // day
        w.write_u16::<LittleEndian>(2024).unwrap(); // year
        w.write_u16::<LittleEndian>(header_size).unwrap();
        w.write_u32::<LittleEndian>(offset_to_points).unwrap();
        w.write_u32::<LittleEndian>(self.vlrs.len() as u32).unwrap();
        w.write_u8(self.format).unwrap();
        w.write_u16::<LittleEndian>(record_length).unwrap();
        let legacy_count = if self.minor < 4 {
            self.points.len() as u32
        } else {
            0
        };
        w.write_u32::<LittleEndian>(legacy_count).unwrap();
        for _ in 0..5 {
            w.write_u32::<LittleEndian>(0).unwrap();
        }
        for scale in [SCALE, SCALE, SCALE] {
            w.write_f64::<LittleEndian>(scale).unwrap();
        }
        for offset in [0.0, 0.0, 0.0] {
            w.write_f64::<LittleEndian>(offset).unwrap();
        }
        // max/min extents, interleaved per axis
        for bound in [1000.0, -1000.0, 1000.0, -1000.0, 1000.0, -1000.0] {
            w.write_f64::<LittleEndian>(bound).unwrap();
        }
        if self.minor == 3 {
            w.write_u64::<LittleEndian>(0).unwrap();
        }
        if self.minor == 4 {
            w.write_u64::<LittleEndian>(0).unwrap(); // waveform start
            let evlr_start = if self.evlrs.is_empty() {
                0
            } else {
                start_of_first_evlr
            };
            w.write_u64::<LittleEndian>(evlr_start).unwrap();
            w.write_u32::<LittleEndian>(self.evlrs.len() as u32).unwrap();
            w.write_u64::<LittleEndian>(self.points.len() as u64).unwrap();
            for _ in 0..15 {
                w.write_u64::<LittleEndian>(0).unwrap();
            }
        }
        assert_eq!(w.len(), header_size as usize);

        for (user_id, record_id, data) in &self.vlrs {
            w.write_u16::<LittleEndian>(0).unwrap(); // reserved
            w.extend_from_slice(&pad(user_id.as_bytes(), 16));
            w.write_u16::<LittleEndian>(*record_id).unwrap();
            w.write_u16::<LittleEndian>(data.len() as u16).unwrap();
            w.extend_from_slice(&[0u8; 32]); // description
            w.write_all(data).unwrap();
        }

        for point in &self.points {
            assert_eq!(point.len(), record_length as usize);
            w.write_all(point).unwrap();
        }

        for (user_id, record_id, data) in &self.evlrs {
            w.write_u16::<LittleEndian>(0).unwrap(); // reserved
            w.extend_from_slice(&pad(user_id.as_bytes(), 16));
            w.write_u16::<LittleEndian>(*record_id).unwrap();
            w.write_u64::<LittleEndian>(data.len() as u64).unwrap();
            w.extend_from_slice(&[0u8; 32]); // description
            w.write_all(data).unwrap();
        }
        w
    }
}

/// Encodes a GeoTIFF key directory payload (record 34735)
pub fn geokey_directory(entries: &[(u16, u16, u16, u16)]) -> Vec<u8> {
    let mut w = Vec::new();
    w.write_u16::<LittleEndian>(1).unwrap(); // key directory version
    w.write_u16::<LittleEndian>(1).unwrap(); // key revision
    w.write_u16::<LittleEndian>(0).unwrap(); // minor revision
    w.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    for (key, location, count, value) in entries {
        w.write_u16::<LittleEndian>(*key).unwrap();
        w.write_u16::<LittleEndian>(*location).unwrap();
        w.write_u16::<LittleEndian>(*count).unwrap();
        w.write_u16::<LittleEndian>(*value).unwrap();
    }
    w
}

fn pad(data: &[u8], n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    out[..data.len()].copy_from_slice(data);
    out
}

/// Reader and converter stand-ins for tree and writer tests.
pub mod mock {
    use crate::convert::{ConverterFactory, CoordinateConverter};
    use crate::error::{Error, Result};
    use crate::geom::Vector;
    use crate::point::Point;
    use crate::reader::LasReader;
    use std::sync::{Arc, Mutex};

    /// A [LasReader] serving a fixed list of points
    pub struct MockReader {
        points: Vec<Point>,
        crs: String,
        cursor: Mutex<usize>,
    }

    impl MockReader {
        pub fn new(points: &[[f64; 3]], crs: &str) -> Self {
            let points = points
                .iter()
                .map(|p| Point {
                    x: p[0],
                    y: p[1],
                    z: p[2],
                    ..Default::default()
                })
                .collect();
            Self::with_wire_points(points, crs)
        }

        pub fn with_wire_points(points: Vec<Point>, crs: &str) -> Self {
            MockReader {
                points,
                crs: crs.to_string(),
                cursor: Mutex::new(0),
            }
        }
    }

    impl LasReader for MockReader {
        fn point_count(&self) -> u64 {
            self.points.len() as u64
        }

        fn crs(&self) -> &str {
            &self.crs
        }

        fn next_point(&self) -> Result<Point> {
            let mut cursor = self.cursor.lock().unwrap();
            if *cursor >= self.points.len() {
                return Err(Error::InvariantViolation(
                    "read past the declared point count".to_string(),
                ));
            }
            let pt = self.points[*cursor].clone();
            *cursor += 1;
            Ok(pt)
        }
    }

    /// A converter that hands coordinates through untouched, as if the
    /// source CRS were already ECEF
    pub struct PassThroughConverter;

    impl CoordinateConverter for PassThroughConverter {
        fn transform(&self, _src: &str, _dst: &str, v: Vector) -> Result<Vector> {
            Ok(v)
        }
    }

    /// A factory producing [PassThroughConverter] instances
    pub fn identity_factory() -> ConverterFactory {
        Arc::new(|| Ok(Box::new(PassThroughConverter) as Box<dyn CoordinateConverter>))
    }
}
