//! Decoded LAS point records for point formats 0 through 10.

use crate::error::Result;
use crate::geom::CloudPoint;
use crate::header::Header;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Scan direction of the mirror at the time of the pulse
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanDirection {
    Negative,
    Positive,
}

/// Whether the point sits at the end of a scan line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeOfFlightLine {
    Normal,
    EndOfScan,
}

/// Flags qualifying the classification value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassificationFlag {
    Synthetic,
    KeyPoint,
    Withheld,
    Overlap,
}

/// A decoded LAS point record. Compatible with all point formats 0 to 10,
/// fields unsupported by the record format are left at their zero values.
/// The coordinates are already scaled and offset by the header values.
#[derive(Clone, Debug, Default)]
pub struct Point {
    pub format: u8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u16,
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
    /// residual record bytes, kept opaque
    pub extra: Vec<u8>,
    pub(crate) flags1: u8,
    pub(crate) flags2: u8,
    pub(crate) classification_raw: u8,
}

impl Point {
    /// Decodes one point record. `data` must hold exactly
    /// `point_data_record_length` bytes as declared by the header.
    pub fn decode(data: &[u8], header: &Header) -> Result<Point> {
        let format = header.point_data_record_format;
        let mut r = data;
        let mut p = Point {
            format,
            ..Default::default()
        };

        p.x = r.read_i32::<LittleEndian>()? as f64 * header.x_scale_factor + header.x_offset;
        p.y = r.read_i32::<LittleEndian>()? as f64 * header.y_scale_factor + header.y_offset;
        p.z = r.read_i32::<LittleEndian>()? as f64 * header.z_scale_factor + header.z_offset;
        p.intensity = r.read_u16::<LittleEndian>()?;
        p.flags1 = r.read_u8()?;
        if format_has_extra_flag_byte(format) {
            p.flags2 = r.read_u8()?;
        }
        p.classification_raw = r.read_u8()?;
        p.classification = if format < 6 {
            // the upper 3 bits carry the classification flags
            p.classification_raw & 0b0001_1111
        } else {
            p.classification_raw
        };
        if format_has_scan_angle_rank(format) {
            p.scan_angle_rank = r.read_i8()?;
        }
        p.user_data = r.read_u8()?;
        if format_has_scan_angle(format) {
            p.scan_angle = r.read_i16::<LittleEndian>()?;
        }
        p.point_source_id = r.read_u16::<LittleEndian>()?;
        if format_has_gps_time(format) {
            p.gps_time = r.read_f64::<LittleEndian>()?;
        }
        if format_has_rgb(format) {
            p.red = r.read_u16::<LittleEndian>()?;
            p.green = r.read_u16::<LittleEndian>()?;
            p.blue = r.read_u16::<LittleEndian>()?;
        }
        if format_has_nir(format) {
            p.nir = r.read_u16::<LittleEndian>()?;
        }
        if format_has_wave_packets(format) {
            p.wave_descriptor_index = r.read_u8()?;
            p.waveform_data_offset = r.read_u64::<LittleEndian>()?;
            p.waveform_packet_size = r.read_u32::<LittleEndian>()?;
            p.waveform_location = r.read_f32::<LittleEndian>()?;
            p.parametric_dx = r.read_f32::<LittleEndian>()?;
            p.parametric_dy = r.read_f32::<LittleEndian>()?;
            p.parametric_dz = r.read_f32::<LittleEndian>()?;
        }
        r.read_to_end(&mut p.extra)?;
        Ok(p)
    }

    pub fn return_number(&self) -> u8 {
        if self.format < 6 {
            self.flags1 & 0b111
        } else {
            self.flags1 & 0b1111
        }
    }

    pub fn number_of_returns(&self) -> u8 {
        if self.format < 6 {
            (self.flags1 & 0b11_1000) >> 3
        } else {
            (self.flags1 & 0b1111_0000) >> 4
        }
    }

    pub fn scan_direction(&self) -> ScanDirection {
        let bit = if self.format < 6 {
            (self.flags1 >> 6) & 0b1
        } else {
            (self.flags2 >> 6) & 0b1
        };
        if bit == 0 {
            ScanDirection::Negative
        } else {
            ScanDirection::Positive
        }
    }

    pub fn edge_of_flight_line(&self) -> EdgeOfFlightLine {
        let bit = if self.format < 6 {
            self.flags1 >> 7
        } else {
            self.flags2 >> 7
        };
        if bit == 0 {
            EdgeOfFlightLine::Normal
        } else {
            EdgeOfFlightLine::EndOfScan
        }
    }

    /// The scanner channel, only meaningful for formats 6 and above
    pub fn scanner_channel(&self) -> u8 {
        if self.format < 6 {
            0
        } else {
            (self.flags2 & 0b11_0000) >> 4
        }
    }

    pub fn classification_flags(&self) -> Vec<ClassificationFlag> {
        let mut flags = Vec::new();
        if self.format < 6 {
            if (self.classification_raw >> 5) & 0b1 == 1 {
                flags.push(ClassificationFlag::Synthetic);
            }
            if (self.classification_raw >> 6) & 0b1 == 1 {
                flags.push(ClassificationFlag::KeyPoint);
            }
            if (self.classification_raw >> 7) & 0b1 == 1 {
                flags.push(ClassificationFlag::Withheld);
            }
            return flags;
        }
        if self.flags2 & 0b1 == 1 {
            flags.push(ClassificationFlag::Synthetic);
        }
        if (self.flags2 >> 1) & 0b1 == 1 {
            flags.push(ClassificationFlag::KeyPoint);
        }
        if (self.flags2 >> 2) & 0b1 == 1 {
            flags.push(ClassificationFlag::Withheld);
        }
        if (self.flags2 >> 3) & 0b1 == 1 {
            flags.push(ClassificationFlag::Overlap);
        }
        flags
    }

    /// Converts the record into the internal 8 bit per channel representation.
    /// Colors are 16 bit in most LAS files and get divided by 256, unless the
    /// input declares 8 bit colors in which case they are kept as is. The
    /// position is left untouched and must be overwritten with local frame
    /// coordinates by the caller.
    pub fn to_cloud_point(&self, eight_bit_colors: bool) -> CloudPoint {
        let divisor = if eight_bit_colors { 1 } else { 256 };
        CloudPoint {
            x: self.x as f32,
            y: self.y as f32,
            z: self.z as f32,
            r: (self.red / divisor) as u8,
            g: (self.green / divisor) as u8,
            b: (self.blue / divisor) as u8,
            intensity: self.intensity as u8,
            classification: self.classification,
        }
    }
}

pub(crate) fn format_has_gps_time(format: u8) -> bool {
    matches!(format, 1 | 3..=10)
}

pub(crate) fn format_has_rgb(format: u8) -> bool {
    matches!(format, 2 | 3 | 5 | 7 | 8 | 10)
}

pub(crate) fn format_has_nir(format: u8) -> bool {
    matches!(format, 8 | 10)
}

pub(crate) fn format_has_wave_packets(format: u8) -> bool {
    matches!(format, 4 | 5 | 9 | 10)
}

pub(crate) fn format_has_scan_angle_rank(format: u8) -> bool {
    format <= 5
}

pub(crate) fn format_has_scan_angle(format: u8) -> bool {
    matches!(format, 6..=10)
}

pub(crate) fn format_has_extra_flag_byte(format: u8) -> bool {
    matches!(format, 6..=10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{LasBuilder, RawPoint};
    use std::io::Cursor;

    fn decode_single(format: u8, raw: &RawPoint) -> Point {
        let data = LasBuilder::new(1, if format >= 6 { 4 } else { 2 })
            .format(format)
            .raw_point(raw)
            .build();
        let header = Header::read_from(&mut Cursor::new(&data)).unwrap();
        let record = &data[header.offset_to_point_data as usize..];
        Point::decode(
            &record[..header.point_data_record_length as usize],
            &header,
        )
        .unwrap()
    }

    fn sample_raw() -> RawPoint {
        RawPoint {
            intensity: 4096,
            classification: 2,
            scan_angle_rank: -13,
            user_data: 77,
            scan_angle: -2500,
            point_source_id: 31,
            gps_time: 123456.789,
            red: 65535,
            green: 32768,
            blue: 256,
            nir: 512,
            wave_descriptor_index: 3,
            waveform_data_offset: 99,
            waveform_packet_size: 1024,
            waveform_location: 1.5,
            parametric_dx: 0.25,
            parametric_dy: -0.5,
            parametric_dz: 1.0,
            ..RawPoint::at(1.234, -5.678, 90.123)
        }
    }

    #[test]
    fn decodes_every_point_format() {
        let raw = sample_raw();
        for format in 0u8..=10 {
            let p = decode_single(format, &raw);
            assert!((p.x - 1.234).abs() < 1e-9, "format {format}");
            assert!((p.y - -5.678).abs() < 1e-9, "format {format}");
            assert!((p.z - 90.123).abs() < 1e-9, "format {format}");
            assert_eq!(p.intensity, 4096, "format {format}");
            assert_eq!(p.classification, 2, "format {format}");
            assert_eq!(p.user_data, 77, "format {format}");
            assert_eq!(p.point_source_id, 31, "format {format}");

            if format <= 5 {
                assert_eq!(p.scan_angle_rank, -13, "format {format}");
            } else {
                assert_eq!(p.scan_angle, -2500, "format {format}");
            }
            if format_has_gps_time(format) {
                assert_eq!(p.gps_time, 123456.789, "format {format}");
            } else {
                assert_eq!(p.gps_time, 0.0, "format {format}");
            }
            if format_has_rgb(format) {
                assert_eq!((p.red, p.green, p.blue), (65535, 32768, 256));
            } else {
                assert_eq!((p.red, p.green, p.blue), (0, 0, 0));
            }
            if format_has_nir(format) {
                assert_eq!(p.nir, 512, "format {format}");
            }
            if format_has_wave_packets(format) {
                assert_eq!(p.wave_descriptor_index, 3);
                assert_eq!(p.waveform_data_offset, 99);
                assert_eq!(p.waveform_packet_size, 1024);
                assert_eq!(p.waveform_location, 1.5);
                assert_eq!(
                    (p.parametric_dx, p.parametric_dy, p.parametric_dz),
                    (0.25, -0.5, 1.0)
                );
            }
        }
    }

    #[test]
    fn legacy_formats_split_classification_bits() {
        let raw = RawPoint {
            // classification 5 plus synthetic and withheld bits
            classification: 0b1010_0101,
            ..RawPoint::at(0.0, 0.0, 0.0)
        };
        let p = decode_single(0, &raw);
        assert_eq!(p.classification, 5);
        assert_eq!(
            p.classification_flags(),
            vec![ClassificationFlag::Synthetic, ClassificationFlag::Withheld]
        );
    }

    #[test]
    fn extended_formats_keep_full_classification() {
        let raw = RawPoint {
            classification: 200,
            flags2: 0b0000_1111,
            ..RawPoint::at(0.0, 0.0, 0.0)
        };
        let p = decode_single(6, &raw);
        assert_eq!(p.classification, 200);
        assert_eq!(
            p.classification_flags(),
            vec![
                ClassificationFlag::Synthetic,
                ClassificationFlag::KeyPoint,
                ClassificationFlag::Withheld,
                ClassificationFlag::Overlap,
            ]
        );
    }

    #[test]
    fn legacy_flag_bits() {
        let raw = RawPoint {
            // return 3 of 5, positive scan direction, edge of flight line
            flags1: 0b1110_1011,
            ..RawPoint::at(0.0, 0.0, 0.0)
        };
        let p = decode_single(1, &raw);
        assert_eq!(p.return_number(), 3);
        assert_eq!(p.number_of_returns(), 5);
        assert_eq!(p.scan_direction(), ScanDirection::Positive);
        assert_eq!(p.edge_of_flight_line(), EdgeOfFlightLine::EndOfScan);
        assert_eq!(p.scanner_channel(), 0);
    }

    #[test]
    fn extended_flag_bits() {
        let raw = RawPoint {
            // return 11 of 14
            flags1: 0b1110_1011,
            // scanner channel 2, positive direction, end of scan
            flags2: 0b1110_0000,
            ..RawPoint::at(0.0, 0.0, 0.0)
        };
        let p = decode_single(6, &raw);
        assert_eq!(p.return_number(), 11);
        assert_eq!(p.number_of_returns(), 14);
        assert_eq!(p.scanner_channel(), 2);
        assert_eq!(p.scan_direction(), ScanDirection::Positive);
        assert_eq!(p.edge_of_flight_line(), EdgeOfFlightLine::EndOfScan);
    }

    #[test]
    fn residual_bytes_are_kept_as_extra() {
        let raw = RawPoint {
            extra: vec![0xAA, 0xBB, 0xCC],
            ..RawPoint::at(0.0, 0.0, 0.0)
        };
        let data = LasBuilder::new(1, 2)
            .format(0)
            .extra_bytes(3)
            .raw_point(&raw)
            .build();
        let header = Header::read_from(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.point_data_record_length, 23);
        let record = &data[header.offset_to_point_data as usize..];
        let p = Point::decode(&record[..23], &header).unwrap();
        assert_eq!(p.extra, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn cloud_point_color_scaling() {
        let raw = RawPoint {
            red: 65535,
            green: 512,
            blue: 255,
            intensity: 200,
            classification: 4,
            ..RawPoint::at(1.0, 2.0, 3.0)
        };
        let p = decode_single(2, &raw);
        let sixteen = p.to_cloud_point(false);
        assert_eq!((sixteen.r, sixteen.g, sixteen.b), (255, 2, 0));
        assert_eq!(sixteen.intensity, 200);
        assert_eq!(sixteen.classification, 4);

        let eight = p.to_cloud_point(true);
        assert_eq!(eight.r, 255);
        assert_eq!(eight.g, 0); // 512 does not fit 8 bits, wraps on cast
        assert_eq!(eight.b, 255);
    }
}
