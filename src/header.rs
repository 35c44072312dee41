//! LAS header parsing, common to format versions 1.1 through 1.4.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Meaning of the GPS time field of point records, from global encoding bit 0
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpsTimeType {
    #[default]
    Week,
    AdjustedStandard,
}

/// The global encoding bit flags of the LAS header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalEncoding {
    pub gps_time_type: GpsTimeType,
    pub internal_waveform_data: bool,
    pub external_waveform_data: bool,
    pub synthetic_return_numbers: bool,
    pub wkt: bool,
}

impl GlobalEncoding {
    fn from_bits(bits: u16) -> Result<Self> {
        let ge = GlobalEncoding {
            gps_time_type: if bits & 0b1 == 0 {
                GpsTimeType::Week
            } else {
                GpsTimeType::AdjustedStandard
            },
            internal_waveform_data: bits & 0b10 != 0,
            external_waveform_data: bits & 0b100 != 0,
            synthetic_return_numbers: bits & 0b1000 != 0,
            wkt: bits & 0b10000 != 0,
        };
        if ge.internal_waveform_data && ge.external_waveform_data {
            return Err(Error::InconsistentWaveformFlags);
        }
        Ok(ge)
    }
}

/// A LAS header. The structure is compatible with format versions 1.1 to 1.4,
/// fields absent in a version are left at their zero values.
#[derive(Clone, Debug, Default)]
pub struct Header {
    pub file_source_id: u16,
    pub global_encoding: GlobalEncoding,
    pub project_id_guid_1: u32,
    pub project_id_guid_2: u16,
    pub project_id_guid_3: u16,
    pub project_id_guid_4: String,
    pub version_major: u8,
    pub version_minor: u8,
    pub system_identifier: String,
    pub generating_software: String,
    pub creation_day: u16,
    pub creation_year: u16,
    pub header_size: u16,
    pub offset_to_point_data: u32,
    pub number_of_vlrs: u32,
    pub point_data_record_format: u8,
    pub point_data_record_length: u16,
    pub legacy_number_of_point_records: u32,
    pub legacy_number_of_points_by_return: [u32; 5],
    pub x_scale_factor: f64,
    pub y_scale_factor: f64,
    pub z_scale_factor: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    pub z_offset: f64,
    pub max_x: f64,
    pub min_x: f64,
    pub max_y: f64,
    pub min_y: f64,
    pub max_z: f64,
    pub min_z: f64,
    pub start_of_waveform_data_packet_record: u64,
    pub start_of_first_evlr: u64,
    pub number_of_evlrs: u32,
    pub number_of_point_records: u64,
    pub number_of_points_by_return: [u64; 15],
}

impl Header {
    /// Reads a LAS header from the given source. The stream must be
    /// positioned at the start of the file.
    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let mut header = Header::default();
        header.read_version_agnostic_section(src)?;
        header.read_version_specific_section(src)?;
        Ok(header)
    }

    /// Returns the number of points declared by the header, interpreting the
    /// legacy or the 64 bit field as appropriate for the format version.
    pub fn point_count(&self) -> u64 {
        if self.version_minor < 4 {
            self.legacy_number_of_point_records as u64
        } else {
            self.number_of_point_records
        }
    }

    // The header section shared by all versions from 1.1 to 1.4
    fn read_version_agnostic_section<R: Read>(&mut self, src: &mut R) -> Result<()> {
        let mut signature = [0u8; 4];
        src.read_exact(&mut signature)?;
        if &signature != b"LASF" {
            return Err(Error::BadSignature);
        }
        self.file_source_id = src.read_u16::<LittleEndian>()?;
        let encoding_bits = src.read_u16::<LittleEndian>()?;
        self.global_encoding = GlobalEncoding::from_bits(encoding_bits)?;
        self.project_id_guid_1 = src.read_u32::<LittleEndian>()?;
        self.project_id_guid_2 = src.read_u16::<LittleEndian>()?;
        self.project_id_guid_3 = src.read_u16::<LittleEndian>()?;
        self.project_id_guid_4 = read_string(src, 8)?;
        self.version_major = src.read_u8()?;
        self.version_minor = src.read_u8()?;
        if self.version_major != 1 || self.version_minor < 1 || self.version_minor > 4 {
            return Err(Error::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }
        self.system_identifier = read_string(src, 32)?;
        self.generating_software = read_string(src, 32)?;
        self.creation_day = src.read_u16::<LittleEndian>()?;
        self.creation_year = src.read_u16::<LittleEndian>()?;
        self.header_size = src.read_u16::<LittleEndian>()?;
        self.offset_to_point_data = src.read_u32::<LittleEndian>()?;
        self.number_of_vlrs = src.read_u32::<LittleEndian>()?;
        self.point_data_record_format = src.read_u8()?;
        self.point_data_record_length = src.read_u16::<LittleEndian>()?;
        self.legacy_number_of_point_records = src.read_u32::<LittleEndian>()?;
        for count in self.legacy_number_of_points_by_return.iter_mut() {
            *count = src.read_u32::<LittleEndian>()?;
        }
        self.x_scale_factor = src.read_f64::<LittleEndian>()?;
        self.y_scale_factor = src.read_f64::<LittleEndian>()?;
        self.z_scale_factor = src.read_f64::<LittleEndian>()?;
        self.x_offset = src.read_f64::<LittleEndian>()?;
        self.y_offset = src.read_f64::<LittleEndian>()?;
        self.z_offset = src.read_f64::<LittleEndian>()?;
        self.max_x = src.read_f64::<LittleEndian>()?;
        self.min_x = src.read_f64::<LittleEndian>()?;
        self.max_y = src.read_f64::<LittleEndian>()?;
        self.min_y = src.read_f64::<LittleEndian>()?;
        self.max_z = src.read_f64::<LittleEndian>()?;
        self.min_z = src.read_f64::<LittleEndian>()?;
        Ok(())
    }

    fn read_version_specific_section<R: Read>(&mut self, src: &mut R) -> Result<()> {
        if self.version_minor == 3 {
            self.start_of_waveform_data_packet_record = src.read_u64::<LittleEndian>()?;
        }
        if self.version_minor == 4 {
            self.start_of_waveform_data_packet_record = src.read_u64::<LittleEndian>()?;
            self.start_of_first_evlr = src.read_u64::<LittleEndian>()?;
            self.number_of_evlrs = src.read_u32::<LittleEndian>()?;
            self.number_of_point_records = src.read_u64::<LittleEndian>()?;
            for count in self.number_of_points_by_return.iter_mut() {
                *count = src.read_u64::<LittleEndian>()?;
            }
        }
        Ok(())
    }
}

/// Reads n bytes and interprets them as a NUL padded string
pub(crate) fn read_string<R: Read>(src: &mut R, n: usize) -> Result<String> {
    let mut buf = vec![0u8; n];
    src.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf)
        .trim_end_matches('\u{0}')
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::LasBuilder;
    use std::io::Cursor;

    #[test]
    fn parses_a_las_12_header() {
        let data = LasBuilder::new(1, 2).format(0).build();
        let header = Header::read_from(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.version_major, 1);
        assert_eq!(header.version_minor, 2);
        assert_eq!(header.point_data_record_format, 0);
        assert_eq!(header.header_size, 227);
        assert_eq!(header.x_scale_factor, 0.001);
        assert_eq!(header.point_count(), 0);
    }

    #[test]
    fn parses_a_las_14_header_with_64bit_counts() {
        let mut b = LasBuilder::new(1, 4).format(6);
        b = b.point(&[0.0, 0.0, 0.0], 0, 0);
        let data = b.build();
        let header = Header::read_from(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.version_minor, 4);
        assert_eq!(header.legacy_number_of_point_records, 0);
        assert_eq!(header.number_of_point_records, 1);
        assert_eq!(header.point_count(), 1);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = LasBuilder::new(1, 2).format(0).build();
        data[0] = b'X';
        let err = Header::read_from(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::BadSignature));
    }

    #[test]
    fn rejects_unsupported_versions() {
        for (major, minor) in [(1u8, 0u8), (1, 5), (2, 1)] {
            let mut data = LasBuilder::new(1, 2).format(0).build();
            data[24] = major;
            data[25] = minor;
            let err = Header::read_from(&mut Cursor::new(&data)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedVersion { .. }));
        }
    }

    #[test]
    fn rejects_inconsistent_waveform_bits() {
        let data = LasBuilder::new(1, 2).format(0).global_encoding(0b110).build();
        let err = Header::read_from(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, Error::InconsistentWaveformFlags));
    }

    #[test]
    fn decodes_global_encoding_bits() {
        let data = LasBuilder::new(1, 4).format(6).global_encoding(0b10001).build();
        let header = Header::read_from(&mut Cursor::new(&data)).unwrap();
        assert_eq!(
            header.global_encoding.gps_time_type,
            GpsTimeType::AdjustedStandard
        );
        assert!(header.global_encoding.wkt);
        assert!(!header.global_encoding.synthetic_return_numbers);
    }
}
