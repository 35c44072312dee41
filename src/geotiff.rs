//! GeoTIFF key directory parsing, the legacy mechanism for embedding CRS
//! identity in LAS files through the 34735/34736/34737 projection records.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

/// GeographicTypeGeoKey
pub const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
/// ProjectedCSTypeGeoKey
pub const KEY_PROJECTED_CS_TYPE: u16 = 3072;
/// VerticalCSTypeGeoKey
pub const KEY_VERTICAL_CS_TYPE: u16 = 4096;

/// A GeoTIFF key value, decoded according to its tiff tag location
#[derive(Clone, Debug, PartialEq)]
pub enum GeoTiffValue {
    Short(u16),
    Double(f64),
    Ascii(String),
}

/// The GeoTIFF keys parsed from the LAS projection VLRs
#[derive(Clone, Debug, Default)]
pub struct GeoTiffMetadata {
    pub keys: HashMap<u16, GeoTiffValue>,
}

impl GeoTiffMetadata {
    /// Parses the key directory payload, resolving values stored in the
    /// doubles (34736) and ASCII (34737) companion payloads.
    pub fn parse(directory: &[u8], doubles: &[u8], ascii: &[u8]) -> Result<Self> {
        let mut meta = GeoTiffMetadata::default();
        if directory.len() < 8 {
            return Err(Error::MalformedGeoTiff(
                "key directory shorter than its own header".to_string(),
            ));
        }
        let version = LittleEndian::read_u16(&directory[0..2]);
        let revision = LittleEndian::read_u16(&directory[2..4]);
        let minor_revision = LittleEndian::read_u16(&directory[4..6]);
        let number_of_keys = LittleEndian::read_u16(&directory[6..8]);
        if version != 1 {
            return Err(Error::MalformedGeoTiff(format!(
                "key directory version should be 1, got {version}"
            )));
        }
        if revision != 1 {
            return Err(Error::MalformedGeoTiff(format!(
                "key revision should be 1, got {revision}"
            )));
        }
        if minor_revision != 0 {
            return Err(Error::MalformedGeoTiff(format!(
                "minor key revision should be 0, got {minor_revision}"
            )));
        }
        if directory.len() < 8 + number_of_keys as usize * 8 {
            return Err(Error::MalformedGeoTiff(
                "key directory shorter than the declared key count".to_string(),
            ));
        }
        for i in 0..number_of_keys as usize {
            let entry = &directory[8 + i * 8..16 + i * 8];
            let key_id = LittleEndian::read_u16(&entry[0..2]);
            let location = LittleEndian::read_u16(&entry[2..4]);
            let count = LittleEndian::read_u16(&entry[4..6]);
            let value_offset = LittleEndian::read_u16(&entry[6..8]);
            match location {
                0 => {
                    meta.keys.insert(key_id, GeoTiffValue::Short(value_offset));
                }
                34736 => {
                    let start = value_offset as usize * 8;
                    if start + 8 > doubles.len() {
                        return Err(Error::MalformedGeoTiff(format!(
                            "double value offset {value_offset} out of bounds"
                        )));
                    }
                    let value = LittleEndian::read_f64(&doubles[start..start + 8]);
                    meta.keys.insert(key_id, GeoTiffValue::Double(value));
                }
                34737 => {
                    let start = value_offset as usize;
                    let end = start + count as usize;
                    if end > ascii.len() {
                        return Err(Error::MalformedGeoTiff(format!(
                            "ascii value offset {value_offset} out of bounds"
                        )));
                    }
                    let value = String::from_utf8_lossy(&ascii[start..end])
                        .trim_end_matches(['\u{0}', '|'])
                        .to_string();
                    meta.keys.insert(key_id, GeoTiffValue::Ascii(value));
                }
                // unknown tag locations carry nothing we can interpret
                _ => {}
            }
        }
        Ok(meta)
    }

    /// Returns the value of a short key, if present and of the right type
    pub fn short(&self, key: u16) -> Option<u16> {
        match self.keys.get(&key) {
            Some(GeoTiffValue::Short(v)) => Some(*v),
            _ => None,
        }
    }

    /// Derives an EPSG CRS string from the stored keys, or an empty string if
    /// none of the recognized keys carries a valid code.
    ///
    /// The returned identifier has the form `EPSG:XYZ`, with an additional
    /// `+LMN` suffix when a vertical CRS is declared. Codes outside the EPSG
    /// ranges are skipped.
    pub fn crs(&self) -> String {
        // valid vertical EPSG values should be between 5000 and 5999
        let vertical = match self.short(KEY_VERTICAL_CS_TYPE) {
            Some(code) if (5000..5999).contains(&code) => format!("+{code}"),
            _ => String::new(),
        };
        // valid projected EPSG values should be between 20000 and 32760
        if let Some(code) = self.short(KEY_PROJECTED_CS_TYPE) {
            if (20000..32760).contains(&code) {
                return format!("EPSG:{code}{vertical}");
            }
        }
        // valid geographic EPSG values should be between 4000 and 4999
        if let Some(code) = self.short(KEY_GEOGRAPHIC_TYPE) {
            if (4000..5000).contains(&code) {
                return format!("EPSG:{code}{vertical}");
            }
        }
        String::new()
    }
}
