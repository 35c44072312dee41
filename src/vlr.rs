//! LAS Variable Length Records and Extended Variable Length Records.

use crate::error::{Error, Result};
use crate::header::read_string;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Read;

/// The LASF_Projection user id marks records carrying CRS metadata
pub const PROJECTION_USER_ID: &str = "LASF_Projection";

/// WKT math transform record id
pub const RECORD_ID_WKT_MATH_TRANSFORM: u16 = 2111;
/// WKT coordinate system record id
pub const RECORD_ID_WKT_COORDINATE_SYSTEM: u16 = 2112;
/// GeoTIFF key directory record id
pub const RECORD_ID_GEOTIFF_DIRECTORY: u16 = 34735;
/// GeoTIFF double params record id
pub const RECORD_ID_GEOTIFF_DOUBLES: u16 = 34736;
/// GeoTIFF ASCII params record id
pub const RECORD_ID_GEOTIFF_ASCII: u16 = 34737;

/// A LAS Variable Length Record with its raw uninterpreted payload
pub struct Vlr {
    pub user_id: String,
    pub record_id: u16,
    pub description: String,
    pub data: Vec<u8>,
}

impl Vlr {
    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        src.read_u16::<LittleEndian>()?; // reserved
        let user_id = read_string(src, 16)?;
        let record_id = src.read_u16::<LittleEndian>()?;
        let record_length = src.read_u16::<LittleEndian>()?;
        let description = read_string(src, 32)?;
        let mut data = vec![0u8; record_length as usize];
        src.read_exact(&mut data)?;
        Ok(Self {
            user_id,
            record_id,
            description,
            data,
        })
    }
}

impl fmt::Debug for Vlr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vlr")
            .field("user_id", &self.user_id)
            .field("record_id", &self.record_id)
            .field("description", &self.description)
            .field("data", &format_args!("[u8; {}]", self.data.len()))
            .finish()
    }
}

/// A LAS Extended Variable Length Record, only present in LAS 1.4
pub struct Evlr {
    pub user_id: String,
    pub record_id: u16,
    pub description: String,
    pub data: Vec<u8>,
}

impl Evlr {
    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let reserved = src.read_u16::<LittleEndian>()?;
        if reserved != 0 {
            return Err(Error::MalformedVlr(
                "EVLR reserved header field is not zero".to_string(),
            ));
        }
        let user_id = read_string(src, 16)?;
        let record_id = src.read_u16::<LittleEndian>()?;
        let record_length = src.read_u64::<LittleEndian>()?;
        let description = read_string(src, 32)?;
        let mut data = vec![0u8; record_length as usize];
        src.read_exact(&mut data)?;
        Ok(Self {
            user_id,
            record_id,
            description,
            data,
        })
    }
}

impl fmt::Debug for Evlr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evlr")
            .field("user_id", &self.user_id)
            .field("record_id", &self.record_id)
            .field("description", &self.description)
            .field("data", &format_args!("[u8; {}]", self.data.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    fn vlr_bytes(reserved: u16, user_id: &str, record_id: u16, data: &[u8]) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u16::<LittleEndian>(reserved).unwrap();
        let mut id = vec![0u8; 16];
        id[..user_id.len()].copy_from_slice(user_id.as_bytes());
        w.extend_from_slice(&id);
        w.write_u16::<LittleEndian>(record_id).unwrap();
        w.write_u16::<LittleEndian>(data.len() as u16).unwrap();
        w.extend_from_slice(&[0u8; 32]);
        w.extend_from_slice(data);
        w
    }

    #[test]
    fn reads_a_vlr() {
        let bytes = vlr_bytes(7, "LASF_Projection", 2112, b"WKT here");
        let vlr = Vlr::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(vlr.user_id, "LASF_Projection");
        assert_eq!(vlr.record_id, 2112);
        assert_eq!(vlr.data, b"WKT here");
    }

    #[test]
    fn evlr_rejects_nonzero_reserved() {
        let mut w = Vec::new();
        w.write_u16::<LittleEndian>(1).unwrap();
        w.extend_from_slice(&[0u8; 16]);
        w.write_u16::<LittleEndian>(0).unwrap();
        w.write_u64::<LittleEndian>(0).unwrap();
        w.extend_from_slice(&[0u8; 32]);
        let err = Evlr::read_from(&mut Cursor::new(&w)).unwrap_err();
        assert!(matches!(err, Error::MalformedVlr(_)));
    }

    #[test]
    fn evlr_reads_64bit_payload_length() {
        let mut w = Vec::new();
        w.write_u16::<LittleEndian>(0).unwrap();
        let mut id = vec![0u8; 16];
        id[..4].copy_from_slice(b"test");
        w.extend_from_slice(&id);
        w.write_u16::<LittleEndian>(42).unwrap();
        w.write_u64::<LittleEndian>(3).unwrap();
        w.extend_from_slice(&[0u8; 32]);
        w.extend_from_slice(&[1, 2, 3]);
        let evlr = Evlr::read_from(&mut Cursor::new(&w)).unwrap();
        assert_eq!(evlr.user_id, "test");
        assert_eq!(evlr.record_id, 42);
        assert_eq!(evlr.data, vec![1, 2, 3]);
    }
}
