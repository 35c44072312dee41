//! Streaming LAS readers.
//!
//! [LasFile] parses the header, VLR and EVLR sections of a single LAS source
//! eagerly and then streams decoded point records on demand. The declared
//! point counts are authoritative: running out of bytes before the count is
//! reached is a fatal error. [CombinedLasReader] chains several files into a
//! single logical cloud.

use crate::error::{Error, Result};
use crate::geotiff::GeoTiffMetadata;
use crate::header::Header;
use crate::point::Point;
use crate::vlr::{
    Evlr, Vlr, PROJECTION_USER_ID, RECORD_ID_GEOTIFF_ASCII, RECORD_ID_GEOTIFF_DIRECTORY,
    RECORD_ID_GEOTIFF_DOUBLES, RECORD_ID_WKT_COORDINATE_SYSTEM, RECORD_ID_WKT_MATH_TRANSFORM,
};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

/// The WKT definitions extracted from the LAS projection records
#[derive(Clone, Debug, Default)]
pub struct Wkt {
    pub coordinate_system: String,
    pub math_transform: String,
}

/// A source of decoded LAS points. Implementations serialize access
/// internally so that `next_point` can be called from multiple threads.
pub trait LasReader: Send + Sync {
    /// The total number of points the reader will yield
    fn point_count(&self) -> u64;
    /// The CRS of the point coordinates
    fn crs(&self) -> &str;
    /// Returns the next unread point. An error is unrecoverable and no
    /// further calls should be issued.
    fn next_point(&self) -> Result<Point>;
}

struct ReadState<R> {
    src: R,
    current: u64,
}

/// Reads LAS data from a seekable byte source. Supports LAS 1.1 to 1.4 and
/// point record formats 0 to 10.
pub struct LasFile<R> {
    header: Header,
    vlrs: Vec<Vlr>,
    evlrs: Vec<Evlr>,
    wkt: Option<Wkt>,
    geotiff: Option<GeoTiffMetadata>,
    crs: String,
    state: Mutex<ReadState<R>>,
}

impl LasFile<BufReader<File>> {
    /// Opens a LAS file from disk, wrapping it in a buffered reader
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::with_capacity(64 * 1024, file))
    }
}

impl<R: Read + Seek + Send> LasFile<R> {
    /// Parses the header, the VLRs and, for LAS 1.4, the EVLRs, leaving the
    /// source positioned at the start of the point data.
    pub fn new(mut src: R) -> Result<Self> {
        let header = Header::read_from(&mut src)?;

        // VLRs start right after the declared header size
        src.seek(SeekFrom::Start(header.header_size as u64))?;
        let mut vlrs = Vec::with_capacity(header.number_of_vlrs as usize);
        for _ in 0..header.number_of_vlrs {
            vlrs.push(Vlr::read_from(&mut src)?);
        }

        // EVLRs are not really supported in LAS < 1.4
        let mut evlrs = Vec::new();
        if header.version_minor == 4 && header.number_of_evlrs > 0 {
            src.seek(SeekFrom::Start(header.start_of_first_evlr))?;
            for _ in 0..header.number_of_evlrs {
                evlrs.push(Evlr::read_from(&mut src)?);
            }
        }

        let wkt = extract_wkt(&vlrs, &evlrs);
        let geotiff = extract_geotiff(&vlrs, &evlrs)?;
        let crs = derive_crs(&wkt, &geotiff);

        // prepare the reader to stream point data
        src.seek(SeekFrom::Start(header.offset_to_point_data as u64))?;
        Ok(LasFile {
            header,
            vlrs,
            evlrs,
            wkt,
            geotiff,
            crs,
            state: Mutex::new(ReadState { src, current: 0 }),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn vlrs(&self) -> &[Vlr] {
        &self.vlrs
    }

    pub fn evlrs(&self) -> &[Evlr] {
        &self.evlrs
    }

    /// The WKT CRS metadata found in the projection records, if any
    pub fn wkt(&self) -> Option<&Wkt> {
        self.wkt.as_ref()
    }

    /// The GeoTIFF keys found in the projection records, if any
    pub fn geotiff(&self) -> Option<&GeoTiffMetadata> {
        self.geotiff.as_ref()
    }
}

impl<R: Read + Seek + Send> LasReader for LasFile<R> {
    fn point_count(&self) -> u64 {
        self.header.point_count()
    }

    /// The CRS declared by the file metadata. WKT coordinate system
    /// information takes precedence over the GeoTIFF keys. Empty when the
    /// file carries no usable CRS metadata.
    fn crs(&self) -> &str {
        &self.crs
    }

    fn next_point(&self) -> Result<Point> {
        let mut data = vec![0u8; self.header.point_data_record_length as usize];
        {
            let mut state = self.state.lock().unwrap();
            if state.current >= self.header.point_count() {
                return Err(Error::InvariantViolation(
                    "read past the declared point count".to_string(),
                ));
            }
            if let Err(e) = state.src.read_exact(&mut data) {
                return match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => Err(Error::TruncatedPointData),
                    _ => Err(e.into()),
                };
            }
            state.current += 1;
        }
        Point::decode(&data, &self.header)
    }
}

fn extract_wkt(vlrs: &[Vlr], evlrs: &[Evlr]) -> Option<Wkt> {
    let mut wkt = Wkt::default();
    let records = vlrs
        .iter()
        .map(|v| (v.user_id.as_str(), v.record_id, &v.data))
        .chain(
            evlrs
                .iter()
                .map(|v| (v.user_id.as_str(), v.record_id, &v.data)),
        );
    for (user_id, record_id, data) in records {
        if user_id != PROJECTION_USER_ID {
            continue;
        }
        match record_id {
            RECORD_ID_WKT_MATH_TRANSFORM => {
                wkt.math_transform = trim_nul(data);
            }
            RECORD_ID_WKT_COORDINATE_SYSTEM => {
                wkt.coordinate_system = trim_nul(data);
            }
            _ => {}
        }
    }
    if wkt.coordinate_system.is_empty() && wkt.math_transform.is_empty() {
        None
    } else {
        Some(wkt)
    }
}

fn extract_geotiff(vlrs: &[Vlr], evlrs: &[Evlr]) -> Result<Option<GeoTiffMetadata>> {
    let mut directory: &[u8] = &[];
    let mut doubles: &[u8] = &[];
    let mut ascii: &[u8] = &[];
    let records = vlrs
        .iter()
        .map(|v| (v.user_id.as_str(), v.record_id, &v.data))
        .chain(
            evlrs
                .iter()
                .map(|v| (v.user_id.as_str(), v.record_id, &v.data)),
        );
    for (user_id, record_id, data) in records {
        if user_id != PROJECTION_USER_ID {
            continue;
        }
        match record_id {
            RECORD_ID_GEOTIFF_DIRECTORY => directory = data,
            RECORD_ID_GEOTIFF_DOUBLES => doubles = data,
            RECORD_ID_GEOTIFF_ASCII => ascii = data,
            _ => {}
        }
    }
    if directory.is_empty() {
        return Ok(None);
    }
    GeoTiffMetadata::parse(directory, doubles, ascii).map(Some)
}

fn derive_crs(wkt: &Option<Wkt>, geotiff: &Option<GeoTiffMetadata>) -> String {
    // WKT records always win over the GeoTIFF keys when present
    if let Some(wkt) = wkt {
        return wkt.coordinate_system.clone();
    }
    if let Some(geotiff) = geotiff {
        return geotiff.crs();
    }
    String::new()
}

fn trim_nul(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .trim_end_matches('\u{0}')
        .to_string()
}

struct CombinedState {
    current_reader: usize,
    current_count: u64,
}

/// Reads a list of LAS files as if they were a single cloud. The files must
/// share the same CRS: when none is provided by the caller the CRS of the
/// first file is adopted and a mismatch in any other file is an error.
pub struct CombinedLasReader {
    readers: Vec<LasFile<BufReader<File>>>,
    point_count: u64,
    crs: String,
    state: Mutex<CombinedState>,
}

impl CombinedLasReader {
    /// Opens all the given files. `crs` overrides the CRS declared by the
    /// files; when `None`, every file must declare the same CRS and at least
    /// the first one must declare it at all.
    pub fn new<P: AsRef<Path>>(files: &[P], crs: Option<&str>) -> Result<Self> {
        let mut readers = Vec::with_capacity(files.len());
        let mut point_count = 0u64;
        for file in files {
            let reader = LasFile::open(file)?;
            point_count += reader.point_count();
            readers.push(reader);
        }
        let crs = match crs {
            Some(crs) if !crs.is_empty() => crs.to_string(),
            _ => {
                let adopted = readers
                    .first()
                    .map(|r| r.crs().to_string())
                    .unwrap_or_default();
                if adopted.is_empty() {
                    return Err(Error::NoCrsProvided);
                }
                for reader in &readers[1..] {
                    let declared = reader.crs();
                    if !declared.is_empty() && declared != adopted {
                        return Err(Error::InconsistentCrs {
                            expected: adopted,
                            found: declared.to_string(),
                        });
                    }
                }
                adopted
            }
        };
        Ok(CombinedLasReader {
            readers,
            point_count,
            crs,
            state: Mutex::new(CombinedState {
                current_reader: 0,
                current_count: 0,
            }),
        })
    }
}

impl LasReader for CombinedLasReader {
    fn point_count(&self) -> u64 {
        self.point_count
    }

    fn crs(&self) -> &str {
        &self.crs
    }

    fn next_point(&self) -> Result<Point> {
        let reader = {
            let mut state = self.state.lock().unwrap();
            if state.current_reader >= self.readers.len() {
                return Err(Error::InvariantViolation(
                    "read past the declared point count".to_string(),
                ));
            }
            let mut r = &self.readers[state.current_reader];
            if state.current_count == r.point_count() {
                state.current_reader += 1;
                state.current_count = 0;
                if state.current_reader >= self.readers.len() {
                    return Err(Error::InvariantViolation(
                        "read past the declared point count".to_string(),
                    ));
                }
                r = &self.readers[state.current_reader];
            }
            state.current_count += 1;
            r
        };
        reader.next_point()
    }
}
