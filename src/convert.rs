//! Coordinate conversion between CRSs.
//!
//! The tiling pipeline only depends on the [CoordinateConverter] trait, so
//! any geodetic library can be plugged in. The bundled [Proj4Converter] is
//! backed by a pure Rust proj4 implementation and resolves `EPSG:<n>`
//! identifiers through the embedded EPSG registry.

use crate::error::{Error, Result};
use crate::geom::Vector;
use proj4rs::proj::Proj;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// The Earth-Centered Earth-Fixed cartesian CRS points are reprojected into
pub const ECEF_CRS: &str = "EPSG:4978";

const ECEF_PROJ4: &str = "+proj=geocent +ellps=WGS84 +datum=WGS84 +units=m +no_defs";

/// Converts coordinates between CRSs identified by `EPSG:<n>` codes or WKT
/// strings. Implementations are not required to be thread safe: each worker
/// obtains its own instance through a [ConverterFactory].
pub trait CoordinateConverter {
    /// Transforms the vector from the source to the destination CRS
    fn transform(&self, src_crs: &str, dst_crs: &str, v: Vector) -> Result<Vector>;

    /// Transforms the vector from the source CRS to ECEF (EPSG:4978)
    fn to_ecef(&self, src_crs: &str, v: Vector) -> Result<Vector> {
        self.transform(src_crs, ECEF_CRS, v)
    }
}

/// Creates one [CoordinateConverter] per worker thread
pub type ConverterFactory = Arc<dyn Fn() -> Result<Box<dyn CoordinateConverter>> + Send + Sync>;

/// Returns a factory producing [Proj4Converter] instances
pub fn proj4_factory() -> ConverterFactory {
    Arc::new(|| Ok(Box::new(Proj4Converter::new()) as Box<dyn CoordinateConverter>))
}

/// A [CoordinateConverter] backed by proj4 projection math. Parsed
/// projections are cached per instance.
#[derive(Default)]
pub struct Proj4Converter {
    cache: RefCell<HashMap<String, Rc<Proj>>>,
}

impl Proj4Converter {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, crs: &str) -> Result<Rc<Proj>> {
        if let Some(proj) = self.cache.borrow().get(crs) {
            return Ok(proj.clone());
        }
        let proj4_string = proj4_definition(crs)?;
        let proj = Proj::from_proj_string(&proj4_string).map_err(|e| {
            Error::CoordinateTransformFailed {
                src: crs.to_string(),
                dst: String::new(),
                reason: e.to_string(),
            }
        })?;
        let proj = Rc::new(proj);
        self.cache
            .borrow_mut()
            .insert(crs.to_string(), proj.clone());
        Ok(proj)
    }
}

impl CoordinateConverter for Proj4Converter {
    fn transform(&self, src_crs: &str, dst_crs: &str, v: Vector) -> Result<Vector> {
        let src = self.resolve(src_crs)?;
        let dst = self.resolve(dst_crs)?;

        let mut point = (v.x, v.y, v.z);
        // proj4 operates on radians for geographic CRSs
        if src.is_latlong() {
            point.0 = point.0.to_radians();
            point.1 = point.1.to_radians();
        }
        proj4rs::transform::transform(&src, &dst, &mut point).map_err(|e| {
            Error::CoordinateTransformFailed {
                src: src_crs.to_string(),
                dst: dst_crs.to_string(),
                reason: e.to_string(),
            }
        })?;
        if dst.is_latlong() {
            point.0 = point.0.to_degrees();
            point.1 = point.1.to_degrees();
        }

        let out = Vector::new(point.0, point.1, point.2);
        if !out.x.is_finite() || !out.y.is_finite() || !out.z.is_finite() {
            return Err(Error::CoordinateTransformFailed {
                src: src_crs.to_string(),
                dst: dst_crs.to_string(),
                reason: "non finite result".to_string(),
            });
        }
        Ok(out)
    }
}

/// Resolves a CRS identifier to a proj4 definition string. `EPSG:<n>` codes
/// are looked up in the embedded registry, raw proj4 strings are passed
/// through. Compound codes of the form `EPSG:<n>+<m>` are resolved through
/// their horizontal component.
fn proj4_definition(crs: &str) -> Result<String> {
    let crs = crs.trim();
    if let Some(code_str) = crs.strip_prefix("EPSG:") {
        let horizontal = code_str.split('+').next().unwrap_or_default();
        let code: u16 = horizontal
            .parse()
            .map_err(|_| unsupported(crs, "malformed EPSG code"))?;
        if code == 4978 {
            return Ok(ECEF_PROJ4.to_string());
        }
        return match crs_definitions::from_code(code) {
            Some(def) => Ok(def.proj4.to_string()),
            None => Err(unsupported(crs, "EPSG code not in the embedded registry")),
        };
    }
    if crs.starts_with('+') {
        return Ok(crs.to_string());
    }
    // arbitrary WKT needs a full geodetic library, callers can inject one
    // through the CoordinateConverter trait
    Err(unsupported(
        crs,
        "WKT CRS strings are not supported by the built-in converter",
    ))
}

fn unsupported(crs: &str, reason: &str) -> Error {
    Error::CoordinateTransformFailed {
        src: crs.to_string(),
        dst: String::new(),
        reason: reason.to_string(),
    }
}
