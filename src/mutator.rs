//! Per-point mutators applied while loading the cloud.

use crate::geom::{CloudPoint, Transform};
use std::sync::atomic::{AtomicBool, Ordering};

/// Manipulates coordinates or attributes of points as they are loaded.
///
/// The point is received in the local CRS with Z up, together with the
/// transform between the local CRS and EPSG:4978. Returning `false` discards
/// the point from the final cloud. Mutators are shared across load workers
/// and must be safe to call concurrently.
pub trait Mutator: Send + Sync {
    fn mutate(&self, pt: CloudPoint, local_to_global: &Transform) -> (CloudPoint, bool);
}

/// Shifts points vertically by a fixed offset, in meters
pub struct ZOffset {
    offset: f32,
}

impl ZOffset {
    pub fn new(offset: f32) -> Self {
        Self { offset }
    }
}

impl Mutator for ZOffset {
    fn mutate(&self, mut pt: CloudPoint, _t: &Transform) -> (CloudPoint, bool) {
        pt.z += self.offset;
        (pt, true)
    }
}

/// Keeps each point with uniform probability. The very first point seen is
/// always kept so that the output cloud cannot be empty.
pub struct Subsampler {
    percentage: f64,
    first: AtomicBool,
}

impl Subsampler {
    pub fn new(percentage: f64) -> Self {
        Self {
            percentage,
            first: AtomicBool::new(true),
        }
    }
}

impl Mutator for Subsampler {
    fn mutate(&self, pt: CloudPoint, _t: &Transform) -> (CloudPoint, bool) {
        if self.first.swap(false, Ordering::Relaxed) {
            return (pt, true);
        }
        (pt, fastrand::f64() < self.percentage)
    }
}

/// Applies all registered mutators sequentially, stopping at the first one
/// that discards the point
pub struct Pipeline {
    mutators: Vec<Box<dyn Mutator>>,
}

impl Pipeline {
    pub fn new(mutators: Vec<Box<dyn Mutator>>) -> Self {
        Self { mutators }
    }
}

impl Mutator for Pipeline {
    fn mutate(&self, mut pt: CloudPoint, t: &Transform) -> (CloudPoint, bool) {
        for m in &self.mutators {
            let (out, keep) = m.mutate(pt, t);
            pt = out;
            if !keep {
                return (pt, false);
            }
        }
        (pt, true)
    }
}
