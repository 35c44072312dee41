//! Parallel loading of LAS points into the point slab.
//!
//! A single slab of `reader.point_count()` slots is allocated upfront. The
//! first kept point defines the local reference frame; the remaining points
//! are split into disjoint contiguous slab ranges, one per worker. Workers
//! pull raw points from the reader (which serializes internally), reproject
//! them to ECEF, express them in the local frame, run the mutator chain and
//! append the survivors to their private linked list while growing their
//! private bounding box. The per worker lists and boxes are merged at the
//! end.

use crate::cancel::CancellationToken;
use crate::convert::{CoordinateConverter, ConverterFactory};
use crate::error::{Error, Result};
use crate::geom::{local_frame_at, BoundingBox, CloudPoint, Extent, Transform, Vector};
use crate::mutator::Mutator;
use crate::point::Point;
use crate::reader::LasReader;
use crate::tree::slab::{PointSlab, Slot, NIL};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

pub(crate) struct LoadedCloud {
    pub slab: PointSlab,
    pub head: u32,
    pub bounds: BoundingBox,
    pub transform: Transform,
}

struct WorkerList {
    head: u32,
    tail: u32,
    extent: Extent,
}

pub(crate) fn load(
    reader: &dyn LasReader,
    factory: &ConverterFactory,
    mutator: &dyn Mutator,
    workers: usize,
    eight_bit_colors: bool,
    cancel: &CancellationToken,
) -> Result<LoadedCloud> {
    let total = reader.point_count() as usize;
    if total == 0 {
        return Err(Error::EmptyInput);
    }
    let crs = reader.crs().to_string();
    let mut slab = PointSlab::new(total);

    // The first kept point is the baseline: it defines the local frame the
    // whole cloud is expressed in. Mutators may discard candidates, in which
    // case the next point is tried.
    let conv = factory()?;
    let mut read = 0usize;
    let (transform, baseline) = loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if read == total {
            // every single candidate was discarded
            return Err(Error::EmptyInput);
        }
        let wire = reader.next_point()?;
        read += 1;
        let ecef = to_ecef_checked(conv.as_ref(), &crs, &wire)?;
        let transform = local_frame_at(ecef.x, ecef.y, ecef.z);
        let pt = into_local(&wire, &transform, ecef, eight_bit_colors);
        let (pt, keep) = mutator.mutate(pt, &transform);
        if keep {
            break (transform, pt);
        }
    };
    slab.slots_mut()[0].write(baseline, NIL);

    let remaining = total - read;
    let worker_count = workers.max(1).min(remaining.max(1));
    let (err_tx, err_rx) = mpsc::channel::<Error>();

    let lists: Vec<Option<WorkerList>> = thread::scope(|s| {
        let mut handles = Vec::with_capacity(worker_count);
        // workers own disjoint contiguous slab ranges starting right after
        // the slots consumed while picking the baseline
        let (_, mut rest) = slab.slots_mut().split_at_mut(read);
        let base = remaining / worker_count;
        let residual = remaining % worker_count;
        let mut start = read;
        for i in 0..worker_count {
            let count = base + usize::from(i < residual);
            let (range, tail) = rest.split_at_mut(count);
            rest = tail;
            let worker_start = start as u32;
            start += count;

            let err_tx = err_tx.clone();
            let crs = crs.as_str();
            handles.push(s.spawn(move || {
                let run = catch_unwind(AssertUnwindSafe(|| {
                    consume(
                        worker_start,
                        range,
                        reader,
                        factory,
                        mutator,
                        crs,
                        transform,
                        eight_bit_colors,
                        cancel,
                    )
                }));
                match run {
                    Ok(Ok(list)) => list,
                    Ok(Err(e)) => {
                        let _ = err_tx.send(e);
                        None
                    }
                    Err(_) => {
                        let _ = err_tx.send(Error::InvariantViolation(
                            "panic while loading points".to_string(),
                        ));
                        None
                    }
                }
            }));
        }
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(None))
            .collect()
    });
    drop(err_tx);
    if let Some(err) = err_rx.try_iter().next() {
        return Err(err);
    }

    // merge the worker lists and bounding boxes, then put the baseline at
    // the front
    let mut head = NIL;
    let mut extent = Extent::default();
    for list in lists.into_iter().flatten() {
        slab.set_next(list.tail, head);
        head = list.head;
        extent.merge(&list.extent);
    }
    slab.set_next(0, head);
    extent.expand(baseline.x as f64, baseline.y as f64, baseline.z as f64);

    Ok(LoadedCloud {
        slab,
        head: 0,
        bounds: extent.build(),
        transform,
    })
}

#[allow(clippy::too_many_arguments)]
fn consume(
    start: u32,
    slots: &mut [Slot],
    reader: &dyn LasReader,
    factory: &ConverterFactory,
    mutator: &dyn Mutator,
    crs: &str,
    transform: Transform,
    eight_bit_colors: bool,
    cancel: &CancellationToken,
) -> Result<Option<WorkerList>> {
    // converters are not required to be shareable across threads, every
    // worker builds its own
    let conv = factory()?;
    let mut extent = Extent::default();
    let mut head = NIL;
    let mut tail: Option<usize> = None;

    for offset in 0..slots.len() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let wire = reader.next_point()?;
        let ecef = to_ecef_checked(conv.as_ref(), crs, &wire)?;
        let local = into_local(&wire, &transform, ecef, eight_bit_colors);
        let (pt, keep) = mutator.mutate(local, &transform);
        if !keep {
            // the write index advances anyway, the slot stays unused
            continue;
        }
        let index = start + offset as u32;
        slots[offset].write(pt, NIL);
        match tail {
            None => head = index,
            Some(prev) => slots[prev].link(index),
        }
        tail = Some(offset);
        extent.expand(pt.x as f64, pt.y as f64, pt.z as f64);
    }

    Ok(tail.map(|t| WorkerList {
        head,
        tail: start + t as u32,
        extent,
    }))
}

fn to_ecef_checked(
    conv: &dyn CoordinateConverter,
    crs: &str,
    wire: &Point,
) -> Result<Vector> {
    let out = conv.to_ecef(crs, Vector::new(wire.x, wire.y, wire.z))?;
    if !out.x.is_finite() || !out.y.is_finite() || !out.z.is_finite() {
        return Err(Error::CoordinateTransformFailed {
            src: crs.to_string(),
            dst: crate::convert::ECEF_CRS.to_string(),
            reason: "non finite result".to_string(),
        });
    }
    Ok(out)
}

fn into_local(
    wire: &Point,
    transform: &Transform,
    ecef: Vector,
    eight_bit_colors: bool,
) -> CloudPoint {
    let local = transform.inverse(ecef);
    let mut pt = wire.to_cloud_point(eight_bit_colors);
    pt.x = local.x as f32;
    pt.y = local.y as f32;
    pt.z = local.z as f32;
    pt
}
