//! A lazily built octree with uniform spatial sampling.
//!
//! Points are stored in a local CRS; the transform back to EPSG:4978 lives in
//! the root node. Sampling works by overlaying a virtual grid on each node
//! and retaining, per cell, the point closest to the cell center, unless the
//! maximum depth is reached in which case all points are retained. Points
//! not retained are passed down to the octant children, which are only built
//! when first accessed.

mod loader;
mod slab;

pub use slab::{PointSlab, Points};

use crate::cancel::CancellationToken;
use crate::convert::ConverterFactory;
use crate::error::{Error, Result};
use crate::geom::{BoundingBox, Transform};
use crate::mutator::Mutator;
use crate::reader::LasReader;
use slab::NIL;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

struct NodeState {
    head: u32,
    local: usize,
    total: usize,
    child_heads: [u32; 8],
    child_counts: [usize; 8],
    built: bool,
}

impl NodeState {
    fn new(head: u32) -> Self {
        NodeState {
            head,
            local: 0,
            total: 0,
            child_heads: [NIL; 8],
            child_counts: [0; 8],
            built: false,
        }
    }
}

/// A node of the octree. The root additionally owns the transform from the
/// local frame to EPSG:4978.
pub struct Node {
    slab: Arc<PointSlab>,
    bounds: BoundingBox,
    grid_size: f64,
    depth: u32,
    max_depth: u32,
    min_points_per_child: usize,
    transform: Option<Transform>,
    state: Mutex<NodeState>,
    children: OnceLock<[Option<Arc<Node>>; 8]>,
}

struct CellWinner {
    idx: u32,
    dist: f64,
}

impl Node {
    /// Samples the node points on the virtual grid, splitting the losers
    /// into the octant lists the children will be built from.
    fn build(&self) {
        let mut state = self.state.lock().unwrap();
        if state.built {
            return;
        }

        if self.depth >= self.max_depth {
            // no further subdivision possible, retain everything
            let mut count = 0;
            let mut cur = state.head;
            while cur != NIL {
                count += 1;
                cur = self.slab.next(cur);
            }
            state.local = count;
            state.total = count;
            state.built = true;
            return;
        }

        let b = &self.bounds;
        // number of grid cells per direction, always at least one
        let nx = ((b.max_x - b.min_x) / self.grid_size).ceil().max(1.0);
        let ny = ((b.max_y - b.min_y) / self.grid_size).ceil().max(1.0);
        let nz = ((b.max_z - b.min_z) / self.grid_size).ceil().max(1.0);
        // the actual cell sizes after rounding
        let gx = (b.max_x - b.min_x) / nx;
        let gy = (b.max_y - b.min_y) / ny;
        let gz = (b.max_z - b.min_z) / nz;

        let mut grid: HashMap<(i32, i32, i32), CellWinner> = HashMap::new();

        let mut cur = state.head;
        while cur != NIL {
            state.total += 1;
            // detach the current point before it joins another list
            let next = self.slab.next(cur);
            self.slab.set_next(cur, NIL);
            let pt = self.slab.point(cur);
            let (px, py, pz) = (pt.x as f64, pt.y as f64, pt.z as f64);

            let ix = cell_index(px, b.min_x, gx, nx);
            let iy = cell_index(py, b.min_y, gy, ny);
            let iz = cell_index(pz, b.min_z, gz, nz);

            // squared distance from the center of the cell
            let cx = b.min_x + (ix - 1) as f64 * gx + gx / 2.0;
            let cy = b.min_y + (iy - 1) as f64 * gy + gy / 2.0;
            let cz = b.min_z + (iz - 1) as f64 * gz + gz / 2.0;
            let dist =
                (cx - px) * (cx - px) + (cy - py) * (cy - py) + (cz - pz) * (cz - pz);

            match grid.entry((ix, iy, iz)) {
                Entry::Vacant(e) => {
                    e.insert(CellWinner { idx: cur, dist });
                }
                Entry::Occupied(mut e) => {
                    // the cell already has a winner: the loser of the
                    // comparison is relegated to the octant it falls into
                    let loser = if dist < e.get().dist {
                        std::mem::replace(e.get_mut(), CellWinner { idx: cur, dist }).idx
                    } else {
                        cur
                    };
                    let lost = self.slab.point(loser);
                    let octant =
                        b.octant_of(lost.x as f64, lost.y as f64, lost.z as f64);
                    self.slab.set_next(loser, state.child_heads[octant]);
                    state.child_heads[octant] = loser;
                    state.child_counts[octant] += 1;
                }
            }
            cur = next;
        }

        // the cell winners are the points retained by this node
        state.head = NIL;
        for winner in grid.values() {
            self.slab.set_next(winner.idx, state.head);
            state.head = winner.idx;
            state.local += 1;
        }

        // octants too small to become children are folded back into the node
        for octant in 0..8 {
            if state.child_counts[octant] >= self.min_points_per_child {
                continue;
            }
            let mut cur = state.child_heads[octant];
            while cur != NIL {
                let next = self.slab.next(cur);
                self.slab.set_next(cur, state.head);
                state.head = cur;
                state.local += 1;
                cur = next;
            }
            state.child_heads[octant] = NIL;
            state.child_counts[octant] = 0;
        }

        state.built = true;
    }

    /// The children of this node, built on first access. Octants that
    /// received no points stay `None`.
    pub fn children(&self) -> &[Option<Arc<Node>>; 8] {
        self.children.get_or_init(|| {
            let mut slots: [Option<Arc<Node>>; 8] = Default::default();
            let state = self.state.lock().unwrap();
            if !state.built {
                return slots;
            }
            for (octant, slot) in slots.iter_mut().enumerate() {
                let head = state.child_heads[octant];
                if head == NIL {
                    continue;
                }
                let child = Node {
                    slab: self.slab.clone(),
                    bounds: BoundingBox::from_parent(&self.bounds, octant),
                    grid_size: self.grid_size / 2.0,
                    depth: self.depth + 1,
                    max_depth: self.max_depth,
                    min_points_per_child: self.min_points_per_child,
                    transform: None,
                    state: Mutex::new(NodeState::new(head)),
                    children: OnceLock::new(),
                };
                // children must be built before being handed out
                child.build();
                *slot = Some(Arc::new(child));
            }
            slots
        })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    /// The points retained by this node, in insertion order. The order is
    /// stable across iterations.
    pub fn points(&self) -> Points<'_> {
        let state = self.state.lock().unwrap();
        Points::new(&self.slab, state.head, state.local)
    }

    /// Number of points stored in this node and all its children
    pub fn total_points(&self) -> usize {
        self.state.lock().unwrap().total
    }

    /// Number of points stored directly in this node
    pub fn local_points(&self) -> usize {
        self.state.lock().unwrap().local
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn is_leaf(&self) -> bool {
        self.children().iter().all(Option::is_none)
    }

    /// The geometric error of the node, the diagonal of one grid cell
    pub fn geometric_error(&self) -> f64 {
        (self.grid_size * self.grid_size * 3.0).sqrt()
    }

    /// The transform from the local frame to EPSG:4978, only present on the
    /// root node
    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }
}

#[inline]
fn cell_index(coord: f64, min: f64, cell_size: f64, cells: f64) -> i32 {
    ((coord - min) / cell_size).ceil().max(1.0).min(cells) as i32
}

/// An octree built by sampling points on a regular grid whose spacing halves
/// at every level.
pub struct GridTree {
    grid_size: f64,
    max_depth: u32,
    load_workers: usize,
    min_points_per_child: usize,
    eight_bit_colors: bool,
    root: Option<Arc<Node>>,
    built: bool,
}

impl Default for GridTree {
    fn default() -> Self {
        GridTree {
            grid_size: 1.0,
            max_depth: 10,
            load_workers: 1,
            min_points_per_child: 10000,
            eight_bit_colors: false,
            root: None,
            built: false,
        }
    }
}

impl GridTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sampling interval in meters for the root node. The interval
    /// is halved at every level.
    pub fn with_grid_size(mut self, size: f64) -> Self {
        self.grid_size = size;
        self
    }

    /// Sets the maximum number of levels of the tree
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the number of parallel workers used to load points
    pub fn with_load_workers(mut self, workers: usize) -> Self {
        self.load_workers = workers;
        self
    }

    /// Sets the minimum number of points a child node may contain. Smaller
    /// octants are folded back into their parent.
    pub fn with_min_points_per_child(mut self, min: usize) -> Self {
        self.min_points_per_child = min;
        self
    }

    /// Interprets input colors as 8 bit instead of 16 bit
    pub fn with_eight_bit_colors(mut self, eight_bit: bool) -> Self {
        self.eight_bit_colors = eight_bit;
        self
    }

    /// Reads all the points from the reader into the tree, converting them
    /// into the local frame defined by the first point.
    pub fn load(
        &mut self,
        reader: &dyn LasReader,
        factory: &ConverterFactory,
        mutator: &dyn Mutator,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let cloud = loader::load(
            reader,
            factory,
            mutator,
            self.load_workers,
            self.eight_bit_colors,
            cancel,
        )?;
        self.root = Some(Arc::new(Node {
            slab: Arc::new(cloud.slab),
            bounds: cloud.bounds,
            grid_size: self.grid_size,
            depth: 0,
            max_depth: self.max_depth,
            min_points_per_child: self.min_points_per_child,
            transform: Some(cloud.transform),
            state: Mutex::new(NodeState::new(cloud.head)),
            children: OnceLock::new(),
        }));
        Ok(())
    }

    /// Builds the root node. Deeper nodes are built lazily on first access.
    pub fn build(&mut self) -> Result<()> {
        let root = self.root.as_ref().ok_or_else(|| {
            Error::InvariantViolation("build called before load".to_string())
        })?;
        root.build();
        self.built = true;
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// The root node, available after a successful load
    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }
}
