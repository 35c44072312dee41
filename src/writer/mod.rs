//! Serializes a built octree into a 3D Tiles directory tree.
//!
//! One producer thread walks the tree depth first and emits a work unit per
//! node over a bounded channel; a pool of consumers encodes each node into
//! its tile payload and, for internal nodes and the root, the `tileset.json`
//! manifest linking to the children.

mod glb;
mod pnts;
mod tileset;

pub use glb::GlbEncoder;
pub use pnts::PntsEncoder;
pub use tileset::{Asset, BoundingVolume, Child, Content, Root, Tileset};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::tree::{GridTree, Node};
use std::fmt;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

/// The 3D Tiles specification version a tileset is written against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TilesetVersion {
    #[default]
    V1_0,
    V1_1,
}

impl TilesetVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            TilesetVersion::V1_0 => "1.0",
            TilesetVersion::V1_1 => "1.1",
        }
    }
}

impl fmt::Display for TilesetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TilesetVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.0" => Ok(TilesetVersion::V1_0),
            "1.1" => Ok(TilesetVersion::V1_1),
            other => Err(Error::ConfigInvalid(format!(
                "invalid tileset version {other:?}, allowed values are \"1.0\" and \"1.1\""
            ))),
        }
    }
}

/// Encodes one octree node into the binary tile payload for its format.
/// Encoding the same node twice must produce identical bytes.
pub trait TileEncoder: Send + Sync {
    /// Name of the tile file inside the node directory
    fn filename(&self) -> &'static str;
    /// The tileset version the payload conforms to
    fn tileset_version(&self) -> TilesetVersion;
    fn encode(&self, node: &Node) -> Result<Vec<u8>>;
}

/// The minimal data needed to produce a single tile
struct WorkUnit {
    node: Arc<Node>,
    path: PathBuf,
}

/// Writes a tree as a Cesium point cloud tileset to an output folder
pub struct TilesetWriter {
    base_path: PathBuf,
    workers: usize,
    buffer_ratio: usize,
    encoder: Arc<dyn TileEncoder>,
}

impl TilesetWriter {
    pub fn new(base_path: impl Into<PathBuf>, version: TilesetVersion) -> Self {
        let encoder: Arc<dyn TileEncoder> = match version {
            TilesetVersion::V1_0 => Arc::new(PntsEncoder),
            TilesetVersion::V1_1 => Arc::new(GlbEncoder),
        };
        TilesetWriter {
            base_path: base_path.into(),
            workers: 1,
            buffer_ratio: 5,
            encoder,
        }
    }

    /// Sets the number of concurrent encoding workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the work channel capacity as a multiple of the worker count
    pub fn with_buffer_ratio(mut self, ratio: usize) -> Self {
        self.buffer_ratio = ratio.max(1);
        self
    }

    /// Walks the tree and writes one directory per node under the base
    /// path. Returns the first error reported by the traversal or by any
    /// worker; files already written are left on disk.
    pub fn write(&self, tree: &GridTree, cancel: &CancellationToken) -> Result<()> {
        if !tree.is_built() {
            return Err(Error::InvariantViolation(
                "tileset written before the tree is built".to_string(),
            ));
        }
        let root = tree.root().ok_or_else(|| {
            Error::InvariantViolation("tileset written before the tree is loaded".to_string())
        })?;

        let (work_tx, work_rx) = mpsc::sync_channel::<WorkUnit>(self.workers * self.buffer_ratio);
        let (err_tx, err_rx) = mpsc::channel::<Error>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        thread::scope(|s| {
            {
                let err_tx = err_tx.clone();
                s.spawn(move || {
                    // dropping the sender on return closes the channel and
                    // lets the consumers drain and exit
                    produce(root, self.base_path.clone(), &work_tx, &err_tx, cancel);
                });
            }
            for _ in 0..self.workers {
                let err_tx = err_tx.clone();
                let work_rx = work_rx.clone();
                let encoder = self.encoder.clone();
                s.spawn(move || consume(encoder.as_ref(), &work_rx, &err_tx, cancel));
            }
            // only the consumers may keep the receiver alive: a producer
            // blocked on a full channel must observe their exit
            drop(work_rx);
        });

        drop(err_tx);
        match err_rx.try_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Emits a work unit for the node and recurses into its children. Returns
/// false when the traversal should stop.
fn produce(
    node: &Arc<Node>,
    path: PathBuf,
    work: &SyncSender<WorkUnit>,
    err: &Sender<Error>,
    cancel: &CancellationToken,
) -> bool {
    if cancel.is_cancelled() {
        let _ = err.send(Error::Cancelled);
        return false;
    }
    if node.local_points() == 0 {
        let _ = err.send(Error::InvariantViolation(format!(
            "found a tile without points at {}",
            path.display()
        )));
        return false;
    }
    let unit = WorkUnit {
        node: node.clone(),
        path: path.clone(),
    };
    if work.send(unit).is_err() {
        // every consumer is gone, no point in continuing the walk
        return false;
    }
    for (octant, child) in node.children().iter().enumerate() {
        if let Some(child) = child {
            if !produce(child, path.join(octant.to_string()), work, err, cancel) {
                return false;
            }
        }
    }
    true
}

/// Pulls work units until the channel closes, an error occurs or the
/// pipeline is cancelled
fn consume(
    encoder: &dyn TileEncoder,
    work: &Mutex<Receiver<WorkUnit>>,
    err: &Sender<Error>,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            let _ = err.send(Error::Cancelled);
            return;
        }
        let unit = {
            let rx = work.lock().unwrap();
            rx.recv()
        };
        let Ok(unit) = unit else {
            // channel closed by the producer
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| write_tile(encoder, &unit))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = err.send(e);
                return;
            }
            Err(_) => {
                let _ = err.send(Error::InvariantViolation(format!(
                    "panic while writing the tile at {}",
                    unit.path.display()
                )));
                return;
            }
        }
    }
}

fn write_tile(encoder: &dyn TileEncoder, unit: &WorkUnit) -> Result<()> {
    fs::create_dir_all(&unit.path)?;
    let payload = encoder.encode(&unit.node)?;
    fs::write(unit.path.join(encoder.filename()), payload)?;

    // leaf nodes only carry their payload, every other node (and a root,
    // even a leaf one) needs a manifest pointing at the content
    if !unit.node.is_leaf() || unit.node.is_root() {
        let tileset = tileset::tileset_for_node(
            &unit.node,
            encoder.filename(),
            &encoder.tileset_version(),
        );
        let json = serde_json::to_vec_pretty(&tileset).map_err(|e| {
            Error::InvariantViolation(format!("tileset serialization failed: {e}"))
        })?;
        fs::write(unit.path.join("tileset.json"), json)?;
    }
    Ok(())
}
