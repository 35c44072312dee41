//! Library for converting LAS LiDAR point clouds into Cesium
//! [3D Tiles](https://github.com/CesiumGS/3d-tiles) tilesets.
//!
//! The pipeline streams points out of one or more LAS files (versions 1.1 to
//! 1.4, point formats 0 to 10), reprojects them into an Earth centered frame,
//! samples them into a [tree::GridTree] octree with approximately uniform
//! spacing at every level of detail and writes the tree as a tileset
//! directory in either the `.pnts` (3D Tiles 1.0) or the `.glb` (3D Tiles
//! 1.1) flavor.
//!
//! ```no_run
//! use cesium_tiler::{CancellationToken, Tiler, TilerOptions};
//! use std::path::Path;
//!
//! # fn main() -> cesium_tiler::Result<()> {
//! let tiler = Tiler::new();
//! let opts = TilerOptions::new().with_grid_size(10.0).with_max_depth(8);
//! tiler.process_files(
//!     &["cloud.las"],
//!     Path::new("out"),
//!     Some("EPSG:32633"),
//!     &opts,
//!     &CancellationToken::new(),
//! )?;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod error;

pub mod convert;
pub mod geom;
pub mod geotiff;
pub mod header;
pub mod mutator;
pub mod point;
pub mod reader;
pub mod tiler;
pub mod tree;
pub mod vlr;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use tiler::{find_las_files, EventCallback, Tiler, TilerEvent, TilerOptions};
pub use writer::TilesetVersion;

/// The crate version, stamped into generated tilesets and logs
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
