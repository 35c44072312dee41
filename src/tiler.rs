//! The orchestrator wiring reader, tree and writer into a pipeline.

use crate::cancel::CancellationToken;
use crate::convert::{proj4_factory, ConverterFactory};
use crate::error::{Error, Result};
use crate::mutator::{Mutator, Pipeline, ZOffset};
use crate::reader::{CombinedLasReader, LasReader};
use crate::tree::GridTree;
use crate::writer::{TilesetVersion, TilesetWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Lifecycle notifications emitted while a pipeline runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilerEvent {
    ReadStart,
    ReadDone,
    ReadError,
    LoadStart,
    LoadDone,
    LoadError,
    BuildStart,
    BuildDone,
    BuildError,
    ExportStart,
    ExportDone,
    ExportError,
}

/// Receives events together with a description of the input being processed,
/// the time elapsed since the pipeline started and a human readable message
pub type EventCallback = Box<dyn Fn(TilerEvent, &str, Duration, &str) + Send + Sync>;

/// Tuning options for a tiling run
pub struct TilerOptions {
    grid_size: f64,
    max_depth: u32,
    z_offset: f32,
    eight_bit_colors: bool,
    workers: usize,
    min_points_per_tile: usize,
    version: TilesetVersion,
    callback: Option<EventCallback>,
}

impl Default for TilerOptions {
    fn default() -> Self {
        TilerOptions {
            grid_size: 20.0,
            max_depth: 10,
            z_offset: 0.0,
            eight_bit_colors: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            min_points_per_tile: 5000,
            version: TilesetVersion::V1_0,
            callback: None,
        }
    }
}

impl TilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the approximate maximum spacing between any two points at the
    /// coarsest level of detail, in meters
    pub fn with_grid_size(mut self, size: f64) -> Self {
        self.grid_size = size;
        self
    }

    /// Sets the maximum number of levels of the tree
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the vertical offset to apply to every point, in meters
    pub fn with_z_offset(mut self, offset: f32) -> Self {
        self.z_offset = offset;
        self
    }

    /// Interprets input colors as 8 bit instead of 16 bit
    pub fn with_eight_bit_colors(mut self, eight_bit: bool) -> Self {
        self.eight_bit_colors = eight_bit;
        self
    }

    /// Sets the number of workers used for loading and for export
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the minimum number of points a tile must hold to exist on its
    /// own; smaller tiles are folded into their parent
    pub fn with_min_points_per_tile(mut self, min: usize) -> Self {
        self.min_points_per_tile = min;
        self
    }

    /// Sets the 3D Tiles version of the output
    pub fn with_version(mut self, version: TilesetVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets a callback invoked at every pipeline lifecycle event
    pub fn with_callback(mut self, callback: EventCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.5..=1000.0).contains(&self.grid_size) {
            return Err(Error::ConfigInvalid(
                "resolution must be between 0.5 and 1000 meters".to_string(),
            ));
        }
        if !(2..=20).contains(&self.max_depth) {
            return Err(Error::ConfigInvalid(
                "depth must be between 2 and 20".to_string(),
            ));
        }
        if self.min_points_per_tile < 1 {
            return Err(Error::ConfigInvalid(
                "min points per tile must be at least 1".to_string(),
            ));
        }
        if self.workers < 1 {
            return Err(Error::ConfigInvalid(
                "at least one worker is required".to_string(),
            ));
        }
        Ok(())
    }

    fn emit(&self, event: TilerEvent, input: &str, start: Instant, msg: &str) {
        if let Some(callback) = &self.callback {
            callback(event, input, start.elapsed(), msg);
        }
    }
}

/// Converts LAS point clouds into Cesium 3D Tiles tilesets
pub struct Tiler {
    factory: ConverterFactory,
}

impl Default for Tiler {
    fn default() -> Self {
        Tiler {
            factory: proj4_factory(),
        }
    }
}

impl Tiler {
    /// Returns a tiler using the built-in proj4 coordinate converter
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a tiler reprojecting coordinates through the converters
    /// produced by the given factory
    pub fn with_converter_factory(factory: ConverterFactory) -> Self {
        Tiler { factory }
    }

    /// Converts the given LAS files into a single tileset rooted at
    /// `output_folder`. All files must share one CRS: either the one
    /// provided here or the one declared by the files themselves.
    pub fn process_files<P: AsRef<Path>>(
        &self,
        input_files: &[P],
        output_folder: &Path,
        source_crs: Option<&str>,
        opts: &TilerOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        opts.validate()?;
        let start = Instant::now();
        let input_desc = match input_files {
            [single] => single.as_ref().display().to_string(),
            files => format!("{} files", files.len()),
        };

        opts.emit(TilerEvent::ReadStart, &input_desc, start, "start reading las");
        let reader = match CombinedLasReader::new(input_files, source_crs) {
            Ok(reader) => reader,
            Err(e) => {
                opts.emit(
                    TilerEvent::ReadError,
                    &input_desc,
                    start,
                    &format!("las read error: {e}"),
                );
                return Err(e);
            }
        };
        opts.emit(
            TilerEvent::ReadDone,
            &input_desc,
            start,
            &format!(
                "las headers read, found {} points in crs {}",
                reader.point_count(),
                reader.crs()
            ),
        );

        opts.emit(TilerEvent::LoadStart, &input_desc, start, "point loading started");
        let mutator: Pipeline = Pipeline::new(vec![Box::new(ZOffset::new(opts.z_offset))]);
        let mut tree = GridTree::new()
            .with_grid_size(opts.grid_size)
            .with_max_depth(opts.max_depth)
            .with_load_workers(opts.workers)
            .with_min_points_per_child(opts.min_points_per_tile)
            .with_eight_bit_colors(opts.eight_bit_colors);
        if let Err(e) = self.load_tree(&mut tree, &reader, &mutator, cancel) {
            opts.emit(
                TilerEvent::LoadError,
                &input_desc,
                start,
                &format!("load error: {e}"),
            );
            return Err(e);
        }
        opts.emit(TilerEvent::LoadDone, &input_desc, start, "point loading completed");

        opts.emit(TilerEvent::BuildStart, &input_desc, start, "build started");
        if let Err(e) = tree.build() {
            opts.emit(
                TilerEvent::BuildError,
                &input_desc,
                start,
                &format!("build error: {e}"),
            );
            return Err(e);
        }
        opts.emit(TilerEvent::BuildDone, &input_desc, start, "build completed");

        opts.emit(TilerEvent::ExportStart, &input_desc, start, "export started");
        let writer = TilesetWriter::new(output_folder, opts.version).with_workers(opts.workers);
        if let Err(e) = writer.write(&tree, cancel) {
            opts.emit(
                TilerEvent::ExportError,
                &input_desc,
                start,
                &format!("export error: {e}"),
            );
            return Err(e);
        }
        opts.emit(
            TilerEvent::ExportDone,
            &input_desc,
            start,
            &format!("export completed in {:?}", start.elapsed()),
        );
        Ok(())
    }

    /// Converts every LAS file found in `input_folder` (not recursing into
    /// subdirectories). With `join` set, all files are merged into a single
    /// tileset; otherwise each file becomes its own tileset in a
    /// subdirectory named after the file stem.
    pub fn process_folder(
        &self,
        input_folder: &Path,
        output_folder: &Path,
        source_crs: Option<&str>,
        join: bool,
        opts: &TilerOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let files = find_las_files(input_folder)?;
        if join {
            return self.process_files(&files, output_folder, source_crs, opts, cancel);
        }
        for file in &files {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            self.process_files(
                &[file],
                &output_folder.join(stem),
                source_crs,
                opts,
                cancel,
            )?;
        }
        Ok(())
    }

    fn load_tree(
        &self,
        tree: &mut GridTree,
        reader: &dyn LasReader,
        mutator: &dyn Mutator,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!(
            "cesium-tiler {} loading {} points into the octree",
            crate::VERSION,
            reader.point_count()
        );
        tree.load(reader, &self.factory, mutator, cancel)
    }
}

/// Returns the `.las` files directly contained in the folder, in platform
/// enumeration order. The extension check is case insensitive.
pub fn find_las_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_las = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case("las"))
            .unwrap_or(false);
        if is_las {
            files.push(path);
        }
    }
    Ok(files)
}
