use anyhow::Context;
use cesium_tiler::{CancellationToken, Tiler, TilerEvent, TilerOptions, TilesetVersion};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
// no auto version flag: -v/--version selects the tileset version instead
#[command(
    name = "cesium-tiler",
    about = "Transforms LAS point clouds into Cesium 3D Tiles"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a single LAS file into a tileset
    File {
        /// Path of the LAS file to convert
        path: PathBuf,
        #[command(flatten)]
        opts: CommonOpts,
    },
    /// Convert all LAS files found in a folder
    Folder {
        /// Path of the folder to scan, not recursed into
        path: PathBuf,
        #[command(flatten)]
        opts: CommonOpts,
        /// Merge all the LAS files into a single point cloud. The files
        /// must share the same CRS
        #[arg(long, short = 'j')]
        join: bool,
    },
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// Output folder where the tilesets are written
    #[arg(long, short = 'o')]
    out: PathBuf,

    /// Source CRS, e.g. EPSG:32633 or a proj4 string. Bare numbers are
    /// interpreted as EPSG codes. Overrides the CRS declared by the input
    #[arg(long, short = 'e', visible_alias = "epsg")]
    crs: Option<String>,

    /// Minimum tileset resolution in meters, the approximate maximum
    /// spacing between points at the coarsest level of detail
    #[arg(long, short = 'r', default_value_t = 20.0)]
    resolution: f64,

    /// Vertical offset to apply to the points, in meters
    #[arg(long = "z-offset", short = 'z', default_value_t = 0.0)]
    z_offset: f32,

    /// Maximum depth of the output tree
    #[arg(long, short = 'd', default_value_t = 10)]
    depth: u32,

    /// Minimum number of points per tile
    #[arg(long = "min-points-per-tile", short = 'm', default_value_t = 5000)]
    min_points_per_tile: usize,

    /// Interpret input colors as 8 bit instead of 16 bit
    #[arg(long = "8-bit")]
    eight_bit: bool,

    /// Version of the tilesets to generate, either 1.0 or 1.1
    #[arg(long = "version", short = 'v', default_value = "1.0")]
    version: String,
}

impl CommonOpts {
    fn tiler_options(&self) -> anyhow::Result<TilerOptions> {
        let version: TilesetVersion = self.version.parse()?;
        Ok(TilerOptions::new()
            .with_grid_size(self.resolution)
            .with_z_offset(self.z_offset)
            .with_max_depth(self.depth)
            .with_min_points_per_tile(self.min_points_per_tile)
            .with_eight_bit_colors(self.eight_bit)
            .with_version(version)
            .with_callback(Box::new(print_event)))
    }

    /// Bare integers are shorthand for EPSG codes
    fn source_crs(&self) -> Option<String> {
        self.crs.as_ref().map(|crs| match crs.parse::<u32>() {
            Ok(code) => format!("EPSG:{code}"),
            Err(_) => crs.clone(),
        })
    }
}

fn print_event(_event: TilerEvent, input: &str, elapsed: Duration, msg: &str) {
    println!("[{:>9.3}s] [{input}] {msg}", elapsed.as_secs_f64());
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let tiler = Tiler::new();

    match &cli.command {
        Command::File { path, opts } => {
            let tiler_opts = opts.tiler_options()?;
            tiler
                .process_files(
                    &[path],
                    &opts.out,
                    opts.source_crs().as_deref(),
                    &tiler_opts,
                    &cancel,
                )
                .with_context(|| format!("processing {}", path.display()))?;
        }
        Command::Folder { path, opts, join } => {
            let tiler_opts = opts.tiler_options()?;
            tiler
                .process_folder(
                    path,
                    &opts.out,
                    opts.source_crs().as_deref(),
                    *join,
                    &tiler_opts,
                    &cancel,
                )
                .with_context(|| format!("processing folder {}", path.display()))?;
        }
    }
    Ok(())
}
