use thiserror::Error;

/// crate specific Result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate specific Error enum
#[derive(Error, Debug)]
pub enum Error {
    /// [std::io::Error]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The first four bytes of the input are not `LASF`
    #[error("invalid file signature, expected LASF")]
    BadSignature,

    /// Only LAS versions 1.1 through 1.4 can be read
    #[error("unsupported LAS version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// The point data section ended before the number of points declared
    /// in the header was reached. The header counts are authoritative.
    #[error("point data ended before the declared point count was reached")]
    TruncatedPointData,

    /// Global encoding bits 1 and 2 are mutually exclusive
    #[error("internal and external waveform data bits cannot be both set")]
    InconsistentWaveformFlags,

    /// A VLR or EVLR record could not be parsed
    #[error("malformed variable length record: {0}")]
    MalformedVlr(String),

    /// The GeoTIFF key directory payload could not be parsed
    #[error("malformed GeoTIFF metadata: {0}")]
    MalformedGeoTiff(String),

    /// The LAS carries no CRS metadata and the caller did not provide one
    #[error("no CRS found in the input and none was provided")]
    NoCrsProvided,

    /// Input files to be merged declare different CRSs
    #[error("inconsistent CRS across input files: {expected} vs {found}")]
    InconsistentCrs { expected: String, found: String },

    /// The coordinate converter failed or returned a non finite result
    #[error("coordinate transformation from {src} to {dst} failed: {reason}")]
    CoordinateTransformFailed {
        src: String,
        dst: String,
        reason: String,
    },

    /// The reader declares zero points, or every point was discarded
    #[error("the input contains no points")]
    EmptyInput,

    /// An internal invariant was broken, e.g. a node with zero points
    /// reached the tile writer
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The cancellation token was tripped
    #[error("the operation was cancelled")]
    Cancelled,

    /// An option is outside its allowed range
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}
