use thiserror::Error;

/// I/O errors that can occur when reading local files or remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation interrupted or timed out before completing
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Object or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stream ended before the expected number of bytes was read
    #[error("Unexpected end of data: {0}")]
    UnexpectedEof(String),

    /// Any other local filesystem failure
    #[error("File error: {0}")]
    File(String),
}

impl IoError {
    /// Whether a retry of the same operation may succeed.
    ///
    /// Only failures of the transport are transient. A short or missing file
    /// is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IoError::S3(_) | IoError::Connection(_) | IoError::Interrupted(_)
        )
    }
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof => IoError::UnexpectedEof(err.to_string()),
            ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                IoError::Interrupted(err.to_string())
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe => IoError::Connection(err.to_string()),
            _ => IoError::File(err.to_string()),
        }
    }
}

/// Errors related to format detection and decoding
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Header fields are present but inconsistent or out of range
    #[error("Malformed header: {reason}")]
    MalformedHeader { reason: String },

    /// Voxel data length disagrees with the declared dimensions
    #[error("Voxel data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Embedded image could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        FormatError::Io(err.into())
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain the structure being read
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or loops back)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only uncompressed strips are supported)")]
    UnsupportedCompression(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Directory pages disagree on width, height or sample layout
    #[error("Inconsistent stack: page {page} is {found}, expected {expected}")]
    InconsistentStack {
        page: usize,
        expected: String,
        found: String,
    },
}

/// Error returned to the caller of a volume load.
///
/// Every fatal load failure funnels into this type so the UI boundary has a
/// single human-readable cause to show.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Transfer kept failing after the retry budget was spent
    #[error("Failed to load {name} after {attempts} attempt(s): {source}")]
    LoadFailed {
        name: String,
        attempts: u32,
        #[source]
        source: IoError,
    },

    /// The resource could be read but not decoded
    #[error("Failed to decode {name}: {source}")]
    Format {
        name: String,
        #[source]
        source: FormatError,
    },

    /// Background decode worker panicked or was cancelled
    #[error("Load worker for {name} stopped: {message}")]
    Worker { name: String, message: String },
}

/// Errors raised by the rendering layer
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Shader failed to compile or link
    #[error("Shader compile error in {kind}: {message}")]
    ShaderCompile { kind: &'static str, message: String },

    /// GPU texture or buffer could not be allocated
    #[error("GPU resource error: {0}")]
    GpuResource(String),

    /// Shader program does not expose a uniform the renderer must set
    #[error("Shader {kind} has no uniform named {name}")]
    MissingUniform {
        kind: &'static str,
        name: &'static str,
    },

    /// Handle refers to a released resource
    #[error("Stale GPU resource handle: {0}")]
    StaleHandle(String),

    /// No usable adapter or device
    #[error("GPU device unavailable: {0}")]
    Device(String),

    /// Reading the rendered frame back failed
    #[error("Frame readback failed: {0}")]
    Readback(String),
}
