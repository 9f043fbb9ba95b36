use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store has no object at path {0}")]
    NotFound(String),
    #[error("Store object {path} has no attribute {attr}")]
    MissingAttribute { path: String, attr: String },
    #[error("Store object {0} is not a dataset")]
    NotADataset(String),
    #[error("Store object {0} is not a group")]
    NotAGroup(String),
    #[error("Frame index {index} is out of range for {path} with {count} frames")]
    IndexOutOfRange {
        path: String,
        index: usize,
        count: usize,
    },
    #[error("Store object {path} has rank {rank}; expected {expected}")]
    BadRank {
        path: String,
        rank: usize,
        expected: usize,
    },
    #[error("Store failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Store failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Store failed due to HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Store failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Store failed to decode base64 chunk: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Store found an unsupported codec {codec} on {path}")]
    UnsupportedCodec { path: String, codec: String },
    #[error("Store found an unsupported dtype {dtype} on {path}")]
    UnsupportedDtype { path: String, dtype: String },
    #[error("Store does not support the source format of {0}")]
    UnsupportedFormat(String),
    #[error("Store found malformed metadata on {path}: {reason}")]
    BadMetadata { path: String, reason: String },
    #[error("Store failed to decompress chunk {key}: {reason}")]
    Decompress { key: String, reason: String },
    #[error("Store chunk {key} has {found} bytes; expected {expected}")]
    BadChunkSize {
        key: String,
        found: usize,
        expected: usize,
    },
}

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("TimeSeries failed due to store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("TimeSeries {path} has invalid rate {rate}; rate must be finite and positive")]
    InvalidRate { path: String, rate: f64 },
    #[error("TimeSeries {path} has invalid starting time {time}")]
    InvalidStartingTime { path: String, time: f64 },
    #[error("TimeSeries {path} has data shape {shape:?}; expected {expected}")]
    BadShape {
        path: String,
        shape: Vec<usize>,
        expected: &'static str,
    },
    #[error("TimeSeries {path} has {count} channels; channel {index} does not exist")]
    BadChannel {
        path: String,
        index: usize,
        count: usize,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session failed to open source: {0}")]
    OpenError(StoreError),
    #[error("Session could not locate the acquisition registry in {0}")]
    NoAcquisitionRegistry(String),
    #[error("Session has no {kind} named {name}")]
    MissingSubStream { kind: &'static str, name: String },
    #[error("Session has no acquisitions")]
    NoAcquisitions,
    #[error("Session acquisitions disagree on ROI count -- {first_name}: {first}, {name}: {found}")]
    RoiCountMismatch {
        first_name: String,
        first: usize,
        name: String,
        found: usize,
    },
    #[error("Session failed due to TimeSeries error: {0}")]
    SeriesError(#[from] SeriesError),
    #[error("Session failed due to store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Session cache lock was poisoned")]
    CachePoisoned,
}

impl SessionError {
    /// True for the expected, per-acquisition failure of a sub-stream lookup.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingSubStream { .. })
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request to {url} failed with status {status}")]
    BadStatus { url: String, status: u16 },
    #[error("Catalog failed due to HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Catalog failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Interpolation received an empty sample grid")]
    EmptySeries,
    #[error("Interpolation received {xp} sample times but {fp} values")]
    LengthMismatch { xp: usize, fp: usize },
    #[error("No acquisition produced data for the aggregate")]
    NoData,
    #[error("ROI number {0} is invalid; ROI numbers start at 1")]
    BadRoiNumber(usize),
    #[error("Analysis failed due to Session error: {0}")]
    SessionError(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Report failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Report failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Report failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Report failed to encode string attribute: {0}")]
    StringError(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has invalid ROI number {0}; ROI numbers start at 1")]
    BadRoiNumber(usize),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Catalog error: {0}")]
    CatalogError(#[from] CatalogError),
    #[error("Processor failed due to Report error: {0}")]
    ReportError(#[from] ReportError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
