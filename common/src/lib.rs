use std::path::PathBuf;
use thiserror::Error as ThisError;

pub use opencv;

pub mod board;
pub mod calibration;
pub mod detection;
pub mod detector;
pub mod params;
pub mod source;

pub use board::{BoardSpec, Dictionary};
pub use calibration::{CalibrationFlags, CapturedFrame, Captures};
pub use detection::{FrameDetection, FrameDetector};
pub use detector::DetectorConfig;
pub use params::CameraCalibration;
pub use source::InputSource;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("opencv error: {0}")]
    OpenCV(#[from] opencv::Error),

    #[error("Invalid detector parameters file: {0}")]
    InvalidDetectorParameters(PathBuf),

    #[error("Invalid image list {path}: {reason}")]
    InvalidImageList { path: PathBuf, reason: &'static str },

    #[error("Can't have both video and image list input")]
    ConflictingInputs,

    #[error("Could not open {0}")]
    CannotOpenSource(String),

    #[error("Unknown dictionary: {0}")]
    UnknownDictionary(String),

    #[error("Invalid board: {0}")]
    InvalidBoard(&'static str),

    #[error("Corner id {id} out of range (board has {count} corners)")]
    CornerIdOutOfRange { id: i32, count: usize },

    #[error("Empty view: no ids to map")]
    EmptyView,

    #[error("Not enough captures for calibration ({found} < {required})")]
    NotEnoughCaptures { found: usize, required: usize },

    #[error("Not enough corners for calibration ({found} views < {required})")]
    NotEnoughCorners { found: usize, required: usize },

    #[error("Cannot save output file {0}")]
    CannotSave(PathBuf),

    #[error("Cannot read parameter file {0}")]
    CannotReadParameters(PathBuf),

    #[error("Invalid parameter file {path}: missing `{key}`")]
    InvalidParameterFile { path: PathBuf, key: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
