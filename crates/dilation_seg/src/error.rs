//! Error type for the segmentation pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required input file does not exist
    #[error("{what} does not exist: {}", path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    /// Only the frontend model can be tested
    #[error("only front end testing is supported now (got '{0}')")]
    UnsupportedModel(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Blob files carry f32 or f64 payloads only
    #[error("element type {0} is not supported by the blob format")]
    UnsupportedElement(&'static str),

    /// Malformed blob file
    #[error("blob format error: {0}")]
    Format(String),

    #[error("shape error: {0}")]
    Shape(String),

    /// Failure reported by the inference runner
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error at {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Error::Image {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn inference(err: anyhow::Error) -> Self {
        Error::Inference(format!("{err:#}"))
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}

/// Specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_names_the_path() {
        let err = Error::MissingInput {
            what: "image list",
            path: PathBuf::from("lists/val.txt"),
        };
        assert_eq!(err.to_string(), "image list does not exist: lists/val.txt");
    }

    #[test]
    fn inference_error_keeps_context_chain() {
        let err = anyhow::anyhow!("bad tensor").context("forward pass");
        let err = Error::inference(err);
        assert_eq!(err.to_string(), "inference failed: forward pass: bad tensor");
    }
}
