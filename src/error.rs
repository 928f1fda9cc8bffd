use std::path::PathBuf;

use swarc::error::ArcError;
use swcore::crypto::KeyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] ArcError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error("specification: {0}")]
    Specification(String),
    #[error("artefact {0:?} does not exist")]
    MissingArtefact(PathBuf),
    #[error("schema compiler: {0}")]
    Schema(String),
}

impl PackageError {
    pub fn spec<S: Into<String>>(msg: S) -> PackageError {
        PackageError::Specification(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PackageError>;
