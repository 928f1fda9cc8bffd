use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArcError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("layout: {0}")]
    Layout(String),
    #[error("incomplete write at {position}: expected {expected} bytes, found {found}")]
    IncompleteWrite {
        position: u64,
        expected: u64,
        found: u64,
    },
    #[error("value {value} does not fit a {encoding} field")]
    EncodingMismatch { value: String, encoding: &'static str },
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),
    #[error("layout corruption: {field} at {position} does not match its committed value")]
    LayoutCorruption { field: String, position: u64 },
    #[error("unsupported container format version {0:#06x}")]
    UnsupportedFormat(u32),
    #[error("no field named {0}")]
    MissingField(String),
    #[error("malformed container: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ArcError>;
