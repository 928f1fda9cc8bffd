pub mod cli;
pub mod detect;
pub mod error;
pub mod inspect;
pub mod manifest;
pub mod package;
pub mod schema;
