pub mod block;
pub mod error;
pub mod field;
pub mod format;
pub mod header;
pub mod integrity;
pub mod reader;
pub mod record;
pub mod sink;
