use std::fs;
use std::path::PathBuf;
use std::process::Command;

use log::debug;
use serde_json::Value;

use crate::error::{PackageError, Result};

/// Turns the update manifest into the bytes stored in the manifest group.
pub trait SchemaCompiler {
    fn compile(&self, document: &Value) -> Result<Vec<u8>>;

    /// Stand-in for the sizes that are unknown until every artefact is written.
    ///
    /// The provisional encoding built with it must not be smaller than the final one.
    fn placeholder(&self) -> u64 {
        u64::MAX
    }
}

/// Compact JSON, keys in sorted order.
pub struct CanonicalJson;

impl SchemaCompiler for CanonicalJson {
    fn compile(&self, document: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(document)?)
    }
}

/// FlatBuffers binary produced by an external `flatc`.
pub struct Flatc {
    pub program: PathBuf,
    pub schema: PathBuf,
}

impl Flatc {
    pub fn new(program: PathBuf, schema: PathBuf) -> Flatc {
        Flatc { program, schema }
    }
}

impl SchemaCompiler for Flatc {
    fn compile(&self, document: &Value) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("manifest.json");
        fs::write(&input, serde_json::to_vec(document)?)?;

        let output = Command::new(&self.program)
            .arg("-b")
            .arg("-o")
            .arg(scratch.path())
            .arg(&self.schema)
            .arg(&input)
            .output()?;

        if !output.status.success() {
            return Err(PackageError::Schema(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let binary = fs::read(scratch.path().join("manifest.bin"))?;
        debug!("{} compiled manifest to {} bytes", self.program.display(), binary.len());
        Ok(binary)
    }

    // Scalars are fixed width, a non default value keeps every field present
    fn placeholder(&self) -> u64 {
        1
    }
}
