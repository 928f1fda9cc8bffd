//! The JSON update manifest stored in group 1.
//!
//! Only the keys the generator reads or fills in are interpreted, everything
//! else is carried through untouched.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use swarc::format::BlockType;

use crate::detect;
use crate::error::{PackageError, Result};

/// Name of the enriched manifest written next to the package.
pub const SIDE_CHANNEL_FILE: &str = "enriched_update_manifest.json";


#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtefactEntry {
    pub name: String,
    #[serde(default)]
    pub update_type: String,
    #[serde(default = "no_type")]
    pub compression_type: String,
    #[serde(default = "no_type")]
    pub archive_type: String,
}

fn no_type() -> String {
    "None".to_string()
}

impl ArtefactEntry {
    pub fn block_type(&self) -> Result<BlockType> {
        match self.update_type.as_str() {
            "Image" => Ok(BlockType::BinaryImage),
            "Device" | "Application" => Ok(BlockType::Application),
            x => Err(PackageError::spec(format!(
                "artefact {}: unknown updateType {:?}",
                self.name, x
            ))),
        }
    }

    /// What the artefact file has to sniff as.
    pub fn expected_kind(&self) -> &str {
        if self.compression_type == "None" {
            &self.archive_type
        } else {
            &self.compression_type
        }
    }

    pub fn check_file(&self, path: &Path) -> Result<()> {
        let kind = detect::sniff_path(path)?;
        if kind.name() != self.expected_kind() {
            return Err(PackageError::spec(format!(
                "artefact {} is {}, the update manifest says {}",
                self.name,
                kind,
                self.expected_kind()
            )));
        }
        Ok(())
    }
}

/// Final sizes of one artefact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtefactSizes {
    pub name: String,
    pub compressed: u64,
    pub uncompressed: u64,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    document: Value,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest> {
        let file = File::open(path)?;
        Manifest::from_value(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn from_value(document: Value) -> Result<Manifest> {
        let manifest = Manifest { document };
        manifest.package()?;
        Ok(manifest)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    fn package(&self) -> Result<&Map<String, Value>> {
        self.document
            .get("SWPackage")
            .and_then(|p| p.get(0))
            .and_then(|p| p.as_object())
            .ok_or_else(|| PackageError::spec("update manifest has no SWPackage entry"))
    }

    pub fn action_type(&self) -> Option<&str> {
        self.package().ok()?.get("actionType")?.as_str()
    }

    pub fn is_removal(&self) -> bool {
        self.action_type() == Some("Remove")
    }

    /// The artefact list, which may also be stored as an embedded JSON string.
    pub fn artefacts(&self) -> Result<Vec<ArtefactEntry>> {
        if self.is_removal() {
            return Ok(Vec::new());
        }
        match self.document.get("Artefact") {
            Some(Value::String(s)) => Ok(serde_json::from_str(s)?),
            Some(list @ Value::Array(_)) => Ok(serde_json::from_value(list.clone())?),
            _ => Err(PackageError::spec("update manifest has no Artefact list")),
        }
    }

    /// Pair every manifest entry with the supplied file of the same name.
    ///
    /// The result follows the manifest order.
    pub fn match_artefacts(&self, supplied: &[PathBuf]) -> Result<Vec<(ArtefactEntry, PathBuf)>> {
        if self.is_removal() {
            if !supplied.is_empty() {
                warn!("removal manifest, ignoring {} supplied artefacts", supplied.len());
            }
            return Ok(Vec::new());
        }

        let entries = self.artefacts()?;
        if entries.len() != supplied.len() {
            return Err(PackageError::spec(format!(
                "update manifest lists {} artefacts, {} supplied",
                entries.len(),
                supplied.len()
            )));
        }

        let mut by_name = Vec::with_capacity(supplied.len());
        let mut seen = HashSet::new();
        for path in supplied {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| PackageError::spec(format!("{} has no file name", path.display())))?;
            if !seen.insert(name.clone()) {
                return Err(PackageError::spec(format!("artefact {} supplied twice", name)));
            }
            by_name.push((name, path.clone()));
        }

        for (name, _) in &by_name {
            if !entries.iter().any(|e| &e.name == name) {
                return Err(PackageError::spec(format!(
                    "{} was supplied but is not in the update manifest",
                    name
                )));
            }
        }

        entries
            .into_iter()
            .map(|entry| {
                let path = by_name
                    .iter()
                    .find(|(name, _)| *name == entry.name)
                    .map(|(_, path)| path.clone())
                    .ok_or_else(|| {
                        PackageError::spec(format!(
                            "{} is in the update manifest but was not supplied",
                            entry.name
                        ))
                    })?;
                Ok((entry, path))
            })
            .collect()
    }

    /// The document with every computed size set to `placeholder`.
    pub fn provisional(&self, placeholder: u64) -> Result<Value> {
        let sizes: Vec<ArtefactSizes> = self
            .artefacts()?
            .into_iter()
            .map(|e| ArtefactSizes {
                name: e.name,
                compressed: placeholder,
                uncompressed: placeholder,
            })
            .collect();

        let mut document = self.document.clone();
        apply(&mut document, placeholder, placeholder, placeholder, &sizes)?;
        Ok(document)
    }

    /// Fill in the final sizes and the estimated duration at `throughput` bytes per second.
    pub fn enrich(&mut self, sizes: &[ArtefactSizes], throughput: u64) -> Result<()> {
        if throughput == 0 {
            return Err(PackageError::spec("estimated throughput must be positive"));
        }
        let uncompressed: u64 = sizes.iter().map(|s| s.uncompressed).sum();
        let compressed: u64 = sizes.iter().map(|s| s.compressed).sum();
        let duration = div_round_even(uncompressed, throughput);

        debug!(
            "manifest totals: {} uncompressed, {} compressed, {}s",
            uncompressed, compressed, duration
        );
        apply(&mut self.document, uncompressed, compressed, duration, sizes)
    }

    pub fn write_side_channel(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SIDE_CHANNEL_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&self.document)?)?;
        Ok(path)
    }
}

// Nearest integer quotient, halves go to the even neighbour
fn div_round_even(n: u64, d: u64) -> u64 {
    let (q, r) = (n / d, n % d);
    let rest = d - r;
    if r > rest || (r == rest && q % 2 == 1) {
        q + 1
    } else {
        q
    }
}

fn apply(
    document: &mut Value,
    uncompressed: u64,
    compressed: u64,
    duration: u64,
    sizes: &[ArtefactSizes],
) -> Result<()> {
    let package = document
        .get_mut("SWPackage")
        .and_then(|p| p.get_mut(0))
        .and_then(|p| p.as_object_mut())
        .ok_or_else(|| PackageError::spec("update manifest has no SWPackage entry"))?;
    package.insert("uncompressedSoftwareClusterSize".to_string(), uncompressed.into());
    package.insert("compressedSoftwarePackageSize".to_string(), compressed.into());
    package.insert("estimatedDurationOfOperation".to_string(), duration.into());

    if sizes.is_empty() {
        return Ok(());
    }

    match document.get_mut("Artefact") {
        Some(Value::String(embedded)) => {
            let mut list: Value = serde_json::from_str(embedded)?;
            apply_artefacts(&mut list, sizes);
            *embedded = serde_json::to_string(&list)?;
        }
        Some(list) => apply_artefacts(list, sizes),
        None => return Err(PackageError::spec("update manifest has no Artefact list")),
    }
    Ok(())
}

fn apply_artefacts(list: &mut Value, sizes: &[ArtefactSizes]) {
    let entries = match list.as_array_mut() {
        Some(entries) => entries,
        None => return,
    };

    for entry in entries.iter_mut().filter_map(|e| e.as_object_mut()) {
        let name = entry.get("name").and_then(|n| n.as_str()).map(str::to_string);
        if let Some(size) = sizes.iter().find(|s| Some(&s.name) == name.as_ref()) {
            entry.insert("compressedSize".to_string(), size.compressed.into());
            entry.insert("uncompressedSize".to_string(), size.uncompressed.into());
        }
    }
}
