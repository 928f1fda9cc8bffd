//! Two pass package builder
//!
//! A package moves through `Specified -> Reserved -> Filled -> Signed ->
//! Verified -> Closed`, one call per step:
//!
//! | Step      | Effect |
//! | --------- | ------ |
//! | `new`     | Validate the manifest against the artefacts, plan the ATAG and BIT |
//! | `reserve` | Lay out ATAG, BIT and a manifest region sized from a provisional encoding |
//! | `fill`    | Write, seal and verify every artefact group, then the final manifest into its region |
//! | `sign`    | Set the total size and seal ATAG and BIT |
//! | `verify`  | Check the header seals |
//! | `close`   | Read every committed field back and compare it |
//!
//! Any error leaves the output unusable, the caller has to discard it.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use serde::Serialize;
use swarc::block::{open_artefact, BlockSequence, SequenceOptions};
use swarc::error::ArcError;
use swarc::format::{BlockType, CompressionType, FormatVersion, FIRST_ARTEFACT_GROUP, MANIFEST_GROUP};
use swarc::header::{Atag, Bit, Bitr};
use swarc::integrity::{Protocol, Sealer};
use swarc::sink::Sink;
use swcore::compress::Algorithm;
use swcore::crypto::{KeyStore, NullSigner, SignAlgorithm, Signer, Verifier};
use swcore::hash::HashKind;

use crate::error::{PackageError, Result};
use crate::manifest::{ArtefactSizes, Manifest};
use crate::schema::SchemaCompiler;

/// Room left for the manifest to grow past its provisional encoding.
pub const MANIFEST_SLACK: u64 = 100;

// Zero fill write size
const ZERO_CHUNK: usize = 64 * 1024;

/// Per artefact compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Chunks,
    Whole,
    Stored,
}

impl Method {
    pub fn compression(self) -> CompressionType {
        match self {
            Method::Chunks => CompressionType::Chunks,
            Method::Whole => CompressionType::Whole,
            Method::Stored => CompressionType::None,
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "compressChunks" | "chunks" => Ok(Method::Chunks),
            "compressWhole" | "whole" => Ok(Method::Whole),
            "none" | "None" | "stored" => Ok(Method::Stored),
            x => Err(format!("unknown compression method: {}", x)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtefactSpec {
    pub path: PathBuf,
    pub method: Method,
}

/// Everything a build needs besides keys and the schema compiler.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub version: FormatVersion,
    pub hash: HashKind,
    pub manifest_tag: u32,
    pub manifest: PathBuf,
    pub artefacts: Vec<ArtefactSpec>,
    pub algorithm: Algorithm,
    pub max_chunk: Option<u64>,
    /// Bytes per second
    pub throughput: u64,
    pub check_types: bool,
}

impl PackageSpec {
    pub fn new(manifest: PathBuf, artefacts: Vec<ArtefactSpec>) -> PackageSpec {
        PackageSpec {
            version: FormatVersion::CrcAndSignature,
            hash: HashKind::Sha256,
            manifest_tag: 0,
            manifest,
            artefacts,
            algorithm: Algorithm::Zlib,
            max_chunk: Some(768),
            throughput: 1000 * 1000,
            check_types: true,
        }
    }
}

/// Signing keys and the optional certificate embedded in the ATAG.
pub struct Credentials {
    pub signer: Box<dyn Signer>,
    pub verifier: Box<dyn Verifier>,
    pub certificate: Option<Vec<u8>>,
}

impl Credentials {
    pub fn from_store(store: &KeyStore, alg: SignAlgorithm) -> Result<Credentials> {
        Ok(Credentials {
            signer: store.signer(alg)?,
            verifier: store.verifier(alg)?,
            certificate: store.certificate().map(|c| c.to_vec()),
        })
    }

    pub fn unsigned() -> Credentials {
        Credentials {
            signer: Box::new(NullSigner),
            verifier: Box::new(NullSigner),
            certificate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Specified,
    Reserved,
    Filled,
    Signed,
    Verified,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: u32,
    pub name: String,
    pub blocks: usize,
    pub raw_size: u64,
    pub payload_size: u64,
    pub serialized_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub total_size: u64,
    pub manifest_reserved: u64,
    pub groups: Vec<GroupReport>,
}

struct Planned {
    name: String,
    path: PathBuf,
    group: u32,
    options: SequenceOptions,
}

pub struct Package {
    state: State,
    spec: PackageSpec,
    manifest: Manifest,
    planned: Vec<Planned>,
    credentials: Credentials,
    compiler: Box<dyn SchemaCompiler>,
    protocol: Protocol,
    atag: Atag,
    bit: Bit,
    manifest_blocks: Option<BlockSequence>,
    artefact_blocks: Vec<BlockSequence>,
    // Manifest region fixed by the reserve pass
    region: (u64, u64),
    cursor: u64,
}

impl Package {
    /// Validate the specification, nothing is written yet.
    pub fn new(spec: PackageSpec, credentials: Credentials, compiler: Box<dyn SchemaCompiler>) -> Result<Package> {
        if spec.throughput == 0 {
            return Err(PackageError::spec("estimated throughput must be positive"));
        }
        if spec.max_chunk == Some(0) {
            return Err(ArcError::Layout("maximum block size must be at least 1 byte".to_string()).into());
        }
        if spec.version.has_signature() && spec.hash == HashKind::Crc32 {
            warn!("signing a CRC32 digest, use sha256 or blake3 for a meaningful signature");
        }

        let manifest = Manifest::load(&spec.manifest)?;
        let supplied: Vec<PathBuf> = spec.artefacts.iter().map(|a| a.path.clone()).collect();
        let width = credentials.signer.width();

        let mut entries = vec![Bitr::planned(
            MANIFEST_GROUP,
            BlockType::Manifest,
            CompressionType::None,
            Algorithm::None,
        )];
        let mut planned = Vec::new();

        for (i, (entry, path)) in manifest.match_artefacts(&supplied)?.into_iter().enumerate() {
            let metadata = fs::metadata(&path).map_err(|_| PackageError::MissingArtefact(path.clone()))?;
            if !metadata.is_file() {
                return Err(PackageError::MissingArtefact(path));
            }
            if metadata.len() == 0 {
                return Err(PackageError::spec(format!("artefact {} is empty", entry.name)));
            }
            if spec.check_types {
                entry.check_file(&path)?;
            }

            let method = spec
                .artefacts
                .iter()
                .find(|a| a.path == path)
                .map(|a| a.method)
                .unwrap_or(Method::Stored);
            let options = SequenceOptions {
                max_chunk: spec.max_chunk,
                compression: method.compression(),
                algorithm: spec.algorithm,
                signature_width: width,
            };
            let compression = options.effective_compression();
            let algorithm = match compression {
                CompressionType::None => Algorithm::None,
                _ => spec.algorithm,
            };

            let group = FIRST_ARTEFACT_GROUP + i as u32;
            entries.push(Bitr::planned(group, entry.block_type()?, compression, algorithm));
            debug!("group {}: {} ({:?}, {:?})", group, path.display(), compression, algorithm);

            planned.push(Planned {
                name: entry.name,
                path,
                group,
                options,
            });
        }

        let trailer = match (&credentials.certificate, spec.version.has_signature()) {
            (Some(cert), true) => cert.len() + width,
            _ => 0,
        };
        let atag = Atag::new(spec.version, spec.hash, spec.manifest_tag, width, trailer)?;
        let bit = Bit::new(width, &entries)?;

        info!(
            "package format {:#06x}, {} artefacts, {} hash",
            spec.version.code(),
            planned.len(),
            spec.hash
        );

        Ok(Package {
            state: State::Specified,
            protocol: Protocol::new(spec.version, spec.hash),
            spec,
            manifest,
            planned,
            credentials,
            compiler,
            atag,
            bit,
            manifest_blocks: None,
            artefact_blocks: Vec::new(),
            region: (0, 0),
            cursor: 0,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn require(&self, state: State, step: &str) -> Result<()> {
        if self.state != state {
            return Err(ArcError::Layout(format!(
                "cannot {} a package in state {}, expected {}",
                step, self.state, state
            ))
            .into());
        }
        Ok(())
    }

    fn certificate(&self) -> Option<&[u8]> {
        match self.spec.version.has_signature() {
            true => self.credentials.certificate.as_deref(),
            false => None,
        }
    }

    /// Lay out the headers and reserve the manifest region.
    pub fn reserve<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.require(State::Specified, "reserve")?;

        let provisional = self.compiler.compile(&self.manifest.provisional(self.compiler.placeholder())?)?;
        let estimate = provisional.len() as u64 + MANIFEST_SLACK;
        let width = self.credentials.signer.width();

        let cursor = self.atag.place(0);
        let start = self.bit.place(cursor);
        let mut blocks = BlockSequence::plan(
            MANIFEST_GROUP,
            estimate,
            SequenceOptions::stored(self.spec.max_chunk, width),
        )?;
        let end = blocks.reserve(start);

        self.atag.commit(sink)?;
        self.bit.commit(sink)?;
        zero_fill(sink, start, end)?;

        info!(
            "reserved {} bytes at {} for a manifest estimated at {} bytes",
            end - start,
            start,
            estimate
        );
        self.manifest_blocks = Some(blocks);
        self.region = (start, end);
        self.cursor = end;
        self.state = State::Reserved;
        Ok(())
    }

    /// Write every artefact group, then the final manifest into the reserved region.
    pub fn fill<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.require(State::Reserved, "fill")?;
        let sealer = Sealer {
            protocol: self.protocol,
            signer: self.credentials.signer.as_ref(),
            verifier: self.credentials.verifier.as_ref(),
        };

        let mut sizes = Vec::with_capacity(self.planned.len());
        for planned in &self.planned {
            let mut source = open_artefact(
                &planned.path,
                planned.options.effective_compression(),
                planned.options.algorithm,
            )?;
            let mut blocks = BlockSequence::plan(planned.group, source.len, planned.options)?;
            if blocks.is_empty() {
                return Err(PackageError::spec(format!("artefact {} is empty", planned.name)));
            }
            blocks.set_raw_size(source.raw_size);

            self.cursor = blocks.write(sink, &mut source.file, self.cursor, &sealer)?;
            self.bit.update(&blocks)?;

            sizes.push(ArtefactSizes {
                name: planned.name.clone(),
                compressed: blocks.payload_size(),
                uncompressed: blocks.raw_size(),
            });
            self.artefact_blocks.push(blocks);
        }

        self.manifest.enrich(&sizes, self.spec.throughput)?;
        let encoded = self.compiler.compile(self.manifest.document())?;

        let (start, end) = self.region;
        let mut blocks = BlockSequence::plan(
            MANIFEST_GROUP,
            encoded.len() as u64,
            SequenceOptions::stored(self.spec.max_chunk, sealer.width()),
        )?;
        if blocks.size() > end - start {
            return Err(ArcError::Layout(format!(
                "final manifest needs {} bytes, {} were reserved",
                blocks.size(),
                end - start
            ))
            .into());
        }

        let written = blocks.write(sink, &mut Cursor::new(&encoded), start, &sealer)?;
        zero_fill(sink, written, end)?;
        self.bit.update(&blocks)?;
        debug!(
            "manifest: {} bytes in {} blocks, {} bytes of padding",
            encoded.len(),
            blocks.len(),
            end - written
        );

        self.manifest_blocks = Some(blocks);
        self.state = State::Filled;
        Ok(())
    }

    /// Seal the ATAG, then the BIT.
    pub fn sign<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.require(State::Filled, "sign")?;
        let certificate = self.certificate().map(|c| c.to_vec());
        let sealer = Sealer {
            protocol: self.protocol,
            signer: self.credentials.signer.as_ref(),
            verifier: self.credentials.verifier.as_ref(),
        };

        self.atag.set_total_size(self.cursor)?;
        self.atag.commit(sink)?;
        self.bit.commit(sink)?;
        self.atag.seal(sink, &sealer, certificate.as_deref())?;
        self.bit.seal(sink, &sealer)?;

        self.state = State::Signed;
        Ok(())
    }

    pub fn verify<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.require(State::Signed, "verify")?;
        let verifier = self.credentials.verifier.as_ref();

        if !self.atag.verify(sink, verifier)? {
            return Err(ArcError::SignatureMismatch("package header failed verification".to_string()).into());
        }
        if !self.bit.verify(sink, &self.protocol, verifier)? {
            return Err(ArcError::SignatureMismatch("block index table failed verification".to_string()).into());
        }

        // Sealing must not have moved anything
        self.atag.commit(sink)?;
        self.bit.commit(sink)?;

        self.state = State::Verified;
        Ok(())
    }

    /// Read every committed field back and compare it to what was written.
    pub fn close<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.require(State::Verified, "close")?;
        sink.flush()?;

        self.atag.record().check_committed(sink)?;
        self.bit.block().record().check_committed(sink)?;

        for blocks in self.manifest_blocks.iter().chain(self.artefact_blocks.iter()) {
            for block in blocks.blocks() {
                block.record().check_committed(sink)?;
            }

            let entry = self.bit.entry_for(blocks.group())?;
            if Some(entry.offset) != blocks.position() {
                return Err(ArcError::LayoutCorruption {
                    field: format!("BIT.{}.OFFT", blocks.group()),
                    position: entry.offset,
                }
                .into());
            }
        }

        let end = sink.seek(SeekFrom::End(0))?;
        if end != self.atag.total_size() {
            return Err(ArcError::LayoutCorruption {
                field: "ATAG.TS".to_string(),
                position: end,
            }
            .into());
        }

        self.state = State::Closed;
        Ok(())
    }

    /// Run every step in order.
    pub fn build<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<PackageReport> {
        self.reserve(sink)?;
        self.fill(sink)?;
        self.sign(sink)?;
        self.verify(sink)?;
        self.close(sink)?;

        let report = self.report();
        info!("package complete: {} bytes", report.total_size);
        Ok(report)
    }

    pub fn report(&self) -> PackageReport {
        let mut groups = Vec::with_capacity(self.artefact_blocks.len() + 1);

        if let Some(blocks) = &self.manifest_blocks {
            groups.push(group_report(blocks, "manifest"));
        }
        for (blocks, planned) in self.artefact_blocks.iter().zip(self.planned.iter()) {
            groups.push(group_report(blocks, &planned.name));
        }

        PackageReport {
            total_size: self.atag.total_size(),
            manifest_reserved: self.region.1 - self.region.0,
            groups,
        }
    }
}

fn group_report(blocks: &BlockSequence, name: &str) -> GroupReport {
    GroupReport {
        group: blocks.group(),
        name: name.to_string(),
        blocks: blocks.len(),
        raw_size: blocks.raw_size(),
        payload_size: blocks.payload_size(),
        serialized_size: blocks.size(),
    }
}

fn zero_fill<S: Sink + ?Sized>(sink: &mut S, start: u64, end: u64) -> Result<()> {
    if end <= start {
        return Ok(());
    }
    sink.seek(SeekFrom::Start(start))?;

    let zeros = vec![0u8; ZERO_CHUNK.min((end - start) as usize)];
    let mut remaining = end - start;
    while remaining > 0 {
        let len = remaining.min(zeros.len() as u64) as usize;
        sink.write_all(&zeros[..len])?;
        remaining -= len as u64;
    }
    Ok(())
}

/// Build `package` into `output` and write the enriched manifest next to it.
///
/// The output file is removed again when the build fails.
pub fn build_to_path(mut package: Package, output: &Path) -> Result<PackageReport> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)?;

    let report = match package.build(&mut file) {
        Ok(report) => report,
        Err(e) => {
            drop(file);
            if let Err(rm) = fs::remove_file(output) {
                warn!("could not remove partial output {}: {}", output.display(), rm);
            }
            return Err(e);
        }
    };

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let side = package.manifest().write_side_channel(dir)?;
    info!("enriched manifest written to {}", side.display());
    Ok(report)
}

#[cfg(test)]
mod test_package {
    use super::*;
    use crate::schema::CanonicalJson;
    use serde_json::{json, Value};
    use std::cell::Cell;
    use swarc::reader::Container;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(artefacts: &[(&str, &[u8])]) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let entries: Vec<_> = artefacts
                .iter()
                .map(|(name, _)| {
                    json!({"name": name, "updateType": "Application", "compressionType": "None", "archiveType": "None"})
                })
                .collect();
            let manifest = json!({"SWPackage": [{"actionType": "Install"}], "Artefact": entries});
            fs::write(dir.path().join("manifest.json"), manifest.to_string()).unwrap();

            for (name, data) in artefacts {
                fs::write(dir.path().join(name), data).unwrap();
            }
            Fixture { dir }
        }

        fn spec(&self, artefacts: &[(&str, Method)]) -> PackageSpec {
            PackageSpec::new(
                self.dir.path().join("manifest.json"),
                artefacts
                    .iter()
                    .map(|(name, method)| ArtefactSpec {
                        path: self.dir.path().join(name),
                        method: *method,
                    })
                    .collect(),
            )
        }
    }

    fn package(spec: PackageSpec) -> Result<Package> {
        Package::new(spec, Credentials::unsigned(), Box::new(CanonicalJson))
    }

    #[test]
    fn ten_bytes_in_three_blocks() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let mut spec = fixture.spec(&[("app.bin", Method::Stored)]);
        spec.max_chunk = Some(4);

        let mut sink = Cursor::new(Vec::new());
        let report = package(spec).unwrap().build(&mut sink).unwrap();

        let group = &report.groups[1];
        assert_eq!(group.group, 2);
        assert_eq!(group.blocks, 3);
        assert_eq!(group.payload_size, 10);
        assert_eq!(report.total_size, sink.get_ref().len() as u64);

        let container = Container::read(&mut sink).unwrap();
        let sizes: Vec<u64> = container.group(2).unwrap().blocks.iter().map(|b| b.payload_size()).collect();
        let seqs: Vec<u32> = container.group(2).unwrap().blocks.iter().map(|b| b.sequence()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(container.reassemble(&mut sink, 2).unwrap(), b"0123456789");
    }

    #[test]
    fn steps_must_run_in_order() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let mut pkg = package(fixture.spec(&[("app.bin", Method::Stored)])).unwrap();
        let mut sink = Cursor::new(Vec::new());

        assert!(matches!(
            pkg.fill(&mut sink),
            Err(PackageError::Archive(ArcError::Layout(_)))
        ));
        pkg.reserve(&mut sink).unwrap();
        assert_eq!(pkg.state(), State::Reserved);
        assert!(matches!(
            pkg.sign(&mut sink),
            Err(PackageError::Archive(ArcError::Layout(_)))
        ));
        assert!(matches!(
            pkg.reserve(&mut sink),
            Err(PackageError::Archive(ArcError::Layout(_)))
        ));
    }

    #[test]
    fn count_mismatch_rejected_before_writing() {
        let fixture = Fixture::new(&[("a.bin", &b"0123"[..]), ("b.bin", &b"4567"[..])]);

        assert!(matches!(
            package(fixture.spec(&[("a.bin", Method::Stored)])),
            Err(PackageError::Specification(_))
        ));
    }

    #[test]
    fn missing_and_empty_artefacts() {
        let fixture = Fixture::new(&[("a.bin", &b""[..])]);
        assert!(matches!(
            package(fixture.spec(&[("a.bin", Method::Stored)])),
            Err(PackageError::Specification(_))
        ));

        fs::remove_file(fixture.dir.path().join("a.bin")).unwrap();
        assert!(matches!(
            package(fixture.spec(&[("a.bin", Method::Stored)])),
            Err(PackageError::MissingArtefact(_))
        ));
    }

    #[test]
    fn zero_block_size_is_layout_error() {
        let fixture = Fixture::new(&[("a.bin", &b"0123"[..])]);
        let mut spec = fixture.spec(&[("a.bin", Method::Stored)]);
        spec.max_chunk = Some(0);

        assert!(matches!(package(spec), Err(PackageError::Archive(ArcError::Layout(_)))));
    }

    #[test]
    fn every_method_reassembles() {
        let text: Vec<u8> = b"0 some highly repetitive artefact text ".iter().cycle().take(5000).copied().collect();
        let fixture = Fixture::new(&[("a.bin", &text[..]), ("b.bin", &text[..]), ("c.bin", &text[..])]);
        let spec = fixture.spec(&[
            ("a.bin", Method::Chunks),
            ("b.bin", Method::Whole),
            ("c.bin", Method::Stored),
        ]);

        let mut sink = Cursor::new(Vec::new());
        let report = package(spec).unwrap().build(&mut sink).unwrap();
        assert!(report.groups[1].payload_size < 5000);
        assert!(report.groups[2].payload_size < 5000);
        assert_eq!(report.groups[3].payload_size, 5000);

        let container = Container::read(&mut sink).unwrap();
        assert!(container.verify(&mut sink, &NullSigner).unwrap().is_valid());
        for group in 2..5 {
            assert_eq!(container.reassemble(&mut sink, group).unwrap(), text);
        }
    }

    #[test]
    fn manifest_carries_final_sizes() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let mut spec = fixture.spec(&[("app.bin", Method::Stored)]);
        spec.throughput = 4;

        let mut sink = Cursor::new(Vec::new());
        let mut pkg = package(spec).unwrap();
        pkg.build(&mut sink).unwrap();

        let container = Container::read(&mut sink).unwrap();
        let stored: serde_json::Value =
            serde_json::from_slice(&container.reassemble(&mut sink, MANIFEST_GROUP).unwrap()).unwrap();
        assert_eq!(&stored, pkg.manifest().document());
        assert_eq!(stored["SWPackage"][0]["uncompressedSoftwareClusterSize"], 10);
        // 10 / 4 = 2.5 goes to the even 2
        assert_eq!(stored["SWPackage"][0]["estimatedDurationOfOperation"], 2);
        assert_eq!(stored["Artefact"][0]["compressedSize"], 10);
    }

    // Pads every encoding after the provisional one
    struct Growing(Cell<usize>);

    impl SchemaCompiler for Growing {
        fn compile(&self, document: &Value) -> Result<Vec<u8>> {
            let calls = self.0.get();
            self.0.set(calls + 1);
            let mut encoded = CanonicalJson.compile(document)?;
            if calls > 0 {
                encoded.extend(vec![b' '; 2000]);
            }
            Ok(encoded)
        }
    }

    // Fixed width integers, like a FlatBuffers uint field
    struct Narrow;

    impl SchemaCompiler for Narrow {
        fn compile(&self, document: &Value) -> Result<Vec<u8>> {
            if let Some(n) = document["Artefact"][0]["uncompressedSize"].as_u64() {
                if n > u32::MAX as u64 {
                    return Err(PackageError::Schema(format!("{} does not fit a uint field", n)));
                }
            }
            CanonicalJson.compile(document)
        }

        fn placeholder(&self) -> u64 {
            1
        }
    }

    struct Reject;

    impl Verifier for Reject {
        fn verify(&self, _signature: &[u8], _digest: &[u8]) -> bool {
            false
        }
    }

    #[test]
    fn manifest_outgrowing_region() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let spec = fixture.spec(&[("app.bin", Method::Stored)]);
        let mut pkg = Package::new(spec, Credentials::unsigned(), Box::new(Growing(Cell::new(0)))).unwrap();

        let mut sink = Cursor::new(Vec::new());
        pkg.reserve(&mut sink).unwrap();
        assert!(matches!(pkg.fill(&mut sink), Err(PackageError::Archive(ArcError::Layout(_)))));
        assert_eq!(pkg.state(), State::Reserved);
    }

    #[test]
    fn compiler_placeholder_fits_schema() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let spec = fixture.spec(&[("app.bin", Method::Stored)]);
        let mut pkg = Package::new(spec, Credentials::unsigned(), Box::new(Narrow)).unwrap();

        let mut sink = Cursor::new(Vec::new());
        pkg.build(&mut sink).unwrap();
        assert_eq!(pkg.state(), State::Closed);
        assert_eq!(pkg.manifest().document()["Artefact"][0]["uncompressedSize"], 10);
    }

    #[test]
    fn block_verify_failure_stops_fill() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let spec = fixture.spec(&[("app.bin", Method::Stored)]);
        let credentials = Credentials {
            signer: Box::new(NullSigner),
            verifier: Box::new(Reject),
            certificate: None,
        };
        let mut pkg = Package::new(spec, credentials, Box::new(CanonicalJson)).unwrap();

        let mut sink = Cursor::new(Vec::new());
        pkg.reserve(&mut sink).unwrap();
        assert!(matches!(
            pkg.fill(&mut sink),
            Err(PackageError::Archive(ArcError::SignatureMismatch(_)))
        ));
        assert_eq!(pkg.state(), State::Reserved);
    }

    #[test]
    fn failed_build_removes_output() {
        let fixture = Fixture::new(&[("app.bin", &b"0123456789"[..])]);
        let mut pkg = package(fixture.spec(&[("app.bin", Method::Stored)])).unwrap();
        let output = fixture.dir.path().join("swpkg.bin");

        // Already past Specified, the build has to fail on its first step
        pkg.reserve(&mut Cursor::new(Vec::new())).unwrap();
        assert!(build_to_path(pkg, &output).is_err());
        assert!(!output.exists());
    }
}
