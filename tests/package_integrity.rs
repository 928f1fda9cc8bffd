//! End to end package builds checked through the reader.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use base64::prelude::*;
use serde_json::{json, Value};
use sodiumoxide::crypto::sign;
use swarc::format::{FormatVersion, MANIFEST_GROUP};
use swarc::reader::Container;
use swcore::crypto::{self, KeyStore, SignAlgorithm, Verifier, PUBLIC_KEY_FILE, SECRET_KEY_FILE};
use swcore::hash::HashKind;
use swpkg::error::PackageError;
use swpkg::inspect::inspect;
use swpkg::manifest::SIDE_CHANNEL_FILE;
use swpkg::package::{build_to_path, ArtefactSpec, Credentials, Method, Package, PackageSpec};
use swpkg::schema::CanonicalJson;

const CERTIFICATE: &[u8] = b"test certificate";

fn write_inputs(dir: &Path) -> Vec<u8> {
    let app: Vec<u8> = b"0 application payload, repeated for compression "
        .iter()
        .cycle()
        .take(20_000)
        .copied()
        .collect();

    fs::write(dir.join("app.bin"), &app).unwrap();
    fs::write(dir.join("rootfs.img"), b"plain root filesystem image").unwrap();
    fs::write(
        dir.join("manifest.json"),
        json!({
            "SWPackage": [{"actionType": "Install", "name": "demo"}],
            "Artefact": [
                {"name": "app.bin", "updateType": "Application", "compressionType": "None", "archiveType": "None"},
                {"name": "rootfs.img", "updateType": "Image", "compressionType": "None", "archiveType": "None"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    app
}

fn spec(dir: &Path) -> PackageSpec {
    let mut spec = PackageSpec::new(
        dir.join("manifest.json"),
        vec![
            ArtefactSpec {
                path: dir.join("rootfs.img"),
                method: Method::Stored,
            },
            ArtefactSpec {
                path: dir.join("app.bin"),
                method: Method::Chunks,
            },
        ],
    );
    spec.max_chunk = Some(1024);
    spec
}

fn store() -> KeyStore {
    crypto::init().unwrap();
    let (pk, sk) = sign::gen_keypair();
    KeyStore::from_keys(Some(pk), Some(sk), Some(CERTIFICATE.to_vec()))
}

fn verifier(store: &KeyStore) -> Box<dyn Verifier> {
    store.verifier(SignAlgorithm::Ed25519).unwrap()
}

#[test]
fn signed_build_verifies_and_reassembles() {
    let dir = tempfile::tempdir().unwrap();
    let app = write_inputs(dir.path());
    let store = store();

    let output = dir.path().join("swpkg.bin");
    let package = Package::new(
        spec(dir.path()),
        Credentials::from_store(&store, SignAlgorithm::Ed25519).unwrap(),
        Box::new(CanonicalJson),
    )
    .unwrap();
    let report = build_to_path(package, &output).unwrap();
    assert_eq!(report.total_size, fs::metadata(&output).unwrap().len());

    let mut file = fs::File::open(&output).unwrap();
    let container = Container::read(&mut file).unwrap();
    assert_eq!(container.atag().version().unwrap(), FormatVersion::CrcAndSignature);
    assert_eq!(container.atag().certificate().unwrap().0, CERTIFICATE);

    let verification = container.verify(&mut file, verifier(&store).as_ref()).unwrap();
    assert!(verification.is_valid());
    assert_eq!(verification.certificate, Some(true));

    // Groups follow the manifest, not the command line
    assert_eq!(container.reassemble(&mut file, 2).unwrap(), app);
    assert_eq!(container.reassemble(&mut file, 3).unwrap(), b"plain root filesystem image");

    let stored: Value = serde_json::from_slice(&container.reassemble(&mut file, MANIFEST_GROUP).unwrap()).unwrap();
    let side: Value = serde_json::from_slice(&fs::read(dir.path().join(SIDE_CHANNEL_FILE)).unwrap()).unwrap();
    assert_eq!(stored, side);
    assert_eq!(stored["Artefact"][0]["uncompressedSize"], 20_000);
    assert!(stored["Artefact"][0]["compressedSize"].as_u64().unwrap() < 20_000);
}

#[test]
fn other_key_rejects_package() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let store = store();

    let mut sink = Cursor::new(Vec::new());
    Package::new(
        spec(dir.path()),
        Credentials::from_store(&store, SignAlgorithm::Ed25519).unwrap(),
        Box::new(CanonicalJson),
    )
    .unwrap()
    .build(&mut sink)
    .unwrap();

    let other = self::store();
    let container = Container::read(&mut sink).unwrap();
    let verification = container.verify(&mut sink, verifier(&other).as_ref()).unwrap();
    assert!(!verification.atag);
    assert!(!verification.bit);
    assert!(!verification.is_valid());
}

#[test]
fn tampering_is_located() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let store = store();

    let mut sink = Cursor::new(Vec::new());
    Package::new(
        spec(dir.path()),
        Credentials::from_store(&store, SignAlgorithm::Ed25519).unwrap(),
        Box::new(CanonicalJson),
    )
    .unwrap()
    .build(&mut sink)
    .unwrap();

    let container = Container::read(&mut sink).unwrap();
    let block = &container.group(2).unwrap().blocks[3];
    let at = block.payload_position().unwrap() as usize;
    sink.get_mut()[at] ^= 0x01;

    let summary = inspect(&mut sink, verifier(&store).as_ref(), true).unwrap();
    assert!(!summary.verification.valid);
    assert!(summary.verification.atag && summary.verification.bit);
    assert_eq!(summary.verification.failed_blocks, vec![(2, 3)]);
}

#[test]
fn every_format_version_builds() {
    let store = store();

    for version in [FormatVersion::CrcOnly, FormatVersion::SignatureOnly, FormatVersion::CrcAndSignature] {
        for hash in [HashKind::Sha256, HashKind::Blake3] {
            let dir = tempfile::tempdir().unwrap();
            write_inputs(dir.path());
            let mut spec = spec(dir.path());
            spec.version = version;
            spec.hash = hash;

            let mut sink = Cursor::new(Vec::new());
            Package::new(
                spec,
                Credentials::from_store(&store, SignAlgorithm::Ed25519).unwrap(),
                Box::new(CanonicalJson),
            )
            .unwrap()
            .build(&mut sink)
            .unwrap();

            let summary = inspect(&mut sink, verifier(&store).as_ref(), true).unwrap();
            assert!(summary.verification.valid, "{:?} {:?}", version, hash);
            assert_eq!(summary.format, format!("{:#06x}", version.code()));
            assert_eq!(summary.hash, hash.to_string());
            assert_eq!(summary.groups.len(), 3);
        }
    }
}

#[test]
fn key_store_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    crypto::init().unwrap();

    let (pk, sk) = sign::gen_keypair();
    fs::write(dir.path().join(SECRET_KEY_FILE), BASE64_STANDARD.encode(&sk.0[..])).unwrap();
    fs::write(dir.path().join(PUBLIC_KEY_FILE), BASE64_STANDARD.encode(&pk.0[..])).unwrap();
    let store = KeyStore::load(dir.path()).unwrap();

    let mut sink = Cursor::new(Vec::new());
    Package::new(
        spec(dir.path()),
        Credentials::from_store(&store, SignAlgorithm::Ed25519).unwrap(),
        Box::new(CanonicalJson),
    )
    .unwrap()
    .build(&mut sink)
    .unwrap();

    let container = Container::read(&mut sink).unwrap();
    assert!(container.atag().certificate().is_none());
    assert!(container.verify(&mut sink, verifier(&store).as_ref()).unwrap().is_valid());
}

#[test]
fn mismatched_artefacts_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());

    let mut spec = spec(dir.path());
    spec.artefacts.pop();
    let result = Package::new(spec, Credentials::unsigned(), Box::new(CanonicalJson));
    assert!(matches!(result, Err(PackageError::Specification(_))));
    assert!(!dir.path().join("swpkg.bin").exists());
}
