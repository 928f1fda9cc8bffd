use std::fmt;
use std::fs::File;
use std::path::Path;

use serde::Serialize;
use swcore::buf::fill_buf;

// Enough to reach the tar magic
const SNIFF_LEN: usize = 512;

/// Container or compression format of an artefact, named as in the update manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileKind {
    Zip,
    Zlib,
    Gzip,
    Tar,
    Xz,
    None,
}

impl FileKind {
    pub fn name(self) -> &'static str {
        match self {
            FileKind::Zip => "Zip",
            FileKind::Zlib => "Zlib",
            FileKind::Gzip => "Gzip",
            FileKind::Tar => "Tar",
            FileKind::Xz => "Xz",
            FileKind::None => "None",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn sniff(header: &[u8]) -> FileKind {
    if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        FileKind::Zip
    } else if header.starts_with(&[0x1f, 0x8b]) {
        FileKind::Gzip
    } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        FileKind::Xz
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
        FileKind::Tar
    } else if is_zlib(header) {
        FileKind::Zlib
    } else {
        FileKind::None
    }
}

// CMF says deflate with a window of at most 32K and the header checksum holds
fn is_zlib(header: &[u8]) -> bool {
    match header {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8 && cmf >> 4 <= 7 && ((*cmf as u16) << 8 | *flg as u16) % 31 == 0
        }
        _ => false,
    }
}

pub fn sniff_path(path: &Path) -> std::io::Result<FileKind> {
    let mut file = File::open(path)?;
    let mut header = vec![0u8; SNIFF_LEN];
    let (_, len) = fill_buf(&mut file, &mut header)?;
    Ok(sniff(&header[..len]))
}

#[cfg(test)]
mod test_sniff {
    use super::*;
    use swcore::compress::{compress, Algorithm};

    #[test]
    fn magic_bytes() {
        assert_eq!(sniff(b"PK\x03\x04rest"), FileKind::Zip);
        assert_eq!(sniff(&[0x1f, 0x8b, 0x08, 0x00]), FileKind::Gzip);
        assert_eq!(sniff(&[0xfd, b'7', b'z', b'X', b'Z', 0x00, 0x00]), FileKind::Xz);
        assert_eq!(sniff(b"plain text payload"), FileKind::None);
        assert_eq!(sniff(b""), FileKind::None);
    }

    #[test]
    fn tar_header() {
        let mut header = vec![0u8; 512];
        header[257..262].copy_from_slice(b"ustar");

        assert_eq!(sniff(&header), FileKind::Tar);
    }

    #[test]
    fn zlib_stream() {
        let packed = compress(Algorithm::Zlib, b"some data").unwrap();

        assert_eq!(sniff(&packed), FileKind::Zlib);
    }

    #[test]
    fn from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.gz");
        std::fs::write(&path, [0x1f, 0x8b, 0x08]).unwrap();

        assert_eq!(sniff_path(&path).unwrap(), FileKind::Gzip);
        assert!(sniff_path(&dir.path().join("missing")).is_err());
    }
}
