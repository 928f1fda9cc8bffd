use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::Serializer;
use sodiumoxide::crypto::hash::sha256;

/// Hash selector as stored in the authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Sha256,
    Crc32,
    Blake3,
}

impl HashKind {
    pub fn code(self) -> u16 {
        match self {
            HashKind::Sha256 => 0,
            HashKind::Crc32 => 1,
            HashKind::Blake3 => 2,
        }
    }

    pub fn from_code(code: u16) -> Option<HashKind> {
        match code {
            0 => Some(HashKind::Sha256),
            1 => Some(HashKind::Crc32),
            2 => Some(HashKind::Blake3),
            _ => None,
        }
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashKind::Sha256),
            "crc32" => Ok(HashKind::Crc32),
            "blake3" => Ok(HashKind::Blake3),
            x => Err(format!("unknown hash: {}", x)),
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Sha256 => write!(f, "sha256"),
            HashKind::Crc32 => write!(f, "crc32"),
            HashKind::Blake3 => write!(f, "blake3"),
        }
    }
}

// Running hash state, the api mirrors blake3's
pub enum Accumulator {
    Sha256(sha256::State),
    Crc32(crc32fast::Hasher),
    Blake3(Box<blake3::Hasher>),
}

impl Accumulator {
    pub fn new(kind: HashKind) -> Accumulator {
        match kind {
            HashKind::Sha256 => Accumulator::Sha256(sha256::State::new()),
            HashKind::Crc32 => Accumulator::Crc32(crc32fast::Hasher::new()),
            HashKind::Blake3 => Accumulator::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Accumulator::Sha256(state) => state.update(data),
            Accumulator::Crc32(state) => state.update(data),
            Accumulator::Blake3(state) => {
                state.update(data);
            }
        }
    }

    // CRC32 digests are the big endian crc value
    pub fn finalize(self) -> Digest {
        match self {
            Accumulator::Sha256(state) => Digest(state.finalize().0.to_vec()),
            Accumulator::Crc32(state) => Digest(state.finalize().to_be_bytes().to_vec()),
            Accumulator::Blake3(state) => Digest(state.finalize().as_bytes().to_vec()),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod test_accumulator {
    use super::*;

    fn digest(kind: HashKind, data: &[u8]) -> Digest {
        let mut acc = Accumulator::new(kind);
        acc.update(data);
        acc.finalize()
    }

    #[test]
    fn sha256_known_vector() {
        let mut acc = Accumulator::new(HashKind::Sha256);
        acc.update(b"a");
        acc.update(b"bc");

        assert_eq!(
            acc.finalize().to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn crc32_is_big_endian_value() {
        let digest = digest(HashKind::Crc32, b"123456789");

        assert_eq!(digest.as_bytes(), &[0xcb, 0xf4, 0x39, 0x26]);
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn blake3_empty() {
        let digest = digest(HashKind::Blake3, b"");

        assert_eq!(
            digest.to_hex(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn split_updates_match_single() {
        let mut split = Accumulator::new(HashKind::Crc32);
        split.update(b"hello ");
        split.update(b"world");

        let mut whole = Accumulator::new(HashKind::Crc32);
        whole.update(b"hello world");

        assert_eq!(split.finalize(), whole.finalize());
    }
}

#[cfg(test)]
mod test_hash_kind {
    use super::*;

    #[test]
    fn wire_codes() {
        for kind in [HashKind::Sha256, HashKind::Crc32, HashKind::Blake3] {
            assert_eq!(HashKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(HashKind::from_code(7), None);
    }

    #[test]
    fn parse_names() {
        assert_eq!("SHA256".parse::<HashKind>().unwrap(), HashKind::Sha256);
        assert_eq!("blake3".parse::<HashKind>().unwrap(), HashKind::Blake3);
        assert!("md5".parse::<HashKind>().is_err());
    }

    #[test]
    fn digest_serializes_as_hex() {
        let digest = Digest(vec![0xde, 0xad]);

        assert_eq!(serde_json::to_string(&digest).unwrap(), "\"dead\"");
    }
}
