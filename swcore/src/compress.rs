use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::buf::fill_buf;

// Read size when streaming a whole file through the compressor
const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    None,
    Zlib,
}

impl Algorithm {
    pub fn code(self) -> u16 {
        match self {
            Algorithm::None => 0,
            Algorithm::Zlib => 1,
        }
    }

    pub fn from_code(code: u16) -> Option<Algorithm> {
        match code {
            0 => Some(Algorithm::None),
            1 => Some(Algorithm::Zlib),
            _ => None,
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Algorithm::None),
            "zlib" | "deflate" => Ok(Algorithm::Zlib),
            x => Err(format!("unsupported compression algorithm: {}", x)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::None => write!(f, "none"),
            Algorithm::Zlib => write!(f, "zlib"),
        }
    }
}

pub fn compress(alg: Algorithm, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match alg {
        Algorithm::None => Ok(data.to_vec()),
        Algorithm::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
            enc.write_all(data)?;
            enc.finish()
        }
    }
}

pub fn decompress(alg: Algorithm, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match alg {
        Algorithm::None => Ok(data.to_vec()),
        Algorithm::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

/// Compress `chunk` and keep the result only if it is strictly smaller.
///
/// The flag is true when the returned bytes are the compressed form.
pub fn compress_if_smaller(alg: Algorithm, chunk: &[u8]) -> std::io::Result<(Vec<u8>, bool)> {
    if alg == Algorithm::None {
        return Ok((chunk.to_vec(), false));
    }

    let packed = compress(alg, chunk)?;
    if packed.len() < chunk.len() {
        Ok((packed, true))
    } else {
        Ok((chunk.to_vec(), false))
    }
}

/// Incremental compressor, output is handed back as soon as the encoder emits it.
pub struct StreamCompressor {
    inner: Option<ZlibEncoder<Vec<u8>>>,
}

impl StreamCompressor {
    pub fn begin(alg: Algorithm) -> Self {
        let inner = match alg {
            Algorithm::None => None,
            Algorithm::Zlib => Some(ZlibEncoder::new(Vec::new(), Compression::default())),
        };
        StreamCompressor { inner }
    }

    pub fn compress(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match &mut self.inner {
            None => Ok(data.to_vec()),
            Some(enc) => {
                enc.write_all(data)?;
                Ok(std::mem::take(enc.get_mut()))
            }
        }
    }

    pub fn flush(self) -> std::io::Result<Vec<u8>> {
        match self.inner {
            None => Ok(Vec::new()),
            Some(enc) => enc.finish(),
        }
    }
}

/// Stream `reader` through the compressor into `writer`.
///
/// Returns `(read, written)` byte counts.
pub fn compress_stream<R: Read, W: Write>(
    alg: Algorithm,
    reader: &mut R,
    writer: &mut W,
) -> std::io::Result<(u64, u64)> {
    let mut stream = StreamCompressor::begin(alg);
    let mut in_buf = vec![0u8; STREAM_CHUNK];
    let mut read = 0;
    let mut written = 0;

    loop {
        let (eof, len) = fill_buf(reader, &mut in_buf)?;
        read += len as u64;

        let out = stream.compress(&in_buf[..len])?;
        writer.write_all(&out)?;
        written += out.len() as u64;

        if eof {
            break;
        }
    }

    let tail = stream.flush()?;
    writer.write_all(&tail)?;
    written += tail.len() as u64;

    Ok((read, written))
}

#[cfg(test)]
mod test_compress {
    use super::*;

    fn repetitive() -> Vec<u8> {
        b"Hello World!".iter().cycle().take(4096).copied().collect()
    }

    #[test]
    fn zlib_roundtrip() {
        let data = repetitive();
        let packed = compress(Algorithm::Zlib, &data).unwrap();

        assert!(packed.len() < data.len());
        assert_eq!(decompress(Algorithm::Zlib, &packed).unwrap(), data);
    }

    #[test]
    fn none_is_passthrough() {
        assert_eq!(compress(Algorithm::None, b"abc").unwrap(), b"abc");
        assert_eq!(decompress(Algorithm::None, b"abc").unwrap(), b"abc");
    }

    #[test]
    fn keeps_raw_when_not_smaller() {
        let (out, compressed) = compress_if_smaller(Algorithm::Zlib, b"abc").unwrap();

        assert!(!compressed);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn keeps_compressed_when_smaller() {
        let data = repetitive();
        let (out, compressed) = compress_if_smaller(Algorithm::Zlib, &data).unwrap();

        assert!(compressed);
        assert_eq!(decompress(Algorithm::Zlib, &out).unwrap(), data);
    }

    #[test]
    fn algorithm_codes() {
        assert_eq!(Algorithm::from_code(Algorithm::Zlib.code()), Some(Algorithm::Zlib));
        assert_eq!(Algorithm::from_code(2), None);
        assert_eq!("None".parse::<Algorithm>().unwrap(), Algorithm::None);
        assert!("lz4".parse::<Algorithm>().is_err());
    }
}
