//! Read a finished package back, check it and reassemble its groups.

use std::io::{Read, Seek, SeekFrom};

use log::debug;
use swcore::compress;
use swcore::crypto::Verifier;

use crate::block::Block;
use crate::error::{ArcError, Result};
use crate::format::{CompressionFlag, CompressionType};
use crate::header::{Atag, Bit, Bitr};

#[derive(Debug, Clone)]
pub struct Group {
    pub entry: Bitr,
    pub blocks: Vec<Block>,
}

/// Outcome of checking every sealed record of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub atag: bool,
    pub bit: bool,
    pub size: bool,
    pub certificate: Option<bool>,
    /// `(group, sequence)` of every block that failed
    pub failed_blocks: Vec<(u32, u32)>,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        self.atag
            && self.bit
            && self.size
            && self.certificate.unwrap_or(true)
            && self.failed_blocks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    atag: Atag,
    bit: Bit,
    groups: Vec<Group>,
}

impl Container {
    pub fn read<R: Read + Seek + ?Sized>(source: &mut R) -> Result<Container> {
        let atag = Atag::read(source)?;
        let width = atag.signature_width();
        let bit = Bit::read(source, atag.size(), width)?;

        let mut groups = Vec::with_capacity(bit.len());
        for entry in bit.entries()? {
            let mut blocks = Vec::with_capacity(entry.count as usize);
            let mut cursor = entry.offset;

            for seq in 0..entry.count {
                let block = Block::read_at(source, cursor, width)?;
                if block.group() != entry.group || block.sequence() as u64 != seq {
                    return Err(ArcError::Malformed(format!(
                        "expected block {}/{} at {}, found {}/{}",
                        entry.group,
                        seq,
                        cursor,
                        block.group(),
                        block.sequence()
                    )));
                }
                cursor += block.size();
                blocks.push(block);
            }

            if cursor - entry.offset != entry.total_size {
                return Err(ArcError::Malformed(format!(
                    "group {} spans {} bytes, index says {}",
                    entry.group,
                    cursor - entry.offset,
                    entry.total_size
                )));
            }
            debug!("group {}: {} blocks at {}", entry.group, blocks.len(), entry.offset);
            groups.push(Group { entry, blocks });
        }

        Ok(Container { atag, bit, groups })
    }

    pub fn atag(&self) -> &Atag {
        &self.atag
    }

    pub fn bit(&self) -> &Bit {
        &self.bit
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: u32) -> Result<&Group> {
        self.groups
            .iter()
            .find(|g| g.entry.group == id)
            .ok_or_else(|| ArcError::MissingField(format!("group {}", id)))
    }

    pub fn verify<R: Read + Seek + ?Sized>(&self, source: &mut R, verifier: &dyn Verifier) -> Result<Verification> {
        let protocol = self.atag.protocol()?;
        let end = source.seek(SeekFrom::End(0))?;

        let mut failed_blocks = Vec::new();
        for group in &self.groups {
            for block in &group.blocks {
                if !block.verify_with(source, &protocol, verifier)? {
                    failed_blocks.push((block.group(), block.sequence()));
                }
            }
        }

        let certificate = self
            .atag
            .certificate()
            .map(|_| self.atag.verify_certificate(verifier));

        Ok(Verification {
            atag: self.atag.verify(source, verifier)?,
            bit: self.bit.verify(source, &protocol, verifier)?,
            size: end == self.atag.total_size(),
            certificate,
            failed_blocks,
        })
    }

    /// Reassemble the original bytes of a group.
    pub fn reassemble<R: Read + Seek + ?Sized>(&self, source: &mut R, id: u32) -> Result<Vec<u8>> {
        let group = self.group(id)?;
        let algorithm = group.entry.algorithm;

        let mut out = Vec::new();
        for block in &group.blocks {
            let payload = block.payload(source)?;
            match (group.entry.compression, block.flag()?) {
                (CompressionType::Chunks, CompressionFlag::Compressed) => {
                    out.extend(compress::decompress(algorithm, &payload)?)
                }
                _ => out.extend(payload),
            }
        }

        if group.entry.compression == CompressionType::Whole {
            out = compress::decompress(algorithm, &out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test_container {
    use super::*;
    use crate::block::{BlockSequence, SequenceOptions};
    use crate::format::{BlockType, FormatVersion};
    use crate::header::Bitr;
    use crate::integrity::{Protocol, Sealer};
    use std::io::Cursor;
    use swcore::compress::Algorithm;
    use swcore::crypto::NullSigner;
    use swcore::hash::HashKind;

    fn text(len: usize) -> Vec<u8> {
        b"0123456789abcdef".iter().cycle().take(len).copied().collect()
    }

    // Two groups: a stored one and a chunk compressed one
    fn package(first: &[u8], second: &[u8]) -> Cursor<Vec<u8>> {
        let sealer = Sealer {
            protocol: Protocol::new(FormatVersion::CrcAndSignature, HashKind::Sha256),
            signer: &NullSigner,
            verifier: &NullSigner,
        };
        let mut sink = Cursor::new(Vec::new());

        let mut atag = Atag::new(FormatVersion::CrcAndSignature, HashKind::Sha256, 3, 64, 0).unwrap();
        let mut bit = Bit::new(
            64,
            &[
                Bitr::planned(1, BlockType::Manifest, CompressionType::None, Algorithm::None),
                Bitr::planned(2, BlockType::Application, CompressionType::Chunks, Algorithm::Zlib),
            ],
        )
        .unwrap();
        let cursor = atag.place(0);
        let mut cursor = bit.place(cursor);

        let mut stored = BlockSequence::plan(1, first.len() as u64, SequenceOptions::stored(Some(100), 64)).unwrap();
        cursor = stored
            .write(&mut sink, &mut Cursor::new(first), cursor, &sealer)
            .unwrap();

        let options = SequenceOptions {
            max_chunk: Some(100),
            compression: CompressionType::Chunks,
            algorithm: Algorithm::Zlib,
            signature_width: 64,
        };
        let mut packed = BlockSequence::plan(2, second.len() as u64, options).unwrap();
        cursor = packed
            .write(&mut sink, &mut Cursor::new(second), cursor, &sealer)
            .unwrap();

        bit.update(&stored).unwrap();
        bit.update(&packed).unwrap();
        atag.set_total_size(cursor).unwrap();
        atag.commit(&mut sink).unwrap();
        bit.commit(&mut sink).unwrap();
        atag.seal(&mut sink, &sealer, None).unwrap();
        bit.seal(&mut sink, &sealer).unwrap();
        sink
    }

    #[test]
    fn reads_and_reassembles() {
        let first = text(250);
        let second = text(1000);
        let mut source = package(&first, &second);

        let container = Container::read(&mut source).unwrap();
        assert_eq!(container.groups().len(), 2);
        assert_eq!(container.group(1).unwrap().blocks.len(), 3);
        assert_eq!(container.group(2).unwrap().blocks.len(), 10);
        assert_eq!(container.atag().manifest_tag(), 3);

        assert_eq!(container.reassemble(&mut source, 1).unwrap(), first);
        assert_eq!(container.reassemble(&mut source, 2).unwrap(), second);
        assert!(container.verify(&mut source, &NullSigner).unwrap().is_valid());
    }

    #[test]
    fn payload_flip_reported_per_block() {
        let mut source = package(&text(250), &text(1000));
        let container = Container::read(&mut source).unwrap();

        let block = &container.group(1).unwrap().blocks[1];
        let at = block.payload_position().unwrap() as usize;
        source.get_mut()[at] ^= 0xff;

        let verification = container.verify(&mut source, &NullSigner).unwrap();
        assert!(!verification.is_valid());
        assert!(verification.atag && verification.bit);
        assert_eq!(verification.failed_blocks, vec![(1, 1)]);
    }

    #[test]
    fn trailing_bytes_are_detected() {
        let mut source = package(&text(10), &text(10));
        source.get_mut().push(0);

        let container = Container::read(&mut source).unwrap();
        assert!(!container.verify(&mut source, &NullSigner).unwrap().size);
    }

    #[test]
    fn missing_group() {
        let mut source = package(&text(10), &text(10));
        let container = Container::read(&mut source).unwrap();

        assert!(matches!(container.reassemble(&mut source, 5), Err(ArcError::MissingField(_))));
    }
}
