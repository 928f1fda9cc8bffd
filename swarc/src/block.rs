use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, info};
use swcore::buf::read_extent;
use swcore::compress::{self, Algorithm};
use swcore::crypto::Verifier;

use crate::error::{ArcError, Result};
use crate::field::Field;
use crate::format::{CompressionFlag, CompressionType, BLOCK_HEADER_SIZE};
use crate::integrity::{Protocol, Sealer, Slots};
use crate::record::{Node, Record};
use crate::sink::Sink;

pub const SIZE: &str = "SIZE";
pub const GROUP: &str = "GROUP";
pub const SEQ: &str = "SEQ";
pub const CRC: &str = "CRC";
pub const CFLAG: &str = "CFLAG";
pub const PAD: &str = "PAD";
pub const SIG: &str = "SIG";
pub const DATA: &str = "DATA";

pub const SLOTS: Slots = Slots {
    crc: CRC,
    signature: SIG,
};

/// A byte range of the source a block payload is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

/// Split `total` bytes into chunks of at most `max` bytes.
///
/// Without a maximum everything goes into one chunk, a zero maximum can
/// never make progress and is refused.
pub fn plan_chunks(total: u64, max: Option<u64>) -> Result<Vec<Extent>> {
    let max = match max {
        None => return Ok(vec![Extent { offset: 0, len: total }]),
        Some(0) => {
            return Err(ArcError::Layout(
                "maximum chunk size must be at least 1 byte".to_string(),
            ))
        }
        Some(max) => max,
    };

    if total == 0 {
        return Ok(vec![Extent { offset: 0, len: 0 }]);
    }

    let mut chunks = Vec::with_capacity((total / max + 1) as usize);
    let mut offset = 0;
    while offset < total {
        let len = max.min(total - offset);
        chunks.push(Extent { offset, len });
        offset += len;
    }
    Ok(chunks)
}

/// One framed unit of a group: header, signature slot and payload.
#[derive(Debug, Clone)]
pub struct Block {
    record: Record,
    source: Extent,
}

impl Block {
    pub fn new(group: u32, sequence: u32, width: usize, source: Extent) -> Result<Block> {
        Block::framed(group, sequence, width, Node::Field(Field::opaque(source.len)), source)
    }

    /// Frame an in-memory record as the block payload.
    pub fn framed(group: u32, sequence: u32, width: usize, data: Node, source: Extent) -> Result<Block> {
        let mut record = Record::new()
            .with_field(SIZE, Field::u64())
            .with_field(GROUP, Field::u32())
            .with_field(SEQ, Field::u32())
            .with_field(CRC, Field::u32())
            .with_field(CFLAG, Field::u16())
            .with_field(PAD, Field::u16())
            .with_field(SIG, Field::bytes(vec![0; width]));
        record.push(DATA, data);

        record.set_uint(GROUP, group as u64)?;
        record.set_uint(SEQ, sequence as u64)?;

        let mut block = Block { record, source };
        block.refresh_size()?;
        Ok(block)
    }

    /// Load the block starting at `position`, the payload stays in the source.
    pub fn read_at<R: Read + Seek + ?Sized>(source: &mut R, position: u64, width: usize) -> Result<Block> {
        let mut block = Block::new(0, 0, width, Extent { offset: 0, len: 0 })?;
        block.place(position);
        block.record.load(source)?;

        let size = block.record.uint(SIZE)?;
        let header = BLOCK_HEADER_SIZE + width as u64;
        if size < header {
            return Err(ArcError::Malformed(format!(
                "block at {} claims {} bytes, header alone is {}",
                position, size, header
            )));
        }

        block.record.node_mut(DATA)?.resize(size - header)?;
        block.place(position);
        block.record.load(source)?;
        block.source = Extent {
            offset: position + header,
            len: size - header,
        };
        Ok(block)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn source(&self) -> Extent {
        self.source
    }

    pub fn group(&self) -> u32 {
        self.record.uint(GROUP).unwrap_or(0) as u32
    }

    pub fn sequence(&self) -> u32 {
        self.record.uint(SEQ).unwrap_or(0) as u32
    }

    pub fn set_sequence(&mut self, sequence: u32) -> Result<()> {
        self.record.set_uint(SEQ, sequence as u64)
    }

    pub fn flag(&self) -> Result<CompressionFlag> {
        let code = self.record.uint(CFLAG)?;
        CompressionFlag::from_code(code as u16)
            .ok_or_else(|| ArcError::Malformed(format!("unknown compression flag {}", code)))
    }

    pub fn signature_width(&self) -> usize {
        self.record.field(SIG).map(|f| f.size() as usize).unwrap_or(0)
    }

    pub fn size(&self) -> u64 {
        self.record.size()
    }

    pub fn payload_size(&self) -> u64 {
        self.record.node(DATA).map(|n| n.size()).unwrap_or(0)
    }

    pub fn position(&self) -> Option<u64> {
        self.record.position()
    }

    pub fn payload_position(&self) -> Option<u64> {
        self.record.node(DATA).ok().and_then(|n| n.position())
    }

    /// Resize the payload and record how it was encoded.
    pub fn set_payload(&mut self, len: u64, flag: CompressionFlag) -> Result<()> {
        self.record.node_mut(DATA)?.resize(len)?;
        self.record.set_uint(CFLAG, flag.code() as u64)?;
        self.refresh_size()
    }

    /// Keep `SIZE` in line with the serialized size.
    pub fn refresh_size(&mut self) -> Result<()> {
        let size = self.record.size();
        self.record.set_uint(SIZE, size)
    }

    pub fn place(&mut self, position: u64) -> u64 {
        self.record.place(position)
    }

    /// Write the header and `payload`, the signature slot is left to [`Block::seal`].
    pub fn write<S: Sink + ?Sized>(&mut self, sink: &mut S, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 != self.payload_size() {
            return Err(ArcError::Layout(format!(
                "block {}/{} sized for {} payload bytes, got {}",
                self.group(),
                self.sequence(),
                self.payload_size(),
                payload.len()
            )));
        }
        self.refresh_size()?;
        self.record.commit_until(sink, PAD)?;

        let data = self.record.field_mut(DATA)?;
        let position = data
            .position()
            .ok_or_else(|| ArcError::Layout("block payload has not been laid out".to_string()))?;
        sink.seek(SeekFrom::Start(position))?;
        sink.write_all(payload)?;
        data.commit(sink)
    }

    /// Write every field, used for blocks whose payload is a record.
    pub fn commit<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.refresh_size()?;
        self.record.commit(sink)
    }

    pub fn seal<S: Sink + ?Sized>(&mut self, sink: &mut S, sealer: &Sealer) -> Result<()> {
        sealer.seal(&mut self.record, sink, SLOTS, &[])
    }

    pub fn verify<S: Read + Seek + ?Sized>(&self, sink: &mut S, sealer: &Sealer) -> Result<bool> {
        sealer.verify(&self.record, sink, SLOTS)
    }

    pub fn verify_with<S: Read + Seek + ?Sized>(
        &self,
        sink: &mut S,
        protocol: &Protocol,
        verifier: &dyn Verifier,
    ) -> Result<bool> {
        protocol.verify(&self.record, sink, SLOTS, verifier, self.signature_width())
    }

    /// Read the payload bytes as stored.
    pub fn payload<R: Read + Seek + ?Sized>(&self, source: &mut R) -> Result<Vec<u8>> {
        match self.record.node(DATA)? {
            Node::Field(f) => f.read_back(source),
            Node::Record(r) => {
                let position = r
                    .position()
                    .ok_or_else(|| ArcError::Layout("block payload has not been laid out".to_string()))?;
                let data = read_extent(source, position, r.size() as usize)?;
                Ok(data)
            }
        }
    }
}

/// How the blocks of one group are cut and compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceOptions {
    pub max_chunk: Option<u64>,
    pub compression: CompressionType,
    pub algorithm: Algorithm,
    pub signature_width: usize,
}

impl SequenceOptions {
    pub fn stored(max_chunk: Option<u64>, signature_width: usize) -> SequenceOptions {
        SequenceOptions {
            max_chunk,
            compression: CompressionType::None,
            algorithm: Algorithm::None,
            signature_width,
        }
    }

    /// Without an algorithm nothing is compressed whatever was asked for.
    pub fn effective_compression(&self) -> CompressionType {
        match self.algorithm {
            Algorithm::None => CompressionType::None,
            _ => self.compression,
        }
    }
}

/// The ordered blocks of one group.
#[derive(Debug, Clone)]
pub struct BlockSequence {
    group: u32,
    options: SequenceOptions,
    blocks: Vec<Block>,
    raw_size: u64,
}

impl BlockSequence {
    /// Plan the blocks covering `len` source bytes, empty chunks are dropped.
    pub fn plan(group: u32, len: u64, options: SequenceOptions) -> Result<BlockSequence> {
        let blocks = plan_chunks(len, options.max_chunk)?
            .into_iter()
            .enumerate()
            .map(|(seq, extent)| Block::new(group, seq as u32, options.signature_width, extent))
            .collect::<Result<Vec<_>>>()?;

        let mut sequence = BlockSequence {
            group,
            options,
            blocks,
            raw_size: len,
        };
        sequence.prune_empty()?;
        Ok(sequence)
    }

    /// Wrap blocks loaded from an existing package.
    pub fn from_blocks(group: u32, options: SequenceOptions, blocks: Vec<Block>) -> BlockSequence {
        BlockSequence {
            group,
            options,
            blocks,
            raw_size: 0,
        }
    }

    /// Drop zero length blocks and renumber the rest from 0.
    pub fn prune_empty(&mut self) -> Result<usize> {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.payload_size() > 0);
        for (seq, block) in self.blocks.iter_mut().enumerate() {
            block.set_sequence(seq as u32)?;
        }

        let pruned = before - self.blocks.len();
        if pruned > 0 {
            debug!("group {}: pruned {} empty blocks", self.group, pruned);
        }
        Ok(pruned)
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn options(&self) -> &SequenceOptions {
        &self.options
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn position(&self) -> Option<u64> {
        self.blocks.first().and_then(|b| b.position())
    }

    /// Serialized size of every block.
    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size()).sum()
    }

    pub fn payload_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.payload_size()).sum()
    }

    /// Size of the source before compression.
    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    pub fn set_raw_size(&mut self, raw_size: u64) {
        self.raw_size = raw_size;
    }

    /// Lay the planned blocks out back to back, returns the end.
    pub fn reserve(&mut self, cursor: u64) -> u64 {
        self.blocks
            .iter_mut()
            .fold(cursor, |cursor, block| block.place(cursor))
    }

    /// Compress, write, seal and verify every block starting at `cursor`.
    ///
    /// Returns the end of the last block.
    pub fn write<S: Sink + ?Sized, R: Read + Seek + ?Sized>(
        &mut self,
        sink: &mut S,
        source: &mut R,
        cursor: u64,
        sealer: &Sealer,
    ) -> Result<u64> {
        let compression = self.options.effective_compression();
        let mut cursor = cursor;

        for block in self.blocks.iter_mut() {
            let extent = block.source();
            let raw = read_extent(source, extent.offset, extent.len as usize)?;
            if (raw.len() as u64) < extent.len {
                return Err(ArcError::IncompleteWrite {
                    position: extent.offset,
                    expected: extent.len,
                    found: raw.len() as u64,
                });
            }

            let (payload, compressed) = match compression {
                CompressionType::Chunks => compress::compress_if_smaller(self.options.algorithm, &raw)?,
                _ => (raw, false),
            };
            let flag = if compressed {
                CompressionFlag::Compressed
            } else {
                CompressionFlag::NotCompressed
            };

            block.set_payload(payload.len() as u64, flag)?;
            cursor = block.place(cursor);
            block.write(sink, &payload)?;
            block.seal(sink, sealer)?;

            if !block.verify(sink, sealer)? {
                return Err(ArcError::SignatureMismatch(format!(
                    "block {} of group {} failed verification",
                    block.sequence(),
                    self.group
                )));
            }
        }

        info!(
            "group {}: {} blocks, {} bytes in, {} payload bytes",
            self.group,
            self.blocks.len(),
            self.raw_size,
            self.payload_size()
        );
        Ok(cursor)
    }
}

/// An artefact opened for block writing.
///
/// For whole file compression `file` is a spooled compressed copy.
#[derive(Debug)]
pub struct ArtefactSource {
    pub file: File,
    pub raw_size: u64,
    pub len: u64,
}

pub fn open_artefact(path: &Path, compression: CompressionType, algorithm: Algorithm) -> Result<ArtefactSource> {
    let mut file = File::open(path)?;
    let raw_size = file.metadata()?.len();

    if compression != CompressionType::Whole || algorithm == Algorithm::None {
        return Ok(ArtefactSource {
            file,
            raw_size,
            len: raw_size,
        });
    }

    let mut spool = tempfile::tempfile()?;
    let (read, written) = compress::compress_stream(algorithm, &mut file, &mut spool)?;
    spool.seek(SeekFrom::Start(0))?;
    debug!(
        "{}: {} compressed to {} bytes",
        path.display(),
        read,
        written
    );

    Ok(ArtefactSource {
        file: spool,
        raw_size,
        len: written,
    })
}
