use std::convert::TryFrom;
use std::io::{Read, Seek};

use swcore::compress::Algorithm;
use swcore::crypto::{sign_certificate, Verifier};
use swcore::hash::{Accumulator, HashKind};

use crate::block::{Block, BlockSequence, Extent, DATA};
use crate::error::{ArcError, Result};
use crate::field::Field;
use crate::format::{BlockType, CompressionType, FormatVersion, ATAG_FIXED_SIZE, BITR_SIZE, BIT_GROUP};
use crate::integrity::{Protocol, Sealer, Slots};
use crate::record::{Node, Record};
use crate::sink::Sink;

pub const ATAG_SLOTS: Slots = Slots {
    crc: "CRC",
    signature: "SDB",
};

/// The authentication tag heading every package.
#[derive(Debug, Clone)]
pub struct Atag {
    record: Record,
}

impl Atag {
    /// `trailer` is the length of the certificate data stored after the signature.
    pub fn new(
        version: FormatVersion,
        hash: HashKind,
        manifest_tag: u32,
        width: usize,
        trailer: usize,
    ) -> Result<Atag> {
        let mut record = Atag::layout(width + trailer);
        record.set_uint("CFV", version.code() as u64)?;
        record.set_uint("VTAG", manifest_tag as u64)?;
        record.set_uint("BHT", hash.code() as u64)?;
        record.set_uint("BSS", width as u64)?;
        let size = record.size();
        record.set_uint("ATAGS", size)?;
        Ok(Atag { record })
    }

    fn layout(signature_data: usize) -> Record {
        Record::new()
            .with_field("TS", Field::u64())
            .with_field("CFV", Field::u32())
            .with_field("ATAGS", Field::u32())
            .with_field("VTAG", Field::u32())
            .with_field("BHT", Field::u16())
            .with_field("BSS", Field::u16())
            .with_field("CRC", Field::u32())
            .with_field("PAD", Field::u32())
            .with_field("SDP", Field::u64())
            .with_field("SDB", Field::bytes(vec![0; signature_data]))
    }

    /// Load the tag at the start of `source`.
    pub fn read<R: Read + Seek + ?Sized>(source: &mut R) -> Result<Atag> {
        let mut fixed = Atag::layout(0);
        fixed.place(0);
        fixed.load(source)?;

        let size = fixed.uint("ATAGS")?;
        if size < ATAG_FIXED_SIZE {
            return Err(ArcError::Malformed(format!("ATAG size {} is below the fixed header", size)));
        }

        let mut record = Atag::layout((size - ATAG_FIXED_SIZE) as usize);
        record.place(0);
        record.load(source)?;

        let atag = Atag { record };
        atag.version()?;
        atag.hash_kind()?;
        if atag.signature_width() as u64 > size - ATAG_FIXED_SIZE {
            return Err(ArcError::Malformed(format!(
                "signature width {} exceeds the {} bytes of signature data",
                atag.signature_width(),
                size - ATAG_FIXED_SIZE
            )));
        }
        Ok(atag)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn version(&self) -> Result<FormatVersion> {
        FormatVersion::try_from(self.record.uint("CFV")? as u32)
    }

    pub fn hash_kind(&self) -> Result<HashKind> {
        let code = self.record.uint("BHT")?;
        HashKind::from_code(code as u16)
            .ok_or_else(|| ArcError::Malformed(format!("unknown hash type {}", code)))
    }

    pub fn protocol(&self) -> Result<Protocol> {
        Ok(Protocol::new(self.version()?, self.hash_kind()?))
    }

    pub fn signature_width(&self) -> usize {
        self.record.uint("BSS").unwrap_or(0) as usize
    }

    pub fn manifest_tag(&self) -> u32 {
        self.record.uint("VTAG").unwrap_or(0) as u32
    }

    pub fn total_size(&self) -> u64 {
        self.record.uint("TS").unwrap_or(0)
    }

    pub fn set_total_size(&mut self, size: u64) -> Result<()> {
        self.record.set_uint("TS", size)
    }

    pub fn size(&self) -> u64 {
        self.record.size()
    }

    pub fn place(&mut self, position: u64) -> u64 {
        self.record.place(position)
    }

    pub fn commit<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.record.commit(sink)
    }

    /// Seal the tag, the certificate and its signature follow the tag signature.
    ///
    /// Without signatures the whole signature data block is zero filled.
    pub fn seal<S: Sink + ?Sized>(
        &mut self,
        sink: &mut S,
        sealer: &Sealer,
        certificate: Option<&[u8]>,
    ) -> Result<()> {
        let trailer = match certificate {
            Some(cert) => {
                let mut trailer = cert.to_vec();
                trailer.extend(sign_certificate(sealer.signer, cert));
                trailer
            }
            None => Vec::new(),
        };
        sealer.seal(&mut self.record, sink, ATAG_SLOTS, &trailer)
    }

    pub fn verify<S: Read + Seek + ?Sized>(&self, sink: &mut S, verifier: &dyn Verifier) -> Result<bool> {
        self.protocol()?
            .verify(&self.record, sink, ATAG_SLOTS, verifier, self.signature_width())
    }

    /// The embedded certificate and the signature over its SHA-256.
    pub fn certificate(&self) -> Option<(&[u8], &[u8])> {
        let data = self.record.field("SDB").ok()?.as_bytes()?;
        let width = self.signature_width();
        if data.len() <= 2 * width {
            return None;
        }
        let end = data.len() - width;
        Some((&data[width..end], &data[end..]))
    }

    pub fn verify_certificate(&self, verifier: &dyn Verifier) -> bool {
        match self.certificate() {
            Some((cert, signature)) => {
                let mut acc = Accumulator::new(HashKind::Sha256);
                acc.update(cert);
                verifier.verify(signature, acc.finalize().as_bytes())
            }
            None => false,
        }
    }
}

/// One row of the block index table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitr {
    pub offset: u64,
    pub total_size: u64,
    pub payload_size: u64,
    pub count: u64,
    pub group: u32,
    pub block_type: BlockType,
    pub compression: CompressionType,
    pub algorithm: Algorithm,
}

impl Bitr {
    /// An entry for a group that has not been written yet.
    pub fn planned(
        group: u32,
        block_type: BlockType,
        compression: CompressionType,
        algorithm: Algorithm,
    ) -> Bitr {
        Bitr {
            offset: 0,
            total_size: 0,
            payload_size: 0,
            count: 0,
            group,
            block_type,
            compression,
            algorithm,
        }
    }

    fn record(&self) -> Result<Record> {
        let mut rec = Record::new()
            .with_field("OFFT", Field::u64())
            .with_field("TSIZE", Field::u64())
            .with_field("SIZE", Field::u64())
            .with_field("COUNT", Field::u64())
            .with_field("GROUP", Field::u32())
            .with_field("IDENT", Field::u16())
            .with_field("ADSIZE", Field::u16())
            .with_field("CTYPE", Field::u16())
            .with_field("CALGO", Field::u16())
            .with_field("PAD", Field::u32());
        rec.set_uint("OFFT", self.offset)?;
        rec.set_uint("TSIZE", self.total_size)?;
        rec.set_uint("SIZE", self.payload_size)?;
        rec.set_uint("COUNT", self.count)?;
        rec.set_uint("GROUP", self.group as u64)?;
        rec.set_uint("IDENT", self.block_type.code() as u64)?;
        rec.set_uint("CTYPE", self.compression.code() as u64)?;
        rec.set_uint("CALGO", self.algorithm.code() as u64)?;
        Ok(rec)
    }

    fn from_record(rec: &Record) -> Result<Bitr> {
        let ident = rec.uint("IDENT")? as u16;
        let ctype = rec.uint("CTYPE")? as u16;
        let calgo = rec.uint("CALGO")? as u16;

        Ok(Bitr {
            offset: rec.uint("OFFT")?,
            total_size: rec.uint("TSIZE")?,
            payload_size: rec.uint("SIZE")?,
            count: rec.uint("COUNT")?,
            group: rec.uint("GROUP")? as u32,
            block_type: BlockType::from_code(ident)
                .ok_or_else(|| ArcError::Malformed(format!("unknown block type {:#06x}", ident)))?,
            compression: CompressionType::from_code(ctype)
                .ok_or_else(|| ArcError::Malformed(format!("unknown compression type {}", ctype)))?,
            algorithm: Algorithm::from_code(calgo)
                .ok_or_else(|| ArcError::Malformed(format!("unknown compression algorithm {}", calgo)))?,
        })
    }
}

/// The block index table, a group 0 block holding one entry per group.
#[derive(Debug, Clone)]
pub struct Bit {
    block: Block,
}

impl Bit {
    pub fn new(width: usize, entries: &[Bitr]) -> Result<Bit> {
        let mut table = Record::new();
        for (i, entry) in entries.iter().enumerate() {
            table.push(&i.to_string(), Node::Record(entry.record()?));
        }

        let block = Block::framed(
            BIT_GROUP,
            0,
            width,
            Node::Record(table),
            Extent { offset: 0, len: 0 },
        )?;
        Ok(Bit { block })
    }

    /// Load the table whose block starts at `position`.
    pub fn read<R: Read + Seek + ?Sized>(source: &mut R, position: u64, width: usize) -> Result<Bit> {
        let framing = Block::read_at(source, position, width)?;
        if framing.group() != BIT_GROUP {
            return Err(ArcError::Malformed(format!(
                "expected the index table at {}, found group {}",
                position,
                framing.group()
            )));
        }

        let payload = framing.payload_size();
        if payload % BITR_SIZE != 0 {
            return Err(ArcError::Malformed(format!(
                "index table payload of {} bytes is not a whole number of entries",
                payload
            )));
        }

        let placeholder = Bitr::planned(0, BlockType::Manifest, CompressionType::None, Algorithm::None);
        let mut bit = Bit::new(width, &vec![placeholder; (payload / BITR_SIZE) as usize])?;
        bit.place(position);
        bit.block.record_mut().load(source)?;
        Ok(bit)
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    fn table(&self) -> Result<&Record> {
        self.block.record().record(DATA)
    }

    pub fn len(&self) -> usize {
        self.table().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Result<Vec<Bitr>> {
        self.table()?
            .nodes()
            .map(|(name, node)| match node {
                Node::Record(rec) => Bitr::from_record(rec),
                Node::Field(_) => Err(ArcError::MissingField(name.to_string())),
            })
            .collect()
    }

    pub fn entry_for(&self, group: u32) -> Result<Bitr> {
        self.entries()?
            .into_iter()
            .find(|e| e.group == group)
            .ok_or_else(|| ArcError::MissingField(format!("index entry for group {}", group)))
    }

    /// Record where a written group ended up.
    pub fn update(&mut self, sequence: &BlockSequence) -> Result<()> {
        let group = sequence.group() as u64;
        let table = self.block.record_mut().record_mut(DATA)?;

        for (_, node) in table.nodes_mut() {
            if let Node::Record(rec) = node {
                if rec.uint("GROUP")? == group {
                    rec.set_uint("OFFT", sequence.position().unwrap_or(0))?;
                    rec.set_uint("TSIZE", sequence.size())?;
                    rec.set_uint("SIZE", sequence.payload_size())?;
                    rec.set_uint("COUNT", sequence.len() as u64)?;
                    return Ok(());
                }
            }
        }
        Err(ArcError::MissingField(format!("index entry for group {}", group)))
    }

    pub fn size(&self) -> u64 {
        self.block.size()
    }

    pub fn position(&self) -> Option<u64> {
        self.block.position()
    }

    pub fn place(&mut self, position: u64) -> u64 {
        self.block.place(position)
    }

    pub fn commit<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.block.commit(sink)
    }

    pub fn seal<S: Sink + ?Sized>(&mut self, sink: &mut S, sealer: &Sealer) -> Result<()> {
        self.block.seal(sink, sealer)
    }

    pub fn verify<S: Read + Seek + ?Sized>(
        &self,
        sink: &mut S,
        protocol: &Protocol,
        verifier: &dyn Verifier,
    ) -> Result<bool> {
        self.block.verify_with(sink, protocol, verifier)
    }
}
