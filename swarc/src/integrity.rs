use std::io::{Read, Seek};

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use swcore::crypto::{Signer, Verifier};
use swcore::hash::{Accumulator, Digest, HashKind};

use crate::error::{ArcError, Result};
use crate::format::FormatVersion;
use crate::record::Record;
use crate::sink::Sink;

/// Names of the CRC and signature fields of a sealed record.
#[derive(Debug, Clone, Copy)]
pub struct Slots {
    pub crc: &'static str,
    pub signature: &'static str,
}

/// The CRC + signature protocol selected by the container format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub version: FormatVersion,
    pub hash: HashKind,
}

impl Protocol {
    pub fn new(version: FormatVersion, hash: HashKind) -> Protocol {
        Protocol { version, hash }
    }

    /// CRC32 over every field except the CRC and signature slots.
    pub fn crc<S: Read + Seek + ?Sized>(&self, record: &Record, sink: &mut S, slots: Slots) -> Result<u32> {
        let mut acc = Accumulator::new(HashKind::Crc32);
        record.digest_all_but(sink, &mut acc, &[slots.signature, slots.crc])?;
        Ok(BigEndian::read_u32(acc.finalize().as_bytes()))
    }

    /// Digest over every field except the signature slot, the CRC included.
    pub fn digest<S: Read + Seek + ?Sized>(&self, record: &Record, sink: &mut S, slots: Slots) -> Result<Digest> {
        let mut acc = Accumulator::new(self.hash);
        record.digest_all_but(sink, &mut acc, &[slots.signature])?;
        Ok(acc.finalize())
    }

    /// Fill in the CRC and signature slots of an already committed record.
    ///
    /// `trailer` is appended after the signature, the slot must have been
    /// reserved at exactly `signer.width() + trailer.len()` bytes.
    pub fn seal<S: Sink + ?Sized>(
        &self,
        record: &mut Record,
        sink: &mut S,
        slots: Slots,
        signer: &dyn Signer,
        trailer: &[u8],
    ) -> Result<()> {
        let crc = if self.version.has_crc() {
            self.crc(record, sink, slots)?
        } else {
            0
        };
        let crc_field = record.field_mut(slots.crc)?;
        crc_field.set_uint(crc as u64)?;
        crc_field.commit(sink)?;

        let reserved = record.field(slots.signature)?.size();
        let data = if self.version.has_signature() {
            let digest = self.digest(record, sink, slots)?;
            let mut data = signer.sign(digest.as_bytes());
            if data.len() != signer.width() {
                return Err(ArcError::SignatureMismatch(format!(
                    "signer produced {} bytes, expected {}",
                    data.len(),
                    signer.width()
                )));
            }
            data.extend_from_slice(trailer);
            debug!("sealed {} with {} digest {}", slots.signature, self.hash, digest);
            data
        } else {
            vec![0; reserved as usize]
        };

        if data.len() as u64 != reserved {
            return Err(ArcError::SignatureMismatch(format!(
                "{} bytes reserved for {}, signature data is {} bytes",
                reserved,
                slots.signature,
                data.len()
            )));
        }

        let sig_field = record.field_mut(slots.signature)?;
        sig_field.set_bytes(data)?;
        sig_field.commit(sink)
    }

    /// Re-derive the CRC and digest from the sink and check them.
    ///
    /// A failed check is `Ok(false)`, errors are reserved for unreadable records.
    pub fn verify<S: Read + Seek + ?Sized>(
        &self,
        record: &Record,
        sink: &mut S,
        slots: Slots,
        verifier: &dyn Verifier,
        width: usize,
    ) -> Result<bool> {
        if self.version.has_crc() {
            let stored = record.field(slots.crc)?.read_back(sink)?;
            if BigEndian::read_u32(&stored) != self.crc(record, sink, slots)? {
                return Ok(false);
            }
        }

        if self.version.has_signature() {
            let signature = record.field(slots.signature)?.read_back(sink)?;
            if signature.len() < width {
                return Ok(false);
            }
            let digest = self.digest(record, sink, slots)?;
            return Ok(verifier.verify(&signature[..width], digest.as_bytes()));
        }
        Ok(true)
    }
}

/// A protocol together with the keys used to seal and check records.
pub struct Sealer<'a> {
    pub protocol: Protocol,
    pub signer: &'a dyn Signer,
    pub verifier: &'a dyn Verifier,
}

impl<'a> Sealer<'a> {
    pub fn width(&self) -> usize {
        self.signer.width()
    }

    pub fn seal<S: Sink + ?Sized>(
        &self,
        record: &mut Record,
        sink: &mut S,
        slots: Slots,
        trailer: &[u8],
    ) -> Result<()> {
        self.protocol.seal(record, sink, slots, self.signer, trailer)
    }

    pub fn verify<S: Read + Seek + ?Sized>(&self, record: &Record, sink: &mut S, slots: Slots) -> Result<bool> {
        self.protocol
            .verify(record, sink, slots, self.verifier, self.signer.width())
    }
}
