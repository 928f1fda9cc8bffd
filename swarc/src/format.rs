//! Software package container format
//!
//! A package is an authentication tag (`ATAG`), followed by the block index
//! table (`BIT`), followed by one or more groups of blocks. Group 1 always
//! holds the update manifest, groups 2 and up hold the artefacts. Every
//! integer is stored big endian.
//!
//! # ATAG
//!
//! | Type    | Name      | Description |
//! | ------: | --------- | ----------- |
//! | u64     | TS        | Total size of the package in bytes |
//! | u32     | CFV       | Container format version, see [`FormatVersion`] |
//! | u32     | ATAGS     | Size of the ATAG itself, signature data included |
//! | u32     | VTAG      | Manifest version tag |
//! | u16     | BHT       | Hash type, see [`swcore::hash::HashKind`] |
//! | u16     | BSS       | Signature width in bytes |
//! | u32     | CRC       | CRC32 of every field except `CRC` and `SDB` |
//! | u32     | PAD       | Zero |
//! | u64     | SDP       | Reserved pointer, zero |
//! | [u8; N] | SDB       | Signature, optionally followed by a certificate and its signature |
//!
//! # BLOCK
//!
//! | Type    | Name      | Description |
//! | ------: | --------- | ----------- |
//! | u64     | SIZE      | Serialized size of the block, header included |
//! | u32     | GROUP     | Group the block belongs to |
//! | u32     | SEQ       | Sequence number, contiguous from 0 within a group |
//! | u32     | CRC       | CRC32 of every field except `CRC` and `SIG` |
//! | u16     | CFLAG     | Payload compression flag, see [`CompressionFlag`] |
//! | u16     | PAD       | Zero |
//! | [u8; BSS] | SIG     | Signature over every field except `SIG` |
//! | [u8; N] | DATA      | Payload |
//!
//! The `BIT` is itself a block in group 0 whose payload is one `BITR` per
//! group.
//!
//! # BITR
//!
//! | Type | Name   | Description |
//! | ---: | ------ | ----------- |
//! | u64  | OFFT   | Offset of the first block of the group |
//! | u64  | TSIZE  | Serialized size of every block in the group |
//! | u64  | SIZE   | Payload only size of the group |
//! | u64  | COUNT  | Number of blocks |
//! | u32  | GROUP  | Group id |
//! | u16  | IDENT  | Block type, see [`BlockType`] |
//! | u16  | ADSIZE | Reserved width, zero |
//! | u16  | CTYPE  | See [`CompressionType`] |
//! | u16  | CALGO  | See [`swcore::compress::Algorithm`] |
//! | u32  | PAD    | Zero |

use std::convert::TryFrom;

use crate::error::ArcError;

/// Size of the ATAG without its signature data.
pub const ATAG_FIXED_SIZE: u64 = 40;
/// Size of a block header without its signature slot.
pub const BLOCK_HEADER_SIZE: u64 = 24;
pub const BITR_SIZE: u64 = 48;

/// Group of the block index table, the manifest and the first artefact.
pub const BIT_GROUP: u32 = 0;
pub const MANIFEST_GROUP: u32 = 1;
pub const FIRST_ARTEFACT_GROUP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    CrcOnly,
    SignatureOnly,
    CrcAndSignature,
}

impl FormatVersion {
    pub fn code(self) -> u32 {
        match self {
            FormatVersion::CrcOnly => 0x0102,
            FormatVersion::SignatureOnly => 0x0104,
            FormatVersion::CrcAndSignature => 0x0106,
        }
    }

    pub fn has_crc(self) -> bool {
        matches!(self, FormatVersion::CrcOnly | FormatVersion::CrcAndSignature)
    }

    pub fn has_signature(self) -> bool {
        matches!(self, FormatVersion::SignatureOnly | FormatVersion::CrcAndSignature)
    }
}

impl TryFrom<u32> for FormatVersion {
    type Error = ArcError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0x0102 => Ok(FormatVersion::CrcOnly),
            0x0104 => Ok(FormatVersion::SignatureOnly),
            0x0106 => Ok(FormatVersion::CrcAndSignature),
            x => Err(ArcError::UnsupportedFormat(x)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    AuthenticationTag,
    Manifest,
    Application,
    BinaryImage,
    BlockIndexTable,
}

impl BlockType {
    pub fn code(self) -> u16 {
        match self {
            BlockType::AuthenticationTag => 0x0001,
            BlockType::Manifest => 0x0003,
            BlockType::Application => 0x0005,
            BlockType::BinaryImage => 0x0007,
            BlockType::BlockIndexTable => 0x0009,
        }
    }

    pub fn from_code(code: u16) -> Option<BlockType> {
        match code {
            0x0001 => Some(BlockType::AuthenticationTag),
            0x0003 => Some(BlockType::Manifest),
            0x0005 => Some(BlockType::Application),
            0x0007 => Some(BlockType::BinaryImage),
            0x0009 => Some(BlockType::BlockIndexTable),
            _ => None,
        }
    }
}

/// How a group's payload was compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Chunks,
    Whole,
}

impl CompressionType {
    pub fn code(self) -> u16 {
        match self {
            CompressionType::None => 0,
            CompressionType::Chunks => 1,
            CompressionType::Whole => 2,
        }
    }

    pub fn from_code(code: u16) -> Option<CompressionType> {
        match code {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Chunks),
            2 => Some(CompressionType::Whole),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFlag {
    NotCompressed,
    Compressed,
}

impl CompressionFlag {
    pub fn code(self) -> u16 {
        match self {
            CompressionFlag::NotCompressed => 0,
            CompressionFlag::Compressed => 1,
        }
    }

    pub fn from_code(code: u16) -> Option<CompressionFlag> {
        match code {
            0 => Some(CompressionFlag::NotCompressed),
            1 => Some(CompressionFlag::Compressed),
            _ => None,
        }
    }
}
