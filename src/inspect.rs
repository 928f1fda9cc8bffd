//! Summary of a finished package, printed as JSON by `swpkg inspect`.

use std::io::{Read, Seek};

use log::warn;
use serde::Serialize;
use serde_json::Value;
use swarc::format::MANIFEST_GROUP;
use swarc::reader::Container;
use swcore::crypto::Verifier;

use crate::detect::{self, FileKind};
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub group: u32,
    pub block_type: String,
    pub compression: String,
    pub algorithm: String,
    pub offset: u64,
    pub total_size: u64,
    pub payload_size: u64,
    pub blocks: u64,
    /// What the reassembled bytes look like, `None` when they could not be reassembled
    pub content: Option<FileKind>,
}

#[derive(Debug, Serialize)]
pub struct VerificationSummary {
    pub signatures_checked: bool,
    pub atag: bool,
    pub bit: bool,
    pub size: bool,
    pub certificate: Option<bool>,
    pub failed_blocks: Vec<(u32, u32)>,
    pub valid: bool,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub format: String,
    pub hash: String,
    pub manifest_tag: u32,
    pub signature_width: usize,
    pub total_size: u64,
    pub groups: Vec<GroupSummary>,
    pub verification: VerificationSummary,
    /// The manifest when it was stored as JSON
    pub manifest: Option<Value>,
}

/// Read, verify and summarise the package in `source`.
///
/// `signed` tells whether `verifier` checks signatures or only accepts them.
pub fn inspect<R: Read + Seek + ?Sized>(source: &mut R, verifier: &dyn Verifier, signed: bool) -> Result<Summary> {
    let container = Container::read(source)?;
    let verification = container.verify(source, verifier)?;
    let atag = container.atag();

    let mut groups = Vec::with_capacity(container.groups().len());
    let mut manifest = None;
    for group in container.groups() {
        let entry = &group.entry;
        let content = match container.reassemble(source, entry.group) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("group {} cannot be reassembled: {}", entry.group, e);
                None
            }
        };

        if entry.group == MANIFEST_GROUP {
            manifest = content.as_ref().and_then(|c| serde_json::from_slice(c).ok());
        }

        groups.push(GroupSummary {
            group: entry.group,
            block_type: format!("{:?}", entry.block_type),
            compression: format!("{:?}", entry.compression),
            algorithm: entry.algorithm.to_string(),
            offset: entry.offset,
            total_size: entry.total_size,
            payload_size: entry.payload_size,
            blocks: entry.count,
            content: content.as_deref().map(detect::sniff),
        });
    }

    Ok(Summary {
        format: format!("{:#06x}", atag.version()?.code()),
        hash: atag.hash_kind()?.to_string(),
        manifest_tag: atag.manifest_tag(),
        signature_width: atag.signature_width(),
        total_size: atag.total_size(),
        groups,
        verification: VerificationSummary {
            signatures_checked: signed,
            valid: verification.is_valid(),
            atag: verification.atag,
            bit: verification.bit,
            size: verification.size,
            certificate: verification.certificate,
            failed_blocks: verification.failed_blocks,
        },
        manifest,
    })
}
