use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;
use swarc::format::FormatVersion;
use swcore::compress::Algorithm;
use swcore::crypto::SignAlgorithm;
use swcore::hash::HashKind;

use crate::error::{PackageError, Result};
use crate::package::{ArtefactSpec, Method, PackageSpec};

pub const DEFAULT_OUTPUT: &str = "swpkg.bin";
pub const DEFAULT_BLOCK_SIZE: u64 = 768;
pub const MAX_BLOCK_SIZE: u64 = 64535;

#[derive(Parser)]
#[command(name = "swpkg")]
#[command(about = "Signed software update package generator")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log progress
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a package from an update manifest and its artefacts
    Build(BuildArgs),

    /// Check a package and print a summary of its groups
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Container format version in hex: 0102, 0104 or 0106
    #[arg(long, value_name = "HEX", value_parser = parse_hex)]
    pub container_format: Option<u32>,

    /// Update manifest JSON
    #[arg(long, value_name = "FILE")]
    pub update_manifest_data: Option<PathBuf>,

    /// FlatBuffers schema for the update manifest, stored as JSON when absent
    #[arg(long, value_name = "FILE")]
    pub update_manifest_schema: Option<PathBuf>,

    /// Directory holding the flatc executable
    #[arg(long, value_name = "DIR")]
    pub flatc_path: Option<PathBuf>,

    /// Artefact and its method: compressChunks, compressWhole or none
    #[arg(long, num_args = 2, value_names = ["FILE", "METHOD"], action = ArgAction::Append)]
    pub artefact: Vec<String>,

    /// Compression algorithm: zlib or none
    #[arg(long, value_name = "ALGORITHM")]
    pub compress: Option<Algorithm>,

    /// Directory holding the signing keys and certificate
    #[arg(long, value_name = "DIR")]
    pub key_store: Option<PathBuf>,

    /// Maximum payload bytes per block
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_BLOCK_SIZE))]
    pub block_size: Option<u64>,

    /// Expected install throughput in kB/s
    #[arg(long, value_name = "KBPS")]
    pub estimated_speed: Option<u64>,

    /// Digest the signatures are made over: sha256, crc32 or blake3
    #[arg(long)]
    pub hash: Option<HashKind>,

    /// Signature algorithm: ed25519 or none
    #[arg(long)]
    pub signature: Option<SignAlgorithm>,

    /// Manifest format tag stored in the header
    #[arg(long)]
    pub manifest_tag: Option<u32>,

    /// Skip the artefact file type check
    #[arg(long)]
    pub no_type_check: bool,

    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Package to inspect
    pub file: PathBuf,

    /// Directory holding the public key, signatures are not checked without it
    #[arg(long, value_name = "DIR")]
    pub key_store: Option<PathBuf>,

    #[arg(long)]
    pub signature: Option<SignAlgorithm>,

    /// Group to reassemble
    #[arg(long, value_name = "GROUP", requires = "extract_to")]
    pub extract: Option<u32>,

    /// Where the reassembled group is written
    #[arg(long, value_name = "FILE")]
    pub extract_to: Option<PathBuf>,
}

fn parse_hex(s: &str) -> std::result::Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| format!("invalid hex number: {}", s))
}

// Configuration
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub container_format: Option<u32>,
    pub update_manifest_data: Option<PathBuf>,
    pub update_manifest_schema: Option<PathBuf>,
    pub flatc_path: Option<PathBuf>,
    pub compress: Option<String>,
    pub key_store: Option<PathBuf>,
    pub block_size: Option<u64>,
    pub estimated_speed: Option<u64>,
    pub hash: Option<String>,
    pub signature: Option<String>,
    pub manifest_tag: Option<u32>,
    pub type_check: Option<bool>,
    pub output: Option<PathBuf>,

    #[serde(default)]
    pub artefacts: Vec<ArtefactConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ArtefactConfig {
    pub path: PathBuf,
    pub method: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// A build with every option resolved.
#[derive(Debug)]
pub struct BuildPlan {
    pub spec: PackageSpec,
    pub signature: SignAlgorithm,
    pub key_store: PathBuf,
    pub schema: Option<PathBuf>,
    pub flatc: PathBuf,
    pub output: PathBuf,
}

fn parse_option<T>(value: Option<&str>, what: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .map(|v| v.parse::<T>().map_err(|e| PackageError::spec(format!("{}: {}", what, e))))
        .transpose()
}

impl BuildPlan {
    /// Merge the command line over the config file over the defaults.
    pub fn resolve(args: BuildArgs, config: Config) -> Result<BuildPlan> {
        let version = FormatVersion::try_from(
            args.container_format
                .or(config.container_format)
                .unwrap_or(FormatVersion::CrcAndSignature.code()),
        )?;

        let manifest = args
            .update_manifest_data
            .or(config.update_manifest_data)
            .ok_or_else(|| PackageError::spec("no update manifest given"))?;

        let speed = args
            .estimated_speed
            .or(config.estimated_speed)
            .ok_or_else(|| PackageError::spec("no estimated speed given"))?;

        let block_size = args.block_size.or(config.block_size).unwrap_or(DEFAULT_BLOCK_SIZE);
        if !(1..=MAX_BLOCK_SIZE).contains(&block_size) {
            return Err(PackageError::spec(format!(
                "block size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, block_size
            )));
        }

        let artefacts = if args.artefact.is_empty() {
            config
                .artefacts
                .into_iter()
                .map(|a| {
                    let method = a.method.parse::<Method>().map_err(PackageError::spec)?;
                    Ok(ArtefactSpec { path: a.path, method })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            args.artefact
                .chunks(2)
                .map(|pair| match pair {
                    [path, method] => Ok(ArtefactSpec {
                        path: PathBuf::from(path),
                        method: method.parse::<Method>().map_err(PackageError::spec)?,
                    }),
                    _ => Err(PackageError::spec("--artefact takes a file and a method")),
                })
                .collect::<Result<Vec<_>>>()?
        };

        let algorithm = match args.compress {
            Some(alg) => alg,
            None => parse_option(config.compress.as_deref(), "compress")?.unwrap_or(Algorithm::None),
        };
        let hash = match args.hash {
            Some(hash) => hash,
            None => parse_option(config.hash.as_deref(), "hash")?.unwrap_or(HashKind::Sha256),
        };
        let signature = match args.signature {
            Some(sig) => sig,
            None => parse_option(config.signature.as_deref(), "signature")?.unwrap_or(SignAlgorithm::Ed25519),
        };

        let spec = PackageSpec {
            version,
            hash,
            manifest_tag: args.manifest_tag.or(config.manifest_tag).unwrap_or(0),
            manifest,
            artefacts,
            algorithm,
            max_chunk: Some(block_size),
            throughput: speed.saturating_mul(1000),
            check_types: !args.no_type_check && config.type_check.unwrap_or(true),
        };

        Ok(BuildPlan {
            spec,
            signature,
            key_store: args.key_store.or(config.key_store).unwrap_or_else(|| PathBuf::from(".")),
            schema: args.update_manifest_schema.or(config.update_manifest_schema),
            flatc: args
                .flatc_path
                .or(config.flatc_path)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("flatc"),
            output: args.output.or(config.output).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
        })
    }
}
