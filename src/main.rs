use std::fs::{self, File};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use swarc::error::ArcError;
use swarc::reader::Container;
use swcore::crypto::{self, KeyStore, NullSigner, SignAlgorithm, Verifier};
use swpkg::cli::{BuildArgs, BuildPlan, Cli, Commands, Config, InspectArgs};
use swpkg::error::Result;
use swpkg::inspect::inspect;
use swpkg::package::{build_to_path, Credentials, Package};
use swpkg::schema::{CanonicalJson, Flatc, SchemaCompiler};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    crypto::init()?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Some(Commands::Build(args)) => build(args, config),
        Some(Commands::Inspect(args)) => inspect_package(args),
        None => Ok(()),
    }
}

fn build(args: BuildArgs, config: Config) -> Result<()> {
    let plan = BuildPlan::resolve(args, config)?;

    let credentials = match plan.signature {
        SignAlgorithm::None => {
            warn!("building an unsigned package");
            Credentials::unsigned()
        }
        alg => Credentials::from_store(&KeyStore::load(&plan.key_store)?, alg)?,
    };

    let compiler: Box<dyn SchemaCompiler> = match plan.schema {
        Some(schema) => Box::new(Flatc::new(plan.flatc, schema)),
        None => {
            info!("no manifest schema given, storing the manifest as JSON");
            Box::new(CanonicalJson)
        }
    };

    let package = Package::new(plan.spec, credentials, compiler)?;
    let report = build_to_path(package, &plan.output)?;

    info!("wrote {}", plan.output.display());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn inspect_package(args: InspectArgs) -> Result<()> {
    let mut file = File::open(&args.file)?;

    let unchecked: Box<dyn Verifier> = Box::new(NullSigner);
    let (verifier, signed) = match (&args.key_store, args.signature) {
        (_, Some(SignAlgorithm::None)) => (unchecked, false),
        (Some(dir), alg) => (
            KeyStore::load(dir)?.verifier(alg.unwrap_or(SignAlgorithm::Ed25519))?,
            true,
        ),
        (None, _) => {
            warn!("no key store given, signatures are not checked");
            (unchecked, false)
        }
    };

    let summary = inspect(&mut file, verifier.as_ref(), signed)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let (Some(group), Some(target)) = (args.extract, &args.extract_to) {
        let container = Container::read(&mut file)?;
        fs::write(target, container.reassemble(&mut file, group)?)?;
        info!("group {} written to {}", group, target.display());
    }

    if !summary.verification.valid {
        return Err(ArcError::SignatureMismatch(format!("{} failed verification", args.file.display())).into());
    }
    Ok(())
}
