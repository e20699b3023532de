use std::path::{Path, PathBuf};

use amm_merge::validation::validate_on_read;
use amm_merge::{DocumentType, ManifestMerger, MergeOptions, MergeReport, OutputKind, Severity, SystemProperties, UnknownElementPolicy};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

#[derive(Parser)]
#[command(version, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(about = "Merges Android manifest files")]
struct Cli {
    /// Print debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merges a main manifest with its overlays and libraries, in that order of priority.
    Merge(MergeArgs),
    /// Checks a single manifest for invalid attribute values.
    Validate {
        manifest: PathBuf,
        /// Treat the manifest as the manifest of a library
        #[arg(short, long)]
        library: bool,
    },
}

#[derive(Args)]
struct MergeArgs {
    #[arg(short, long)]
    main: PathBuf,
    /// Flavor or build type manifest, highest priority first
    #[arg(long)]
    overlay: Vec<PathBuf>,
    /// Library manifest, highest priority first
    #[arg(short, long)]
    library: Vec<PathBuf>,
    /// Where to write the merged manifest. Printed if not given
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Where to write the JSON merge report
    #[arg(long)]
    report: Option<PathBuf>,
    /// Where to write the origin of every element of the merged manifest
    #[arg(long)]
    blame: Option<PathBuf>,
    #[arg(long)]
    min_sdk: Option<String>,
    #[arg(long)]
    target_sdk: Option<String>,
    #[arg(long)]
    max_sdk: Option<String>,
    /// Package (application ID) of the merged manifest
    #[arg(long)]
    package: Option<String>,
    #[arg(long)]
    version_code: Option<String>,
    #[arg(long)]
    version_name: Option<String>,
    /// Placeholder value, as NAME=VALUE
    #[arg(long, value_parser = parse_placeholder)]
    placeholder: Vec<(String, String)>,
    /// JSON file with merge options. Flags take precedence over it
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    no_implicit_permissions: bool,
    #[arg(long)]
    disable_min_sdk_check: bool,
    /// Keep tools instructions, for a manifest that will be merged again
    #[arg(long)]
    library_output: bool,
    /// Keep elements the merger does not know instead of failing
    #[arg(long)]
    pass_through_unknown: bool,
}

fn parse_placeholder(arg: &str) -> Result<(String, String)> {
    let (name, value) = arg
        .split_once('=')
        .ok_or(anyhow!("Placeholder `{arg}` is not in the form NAME=VALUE"))?;
    if name.is_empty() {
        return Err(anyhow!("Placeholder `{arg}` has no name"));
    }

    Ok((name.to_string(), value.to_string()))
}

impl MergeArgs {
    fn options(&self) -> Result<MergeOptions> {
        let mut options = match &self.config {
            Some(path) => MergeOptions::load(path)?,
            None => MergeOptions::default(),
        };

        if self.no_implicit_permissions {
            options.add_implicit_permissions = false;
        }
        if self.disable_min_sdk_check {
            options.disable_min_sdk_version_check = true;
        }
        if self.library_output {
            options.output = OutputKind::Library;
        }
        if self.pass_through_unknown {
            options.unknown_elements = UnknownElementPolicy::PassThrough;
        }
        options.placeholders.extend(self.placeholder.iter().cloned());

        Ok(options)
    }

    fn system_properties(&self) -> SystemProperties {
        SystemProperties {
            package: self.package.clone(),
            version_code: self.version_code.clone(),
            version_name: self.version_name.clone(),
            min_sdk_version: self.min_sdk.clone(),
            target_sdk_version: self.target_sdk.clone(),
            max_sdk_version: self.max_sdk.clone(),
        }
    }
}

fn merge(args: MergeArgs) -> Result<()> {
    let merger = ManifestMerger::android(args.options()?);

    let mut documents = Vec::with_capacity(1 + args.overlay.len() + args.library.len());
    documents.push(merger.load_file(&args.main, DocumentType::Main, args.system_properties())?);
    for path in &args.overlay {
        documents.push(merger.load_file(path, DocumentType::Overlay, SystemProperties::default())?);
    }
    for path in &args.library {
        documents.push(merger.load_file(path, DocumentType::Library, SystemProperties::default())?);
    }

    info!("Merging {} manifest(s)", documents.len());
    let outcome = merger.merge(documents);
    log_records(&outcome.report);

    if let Some(path) = &args.report {
        std::fs::write(path, outcome.report.to_json()?).with_context(|| format!("Writing report to {path:?}"))?;
    }

    let Some(document) = outcome.document else {
        return Err(anyhow!(
            "Merging failed with {} error(s)",
            outcome.report.errors().count()
        ));
    };

    if let Some(path) = &args.blame {
        std::fs::write(path, outcome.report.blame(&document))
            .with_context(|| format!("Writing blame to {path:?}"))?;
    }

    match &args.out {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("Creating {path:?}"))?;
            document.write(std::io::BufWriter::new(file))?;
            info!("Merged manifest written to {path:?}");
        }
        None => println!("{}", document.to_xml_string()?),
    }

    Ok(())
}

fn validate(manifest: &Path, library: bool) -> Result<()> {
    let merger = ManifestMerger::android(MergeOptions::default());
    let doc_type = if library { DocumentType::Library } else { DocumentType::Main };
    let document = merger.load_file(manifest, doc_type, SystemProperties::default())?;

    let mut report = MergeReport::new();
    validate_on_read(&document, merger.registry(), &mut report);
    log_records(&report);

    if report.has_errors() {
        Err(anyhow!("{manifest:?} is not valid"))
    } else {
        info!("{manifest:?} is valid");
        Ok(())
    }
}

fn log_records(report: &MergeReport) {
    for record in report.records() {
        match record.severity {
            Severity::Error => error!("{record}"),
            Severity::Warning => warn!("{record}"),
            Severity::Info => info!("{record}"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::builder()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Merge(args) => merge(args)?,
        Commands::Validate { manifest, library } => validate(&manifest, library)?,
    }

    Ok(())
}
