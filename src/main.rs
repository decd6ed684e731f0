//! recon-batch - refine a directory of reconstructions with checkpointed resume

use anyhow::{Context, Result, bail};
use clap::Parser;
use recon_batch::collaborators::{
    CliExporter, CliRefiner, CliTranslator, DefaultCanonicalizer, Exporter, RawArtifact, RawCodec,
    Translator,
};
use recon_batch::{BatchDriver, Collaborators, Config, run_with_shutdown};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recon-batch")]
#[command(author, version, about = "Resumable chunked refinement of reconstructions")]
struct Cli {
    /// Directory scanned for input files
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for refined artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for translated artifacts
    #[arg(long)]
    translated: Option<PathBuf>,

    /// Directory for the ledger snapshot and report tables
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Identifier-mapping file (generated when missing)
    #[arg(long)]
    info_file: Option<PathBuf>,

    /// Resource data directory handed to the refiner
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Concurrent workers per chunk
    #[arg(short, long)]
    workers: Option<usize>,

    /// Label naming the ledger snapshot and info file
    #[arg(long)]
    resource_version: Option<String>,

    /// Solver name handed to the refiner
    #[arg(long)]
    solver: Option<String>,

    /// Reprocess items even if their refined artifact exists
    #[arg(long)]
    overwrite: bool,

    /// Export refined artifacts here after the report
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Refiner program (name in PATH or a path)
    #[arg(long)]
    refiner: String,

    /// Translator program for secondary-format inputs
    #[arg(long)]
    translator: Option<String>,

    /// Exporter program, used with --export-dir
    #[arg(long)]
    exporter: Option<String>,

    /// Extension of stored artifacts
    #[arg(long, default_value = "mat")]
    artifact_extension: String,

    /// Scratch directory for refiner and translator outputs
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<(Config, Tools)> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => match &self.input {
                Some(input) => Config::new(input),
                None => bail!("either --input or --config is required"),
            },
        };

        if let Some(input) = self.input {
            config.paths.input_dir = input;
        }
        if let Some(dir) = self.output {
            config.paths.output_dir = Some(dir);
        }
        if let Some(dir) = self.translated {
            config.paths.translated_dir = Some(dir);
        }
        if let Some(dir) = self.summary {
            config.paths.summary_dir = Some(dir);
        }
        if let Some(path) = self.info_file {
            config.paths.info_file = Some(path);
        }
        if let Some(dir) = self.data_dir {
            config.paths.data_dir = Some(dir);
        }
        if let Some(dir) = self.export_dir {
            config.paths.export_dir = Some(dir);
        }
        if let Some(workers) = self.workers {
            config.execution.workers = workers;
        }
        if let Some(version) = self.resource_version {
            config.execution.resource_version = version;
        }
        if self.solver.is_some() {
            config.execution.solver = self.solver;
        }
        config.execution.overwrite |= self.overwrite;

        let scratch_dir = self
            .scratch_dir
            .unwrap_or_else(|| std::env::temp_dir().join("recon-batch"));

        Ok((
            config,
            Tools {
                refiner: self.refiner,
                translator: self.translator,
                exporter: self.exporter,
                artifact_extension: self.artifact_extension,
                scratch_dir,
            },
        ))
    }
}

/// External programs the run delegates to
struct Tools {
    refiner: String,
    translator: Option<String>,
    exporter: Option<String>,
    artifact_extension: String,
    scratch_dir: PathBuf,
}

impl Tools {
    fn collaborators(self) -> Result<Collaborators<RawArtifact>> {
        std::fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("creating scratch dir {}", self.scratch_dir.display()))?;

        let refiner = CliRefiner::from_path(&self.refiner, self.scratch_dir.clone())
            .with_context(|| format!("refiner '{}' not found", self.refiner))?;

        let translator = match &self.translator {
            Some(program) => Some(
                CliTranslator::from_path(program, self.scratch_dir.clone())
                    .with_context(|| format!("translator '{program}' not found"))?,
            ),
            None => None,
        };

        let exporter = match &self.exporter {
            Some(program) => Some(
                CliExporter::from_path(program)
                    .with_context(|| format!("exporter '{program}' not found"))?,
            ),
            None => None,
        };

        Ok(Collaborators {
            codec: Arc::new(RawCodec::new(self.artifact_extension)),
            refiner: Arc::new(refiner),
            translator: translator.map(|t| Arc::new(t) as Arc<dyn Translator<RawArtifact>>),
            exporter: exporter.map(|e| Arc::new(e) as Arc<dyn Exporter>),
            canonicalizer: Arc::new(DefaultCanonicalizer),
        })
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, tools) = cli.into_config()?;
    let collaborators = tools.collaborators()?;
    let driver = BatchDriver::new(config, collaborators)?;

    info!(input_dir = %driver.config().paths.input_dir.display(), "Starting batch run");
    let report = run_with_shutdown(driver).await?;

    if report.stopped {
        info!(chunks = report.chunks, "Stopped early; rerun to continue");
    }
    if !report.report_failures.is_empty() {
        for (field, reason) in &report.report_failures {
            tracing::warn!(field = %field, reason = %reason, "Report table not written");
        }
        bail!("{} report table(s) failed to write", report.report_failures.len());
    }
    Ok(())
}
