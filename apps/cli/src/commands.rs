//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use landreport_core::bores::{DirectoryIconCatalog, IconCatalog, NoIcons};
use landreport_core::{
    ExportRequest, ProgressReporter, ReportContext, build_parcel_kml, export_any,
    normalize_identifiers, vector_bulk, vector_report,
};
use landreport_shared::{
    AppConfig, ParcelId, ReportOptions, VegetationParams, init_config, load_config, validate_config,
    validate_simplify_tolerance,
};
use landreport_sources::ArcGisSource;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LandReport: build KML/KMZ property reports for land parcels.
#[derive(Parser)]
#[command(
    name = "landreport",
    version,
    about = "Build KML/KMZ property reports (land types, vegetation, bores, easements, water) for land parcels.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use this config file instead of ~/.landreport/landreport.toml.
    #[arg(long, global = true, env = "LANDREPORT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Report options shared by every report-producing command.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ReportArgs {
    /// Simplification tolerance in degrees (0 to 0.001).
    #[arg(long)]
    pub simplify: Option<f64>,

    /// Vegetation MapServer URL (overrides config).
    #[arg(long)]
    pub veg_url: Option<String>,

    /// Vegetation layer id.
    #[arg(long)]
    pub veg_layer: Option<u32>,

    /// Vegetation attribute holding the category name.
    #[arg(long)]
    pub veg_name_field: Option<String>,

    /// Vegetation attribute holding the category code.
    #[arg(long)]
    pub veg_code_field: Option<String>,

    /// Skip vegetation even when configured.
    #[arg(long)]
    pub no_vegetation: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Export one or more parcels as KMZ (single, merged, or a ZIP of reports).
    Export {
        /// Lot/plan identifiers (e.g. 3RP123456).
        #[arg(required = true)]
        lotplans: Vec<String>,

        /// Output file name (single report prefix or merged document name).
        #[arg(short, long)]
        filename: Option<String>,

        /// Write a ZIP of independent reports, named with this prefix.
        #[arg(short, long)]
        prefix: Option<String>,

        /// Write a flat KML (land types, vegetation, bores) instead of a KMZ.
        #[arg(long, conflicts_with_all = ["filename", "prefix"])]
        kml: bool,

        /// Output directory (defaults to `[defaults] output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Export many parcels read from a file (one per line, or comma separated).
    Bulk {
        /// File of lot/plan identifiers; `-` reads stdin.
        input: PathBuf,

        /// Merged document name.
        #[arg(short, long)]
        filename: Option<String>,

        /// Write a ZIP of independent reports, named with this prefix.
        #[arg(short, long)]
        prefix: Option<String>,

        /// Output directory (defaults to `[defaults] output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Print the GeoJSON map payload for one or more parcels.
    Vector {
        /// Lot/plan identifiers.
        #[arg(required = true)]
        lotplans: Vec<String>,

        /// Pretty-print the JSON.
        #[arg(long)]
        pretty: bool,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Check service URLs and defaults.
    Validate,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so `vector`
/// output stays clean on stdout.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "landreport=info",
        1 => "landreport=debug",
        _ => "landreport=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Export {
            lotplans,
            filename,
            prefix,
            kml,
            out,
            report,
        } => {
            let config = read_config(config_path.as_deref())?;
            if kml {
                cmd_export_kml(&config, &lotplans, out, &report).await
            } else {
                let request = ExportRequest {
                    identifiers: lotplans,
                    filename,
                    filename_prefix: prefix,
                };
                cmd_export(&config, &request, out, &report).await
            }
        }
        Command::Bulk {
            input,
            filename,
            prefix,
            out,
            report,
        } => {
            let config = read_config(config_path.as_deref())?;
            let request = ExportRequest {
                identifiers: read_identifiers(&input)?,
                filename,
                filename_prefix: prefix,
            };
            cmd_export(&config, &request, out, &report).await
        }
        Command::Vector {
            lotplans,
            pretty,
            out,
            report,
        } => {
            let config = read_config(config_path.as_deref())?;
            cmd_vector(&config, &lotplans, pretty, out.as_deref(), &report).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
            ConfigAction::Validate => cmd_config_validate(config_path.as_deref()),
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => landreport_shared::load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Merge config defaults with command-line overrides.
fn report_options(config: &AppConfig, args: &ReportArgs) -> Result<ReportOptions> {
    let mut options = ReportOptions::from(config);
    if let Some(tolerance) = args.simplify {
        options.simplify_tolerance = validate_simplify_tolerance(tolerance)?;
    }

    let requested = VegetationParams::complete(
        args.veg_url.as_deref(),
        args.veg_layer,
        args.veg_name_field.as_deref(),
        args.veg_code_field.as_deref(),
    );
    options.vegetation = if args.no_vegetation {
        None
    } else {
        VegetationParams::resolve(requested, &config.vegetation)
    };
    Ok(options)
}

fn icon_catalog(config: &AppConfig) -> Box<dyn IconCatalog> {
    match config.icons.dir.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(dir) => Box::new(DirectoryIconCatalog::new(dir)),
        None => Box::new(NoIcons),
    }
}

/// Split identifier text on newlines, commas and semicolons.
fn split_identifiers(text: &str) -> Vec<String> {
    text.split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(String::from)
        .collect()
}

fn read_identifiers(input: &Path) -> Result<Vec<String>> {
    let text = if input == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).wrap_err("failed to read identifiers from stdin")?
    } else {
        std::fs::read_to_string(input)
            .wrap_err_with(|| format!("failed to read identifiers from '{}'", input.display()))?
    };
    let ids = split_identifiers(&text);
    if ids.is_empty() {
        return Err(eyre!("no lot/plan identifiers found in '{}'", input.display()));
    }
    Ok(ids)
}

/// Parcel ids can contain `/`; keep written names in one directory.
fn output_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(filename.replace(['/', '\\'], "_"))
}

fn write_output(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create '{}'", dir.display()))?;
    let path = output_path(dir, filename);
    std::fs::write(&path, bytes).wrap_err_with(|| format!("failed to write '{}'", path.display()))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_export(
    config: &AppConfig,
    request: &ExportRequest,
    out: Option<PathBuf>,
    args: &ReportArgs,
) -> Result<()> {
    let source = ArcGisSource::new(config)?;
    let icons = icon_catalog(config);
    let ctx = ReportContext::new(&source, &*icons, report_options(config, args)?);
    let out_dir = out.unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));

    info!(
        parcels = request.identifiers.len(),
        prefix = request.filename_prefix.as_deref().unwrap_or(""),
        "exporting property reports"
    );

    let reporter = CliProgress::new();
    let artifact = export_any(&ctx, request, &reporter).await?;
    let path = write_output(&out_dir, &artifact.filename, &artifact.bytes)?;

    println!();
    println!("  Report written!");
    println!("  File:  {}", path.display());
    println!("  Type:  {}", artifact.content_type);
    println!("  Size:  {} bytes", artifact.bytes.len());
    println!();
    Ok(())
}

async fn cmd_export_kml(
    config: &AppConfig,
    lotplans: &[String],
    out: Option<PathBuf>,
    args: &ReportArgs,
) -> Result<()> {
    let source = ArcGisSource::new(config)?;
    let icons = icon_catalog(config);
    let ctx = ReportContext::new(&source, &*icons, report_options(config, args)?);
    let out_dir = out.unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));
    let ids = normalize_identifiers(lotplans)?;

    let reporter = CliProgress::new();
    for (i, id) in ids.iter().enumerate() {
        reporter.parcel_started(id, i + 1, ids.len());
        let parcel = build_parcel_kml(&ctx, id, &reporter).await?;
        let path = write_output(&out_dir, &parcel.filename, parcel.kml.as_bytes())?;
        reporter.done(&parcel.filename, parcel.kml.len());
        println!("  {}", path.display());
    }
    Ok(())
}

async fn cmd_vector(
    config: &AppConfig,
    lotplans: &[String],
    pretty: bool,
    out: Option<&Path>,
    args: &ReportArgs,
) -> Result<()> {
    let source = ArcGisSource::new(config)?;
    let icons = NoIcons;
    let ctx = ReportContext::new(&source, &icons, report_options(config, args)?);
    let ids = normalize_identifiers(lotplans)?;

    let reporter = CliProgress::new();
    let payload = if let [id] = ids.as_slice() {
        let report = vector_report(&ctx, id, &reporter).await?;
        to_json(&report, pretty)?
    } else {
        let bulk = vector_bulk(&ctx, &ids, &reporter).await?;
        to_json(&bulk, pretty)?
    };
    reporter.done("vector payload", payload.len());

    match out {
        Some(path) => {
            std::fs::write(path, &payload).wrap_err_with(|| format!("failed to write '{}'", path.display()))?;
            info!(path = %path.display(), bytes = payload.len(), "vector payload written");
        }
        None => println!("{payload}"),
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_validate(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    validate_config(&config)?;
    println!("Config OK ({} water layers)", config.water_layers.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, parcel: &ParcelId, name: &str) {
        self.spinner.set_message(format!("{parcel}: {name}"));
    }

    fn parcel_started(&self, parcel: &ParcelId, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {parcel}"));
    }

    fn done(&self, _artifact: &str, _bytes: usize) {
        self.spinner.finish_and_clear();
    }
}
