// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe Render CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use polyframe_render::cli::Reporter;
use polyframe_render::job::{Backend, JobResult, ParamValue, RenderOptions};
use polyframe_render::protocol::{stdio, Dispatcher, HostEvent, HostRequest};
use polyframe_render::vfs::{FileContent, LibraryRef};
use polyframe_render::{
    ErrorClassification, OutputFormat, ProcessEngineLoader, RenderConfig, RenderRequest, Session,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "polyframe-render")]
#[command(about = "Polyframe Render - job orchestration for a sandboxed OpenSCAD engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Asset directory (engine, manifest, fonts, libraries)
    #[arg(long, global = true, value_name = "DIR")]
    assets: Option<PathBuf>,

    /// Config file (defaults to render.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Manifold,
    Cgal,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Backend::Auto,
            BackendArg::Manifold => Backend::Manifold,
            BackendArg::Cgal => Backend::Cgal,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Render a SCAD file
    Render {
        /// Input SCAD file
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (defaults to the output file's extension)
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Parameter override, `name=value`; values are read as JSON when possible
        #[arg(short = 'D', value_name = "NAME=VALUE")]
        defines: Vec<String>,

        /// Project directory mounted as the work directory
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        /// Library to mount (repeatable)
        #[arg(short, long = "library", value_name = "ID")]
        libraries: Vec<String>,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Geometry backend
        #[arg(long, value_enum, default_value = "auto")]
        backend: BackendArg,

        /// Request lazy union of top-level objects
        #[arg(long)]
        lazy_union: bool,
    },

    /// Load the engine and report its features
    Probe,

    /// Serve the JSON-lines protocol on stdin/stdout
    Serve,

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        Reporter::report_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout belongs to results and the serve protocol
fn init_logging(verbose: bool) {
    let default = if verbose { "polyframe_render=debug" } else { "polyframe_render=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = RenderConfig::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => RenderConfig::load()?,
    };
    if let Some(assets) = &cli.assets {
        config.asset_dir = assets.clone();
    }

    match cli.command {
        Commands::Render {
            input,
            output,
            format,
            defines,
            project,
            libraries,
            timeout,
            backend,
            lazy_union,
        } => {
            let format = match format {
                Some(format) => format,
                None => output_format_from_path(&output)?,
            };
            let mut request = build_request(&input, project.as_deref(), format)?;
            for define in &defines {
                let (name, value) = parse_define(define)?;
                request = request.with_param(&name, value, None);
            }
            request.libraries = libraries.into_iter().map(LibraryRef::new).collect();
            request.timeout_ms = timeout.map(|secs| (secs * 1000.0) as u64);
            request.render_options = RenderOptions {
                backend: backend.into(),
                lazy_union,
            };
            render_command(&config, request, &input, &output, cli.verbose)
        }
        Commands::Probe => probe_command(&config),
        Commands::Serve => serve_command(config),
        Commands::Version => {
            println!("Polyframe Render v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn output_format_from_path(path: &Path) -> Result<OutputFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .context("Output file has no extension; pass --format")?;
    ext.parse::<OutputFormat>().map_err(anyhow::Error::msg)
}

/// `name=value`, with the value read as JSON when it parses as JSON
fn parse_define(define: &str) -> Result<(String, ParamValue)> {
    let Some((name, value)) = define.split_once('=') else {
        bail!("Invalid define '{}', expected NAME=VALUE", define);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid define '{}', empty name", define);
    }
    let value = serde_json::from_str::<ParamValue>(value.trim())
        .unwrap_or_else(|_| ParamValue::Text(value.to_string()));
    Ok((name.to_string(), value))
}

fn build_request(input: &Path, project: Option<&Path>, format: OutputFormat) -> Result<RenderRequest> {
    let request_id = format!("cli-{}", chrono::Utc::now().timestamp_millis());

    let Some(project) = project else {
        let source = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read input file: {:?}", input))?;
        return Ok(RenderRequest::new(request_id, source).with_format(format));
    };

    let mut files = BTreeMap::new();
    for entry in WalkDir::new(project).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(project)
            .context("Walked outside the project directory")?;
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read project file: {:?}", entry.path()))?;
        files.insert(logical_path(relative), FileContent::from(bytes));
    }

    let main = input
        .strip_prefix(project)
        .with_context(|| format!("{:?} is not inside project {:?}", input, project))?;

    let mut request = RenderRequest::new(request_id, "").with_format(format);
    request.main_file = Some(logical_path(main));
    request.files = files;
    Ok(request)
}

fn logical_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn render_command(
    config: &RenderConfig,
    request: RenderRequest,
    input: &Path,
    output: &Path,
    verbose: bool,
) -> Result<()> {
    let loader = ProcessEngineLoader::from_config(config)?;
    let (dispatcher, events) = Dispatcher::spawn(Box::new(loader), config.clone())?;
    let request_id = request.request_id.clone();
    dispatcher.send(HostRequest::Render(request));

    let pb = spinner();
    let mut outcome = None;
    for event in events.iter() {
        match event {
            HostEvent::Progress { message, percent, .. } => {
                pb.set_message(format!("{} ({}%)", message, percent));
            }
            HostEvent::Warning { message, .. } => pb.suspend(|| Reporter::report_warning(&message)),
            HostEvent::MemoryWarning(warning) => pb.suspend(|| {
                Reporter::report_warning(&format!(
                    "Engine memory at {:.1}% of limit",
                    warning.percent
                ))
            }),
            event if event.is_terminal() && event.request_id() == Some(request_id.as_str()) => {
                outcome = Some(event);
                break;
            }
            // Init failure arrives attributed to the render
            _ => {}
        }
    }
    pb.finish_and_clear();
    dispatcher.shutdown();

    let file = input.display().to_string();
    match outcome {
        Some(HostEvent::Complete {
            request_id,
            output: bytes,
            format,
            stats,
            timing,
            console_transcript,
            warnings,
        }) => {
            std::fs::write(output, &bytes)
                .with_context(|| format!("Failed to write output file: {:?}", output))?;
            let result = JobResult {
                request_id,
                output: bytes,
                format,
                stats,
                timing,
                transcript: console_transcript,
                warnings,
            };
            Reporter::report_result(&file, &output.display().to_string(), &result);
            Ok(())
        }
        Some(HostEvent::Error {
            code,
            message,
            details,
            console_transcript,
            needs_restart,
            ..
        }) => {
            let classification = ErrorClassification {
                code,
                message,
                raw: details,
                needs_restart,
            };
            Reporter::report_failure(&file, &classification, &console_transcript, verbose);
            bail!("Render failed: {}", classification.code)
        }
        _ => bail!("Render worker stopped without a result"),
    }
}

fn probe_command(config: &RenderConfig) -> Result<()> {
    let loader = ProcessEngineLoader::from_config(config)?;
    let pb = spinner();
    let session = Session::start(&loader, config, &mut |stage| pb.set_message(stage.message()))?;
    pb.finish_and_clear();

    for warning in session.integrity_warnings() {
        Reporter::report_warning(&format!("{}: {}", warning.artifact, warning.message));
    }
    for font in &session.fonts().missing {
        Reporter::report_warning(&format!("Font not found: {}", font));
    }
    Reporter::report_capabilities(
        &loader.executable().display().to_string(),
        session.capabilities(),
        session.init_duration(),
    );
    session.teardown();
    Reporter::success("Engine ready");
    Ok(())
}

fn serve_command(config: RenderConfig) -> Result<()> {
    let loader = ProcessEngineLoader::from_config(&config)?;
    let (dispatcher, events) = Dispatcher::spawn(Box::new(loader), config)?;
    let stdin = std::io::stdin();
    stdio::serve(dispatcher, events, stdin.lock(), std::io::stdout())?;
    Ok(())
}
