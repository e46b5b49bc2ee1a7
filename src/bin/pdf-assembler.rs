//! PDF Assembler CLI tool
//!
//! A command-line tool for merging PDFs and stamping a visual signature.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use glob::glob;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use pdf_assembler::date::{parse_date_expression, resolve_date};
use pdf_assembler::pdf::{
    format_file_size, parse_page_ranges, summarize, ImageFormat, PageSelection, RasterImage,
    SignatureStamp,
};
use pdf_assembler::pipeline::{Job, JobOutput, PageOverlay, SourceInput, Stage};
use pdf_assembler::EngineConfig;

/// PDF Assembler - Merge PDFs and stamp a signature
#[derive(Parser)]
#[command(name = "pdf-assembler")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Merge PDFs in order
    pdf-assembler merge -o merged.pdf cover.pdf \"chapters/*.pdf\"

    # Take pages 1-3 and 5 of one file, then all of another
    pdf-assembler merge -o out.pdf report.pdf:1-3,5 appendix.pdf

    # Stamp a signature on the last page
    pdf-assembler sign contract.pdf -o signed.pdf --image sig.png --name \"Jane Doe\" --page 4

    # Merge, then sign the first page
    pdf-assembler build -o packet.pdf --image sig.png --name \"Jane Doe\" *.pdf")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write streams uncompressed
    #[arg(long, global = true)]
    no_compress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge multiple PDF files into one
    Merge {
        /// Input PDF files (in order), each optionally followed by `:RANGES`
        /// such as `:1-3,5`. Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Stamp a signature image, signer name, and date onto one page
    Sign {
        /// Input PDF file
        input: PathBuf,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        signature: SignatureArgs,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Merge PDFs and sign the result in one step
    Build {
        /// Input PDF files (in order), with optional `:RANGES`
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        signature: SignatureArgs,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Show page counts and sizes of PDF files
    Info {
        /// PDF files to inspect
        #[arg(required = true)]
        inputs: Vec<String>,
    },
}

#[derive(clap::Args)]
struct SignatureArgs {
    /// Signature image (PNG or JPEG)
    #[arg(long)]
    image: PathBuf,

    /// Signer name shown under the signature
    #[arg(long)]
    name: String,

    /// Page to sign, 1-based
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Signing date (e.g., "today", "yesterday", "2026-10-16")
    #[arg(long, default_value = "today")]
    date: String,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.no_compress {
        config.compress = false;
    }

    match cli.command {
        Commands::Merge { inputs, output, open } => cmd_merge(&config, inputs, &output, open),
        Commands::Sign {
            input,
            output,
            signature,
            open,
        } => {
            let inputs = vec![input.to_string_lossy().into_owned()];
            cmd_build(&config, inputs, &output, &signature, open)
        }
        Commands::Build {
            inputs,
            output,
            signature,
            open,
        } => cmd_build(&config, inputs, &output, &signature, open),
        Commands::Info { inputs } => cmd_info(inputs),
    }
}

/// Split `path:ranges` into its parts; a colon that is not followed by a
/// valid range list is part of the path
fn split_ranges(input: &str) -> (&str, PageSelection) {
    if let Some((path, ranges)) = input.rsplit_once(':') {
        if !path.is_empty() && !ranges.is_empty() {
            if let Ok(selection) = parse_page_ranges(ranges) {
                return (path, selection);
            }
        }
    }
    (input, PageSelection::All)
}

/// Expand glob patterns in input paths
///
/// Inputs keep the order given; matches of one pattern are sorted.
fn expand_globs(patterns: &[String]) -> Result<Vec<(PathBuf, PageSelection)>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        let (pattern, selection) = split_ranges(pattern);
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched: Vec<PathBuf> = Vec::new();
            for entry in glob(pattern).with_context(|| format!("bad glob pattern {pattern}"))? {
                match entry {
                    Ok(path) => matched.push(path),
                    Err(e) => warn!(%pattern, error = %e, "glob error"),
                }
            }
            if matched.is_empty() {
                bail!("No files matched pattern: {pattern}");
            }
            matched.sort();
            paths.extend(matched.into_iter().map(|path| (path, selection.clone())));
        } else {
            paths.push((PathBuf::from(pattern), selection));
        }
    }

    Ok(paths)
}

fn read_sources(inputs: &[String]) -> Result<Vec<SourceInput>> {
    expand_globs(inputs)?
        .into_iter()
        .map(|(path, selection)| {
            if !path.exists() {
                bail!("Input file not found: {}", path.display());
            }
            let bytes =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            Ok(SourceInput::new(path.display().to_string(), bytes).with_pages(selection))
        })
        .collect()
}

/// Decode a signature image for embedding
///
/// JPEG data is embedded as-is. Anything else is decoded to RGB with a
/// separate alpha plane, dropped when fully opaque.
fn load_signature_image(path: &Path) -> Result<RasterImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("unrecognized image format: {}", path.display()))?;
    let decoded = image::load_from_memory_with_format(&bytes, format)
        .with_context(|| format!("decoding {}", path.display()))?;
    let (width, height) = (decoded.width(), decoded.height());

    if format == image::ImageFormat::Jpeg {
        let format = match decoded.color().channel_count() {
            1 => ImageFormat::JpegGray,
            3 => ImageFormat::JpegRgb,
            n => bail!("unsupported JPEG with {n} channels: {}", path.display()),
        };
        return Ok(RasterImage {
            data: bytes,
            width,
            height,
            format,
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut data = Vec::with_capacity(rgba.as_raw().len() / 4 * 3);
    let mut alpha = Vec::with_capacity(rgba.as_raw().len() / 4);
    for pixel in rgba.pixels() {
        data.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }
    let alpha = if alpha.iter().all(|&a| a == u8::MAX) {
        None
    } else {
        Some(alpha)
    };
    debug!(width, height, alpha = alpha.is_some(), "decoded signature image");
    Ok(RasterImage {
        data,
        width,
        height,
        format: ImageFormat::Rgb8,
        alpha,
    })
}

fn run_job(mut job: Job) -> Result<JobOutput> {
    while !job.stage().is_terminal() {
        let stage = job.step()?.clone();
        match stage {
            Stage::Parsing(i) => {
                let snapshot = job.snapshot();
                eprintln!(
                    "  [{}/{}] {} pages so far",
                    i + 1,
                    snapshot.sources_total,
                    snapshot.pages_copied
                );
            }
            Stage::Overlaying(_) => eprintln!("  Stamped signature"),
            _ => {}
        }
    }
    Ok(job.into_output()?)
}

fn write_output(output: &Path, result: &JobOutput, open: bool) -> Result<()> {
    std::fs::write(output, &result.bytes)
        .with_context(|| format!("writing {}", output.display()))?;

    for (name, reason) in &result.summary.rejected {
        eprintln!("Skipped {name}: {reason}");
    }
    eprintln!(
        "Wrote {} pages ({}) to: {}",
        result.page_count,
        format_file_size(result.bytes.len() as u64),
        output.display()
    );

    if open {
        open_file(output)?;
    }
    Ok(())
}

/// Open a file with the system default application
fn open_file(path: &Path) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(path).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(path).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", &path.display().to_string()])
            .spawn()?;
    }
    Ok(())
}

/// Merge multiple PDFs into one
fn cmd_merge(config: &EngineConfig, inputs: Vec<String>, output: &Path, open: bool) -> Result<()> {
    let sources = read_sources(&inputs)?;
    eprintln!("Merging {} PDF files...", sources.len());

    let result = run_job(Job::new(sources).with_config(config))?;
    write_output(output, &result, open)
}

/// Merge PDFs and stamp the signature on one page of the result
fn cmd_build(
    config: &EngineConfig,
    inputs: Vec<String>,
    output: &Path,
    signature: &SignatureArgs,
    open: bool,
) -> Result<()> {
    if signature.page == 0 {
        bail!("--page is 1-based");
    }
    let date = resolve_date(&parse_date_expression(&signature.date)?)?;
    let image = load_signature_image(&signature.image)?;
    let stamp = SignatureStamp::new(signature.name.clone(), date, image)
        .with_layout(config.stamp.clone());

    let sources = read_sources(&inputs)?;
    eprintln!("Assembling {} PDF files...", sources.len());

    let job = Job::new(sources)
        .with_config(config)
        .with_overlay(PageOverlay::Stamp {
            page_index: signature.page - 1,
            stamp,
        });
    let result = run_job(job)?;
    write_output(output, &result, open)
}

/// Show page counts and sizes; unreadable files are listed, not fatal
fn cmd_info(inputs: Vec<String>) -> Result<()> {
    let mut buffers = Vec::new();
    for (path, _) in expand_globs(&inputs)? {
        match std::fs::read(&path) {
            Ok(bytes) => buffers.push((path.display().to_string(), bytes)),
            Err(e) => eprintln!("{}: {e}", path.display()),
        }
    }

    let summary = summarize(
        buffers
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
    );
    for source in &summary.sources {
        println!(
            "{}: {} pages, {}",
            source.name,
            source.page_count,
            source.size_label()
        );
    }
    for (name, reason) in &summary.rejected {
        println!("{name}: unreadable ({reason})");
    }
    println!(
        "Total: {} pages, {} in {} files",
        summary.total_pages(),
        summary.total_size_label(),
        summary.sources.len()
    );
    Ok(())
}
