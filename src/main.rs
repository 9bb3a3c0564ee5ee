//! Mach-O Inspect CLI
//!
//! Command-line tool for dumping the structure and code signature of
//! Mach-O images and fat containers.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use macho_inspect::codesign::{BlobOutcome, Entitlements};
use macho_inspect::formats::FatMember;
use macho_inspect::formats::image::file_type_name;
use macho_inspect::{DecodeOptions, Decoder, Image, Introspect, MachFile};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Structural decoder for Mach-O files and their code signatures.
///
/// Decodes images, fat containers, load commands, code directories,
/// requirements, CMS signer certificates and entitlements.
#[derive(Parser, Debug)]
#[command(name = "macho-inspect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file(s) to decode
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Decode mode
    #[arg(short, long, default_value = "normal", env = "MACHO_INSPECT_MODE")]
    mode: DecodeMode,

    /// Only show fat members of this architecture (e.g. arm64)
    #[arg(short, long)]
    arch: Option<String>,

    /// Print every entitlement value
    #[arg(short, long)]
    entitlements: bool,

    /// Verbose output (decoder trace on stderr)
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long)]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Human,
    /// Full introspection tree with byte ranges
    Tree,
    /// JSON output
    Json,
}

/// Decode mode options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DecodeMode {
    /// Default caps, unknown records kept as raw bytes
    Normal,
    /// Unknown record tags are fatal
    Strict,
    /// Header-level only: no deferred payloads, tight caps
    Lenient,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("macho_inspect=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("macho_inspect=error"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = match args.mode {
        DecodeMode::Normal => DecodeOptions::new(),
        DecodeMode::Strict => DecodeOptions::strict(),
        DecodeMode::Lenient => DecodeOptions::lenient(),
    };
    let decoder = Decoder::with_options(options);

    let mut success = true;
    for path in &args.files {
        if let Err(e) = inspect_file(path, &decoder, &args) {
            if !args.quiet {
                eprintln!("Error decoding {}: {e:#}", path.display());
            }
            success = false;
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn inspect_file(path: &Path, decoder: &Decoder, args: &Args) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file = decoder
        .decode(&data)
        .with_context(|| format!("failed to decode {}", path.display()))?;

    match args.format {
        OutputFormat::Human => print_human(&file, &data, path, args),
        OutputFormat::Tree => print!("{}", file.to_node().render()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&file)?),
    }
    Ok(())
}

fn selected<'f>(file: &'f MachFile, args: &Args) -> Vec<&'f Image> {
    file.images()
        .into_iter()
        .filter(|image| args.arch.as_deref().map_or(true, |arch| image.arch() == arch))
        .collect()
}

fn print_human(file: &MachFile, data: &[u8], path: &Path, args: &Args) {
    let images = selected(file, args);
    if args.quiet {
        let archs: Vec<_> = images.iter().map(|i| i.arch()).collect();
        println!("{}: {}", path.display(), archs.join(" "));
        return;
    }

    println!("File: {}", path.display());
    if let MachFile::Fat(fat) = file {
        println!("  Fat entries: {}", fat.entries.len());
        for entry in fat.skipped() {
            if let FatMember::Skipped { kind, reason } = &entry.member {
                println!("  Skipped:     arch[{}] {} ({}: {reason})", entry.index, entry.arch(), kind.name());
            }
        }
    }

    for image in images {
        print_image(image, data, args);
    }
    println!();
}

fn print_image(image: &Image, data: &[u8], args: &Args) {
    println!();
    println!("  Arch:        {} ({}, {}-endian)", image.arch(), image.width, image.endianness);
    println!("  Type:        {}", file_type_name(image.header.filetype));
    println!("  Records:     {}", image.records.len());
    if let Some(uuid) = image.uuid() {
        println!("  UUID:        {uuid}");
    }

    let Some(signature) = image.code_signature() else {
        println!("  Signature:   none");
        return;
    };

    if let Some(cd) = signature.code_directory() {
        println!("  Identifier:  {}", cd.identifier);
        if let Some(team) = &cd.team_id {
            println!("  Team ID:     {team}");
        }
        println!("  CD version:  {:#x}", cd.version);
        println!("  CD flags:    {}", cd.flags);
        println!("  Hash type:   {}", cd.hash_type);
        println!("  Code slots:  {} x {} bytes", cd.code_slots.len(), cd.page_size());
        print_digests(image, data);
    }
    if let Some(requirements) = signature.requirements() {
        for line in requirements.text().lines() {
            println!("  Requirement: {line}");
        }
    }
    match signature.signature() {
        Some(blob) if blob.is_adhoc() => println!("  CMS:         ad-hoc (empty)"),
        Some(blob) => {
            if let Some(cms) = &blob.cms {
                for cert in &cms.certificates {
                    println!(
                        "  Certificate: {}",
                        cert.subject_cn.as_deref().unwrap_or("<no common name>")
                    );
                }
                for signer in &cms.signers {
                    if let Some(time) = &signer.signing_time {
                        println!("  Signed at:   {time}");
                    }
                }
            }
        }
        None => println!("  CMS:         none"),
    }

    for entitlements in [signature.entitlements(), signature.der_entitlements()].into_iter().flatten() {
        print_entitlements(entitlements, args.entitlements);
    }

    for entry in signature.skipped() {
        if let BlobOutcome::Skipped { reason } = &entry.outcome {
            println!("  Skipped:     {} ({reason})", entry.slot_name());
        }
    }
}

#[cfg(feature = "digest")]
fn print_digests(image: &Image, data: &[u8]) {
    use macho_inspect::codesign::PageStatus;

    if let Some(cdhash) = image.code_directory().and_then(|cd| cd.cdhash(data)) {
        println!("  CDHash:      {}", hex::encode(cdhash));
    }
    let Some(checks) = image.check_pages(data) else {
        return;
    };
    let count = |status: PageStatus| checks.iter().filter(|c| c.status == status).count();
    println!(
        "  Pages:       {} match, {} mismatch, {} out of bounds, {} unsupported",
        count(PageStatus::Match),
        count(PageStatus::Mismatch),
        count(PageStatus::OutOfBounds),
        count(PageStatus::Unsupported)
    );
}

#[cfg(not(feature = "digest"))]
fn print_digests(_image: &Image, _data: &[u8]) {}

fn print_entitlements(entitlements: &Entitlements, values: bool) {
    println!(
        "  Entitlements ({:?}): {} key(s)",
        entitlements.format,
        entitlements.entries.len()
    );
    for entry in &entitlements.entries {
        if values {
            println!("    {} = {}", entry.key, entry.value);
        } else {
            println!("    {}", entry.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["macho-inspect", "test.bin"]).unwrap();
        assert_eq!(args.files.len(), 1);
        assert!(!args.verbose);
        assert!(matches!(args.mode, DecodeMode::Normal));
    }

    #[test]
    fn test_format_and_mode() {
        let args = Args::try_parse_from(["macho-inspect", "-f", "json", "-m", "strict", "a.bin", "b.bin"]).unwrap();
        assert!(matches!(args.format, OutputFormat::Json));
        assert!(matches!(args.mode, DecodeMode::Strict));
        assert_eq!(args.files.len(), 2);
    }
}
