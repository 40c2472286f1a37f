use clap::{Parser, Subcommand};
use n64w::checksum::{stream_crc, CrcStatus};
use n64w::debug::{debug_segments, DEFAULT_CHUNKS};
use n64w::export::{expected_padding, ExportRecord};
use n64w::{validate_manifest, write_pair, Manifest, ManifestVersion, PackOptions, Segment, ValidateOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "n64w", version, about = "Pack and validate N64W weight blobs and manifests")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into an aligned blob plus manifest
    Pack {
        /// Blob output path
        #[arg(short, long)]
        output: PathBuf,
        /// Manifest output path
        #[arg(short, long)]
        manifest: PathBuf,
        /// Segment alignment in bytes (power of two)
        #[arg(short, long, default_value = "64")]
        align: u16,
        /// Write a version-1 manifest (no CRC32 per entry)
        #[arg(long)]
        v1: bool,
        /// Also write a JSON export record to this path
        #[arg(long)]
        record: Option<PathBuf>,
        /// Inputs as PATH or NAME=PATH, packed in the order given
        #[arg(required = true, num_args = 1..)]
        input: Vec<String>,
    },
    /// Check a blob against its manifest
    Validate {
        blob:     PathBuf,
        manifest: PathBuf,
        /// Check alignment, bounds and overlap only
        #[arg(long)]
        no_crc: bool,
    },
    /// List manifest entries
    List {
        manifest: PathBuf,
    },
    /// Show manifest metadata and per-entry CRC status
    Info {
        blob:     PathBuf,
        manifest: PathBuf,
    },
    /// Locate a named segment, optionally extracting its bytes
    Find {
        blob:     PathBuf,
        manifest: PathBuf,
        name:     String,
        #[arg(short, long)]
        extract:  Option<PathBuf>,
    },
    /// Write a deterministic debug blob + v2 manifest
    DebugWeights {
        #[arg(long, default_value = "assets")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNKS)]
        chunks: usize,
        /// Chunk size in KiB
        #[arg(long, default_value = "64")]
        chunk_kb: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, manifest, align, v1, record, input } => {
            let segments = input.iter().map(|spec| read_segment(spec)).collect::<Result<Vec<_>, _>>()?;
            let opts = PackOptions {
                align,
                version: if v1 { ManifestVersion::V1 } else { ManifestVersion::V2 },
            };
            let man = write_pair(&output, &manifest, &segments, &opts)?;
            for e in man.entries() {
                println!("  packed  {:<32} off={:<10} size={}", e.name(), e.entry.offset, e.entry.size);
            }
            if let Some(record_path) = record {
                let blob = std::fs::read(&output)?;
                let rec = ExportRecord::describe(&output, &manifest, &man, &blob);
                std::fs::write(&record_path, rec.to_bytes()?)?;
                println!("Record:  {}", record_path.display());
            }
            println!("Created: {} + {}", output.display(), manifest.display());
        }

        // ── Validate ─────────────────────────────────────────────────────────
        Commands::Validate { blob, manifest, no_crc } => {
            let opts = ValidateOptions { verify_checksum: !no_crc };
            let count = n64w::validate_files(&blob, &manifest, &opts)?;
            println!("OK: {count} entries validated");
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { manifest } => {
            let man = read_manifest(&manifest)?;
            println!("Manifest: {} ({}, align {})", manifest.display(), man.version(), man.align);
            println!("{:>4}  {:<32} {:>10} {:>10}  CRC32", "#", "Name", "Offset", "Size");
            for e in man.entries() {
                let crc = e.crc32.map(|c| format!("{c:08X}")).unwrap_or_else(|| "-".into());
                println!("{:>4}  {:<32} {:>10} {:>10}  {}", e.index, e.name(), e.entry.offset, e.entry.size, crc);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { blob, manifest } => {
            let man = read_manifest(&manifest)?;
            let blob_bytes = std::fs::read(&blob)?;
            let payload = man.payload_bytes();

            println!("── N64W pair ────────────────────────────────────────────");
            println!("  Blob           {} ({} B)", blob.display(), blob_bytes.len());
            println!("  Manifest       {}", manifest.display());
            println!("  Version        {}", man.version());
            println!("  Align          {}", man.align);
            println!("  Entries        {}", man.len());
            println!("  Payload        {payload} B");
            println!("  Padding        {} B (packer layout: {} B)",
                (blob_bytes.len() as u64).saturating_sub(payload),
                expected_padding(&man));

            let report = stream_crc(&blob_bytes, &man)?;
            for e in &report.entries {
                let status = match e.status {
                    CrcStatus::Verified              => "verified".to_string(),
                    CrcStatus::Mismatch { expected } => format!("MISMATCH expected={expected:08X}"),
                    CrcStatus::Unrecorded            => "(no ref)".to_string(),
                };
                println!("  [{:02}] {:<24} CRC={:08X} {}", e.index, e.name, e.computed, status);
            }
            println!("  Final CRC32    {:08X}", report.combined);

            let structural = validate_manifest(&blob_bytes, &man, &ValidateOptions { verify_checksum: false });
            match structural {
                Ok(_)  => println!("  Layout         OK"),
                Err(e) => println!("  Layout         FAIL ({e})"),
            }
        }

        // ── Find ─────────────────────────────────────────────────────────────
        Commands::Find { blob, manifest, name, extract } => {
            let man = read_manifest(&manifest)?;
            let e = man.find(&name).ok_or_else(|| format!("no entry named `{name}`"))?;
            println!("{} off={} size={} end={}", e.name(), e.entry.offset, e.entry.size, e.entry.end());
            if let Some(dest) = extract {
                let blob_bytes = std::fs::read(&blob)?;
                let data = e.entry.slice(&blob_bytes)
                    .ok_or_else(|| format!("`{name}` lies outside {}", blob.display()))?;
                std::fs::write(&dest, data)?;
                println!("Extracted {} B → {}", data.len(), dest.display());
            }
        }

        // ── DebugWeights ─────────────────────────────────────────────────────
        Commands::DebugWeights { out_dir, chunks, chunk_kb } => {
            std::fs::create_dir_all(&out_dir)?;
            let blob = out_dir.join("weights.bin");
            let manifest = out_dir.join("weights.manifest.bin");
            let segments = debug_segments(chunks, chunk_kb * 1024);
            write_pair(&blob, &manifest, &segments, &PackOptions::default())?;
            println!("[OK] debug weights → {} + {}", blob.display(), manifest.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// `NAME=PATH` or bare `PATH`, where the name defaults to the file name.
fn read_segment(spec: &str) -> Result<Segment, Box<dyn std::error::Error>> {
    let (name, path) = match spec.split_once('=') {
        Some((name, path)) if !name.is_empty() => (name.to_owned(), PathBuf::from(path)),
        _ => {
            let path = PathBuf::from(spec);
            let name = path.file_name()
                .ok_or_else(|| format!("cannot derive a segment name from `{spec}`"))?
                .to_string_lossy()
                .into_owned();
            (name, path)
        }
    };
    let bytes = std::fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(Segment::new(name, bytes))
}

fn read_manifest(path: &Path) -> Result<Manifest, Box<dyn std::error::Error>> {
    Ok(Manifest::from_bytes(&std::fs::read(path)?)?)
}
