use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zimserve::archive::Entry;
use zimserve::zim::{Compression, ReaderOptions, WriterOptions, ZimReader, ZimWriter};
use zimserve::{ArchiveReader, ArchiveRegistry, ByteRange, ContentFetcher, ContentResolver};

#[derive(Parser)]
#[command(name = "zimserve", about = "Serve pages and byte ranges out of ZIM archives")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Decoded clusters cached per archive
    #[arg(long, global = true, default_value = "16")]
    cache: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print archive metadata as JSON
    Info {
        input: PathBuf,
    },
    /// List every entry in path order
    List {
        input: PathBuf,
    },
    /// Follow redirects from a content path
    Resolve {
        input: PathBuf,
        path:  String,
    },
    /// Print the main page path
    Main {
        input: PathBuf,
    },
    /// Print a random HTML page path
    Random {
        input: PathBuf,
    },
    /// Write an entry's payload (or a slice of it) to stdout or a file
    Get {
        input: PathBuf,
        path:  String,
        #[arg(long, default_value = "0")]
        start: u64,
        #[arg(long)]
        end:   Option<u64>,
        /// HTTP Range value, e.g. bytes=0-1023
        #[arg(long, conflicts_with_all = ["start", "end"])]
        range: Option<ByteRange>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify the archive's MD5 checksum
    Check {
        input: PathBuf,
    },
    /// Build an archive from files
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Cluster compression: zstd (default), xz, none
        #[arg(short, long, default_value = "zstd")]
        compression: String,
        /// Uncompressed cluster size in KiB
        #[arg(long, default_value = "1024")]
        cluster_size: usize,
        /// Path of the main page
        #[arg(long)]
        main: Option<String>,
        /// Redirect as FROM=TO
        #[arg(long, value_parser = parse_pair)]
        redirect: Vec<(String, String)>,
        /// Metadata as KEY=VALUE
        #[arg(long, value_parser = parse_pair)]
        meta: Vec<(String, String)>,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = ArchiveRegistry::init_global(ReaderOptions { cluster_cache_size: cli.cache });
    let resolver = ContentResolver::new(registry);
    let fetcher  = ContentFetcher::new(registry);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let id = registry.open(&input)?;
            let meta = registry.metadata(id)?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let id = registry.open(&input)?;
            let reader = registry.reader(id)?;
            for index in 0..reader.entry_count() {
                match reader.entry_at(index)? {
                    (path, Entry::Content(c)) => println!("{:<48} {}", path, c.mime_type),
                    (path, Entry::Redirect(target)) => println!("{:<48} → {}", path, target),
                    (path, Entry::Absent) => println!("{:<48} (unused)", path),
                }
            }
        }

        // ── Resolve / Main / Random ──────────────────────────────────────────
        Commands::Resolve { input, path } => {
            let id = registry.open(&input)?;
            println!("{}", resolver.resolve(id, &path)?);
        }
        Commands::Main { input } => {
            let id = registry.open(&input)?;
            println!("{}", resolver.main_page(id)?);
        }
        Commands::Random { input } => {
            let id = registry.open(&input)?;
            println!("{}", resolver.random_page(id)?);
        }

        // ── Get ──────────────────────────────────────────────────────────────
        Commands::Get { input, path, start, end, range, output } => {
            let id = registry.open(&input)?;
            let canonical = resolver.resolve(id, &path)?;
            let content = match range {
                Some(range) => fetcher.fetch_range(id, &canonical, range)?,
                None        => fetcher.fetch(id, &canonical, start, end.unwrap_or(u64::MAX))?,
            };
            eprintln!("{}  {}  {}", canonical, content.mime_type, content.content_range());
            match output {
                Some(out) => std::fs::write(out, &content.data)?,
                None      => std::io::stdout().lock().write_all(&content.data)?,
            }
        }

        // ── Check ────────────────────────────────────────────────────────────
        Commands::Check { input } => {
            ZimReader::open(&input)?.verify_checksum()?;
            println!("{}: checksum OK", input.display());
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, compression, cluster_size, main, redirect, meta, input } => {
            let opts = WriterOptions {
                compression: parse_compression(&compression),
                cluster_size: cluster_size * 1024,
            };
            let mut w = ZimWriter::create(&output, opts)?;
            for path in &input {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("not a file: {}", path.display()))?;
                w.add_content(&name, guess_mime(path), &std::fs::read(path)?)?;
                println!("  packed  {}", path.display());
            }
            for (from, to) in &redirect {
                w.add_redirect(from, to)?;
            }
            for (key, value) in &meta {
                w.add_metadata(key, value)?;
            }
            if let Some(main) = &main {
                w.set_main_page(main);
            }
            w.finish()?;
            println!("Created: {}", output.display());
        }
    }

    registry.shutdown();
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

fn parse_compression(s: &str) -> Compression {
    Compression::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown compression '{}', defaulting to zstd", s);
        Compression::Zstd
    })
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css"          => "text/css",
        "js"           => "application/javascript",
        "json"         => "application/json",
        "txt"          => "text/plain",
        "svg"          => "image/svg+xml",
        "png"          => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "mp4"          => "video/mp4",
        "webm"         => "video/webm",
        _              => "application/octet-stream",
    }
}
