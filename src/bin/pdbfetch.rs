use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pdbfetch::domain::OriginalPlacement;
use pdbfetch::error::PdbFetchError;
use pdbfetch::layout::Layout;
use pdbfetch::rcsb::RcsbHttpClient;
use pdbfetch::scheduler::Scheduler;
use pdbfetch::sink::TracingSink;
use pdbfetch::uniprot::UniprotHttpClient;

#[derive(Parser)]
#[command(name = "pdbfetch")]
#[command(about = "Batch PDB structure downloader with per-chain splitting")]
#[command(version, author)]
struct Cli {
    /// Entry list file; standard input when omitted.
    #[arg(short, long)]
    list: Option<Utf8PathBuf>,

    /// Output directory root.
    #[arg(short, long, default_value = ".")]
    out: Utf8PathBuf,

    /// Split each structure into per-chain fragment files.
    #[arg(short, long)]
    split: bool,

    /// Drop the UniProt directory level from output paths.
    #[arg(short, long)]
    flatten: bool,

    /// Where the un-split source file goes when splitting.
    #[arg(short = 'O', long, value_enum, default_value = "inplace")]
    original: OriginalPlacement,

    /// Overwrite files that already exist.
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Maximum concurrent downloads.
    #[arg(long, default_value_t = default_downloads())]
    downloads: usize,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn default_downloads() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PdbFetchError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PdbFetchError) -> u8 {
    match error {
        PdbFetchError::InvalidPdbId(_)
        | PdbFetchError::InvalidUniprotId(_)
        | PdbFetchError::InvalidLabel(_) => 2,
        PdbFetchError::RcsbHttp(_)
        | PdbFetchError::RcsbStatus { .. }
        | PdbFetchError::UniprotHttp(_)
        | PdbFetchError::UniprotStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let started = Instant::now();

    let input: Box<dyn BufRead> = match &cli.list {
        Some(path) => {
            let file = File::open(path.as_std_path())
                .map_err(|err| PdbFetchError::Filesystem(format!("open {path}: {err}")))
                .into_diagnostic()?;
            Box::new(BufReader::new(file))
        }
        None => {
            if io::stdin().is_terminal() {
                eprintln!("Reading entries from standard input; press Ctrl+D to finish.");
            }
            Box::new(BufReader::new(io::stdin()))
        }
    };

    // Scratch space for originals under delete placement; removed on drop.
    let scratch = tempfile::tempdir().into_diagnostic()?;
    let scratch_dir = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf())
        .map_err(|path| miette::Report::msg(format!("non-UTF-8 temp path: {}", path.display())))?;

    let layout = Layout {
        out_root: cli.out.clone(),
        split: cli.split,
        flatten: cli.flatten,
        original: cli.original,
        scratch_dir,
    };

    let timeout = Duration::from_secs(cli.timeout);
    let archive = RcsbHttpClient::new(timeout).into_diagnostic()?;
    let uniprot = UniprotHttpClient::new(timeout).into_diagnostic()?;

    let scheduler = Scheduler::new(
        layout,
        cli.overwrite,
        cli.downloads,
        Arc::new(archive),
        uniprot,
        Arc::new(TracingSink),
    );
    scheduler.run(input).into_diagnostic()?;

    tracing::info!("Done in {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}
