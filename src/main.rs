//! Main entry point for the zippr CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use zippr::cli::{Command, GenerateArgs, ListArgs, UnzipArgs, ZipArgs};
use zippr::generate::parse_size;
use zippr::{
    Cli, CompressionMethod, DuplicatePolicy, EntryFilter, FillPolicy, LocalFileReader,
    OverwritePolicy, UnzipOptions, ZipError, ZipExtractor, ZipFileEntry, ZipMode, ZipOptions,
};

/// Application entry point.
///
/// Archive work is blocking, so each command runs on tokio's blocking pool.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let quiet = match &cli.command {
        Command::Unzip(args) => args.is_quiet(),
        Command::Zip(args) => args.quiet,
        _ => false,
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if quiet { "error" } else { "warn" }),
    )
    .init();

    let outcome = tokio::task::spawn_blocking(move || run(cli.command)).await;
    let result = match outcome {
        Ok(result) => result,
        Err(join_error) => Err(join_error.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("zippr: {:#}", err);
            let code = err
                .downcast_ref::<ZipError>()
                .map(|e| e.kind().exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::List(args) => list_files(&args),
        Command::Zip(args) => zip_files(&args),
        Command::Unzip(args) if args.pipe => pipe_files(&args),
        Command::Unzip(args) => unzip_files(&args),
        Command::Generate(args) => generate_file(&args),
    }
}

fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// List files in the ZIP archive, either names only or as a table with
/// size, compression ratio and timestamps.
fn list_files(args: &ListArgs) -> Result<()> {
    let entries = zippr::list(Path::new(&args.archive))
        .with_context(|| format!("cannot list {}", args.archive))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if !args.verbose {
        for entry in &entries {
            writeln!(out, "{}", entry.file_name)?;
        }
        return Ok(());
    }

    writeln!(
        out,
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    )?;
    writeln!(out, "{}", "-".repeat(70))?;

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        writeln!(
            out,
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        )?;

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    writeln!(out, "{}", "-".repeat(70))?;
    writeln!(
        out,
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    )?;
    Ok(())
}

fn zip_files(args: &ZipArgs) -> Result<()> {
    let options = ZipOptions {
        method: if args.store {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        },
        level: args.level,
        append: args.append,
        mode: if args.cherry_pick {
            ZipMode::CherryPick
        } else {
            ZipMode::Mirror
        },
        strip_prefix: args.strip_prefix.as_ref().map(PathBuf::from),
        recurse: !args.no_recurse,
        duplicates: if args.allow_duplicates {
            DuplicatePolicy::Allow
        } else {
            DuplicatePolicy::Reject
        },
        follow_symlinks: args.follow_symlinks,
    };

    let written = zippr::zip(Path::new(&args.archive), &args.paths, &options)
        .with_context(|| format!("cannot write {}", args.archive))?;
    if !args.quiet {
        for entry in &written {
            let action = match entry.compression_method {
                CompressionMethod::Deflate => format!(
                    "deflated {}",
                    ratio(entry.compressed_size, entry.uncompressed_size).trim()
                ),
                _ => "stored 0%".to_string(),
            };
            eprintln!("  adding: {} ({})", entry.file_name, action);
        }
    }
    Ok(())
}

fn unzip_files(args: &UnzipArgs) -> Result<()> {
    let overwrite = if args.strict {
        OverwritePolicy::Strict
    } else if args.overwrite {
        OverwritePolicy::Always
    } else {
        // Without -o existing files are kept, as with -n.
        OverwritePolicy::Skip
    };
    let options = UnzipOptions {
        filter: EntryFilter::new(args.files.clone(), args.exclude.clone()),
        overwrite,
        junk_paths: args.junk_paths,
        restore_metadata: !args.no_metadata,
    };
    let dest = args.extract_dir.as_deref().unwrap_or(".");

    if !args.is_very_quiet() {
        eprintln!("Archive:  {}", args.archive);
    }
    let extracted = zippr::unzip(Path::new(&args.archive), Path::new(dest), &options)
        .with_context(|| format!("cannot extract {}", args.archive))?;
    if !args.is_quiet() {
        for path in &extracted {
            eprintln!("  inflating: {}", path.display());
        }
    }
    Ok(())
}

/// Write matching entries to stdout. Directory entries are skipped.
fn pipe_files(args: &UnzipArgs) -> Result<()> {
    let reader = LocalFileReader::new(Path::new(&args.archive))
        .map_err(|e| ZipError::from_source_io(e, &args.archive))?;
    let extractor = ZipExtractor::open(reader)?;
    let filter = EntryFilter::new(args.files.clone(), args.exclude.clone());

    let selected: Vec<&ZipFileEntry> = extractor
        .list_files()?
        .iter()
        .filter(|e| !e.is_directory && filter.matches(&e.file_name))
        .collect();

    let multiple_files = selected.len() > 1;
    for entry in selected {
        if multiple_files {
            let stdout = std::io::stdout();
            writeln!(stdout.lock(), "--- {} ---", entry.file_name)?;
        }
        extractor.extract_to_stdout(entry)?;
    }
    extractor.close()?;
    Ok(())
}

fn generate_file(args: &GenerateArgs) -> Result<()> {
    let size = parse_size(&args.size)?;
    let fill = match (&args.pattern, args.seed) {
        (Some(pattern), _) => FillPolicy::Pattern(pattern.as_bytes().to_vec()),
        (None, Some(seed)) => FillPolicy::Random { seed },
        (None, None) => FillPolicy::Zeros,
    };
    zippr::generate(Path::new(&args.path), size, &fill)
        .with_context(|| format!("cannot generate {}", args.path))?;
    Ok(())
}
