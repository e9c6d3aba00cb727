//! Dump the contents of a level's on-disk files.
//!
//! Usage:
//!   log_inspector <level.gldb> [--cell <index>] [--limit <n>]
//!   log_inspector <level.glvl>

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use galena_persist::changelog::{ChangeEntry, ChangeLogFile};
use galena_persist::snapshot::read_snapshot;

struct Options {
    path: PathBuf,
    cell: Option<u32>,
    limit: Option<usize>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut path = None;
    let mut cell = None;
    let mut limit = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cell" => {
                let value = args.next().ok_or("--cell requires an index")?;
                cell = Some(value.parse().map_err(|_| format!("bad cell index '{value}'"))?);
            }
            "--limit" => {
                let value = args.next().ok_or("--limit requires a count")?;
                limit = Some(value.parse().map_err(|_| format!("bad limit '{value}'"))?);
            }
            other if path.is_none() => path = Some(PathBuf::from(other)),
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }

    Ok(Options {
        path: path.ok_or("usage: log_inspector <file.gldb|file.glvl> [--cell <index>] [--limit <n>]")?,
        cell,
        limit,
    })
}

fn describe_entry(record: u64, entry: &ChangeEntry) {
    println!(
        "{record:>8}  t+{:<8}  cell {:>10}  {:>5} -> {:<5}  [{:?}]",
        entry.timestamp, entry.index, entry.old.0, entry.new.0, entry.flags
    );
}

fn inspect_log(options: &Options) -> io::Result<()> {
    let log = ChangeLogFile::open(&options.path)?;
    let total = log.record_count()?;
    println!("{}: {total} record(s)", options.path.display());

    let mut shown = 0usize;
    for (record, entry) in log.read_all()?.iter().enumerate() {
        if let Some(cell) = options.cell {
            if entry.index != cell {
                continue;
            }
        }
        describe_entry(record as u64, entry);
        shown += 1;
        if options.limit.is_some_and(|limit| shown >= limit) {
            println!("... truncated at {shown}");
            break;
        }
    }
    Ok(())
}

fn inspect_snapshot(path: &Path) -> io::Result<()> {
    match read_snapshot(path)? {
        Some((grid, log_records)) => {
            println!("{}: {:?}", path.display(), grid.dims());
            println!("  {} cell(s)", grid.dims().volume());
            println!("  {} extended side-table entr(ies)", grid.extended_len());
            println!("  accounts for {log_records} change log record(s)");
        }
        None => println!("{}: no snapshot", path.display()),
    }
    Ok(())
}

fn main() -> ExitCode {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let is_snapshot = options
        .path
        .extension()
        .is_some_and(|ext| ext == "glvl");
    let result = if is_snapshot {
        inspect_snapshot(&options.path)
    } else {
        inspect_log(&options)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {err}", options.path.display());
            ExitCode::FAILURE
        }
    }
}
