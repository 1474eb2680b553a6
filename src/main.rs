//! `fat16-tool`: operate on a FAT16 disk image from the command line.
#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]

use fat16::{
    Fat16Fs,
    fs::{
        FileError, FileSystem, FileType, Path,
        fat::{FatError, bs::BootSector},
    },
};
use image::ImageFile;
use std::{
    io::{self, Read, Write},
    process::ExitCode,
};
use thiserror::Error;

mod image;
mod logging;

const USAGE: &str = "\
usage: fat16-tool <image> <command> [args]

commands:
  format <sectors>        create a fresh FAT16 image of <sectors> 512-byte sectors
  ls [path]               list a directory
  mkdir <path>            create a directory
  rmdir <path>            remove an empty directory
  touch <path>            create an empty file
  rm <path>               remove a file
  write <path> <offset>   write stdin into a file, creating it if needed
  cat <path>              print a file
  truncate <path> <size>  set the size of a file
  stat <path>             show the size and type of an entry
  fsck [--repair]         check the volume, optionally fixing what can be fixed

environment:
  FAT16_LOG               error, warn, info, debug or trace (default: warn)";

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Host(#[from] io::Error),
    #[error("{0}")]
    Fs(#[from] FileError),
    #[error("volume has {0} problem(s)")]
    Inconsistent(usize),
}

impl From<FatError> for CliError {
    fn from(error: FatError) -> Self {
        Self::Fs(error.into())
    }
}

impl CliError {
    /// Exit status: the errno of a failed operation, 1 for usage errors.
    fn exit_code(&self) -> u8 {
        let code = match self {
            Self::Usage(_) | Self::Inconsistent(_) => 1,
            Self::Host(_) => FileError::Io.errno(),
            Self::Fs(error) => error.errno(),
        };
        u8::try_from(code.unsigned_abs()).unwrap_or(1)
    }
}

type CliResult<T> = Result<T, CliError>;

fn usage(message: &str) -> CliError {
    CliError::Usage(message.to_owned())
}

fn parse_number<T: core::str::FromStr>(value: Option<&String>, what: &str) -> CliResult<T> {
    let value = value.ok_or_else(|| usage(&format!("missing {what}")))?;
    value
        .parse()
        .map_err(|_| usage(&format!("invalid {what}: {value}")))
}

fn required<'a>(value: Option<&'a String>, what: &str) -> CliResult<&'a str> {
    value
        .map(String::as_str)
        .ok_or_else(|| usage(&format!("missing {what}")))
}

fn mount(image: &str) -> CliResult<Fat16Fs<ImageFile>> {
    let device = ImageFile::open(std::path::Path::new(image))?;
    Ok(Fat16Fs::mount(device)?)
}

fn run(args: &[String]) -> CliResult<()> {
    let image = required(args.first(), "image")?;
    let command = required(args.get(1), "command")?;
    let operands = &args[2..];

    if command == "format" {
        let sectors: u32 = parse_number(operands.first(), "sector count")?;
        let path = std::path::Path::new(image);
        let device = ImageFile::create(path, u64::from(sectors))?;
        let boot_sector = BootSector::new_fat16().with_total_sectors(sectors);
        let mut fs = match Fat16Fs::format(device, &boot_sector) {
            Ok(fs) => fs,
            Err(err) => {
                // Nothing usable was written
                if let Err(remove) = std::fs::remove_file(path) {
                    log::warn!("Could not remove {image}: {remove}");
                }
                return Err(err.into());
            }
        };
        println!(
            "{image}: {} clusters of {} bytes",
            fs.free_clusters()?,
            fs.layout().cluster_size()
        );
        return Ok(());
    }

    let mut fs = mount(image)?;
    let path = operands.first().map_or("/", String::as_str);
    let stdout = io::stdout();

    match command {
        "ls" => {
            let dir = Path::new(path).to_owned();
            let mut out = stdout.lock();
            for name in fs.read_dir(Path::new(path))? {
                let child = dir.join(&name.to_string());
                let metadata = fs.metadata(child.as_path())?;
                match metadata.file_type() {
                    FileType::Directory => writeln!(out, "{name}/")?,
                    FileType::File => writeln!(out, "{name:<12} {:>10}", metadata.size())?,
                }
            }
        }
        "mkdir" => fs.mkdir(Path::new(required(operands.first(), "path")?))?,
        "rmdir" => fs.rmdir(Path::new(required(operands.first(), "path")?))?,
        "touch" => {
            let path = Path::new(required(operands.first(), "path")?);
            if !fs.exists(path)? {
                fs.create(path)?;
            }
        }
        "rm" => fs.delete(Path::new(required(operands.first(), "path")?))?,
        "write" => {
            let path = Path::new(required(operands.first(), "path")?);
            let offset: usize = parse_number(operands.get(1), "offset")?;
            let mut data = Vec::new();
            io::stdin().lock().read_to_end(&mut data)?;

            if !fs.exists(path)? {
                fs.create(path)?;
            }
            let written = fs.write(path, &data, offset)?;
            log::info!("Wrote {written} bytes to {}", path.as_str());
        }
        "cat" => {
            let path = Path::new(required(operands.first(), "path")?);
            let mut data = vec![0; fs.metadata(path)?.size()];
            let read = fs.read(path, &mut data, 0)?;
            stdout.lock().write_all(&data[..read])?;
        }
        "truncate" => {
            let path = Path::new(required(operands.first(), "path")?);
            let size: u64 = parse_number(operands.get(1), "size")?;
            fs.truncate(path, size)?;
        }
        "stat" => {
            let metadata = fs.metadata(Path::new(path))?;
            let kind = match metadata.file_type() {
                FileType::Directory => "directory",
                FileType::File => "file",
            };
            println!("{path}: {kind}, {} bytes", metadata.size());
        }
        "fsck" => {
            let repair = match operands.first().map(String::as_str) {
                None => false,
                Some("--repair") => true,
                Some(other) => return Err(usage(&format!("unknown fsck option: {other}"))),
            };
            fsck(&mut fs, repair)?;
        }
        other => return Err(usage(&format!("unknown command: {other}"))),
    }

    Ok(())
}

fn fsck(fs: &mut Fat16Fs<ImageFile>, repair: bool) -> CliResult<()> {
    let report = fs.check()?;
    for cluster in &report.orphaned {
        println!("orphaned cluster {cluster}");
    }
    for cluster in &report.cross_linked {
        println!("cross-linked cluster {cluster}");
    }
    for (copy, cluster) in &report.fat_mismatches {
        println!("FAT copy {copy} differs at cluster {cluster}");
    }
    for path in &report.size_mismatches {
        println!("size does not match chain: {path}");
    }

    if report.is_clean() {
        println!("clean, {} free clusters", fs.free_clusters()?);
        return Ok(());
    }
    if !repair {
        let problems = report.orphaned.len()
            + report.cross_linked.len()
            + report.fat_mismatches.len()
            + report.size_mismatches.len();
        return Err(CliError::Inconsistent(problems));
    }

    // Copies first, so that orphans are looked up in a trustworthy table
    let sectors = fs.sync_fat_copies()?;
    let reclaimed = fs.reclaim_orphans()?;
    println!("rewrote {sectors} FAT sectors, reclaimed {reclaimed} clusters");

    let remaining = fs.check()?;
    if remaining.is_clean() {
        Ok(())
    } else {
        Err(CliError::Inconsistent(
            remaining.cross_linked.len() + remaining.size_mismatches.len(),
        ))
    }
}

fn main() -> ExitCode {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fat16-tool: {err}");
            if matches!(err, CliError::Usage(_)) {
                eprintln!("{USAGE}");
            }
            ExitCode::from(err.exit_code())
        }
    }
}
