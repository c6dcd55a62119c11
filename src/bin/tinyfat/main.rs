//! Command-line driver for tinyfat disk images.

mod logger;

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};
use log::{error, info};
use tinyfat::{BLOCK_SIZE, Error, FileDisk, FileSystem};

fn cli() -> Command {
    Command::new("tinyfat")
        .about("Inspect and modify tinyfat disk images")
        .arg(
            Arg::new("disk")
                .required(true)
                .help("Path of the disk image"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("format")
                .about("Create a fresh disk image")
                .arg(
                    Arg::new("blocks")
                        .required(true)
                        .value_parser(clap::value_parser!(usize))
                        .help("Total number of blocks, including metadata"),
                ),
        )
        .subcommand(Command::new("info").about("Show volume geometry and free space"))
        .subcommand(Command::new("ls").about("List files"))
        .subcommand(
            Command::new("add")
                .about("Copy a host file into the volume")
                .arg(Arg::new("source").required(true).help("Host file to copy"))
                .arg(
                    Arg::new("name")
                        .long("name")
                        .help("Name on the volume, defaults to the host file name"),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Delete a file")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("cat")
                .about("Print a file to stdout")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("stat")
                .about("Show size and blocks of a file")
                .arg(Arg::new("name").required(true)),
        )
}

fn main() -> ExitCode {
    if let Err(e) = logger::init() {
        eprintln!("failed to install logger: {}", e);
    }

    let matches = cli().get_matches();
    let disk = matches.get_one::<String>("disk").map(String::as_str).unwrap_or_default();
    match run(disk, &matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}: {}", disk, e);
            eprintln!("tinyfat: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(disk: &str, matches: &ArgMatches) -> Result<(), Error> {
    let Some((command, args)) = matches.subcommand() else {
        return Ok(());
    };

    if command == "format" {
        let blocks = args.get_one::<usize>("blocks").copied().unwrap_or_default();
        let device = Arc::new(FileDisk::create(disk, blocks)?);
        let mut fs = FileSystem::format(device)?;
        println!("{}", fs.info()?);
        return fs.unmount();
    }

    let mut fs = FileSystem::mount_path(disk)?;
    let result = match command {
        "info" => fs.info().map(|info| println!("{}", info)),
        "ls" => fs.list().map(|files| {
            println!("FS Ls:");
            for file in files {
                println!("{}", file);
            }
        }),
        "add" => add(&mut fs, args),
        "rm" => fs.delete(name_arg(args)),
        "cat" => cat(&mut fs, name_arg(args)),
        "stat" => stat(&mut fs, name_arg(args)),
        _ => Ok(()),
    };
    // Always try to unmount so the allocation table reaches the disk.
    let unmounted = fs.unmount();
    result.and(unmounted)
}

fn name_arg(args: &ArgMatches) -> &str {
    args.get_one::<String>("name").map(String::as_str).unwrap_or_default()
}

fn add(fs: &mut FileSystem<FileDisk>, args: &ArgMatches) -> Result<(), Error> {
    let source = args.get_one::<String>("source").map(String::as_str).unwrap_or_default();
    let data = std::fs::read(source).map_err(|e| {
        error!("cannot read {}: {}", source, e);
        Error::IoError
    })?;
    let name = match args.get_one::<String>("name") {
        Some(name) => name.clone(),
        None => Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    fs.create(&name)?;
    let fd = fs.open(&name)?;
    let result = fs.write_all(fd, &data);
    fs.close(fd)?;
    result?;
    info!("added {} ({} bytes)", name, data.len());
    Ok(())
}

fn cat(fs: &mut FileSystem<FileDisk>, name: &str) -> Result<(), Error> {
    let fd = fs.open(name)?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut stdout = std::io::stdout().lock();
    let result = loop {
        match fs.read(fd, &mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if stdout.write_all(&buf[..n]).is_err() {
                    break Err(Error::IoError);
                }
            }
            Err(e) => break Err(e),
        }
    };
    fs.close(fd)?;
    result
}

fn stat(fs: &mut FileSystem<FileDisk>, name: &str) -> Result<(), Error> {
    let fd = fs.open(name)?;
    let size = fs.stat(fd);
    fs.close(fd)?;
    let blocks = fs.blocks(name)?;
    println!("file: {}, size: {}, blocks: {:?}", name, size?, blocks);
    Ok(())
}
