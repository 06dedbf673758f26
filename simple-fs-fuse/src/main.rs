mod cli;

use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;
use std::sync::Arc;

use block_dev::BlockDevice;
use clap::Parser;
use simple_fs::{SimpleFileSystem, VolumeReport, BLOCK_SIZE};
use simple_fs_fuse::BlockFile;
use typed_bytesize::ByteSizeIec;

use cli::Cli;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(&cli.image, cli.nblocks)?);
    println!(
        "opened emulated disk image {} with {} blocks ({})",
        cli.image.display(),
        cli.nblocks,
        ByteSizeIec((cli.nblocks * BLOCK_SIZE) as u64)
    );

    let mut fs: Option<SimpleFileSystem> = None;
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!(" simplefs> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            [] => {}

            ["format"] => {
                if fs.is_some() {
                    println!("format failed: disk is mounted!");
                } else {
                    SimpleFileSystem::format(&device);
                    println!("disk formatted.");
                }
            }

            ["mount"] => {
                if fs.is_some() {
                    println!("mount failed: disk is already mounted!");
                } else {
                    match SimpleFileSystem::mount(device.clone()) {
                        Ok(mounted) => {
                            fs = Some(mounted);
                            println!("disk mounted.");
                        }
                        Err(err) => println!("mount failed: {err}"),
                    }
                }
            }

            ["debug"] => print_report(&SimpleFileSystem::inspect(&device)),

            ["create"] => match fs.as_mut() {
                Some(fs) => match fs.create() {
                    Ok(inumber) => println!("created inode {inumber}"),
                    Err(err) => println!("create failed: {err}"),
                },
                None => println!("disk is not mounted!"),
            },

            ["delete", inumber] => match (fs.as_mut(), inumber.parse()) {
                (Some(fs), Ok(inumber)) => match fs.delete(inumber) {
                    Ok(()) => println!("inode {inumber} deleted."),
                    Err(err) => println!("delete failed: {err}"),
                },
                (None, _) => println!("disk is not mounted!"),
                (_, Err(_)) => println!("use: delete <inumber>"),
            },

            ["getsize", inumber] => match (fs.as_ref(), inumber.parse()) {
                (Some(fs), Ok(inumber)) => match fs.getsize(inumber) {
                    Ok(size) => println!("inode {inumber} has size {size}"),
                    Err(err) => println!("getsize failed: {err}"),
                },
                (None, _) => println!("disk is not mounted!"),
                (_, Err(_)) => println!("use: getsize <inumber>"),
            },

            ["cat", inumber] => match (fs.as_ref(), inumber.parse()) {
                (Some(fs), Ok(inumber)) => do_cat(fs, inumber)?,
                (None, _) => println!("disk is not mounted!"),
                (_, Err(_)) => println!("use: cat <inumber>"),
            },

            ["copyin", path, inumber] => match (fs.as_mut(), inumber.parse()) {
                (Some(fs), Ok(inumber)) => {
                    if let Err(err) = do_copyin(fs, Path::new(path), inumber) {
                        println!("couldn't read {path}: {err}");
                    }
                }
                (None, _) => println!("disk is not mounted!"),
                (_, Err(_)) => println!("use: copyin <file> <inumber>"),
            },

            ["copyout", inumber, path] => match (fs.as_ref(), inumber.parse()) {
                (Some(fs), Ok(inumber)) => {
                    if let Err(err) = do_copyout(fs, inumber, Path::new(path)) {
                        println!("couldn't write {path}: {err}");
                    }
                }
                (None, _) => println!("disk is not mounted!"),
                (_, Err(_)) => println!("use: copyout <inumber> <file>"),
            },

            ["defrag"] => match fs.as_mut() {
                Some(fs) => match fs.defragment() {
                    Ok(()) => println!("disk defragmented."),
                    Err(err) => println!("defrag failed: {err}"),
                },
                None => println!("disk is not mounted!"),
            },

            ["help"] => print_help(),

            ["quit"] | ["exit"] => break,

            _ => {
                println!("unknown command: {}", args[0]);
                println!("type 'help' for a list of commands.");
            }
        }
    }

    Ok(())
}

fn print_report(report: &VolumeReport) {
    println!("superblock:");
    println!(
        "    magic number {} valid",
        if report.magic_valid { "is" } else { "is not" }
    );
    println!("    {} blocks total on disk", report.nblocks);
    println!(
        "    {} blocks dedicated to inode table on disk",
        report.ninodeblocks
    );
    println!("    {} total spots in inode table", report.ninodes);

    for inode in &report.inodes {
        println!("inode {}:", inode.inumber);
        println!("    size: {} bytes", inode.size);
        println!("    direct data blocks:{}", join_blocks(&inode.direct));
        if let Some(indirect) = inode.indirect {
            println!("    indirect block: {indirect}");
            println!(
                "    indirect data blocks:{}",
                join_blocks(&inode.indirect_blocks)
            );
        }
        if inode.exceeds_capacity {
            println!("    WARNING: inode exceeds capacity of direct and indirect data blocks");
        }
    }
}

fn join_blocks(blocks: &[u32]) -> String {
    blocks.iter().fold(String::new(), |mut line, block| {
        line.push_str(&format!(" {block}"));
        line
    })
}

fn do_cat(fs: &SimpleFileSystem, inumber: u32) -> io::Result<()> {
    let mut buf = [0u8; BLOCK_SIZE];
    let mut offset = 0;
    loop {
        match fs.read(inumber, &mut buf, offset) {
            Ok(0) => break,
            Ok(n) => {
                io::stdout().write_all(&buf[..n])?;
                offset += n;
            }
            Err(err) => {
                println!("cat failed: {err}");
                return Ok(());
            }
        }
    }
    Ok(())
}

fn do_copyin(fs: &mut SimpleFileSystem, path: &Path, inumber: u32) -> io::Result<()> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; BLOCK_SIZE];
    let mut offset = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        match fs.write(inumber, &buf[..n], offset) {
            Ok(outcome) => {
                offset += outcome.bytes;
                if outcome.bytes < n {
                    if outcome.out_of_space {
                        println!("disk ran out of space, copy truncated");
                    }
                    break;
                }
            }
            Err(err) => {
                println!("copyin failed: {err}");
                return Ok(());
            }
        }
    }
    println!("{offset} bytes copied");
    Ok(())
}

fn do_copyout(fs: &SimpleFileSystem, inumber: u32, path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    let mut buf = [0u8; BLOCK_SIZE];
    let mut offset = 0;
    loop {
        match fs.read(inumber, &mut buf, offset) {
            Ok(0) => break,
            Ok(n) => {
                file.write_all(&buf[..n])?;
                offset += n;
            }
            Err(err) => {
                println!("copyout failed: {err}");
                return Ok(());
            }
        }
    }
    println!("{offset} bytes copied");
    Ok(())
}

fn print_help() {
    println!("Commands are:");
    println!("    format");
    println!("    mount");
    println!("    debug");
    println!("    create");
    println!("    delete  <inode>");
    println!("    cat     <inode>");
    println!("    copyin  <file> <inode>");
    println!("    copyout <inode> <file>");
    println!("    getsize <inode>");
    println!("    defrag");
    println!("    help");
    println!("    quit");
    println!("    exit");
}
