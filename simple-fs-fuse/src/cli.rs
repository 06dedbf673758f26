use clap::Parser;
use std::path::PathBuf;

/// Interactive shell over an emulated simple-fs disk image
#[derive(Parser)]
pub struct Cli {
    /// Path of the disk image file
    pub image: PathBuf,

    /// Number of 4 KiB blocks in the image
    pub nblocks: usize,
}
