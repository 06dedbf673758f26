use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use block_dev::BlockDevice;
use simple_fs::BLOCK_SIZE;

/// The emulated disk: a host file read and written in 4 KiB blocks.
#[derive(Debug)]
pub struct BlockFile {
    inner: Mutex<File>,
    nblocks: usize,
}

impl BlockFile {
    /// Open (or create) an image file and stretch it to `nblocks` blocks.
    /// Existing contents are kept, so a formatted image survives reopening.
    pub fn open(path: &Path, nblocks: usize) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        fd.set_len((nblocks * BLOCK_SIZE) as u64)?;

        Ok(Self {
            inner: Mutex::new(fd),
            nblocks,
        })
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.inner.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(file.read(buf).unwrap(), BLOCK_SIZE, "not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.inner.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            BLOCK_SIZE,
            "not a complete block!"
        );
    }

    fn num_blocks(&self) -> usize {
        self.nblocks
    }
}
