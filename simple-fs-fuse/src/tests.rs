use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use block_dev::BlockDevice;
use simple_fs::{FsError, SimpleFileSystem, BLOCK_SIZE};

use crate::BlockFile;

/// A 20-block image: 2 inode-table blocks, 17 data-region blocks.
const SMALL: usize = 20;

struct Scratch {
    path: PathBuf,
    device: Arc<dyn BlockDevice>,
}

impl Scratch {
    /// A raw image file, all zeroes, nothing formatted yet.
    fn raw(name: &str, nblocks: usize) -> Self {
        let path = std::env::temp_dir().join(format!("simple-fs-{}-{name}.img", process::id()));
        let _ = fs::remove_file(&path);
        let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(&path, nblocks).unwrap());
        Self { path, device }
    }

    /// A freshly formatted image.
    fn new(name: &str, nblocks: usize) -> Self {
        let scratch = Self::raw(name, nblocks);
        SimpleFileSystem::format(&scratch.device);
        scratch
    }

    fn mount(&self) -> SimpleFileSystem {
        SimpleFileSystem::mount(self.device.clone()).unwrap()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn read_all(fs: &SimpleFileSystem, inumber: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    assert_eq!(fs.read(inumber, &mut buf, 0).unwrap(), len);
    buf
}

#[test]
fn mount_rejects_unformatted_volume() {
    let scratch = Scratch::raw("unformatted", SMALL);
    assert_eq!(
        SimpleFileSystem::mount(scratch.device.clone()).unwrap_err(),
        FsError::InvalidSuperblock
    );
}

#[test]
fn format_computes_layout() {
    let scratch = Scratch::new("layout", SMALL);
    let report = SimpleFileSystem::inspect(&scratch.device);
    assert!(report.magic_valid);
    assert_eq!(report.nblocks, 20);
    assert_eq!(report.ninodeblocks, 2);
    assert_eq!(report.ninodes, 256);
    assert!(report.inodes.is_empty());
}

#[test]
fn create_returns_lowest_free_slot() {
    let scratch = Scratch::new("create", SMALL);
    let mut fs = scratch.mount();

    assert_eq!(fs.create().unwrap(), 1);
    assert_eq!(fs.create().unwrap(), 2);
    assert_eq!(fs.create().unwrap(), 3);
    assert_eq!(fs.getsize(2).unwrap(), 0);

    fs.delete(2).unwrap();
    // the freed slot is the lowest again
    assert_eq!(fs.create().unwrap(), 2);
    assert_eq!(fs.create().unwrap(), 4);
}

#[test]
fn bad_inumbers_are_rejected() {
    let scratch = Scratch::new("inumbers", SMALL);
    let mut fs = scratch.mount();

    assert_eq!(fs.getsize(0).unwrap_err(), FsError::BadInumber(0));
    assert_eq!(fs.getsize(256).unwrap_err(), FsError::BadInumber(256));
    assert_eq!(fs.getsize(7).unwrap_err(), FsError::InvalidInode(7));
    assert_eq!(fs.delete(0).unwrap_err(), FsError::BadInumber(0));

    let inumber = fs.create().unwrap();
    fs.delete(inumber).unwrap();
    // a deleted inode cannot be deleted twice
    assert_eq!(fs.delete(inumber).unwrap_err(), FsError::InvalidInode(inumber));
}

#[test]
fn round_trip_within_direct_capacity() {
    let scratch = Scratch::new("direct", SMALL);
    let mut fs = scratch.mount();

    let data = pattern(5075, 7);
    let inumber = fs.create().unwrap();
    let outcome = fs.write(inumber, &data, 0).unwrap();
    assert_eq!(outcome.bytes, data.len());
    assert!(!outcome.out_of_space);

    assert_eq!(fs.getsize(inumber).unwrap(), data.len());
    assert_eq!(read_all(&fs, inumber, data.len()), data);
    assert_eq!(fs.data_blocks_of(inumber).unwrap().count(), 2);
}

#[test]
fn round_trip_through_indirect_block() {
    let scratch = Scratch::new("indirect", SMALL);
    let mut fs = scratch.mount();

    let data = pattern(24698, 99);
    let inumber = fs.create().unwrap();
    assert_eq!(fs.write(inumber, &data, 0).unwrap().bytes, data.len());

    assert_eq!(fs.getsize(inumber).unwrap(), data.len());
    assert_eq!(read_all(&fs, inumber, data.len()), data);
    // 7 data blocks; the indirect block itself is not data
    assert_eq!(fs.data_blocks_of(inumber).unwrap().count(), 7);

    // a greedy read stops at end of file
    let mut buf = vec![0; data.len() + 4096];
    assert_eq!(fs.read(inumber, &mut buf, 0).unwrap(), data.len());
    assert_eq!(&buf[..data.len()], &data[..]);
}

#[test]
fn write_boundaries() {
    let scratch = Scratch::new("boundaries", SMALL);
    let mut fs = scratch.mount();
    let inumber = fs.create().unwrap();

    assert_eq!(fs.write(inumber, &pattern(100, 1), 0).unwrap().bytes, 100);
    // a pure append starts exactly at the current size
    assert_eq!(fs.write(inumber, &pattern(100, 2), 100).unwrap().bytes, 100);
    assert_eq!(fs.getsize(inumber).unwrap(), 200);

    // past the end there would be a hole
    assert_eq!(
        fs.write(inumber, &pattern(10, 3), 201).unwrap_err(),
        FsError::WriteGap { offset: 201, size: 200 }
    );
    assert_eq!(fs.getsize(inumber).unwrap(), 200);

    // overwriting a prefix never shrinks the file
    assert_eq!(fs.write(inumber, &pattern(50, 4), 0).unwrap().bytes, 50);
    assert_eq!(fs.getsize(inumber).unwrap(), 200);

    let mut buf = [0; 200];
    assert_eq!(fs.read(inumber, &mut buf, 200).unwrap(), 0);
    assert_eq!(fs.read(inumber, &mut buf, 500).unwrap(), 0);
    assert_eq!(fs.read(inumber, &mut buf, 150).unwrap(), 50);
}

#[test]
fn partial_write_when_volume_fills() {
    let scratch = Scratch::new("exhaustion", SMALL);
    let mut fs = scratch.mount();
    let inumber = fs.create().unwrap();

    // 18 blocks of payload cannot fit: 17 free blocks minus one
    // claimed by the indirect block leave room for 16
    let data = pattern(18 * BLOCK_SIZE, 5);
    let outcome = fs.write(inumber, &data, 0).unwrap();
    assert!(outcome.out_of_space);
    assert_eq!(outcome.bytes, 16 * BLOCK_SIZE);
    assert_eq!(fs.getsize(inumber).unwrap(), 16 * BLOCK_SIZE);
    assert_eq!(
        read_all(&fs, inumber, 16 * BLOCK_SIZE),
        &data[..16 * BLOCK_SIZE]
    );

    // appending to a full volume is a zero-byte short write, not an error
    let outcome = fs.write(inumber, &pattern(10, 6), 16 * BLOCK_SIZE).unwrap();
    assert_eq!(outcome.bytes, 0);
    assert!(outcome.out_of_space);

    // deleting the file hands every block back
    fs.delete(inumber).unwrap();
    let inumber = fs.create().unwrap();
    let small = pattern(3 * BLOCK_SIZE, 8);
    assert_eq!(fs.write(inumber, &small, 0).unwrap().bytes, small.len());
    assert_eq!(read_all(&fs, inumber, small.len()), small);
}

#[test]
fn unused_indirect_block_returns_to_the_pool() {
    let scratch = Scratch::new("rollback", SMALL);
    let mut fs = scratch.mount();

    // 11 of the 17 data-region blocks go to the first file
    let first = fs.create().unwrap();
    let data = pattern(10 * BLOCK_SIZE, 41);
    assert_eq!(fs.write(first, &data, 0).unwrap().bytes, data.len());

    // five direct blocks fit, then the indirect block claims the last
    // free one and no entry can follow it
    let second = fs.create().unwrap();
    let data = pattern(8 * BLOCK_SIZE, 42);
    let outcome = fs.write(second, &data, 0).unwrap();
    assert!(outcome.out_of_space);
    assert_eq!(outcome.bytes, 5 * BLOCK_SIZE);
    assert_eq!(fs.getsize(second).unwrap(), 5 * BLOCK_SIZE);
    assert_eq!(
        read_all(&fs, second, 5 * BLOCK_SIZE),
        &data[..5 * BLOCK_SIZE]
    );

    // an indirect block with no entries is handed back, so one block
    // is still allocatable
    let third = fs.create().unwrap();
    let data = pattern(BLOCK_SIZE, 43);
    assert_eq!(fs.write(third, &data, 0).unwrap().bytes, data.len());
    assert_eq!(read_all(&fs, third, data.len()), data);
}

#[test]
fn mount_rebuilds_bitmaps_from_disk() {
    let scratch = Scratch::new("remount", SMALL);

    let first = pattern(9000, 11);
    let second = pattern(300, 12);
    {
        let mut fs = scratch.mount();
        let a = fs.create().unwrap();
        let b = fs.create().unwrap();
        fs.write(a, &first, 0).unwrap();
        fs.write(b, &second, 0).unwrap();
    }

    // a fresh mount derives both bitmaps by scanning the table
    let mut fs = scratch.mount();
    assert_eq!(fs.getsize(1).unwrap(), first.len());
    assert_eq!(fs.getsize(2).unwrap(), second.len());
    assert_eq!(read_all(&fs, 1, first.len()), first);
    assert_eq!(read_all(&fs, 2, second.len()), second);

    // new allocations must not land on blocks the old files own
    let c = fs.create().unwrap();
    let third = pattern(6000, 13);
    fs.write(c, &third, 0).unwrap();
    assert_eq!(read_all(&fs, 1, first.len()), first);
    assert_eq!(read_all(&fs, 2, second.len()), second);
    assert_eq!(read_all(&fs, c, third.len()), third);
}

#[test]
fn defragment_packs_inodes_and_data() {
    let scratch = Scratch::new("defrag", SMALL);
    let mut fs = scratch.mount();

    let first = pattern(20480, 21);
    let second = pattern(24698, 22);
    let third = pattern(5075, 23);
    for data in [&first, &second, &third] {
        let inumber = fs.create().unwrap();
        assert_eq!(fs.write(inumber, data, 0).unwrap().bytes, data.len());
    }

    fs.delete(1).unwrap();
    fs.defragment().unwrap();

    // survivors are renumbered densely from 1, in former inumber order
    let valid: Vec<u32> = fs
        .inodes(1)
        .filter_map(|(inumber, inode)| inode.is_valid().then_some(inumber))
        .collect();
    assert_eq!(valid, [1, 2]);

    assert_eq!(fs.getsize(1).unwrap(), second.len());
    assert_eq!(fs.getsize(2).unwrap(), third.len());
    assert_eq!(read_all(&fs, 1, second.len()), second);
    assert_eq!(read_all(&fs, 2, third.len()), third);

    // ten live blocks (9 data + 1 indirect) occupy the start of the
    // data region without a gap
    let report = SimpleFileSystem::inspect(&scratch.device);
    let mut used: Vec<u32> = report
        .inodes
        .iter()
        .flat_map(|inode| {
            inode
                .direct
                .iter()
                .chain(&inode.indirect_blocks)
                .copied()
                .chain(inode.indirect)
        })
        .collect();
    used.sort_unstable();
    assert_eq!(used, (3..13).collect::<Vec<u32>>());

    // the compacted volume is what lands on disk, not just in memory
    drop(fs);
    let mut fs = scratch.mount();
    assert_eq!(read_all(&fs, 1, second.len()), second);
    assert_eq!(read_all(&fs, 2, third.len()), third);

    // freed slots and blocks are allocatable again
    assert_eq!(fs.create().unwrap(), 3);
    let fourth = pattern(2 * BLOCK_SIZE, 24);
    assert_eq!(fs.write(3, &fourth, 0).unwrap().bytes, fourth.len());
    assert_eq!(read_all(&fs, 1, second.len()), second);
}

#[test]
fn cursors_walk_in_order() {
    let scratch = Scratch::new("cursors", SMALL);
    let mut fs = scratch.mount();

    let inumber = fs.create().unwrap();
    fs.write(inumber, &pattern(3 * BLOCK_SIZE + 1, 31), 0).unwrap();

    // an out-of-range start yields nothing
    assert_eq!(fs.inodes(fs.ninodes()).count(), 0);

    // every slot appears exactly once, in increasing order
    let slots: Vec<u32> = fs.inodes(1).map(|(inumber, _)| inumber).collect();
    assert_eq!(slots.len(), fs.ninodes() as usize - 1);
    assert!(slots.windows(2).all(|pair| pair[0] < pair[1]));

    // the data cursor covers exactly ceil(size / BLOCK_SIZE) blocks
    let blocks: Vec<u32> = fs.data_blocks_of(inumber).unwrap().collect();
    assert_eq!(blocks.len(), 4);
    // first-fit allocation of a fresh file is contiguous from the
    // start of the data region
    assert_eq!(blocks, [3, 4, 5, 6]);
}
