use std::mem;

use simple_fs::layout::{DiskInode, IndirectBlock, InodeBlock, SuperBlock, INODES_PER_BLOCK};
use simple_fs::BLOCK_SIZE;

#[test]
fn layout() {
    assert_eq!(16, mem::size_of::<SuperBlock>());
    assert_eq!(32, mem::size_of::<DiskInode>());
    assert_eq!(128, INODES_PER_BLOCK);
    assert_eq!(BLOCK_SIZE, mem::size_of::<InodeBlock>());
    assert_eq!(BLOCK_SIZE, mem::size_of::<IndirectBlock>());
}
