use std::mem;

use tri_fs::{IndexBlock, InodeRecord, SECTOR_SIZE};

#[test]
fn layout() {
    assert_eq!(SECTOR_SIZE, mem::size_of::<InodeRecord>());
    assert_eq!(SECTOR_SIZE, mem::size_of::<IndexBlock>());
}
