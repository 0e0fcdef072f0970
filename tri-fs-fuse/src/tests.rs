use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use block_dev::BlockDevice;
use tri_fs::{Error, InodeKind, InodeRecord, SectorCache, SectorId, TriFs, MAX_LENGTH, SECTOR_SIZE};

use crate::RangeFreeMap;

/// 内存块设备，记录设备写次数，支持绕过缓存的裸读
struct MemDisk {
    data: Mutex<Vec<u8>>,
    writes: AtomicUsize,
}

impl MemDisk {
    fn new(sectors: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0; sectors * SECTOR_SIZE]),
            writes: AtomicUsize::new(0),
        })
    }

    fn device_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn raw(&self, sector: usize) -> Vec<u8> {
        self.data.lock().unwrap()[sector * SECTOR_SIZE..][..SECTOR_SIZE].to_vec()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let data = self.data.lock().unwrap();
        buf.copy_from_slice(&data[block_id * SECTOR_SIZE..][..SECTOR_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        data[block_id * SECTOR_SIZE..][..SECTOR_SIZE].copy_from_slice(buf);
    }
}

fn pattern(seed: u8) -> Vec<u8> {
    (0..SECTOR_SIZE).map(|i| seed ^ i as u8).collect()
}

fn new_fs(sectors: usize, cache_slots: usize) -> (Arc<TriFs>, Arc<RangeFreeMap>, Arc<MemDisk>) {
    let disk = MemDisk::new(sectors);
    let free_map = Arc::new(RangeFreeMap::new(0, sectors));
    let tfs = TriFs::new(disk.clone(), free_map.clone(), cache_slots);
    (tfs, free_map, disk)
}

#[test]
fn write_then_read_survives_eviction_pressure() {
    let disk = MemDisk::new(64);
    let cache = SectorCache::new(disk, 4);

    for seed in 0..32u8 {
        cache.write(SectorId::new(seed as usize), &pattern(seed));
    }

    let mut buf = vec![0; SECTOR_SIZE];
    for seed in 0..32u8 {
        cache.read(SectorId::new(seed as usize), &mut buf);
        assert_eq!(buf, pattern(seed), "sector {seed} lost its value");
    }
}

#[test]
fn cache_capacity_only_changes_timing() {
    for cache_slots in [2, 3, 64] {
        let disk = MemDisk::new(32);
        let cache = SectorCache::new(disk, cache_slots);

        for seed in 0..10u8 {
            cache.write(SectorId::new(seed as usize), &pattern(seed));
        }
        // 穿插读增加置换压力
        let mut buf = vec![0; SECTOR_SIZE];
        for seed in (1..10u8).step_by(2) {
            cache.read(SectorId::new(seed as usize), &mut buf);
        }
        for seed in (0..10u8).step_by(2) {
            cache.write(SectorId::new(seed as usize), &pattern(seed + 100));
        }

        for seed in 0..10u8 {
            cache.read(SectorId::new(seed as usize), &mut buf);
            let expected = if seed % 2 == 0 {
                pattern(seed + 100)
            } else {
                pattern(seed)
            };
            assert_eq!(buf, expected, "capacity {cache_slots}, sector {seed}");
        }
    }
}

#[test]
fn flush_all_writes_back_every_dirty_slot() {
    let disk = MemDisk::new(16);
    let cache = SectorCache::new(disk.clone(), 8);

    for seed in 0..3u8 {
        cache.write(SectorId::new(seed as usize), &pattern(seed));
    }
    assert_eq!(disk.device_writes(), 0);

    cache.flush_all();
    assert_eq!(disk.device_writes(), 3);
    for seed in 0..3u8 {
        assert_eq!(disk.raw(seed as usize), pattern(seed));
    }

    // 再刷一遍：已无脏槽
    cache.flush_all();
    assert_eq!(disk.device_writes(), 3);
}

#[test]
fn filling_the_cache_evicts_exactly_once() {
    let disk = MemDisk::new(64);
    let cache = SectorCache::new(disk.clone(), 4);

    for seed in 0..4u8 {
        cache.write(SectorId::new(seed as usize), &pattern(seed));
    }
    assert_eq!(disk.device_writes(), 0);

    // 多碰一个扇区：恰好一次置换，脏者写回
    let mut buf = vec![0; SECTOR_SIZE];
    cache.read(SectorId::new(10), &mut buf);
    assert_eq!(disk.device_writes(), 1);

    // 被置换的扇区重新读入后值不变
    for seed in 0..4u8 {
        cache.read(SectorId::new(seed as usize), &mut buf);
        assert_eq!(buf, pattern(seed));
    }
}

#[test]
fn racing_full_sector_writers_never_interleave() {
    let disk = MemDisk::new(16);
    let cache = Arc::new(SectorCache::new(disk, 8));
    let a = vec![0xAA; SECTOR_SIZE];
    let b = vec![0x55; SECTOR_SIZE];

    let workers: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|payload| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    cache.write(SectorId::new(5), &payload);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut buf = vec![0; SECTOR_SIZE];
    cache.read(SectorId::new(5), &mut buf);
    assert!(buf == a || buf == b, "torn write observed");
}

#[test]
fn write_then_read_back_through_inode() {
    let (tfs, free_map, _) = new_fs(256, 8);
    let free_before = free_map.free_sectors();

    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
    assert_eq!(tfs.write_at(&inode, 0, &data).unwrap(), 600);
    assert_eq!(tfs.length(&inode), 600);

    // 600字节占2个直接扇区；记录 + 两个索引扇区 + 2数据
    assert_eq!(tfs.stat(&inode).sectors, 2);
    assert_eq!(free_before - free_map.free_sectors(), 5);

    let mut buf = vec![0; 600];
    assert_eq!(tfs.read_at(&inode, 0, &mut buf), 600);
    assert_eq!(buf, data);

    tfs.close(&inode);
}

#[test]
fn partial_sector_write_preserves_the_rest() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    let mut data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
    tfs.write_at(&inode, 0, &data).unwrap();

    tfs.write_at(&inode, 100, &[0xEE; 20]).unwrap();
    data[100..120].fill(0xEE);

    let mut buf = vec![0; 600];
    tfs.read_at(&inode, 0, &mut buf);
    assert_eq!(buf, data);

    tfs.close(&inode);
}

#[test]
fn growth_reads_back_as_zeros() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    tfs.write_at(&inode, 0, &[0xFF; 10]).unwrap();
    tfs.extend(&inode, 3000).unwrap();
    assert_eq!(tfs.length(&inode), 3000);

    // 旧长度与新长度之间从未写过的范围读出为全零
    let mut buf = vec![0xAB; 2990];
    assert_eq!(tfs.read_at(&inode, 10, &mut buf), 2990);
    assert!(buf.iter().all(|&byte| byte == 0));

    tfs.close(&inode);
}

#[test]
fn sparse_write_crosses_indirect_tiers() {
    let (tfs, _, _) = new_fs(4096, 16);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    let payload = [0xCD; 16];
    assert_eq!(tfs.write_at(&inode, 1_000_000, &payload).unwrap(), 16);
    assert_eq!(tfs.length(&inode), 1_000_016);

    let mut buf = vec![0xAB; 4096];
    let mut offset = 0;
    while offset < 1_000_000 {
        let chunk = buf.len().min(1_000_000 - offset);
        assert_eq!(tfs.read_at(&inode, offset, &mut buf[..chunk]), chunk);
        assert!(
            buf[..chunk].iter().all(|&byte| byte == 0),
            "hole at offset {offset} is not zero"
        );
        offset += chunk;
    }

    let mut tail = [0u8; 16];
    assert_eq!(tfs.read_at(&inode, 1_000_000, &mut tail), 16);
    assert_eq!(tail, payload);

    tfs.close(&inode);
}

#[test]
fn extend_is_monotonic_and_bounded() {
    let (tfs, _, _) = new_fs(20000, 64);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    tfs.extend(&inode, 4096).unwrap();
    assert_eq!(tfs.extend(&inode, 100), Err(Error::ShrinkForbidden));
    assert_eq!(tfs.length(&inode), 4096);

    // 恰到最大可表示长度成功，再多一个扇区失败
    tfs.extend(&inode, MAX_LENGTH).unwrap();
    assert_eq!(tfs.length(&inode), MAX_LENGTH);
    assert_eq!(
        tfs.extend(&inode, MAX_LENGTH + SECTOR_SIZE as u32),
        Err(Error::TooLarge)
    );
    assert_eq!(tfs.length(&inode), MAX_LENGTH);

    tfs.close(&inode);
}

#[test]
fn extend_fails_cleanly_when_allocator_runs_dry() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    assert_eq!(tfs.extend(&inode, 512 * 1024), Err(Error::NoSpace));
    // 长度未被污染：途中已分配的扇区不回滚，但不计入文件
    assert_eq!(tfs.length(&inode), 0);
    let mut buf = [0xAB; 16];
    assert_eq!(tfs.read_at(&inode, 0, &mut buf), 0);

    tfs.close(&inode);
}

#[test]
fn remove_returns_every_sector_to_the_allocator() {
    let (tfs, free_map, _) = new_fs(1024, 16);
    let free_before = free_map.free_sectors();

    // 300个数据扇区：越过直接与一级间接，进入二级间接
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);
    let data = vec![0x5A; 300 * SECTOR_SIZE];
    assert_eq!(tfs.write_at(&inode, 0, &data).unwrap(), data.len());
    assert!(free_map.free_sectors() < free_before);

    tfs.remove(&inode);
    assert!(inode.is_removed());
    tfs.close(&inode);

    assert_eq!(free_map.free_sectors(), free_before);
}

#[test]
fn empty_file_create_remove_balances_too() {
    let (tfs, free_map, _) = new_fs(64, 8);
    let free_before = free_map.free_sectors();

    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    // 索引扇区是预留的：空文件也占记录 + 两个索引扇区
    assert_eq!(free_before - free_map.free_sectors(), 3);

    let inode = tfs.open(sector);
    tfs.remove(&inode);
    tfs.close(&inode);

    assert_eq!(free_map.free_sectors(), free_before);
}

#[test]
fn create_with_initial_length_zero_fills() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs
        .create(600, InodeKind::Directory, SectorId::new(7))
        .unwrap();
    let inode = tfs.open(sector);

    assert_eq!(tfs.length(&inode), 600);
    assert!(tfs.is_dir(&inode));
    assert_eq!(tfs.parent(&inode), SectorId::new(7));

    let mut buf = vec![0xAB; 600];
    assert_eq!(tfs.read_at(&inode, 0, &mut buf), 600);
    assert!(buf.iter().all(|&byte| byte == 0));

    tfs.close(&inode);
}

#[test]
fn opens_of_one_sector_share_a_handle() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();

    let first = tfs.open(sector);
    let second = tfs.open(sector);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.open_count(), 2);

    tfs.close(&second);
    assert_eq!(first.open_count(), 1);

    // 归零后句柄出表，再打开得到新句柄
    tfs.close(&first);
    let reopened = tfs.open(sector);
    assert!(!Arc::ptr_eq(&first, &reopened));
    tfs.close(&reopened);
}

#[test]
fn deny_write_blocks_writers_until_allowed() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    inode.deny_write();
    assert_eq!(tfs.write_at(&inode, 0, &[1, 2, 3]).unwrap(), 0);
    assert_eq!(tfs.length(&inode), 0);

    inode.allow_write();
    assert_eq!(tfs.write_at(&inode, 0, &[1, 2, 3]).unwrap(), 3);
    assert_eq!(tfs.length(&inode), 3);

    tfs.close(&inode);
}

#[test]
fn concurrent_opens_keep_one_handle_per_sector() {
    let (tfs, _, _) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let tfs = tfs.clone();
            thread::spawn(move || {
                let handles: Vec<_> = (0..100).map(|_| tfs.open(sector)).collect();
                let first = &handles[0];
                assert!(handles.iter().all(|handle| Arc::ptr_eq(first, handle)));
                for handle in &handles {
                    tfs.close(handle);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn flush_persists_file_contents_to_the_device() {
    let (tfs, _, disk) = new_fs(64, 8);
    let sector = tfs.create(0, InodeKind::File, SectorId::new(0)).unwrap();
    let inode = tfs.open(sector);

    let data = pattern(0x3C);
    tfs.write_at(&inode, 0, &data).unwrap();
    tfs.close(&inode);
    tfs.flush();

    // 换一个缓存实例重读，相当于重新挂载
    let cache = SectorCache::new(disk, 4);
    assert_eq!(cache.capacity(), 4);
    let record: InodeRecord = cache.load(sector);
    assert!(record.is_valid());
    assert_eq!(record.length as usize, SECTOR_SIZE);
}
