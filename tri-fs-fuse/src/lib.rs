#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::sync::Mutex;

use block_dev::BlockDevice;
use tri_fs::{FreeMap, SectorId, SECTOR_SIZE};

pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.read(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector!"
        );
    }
}

/// 宿主侧的内存位图分配器，管辖`[base, base + sectors)`；
/// 位图的磁盘格式不属于存储层，打包工具用完即弃
pub struct RangeFreeMap {
    base: usize,
    sectors: usize,
    bits: Mutex<Vec<u64>>,
}

impl RangeFreeMap {
    pub fn new(base: usize, sectors: usize) -> Self {
        Self {
            base,
            sectors,
            bits: Mutex::new(vec![0; sectors.div_ceil(64)]),
        }
    }

    /// 当前空闲扇区数
    pub fn free_sectors(&self) -> usize {
        let bits = self.bits.lock().unwrap();
        self.sectors - (0..self.sectors).filter(|i| bits[i / 64] & (1 << (i % 64)) != 0).count()
    }
}

impl FreeMap for RangeFreeMap {
    fn allocate(&self, count: usize) -> Option<SectorId> {
        assert!(count > 0);
        let mut bits = self.bits.lock().unwrap();

        // 首次适应：找连续`count`个空位
        let mut run = 0;
        for index in 0..self.sectors {
            if bits[index / 64] & (1 << (index % 64)) == 0 {
                run += 1;
            } else {
                run = 0;
            }
            if run == count {
                let first = index + 1 - count;
                for i in first..=index {
                    bits[i / 64] |= 1 << (i % 64);
                }
                return Some(SectorId::new(self.base + first));
            }
        }

        None
    }

    fn release(&self, sector: SectorId, count: usize) {
        let mut bits = self.bits.lock().unwrap();
        let first = sector.raw() - self.base;
        for i in first..first + count {
            // 归还的一定是已分配的扇区
            assert_ne!(bits[i / 64] & (1 << (i % 64)), 0);
            bits[i / 64] &= !(1 << (i % 64));
        }
    }
}
