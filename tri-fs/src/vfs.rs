//! # 索引节点层
//!
//! [`TriFs`] 持有扇区缓存、分配器与打开句柄表；
//! [`Inode`] 是打开的inode在内存中的引用计数表示，
//! 与磁盘上的 [`InodeRecord`] 相区别。
//!
//! 不变量：同一扇区任意时刻至多一个活句柄，
//! 重复`open`共享句柄并递增其打开计数。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use block_dev::BlockDevice;
use enumflags2::bitflags;
use spin::Mutex;

use crate::extent;
use crate::layout::{InodeKind, InodeRecord};
use crate::Error;
use crate::FreeMap;
use crate::SectorBuf;
use crate::SectorCache;
use crate::SectorId;
use crate::MAX_LENGTH;
use crate::SECTOR_SIZE;

pub struct TriFs {
    cache: SectorCache,
    free_map: Arc<dyn FreeMap>,
    /// 打开句柄表，按inode所在扇区号索引
    inodes: Mutex<BTreeMap<SectorId, Arc<Inode>>>,
}

/// 打开的inode句柄
pub struct Inode {
    /// inode记录所在扇区
    sector: SectorId,
    /// 打开计数
    open_cnt: AtomicUsize,
    /// 已标记删除；实际释放推迟到最后一次关闭
    removed: AtomicBool,
    /// 大于零时拒绝写入，不得超过打开计数
    deny_write_cnt: AtomicUsize,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct Stat {
    pub inode: u64,
    pub kind: StatKind,
    pub size: u64,
    pub sectors: u64,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}

impl TriFs {
    pub fn new(
        dev: Arc<dyn BlockDevice>,
        free_map: Arc<dyn FreeMap>,
        cache_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache: SectorCache::new(dev, cache_capacity),
            free_map,
            inodes: Mutex::new(BTreeMap::new()),
        })
    }

    /// 创建inode记录并伸长到初始长度，返回其扇区号；
    /// 句柄需另行[`open`](Self::open)
    pub fn create(&self, length: u32, kind: InodeKind, parent: SectorId) -> Result<SectorId, Error> {
        extent::create(&self.cache, &*self.free_map, kind, parent, length)
    }

    /// 打开扇区上的inode；已打开则共享句柄
    pub fn open(&self, sector: SectorId) -> Arc<Inode> {
        let mut inodes = self.inodes.lock();

        if let Some(inode) = inodes.get(&sector) {
            inode.open_cnt.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(inode);
        }

        let inode = Arc::new(Inode {
            sector,
            open_cnt: AtomicUsize::new(1),
            removed: AtomicBool::new(false),
            deny_write_cnt: AtomicUsize::new(0),
        });
        inodes.insert(sector, Arc::clone(&inode));
        log::trace!("open inode at sector {sector}");
        inode
    }

    /// 关闭句柄；最后一次关闭时出表，
    /// 若已标记删除则归还其全部扇区（含记录自身）
    pub fn close(&self, inode: &Arc<Inode>) {
        let mut inodes = self.inodes.lock();
        if inode.open_cnt.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        inodes.remove(&inode.sector);
        // 释放扇区要走设备I/O，不占着句柄表
        drop(inodes);

        if inode.removed.load(Ordering::Acquire) {
            extent::deallocate(&self.cache, &*self.free_map, inode.sector);
            self.free_map.release(inode.sector, 1);
        }
    }

    /// 标记删除；释放动作发生在最后一次[`close`](Self::close)
    pub fn remove(&self, inode: &Inode) {
        inode.removed.store(true, Ordering::Release);
    }

    /// 从指定字节偏移读出数据填充`buf`，返回实际读出的字节数；
    /// 超出文件长度的部分不读
    pub fn read_at(&self, inode: &Inode, offset: usize, buf: &mut [u8]) -> usize {
        let record: InodeRecord = self.cache.load(inode.sector);
        debug_assert!(record.is_valid());

        let mut start = offset;
        let end = (offset + buf.len()).min(record.length as usize);
        if start >= end {
            return 0;
        }

        let mut read_size = 0;
        loop {
            // 当前扇区的末地址(字节)
            let current_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let chunk = current_end - start;
            // 长度以内的偏移必有扇区：已分配数 == ceil(len/512)
            let sector = extent::translate(&self.cache, &record, start)
                .expect("offset within length is always mapped");

            if chunk == SECTOR_SIZE {
                // 整扇区直达调用者缓冲区
                self.cache.read(sector, &mut buf[read_size..read_size + SECTOR_SIZE]);
            } else {
                self.cache.map(sector, 0, |data: &SectorBuf| {
                    buf[read_size..read_size + chunk].copy_from_slice(
                        &data[start % SECTOR_SIZE..start % SECTOR_SIZE + chunk],
                    );
                });
            }

            read_size += chunk;
            if current_end == end {
                break;
            }
            start = current_end;
        }

        read_size
    }

    /// 从指定字节偏移写入`buf`，返回写入的字节数。
    ///
    /// 越过当前长度的写入会先伸长文件——新长度先于数据持久化，
    /// 并发访问下存在"长度先行于内容"的窗口，属既有语义。
    /// 句柄处于拒写状态时写入0字节。
    pub fn write_at(&self, inode: &Inode, offset: usize, buf: &[u8]) -> Result<usize, Error> {
        if inode.deny_write_cnt.load(Ordering::Acquire) > 0 {
            log::debug!("write denied on inode at sector {}", inode.sector);
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let end = offset + buf.len();
        if end > MAX_LENGTH as usize {
            return Err(Error::TooLarge);
        }

        let mut record: InodeRecord = self.cache.load(inode.sector);
        debug_assert!(record.is_valid());
        if end > record.length as usize {
            extent::extend(&self.cache, &*self.free_map, inode.sector, end as u32)?;
            record = self.cache.load(inode.sector);
        }

        let mut start = offset;
        let mut written = 0;
        loop {
            let current_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let chunk = current_end - start;
            let sector = extent::translate(&self.cache, &record, start)
                .expect("offset within length is always mapped");

            if chunk == SECTOR_SIZE {
                // 整扇区覆写，未命中也无需读穿
                self.cache.write(sector, &buf[written..written + SECTOR_SIZE]);
            } else {
                // 部分扇区：槽内与既有内容合并，未触及的部分原样保留
                self.cache.map_mut(sector, 0, |data: &mut SectorBuf| {
                    data[start % SECTOR_SIZE..start % SECTOR_SIZE + chunk]
                        .copy_from_slice(&buf[written..written + chunk]);
                });
            }

            written += chunk;
            if current_end == end {
                break;
            }
            start = current_end;
        }

        Ok(written)
    }

    /// 把文件伸长到指定字节数；新增范围读出为全零
    pub fn extend(&self, inode: &Inode, new_length: u32) -> Result<(), Error> {
        extent::extend(&self.cache, &*self.free_map, inode.sector, new_length)
    }

    #[inline]
    pub fn length(&self, inode: &Inode) -> u32 {
        self.cache.load::<InodeRecord>(inode.sector).length
    }

    #[inline]
    pub fn is_dir(&self, inode: &Inode) -> bool {
        self.cache.load::<InodeRecord>(inode.sector).is_dir()
    }

    /// 父目录inode所在扇区
    #[inline]
    pub fn parent(&self, inode: &Inode) -> SectorId {
        self.cache.load::<InodeRecord>(inode.sector).parent()
    }

    pub fn stat(&self, inode: &Inode) -> Stat {
        let record: InodeRecord = self.cache.load(inode.sector);
        Stat {
            inode: inode.sector.raw() as u64,
            kind: record.kind.into(),
            size: record.length as u64,
            sectors: InodeRecord::count_sectors(record.length) as u64,
        }
    }

    /// 持久点：写回所有脏扇区；有序停机前必须调用
    pub fn flush(&self) {
        self.cache.flush_all();
    }
}

impl Inode {
    /// inode记录所在扇区，可作inode编号使用
    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.open_cnt.load(Ordering::Relaxed)
    }

    /// 拒绝写入；每个打开者至多调用一次
    pub fn deny_write(&self) {
        let denies = self.deny_write_cnt.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(denies <= self.open_cnt.load(Ordering::Relaxed));
    }

    /// 恢复写入；与[`deny_write`](Self::deny_write)一一配对
    pub fn allow_write(&self) {
        let prev = self.deny_write_cnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

impl From<InodeKind> for StatKind {
    #[inline]
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::Directory => Self::DIR,
            InodeKind::File => Self::FILE,
        }
    }
}
