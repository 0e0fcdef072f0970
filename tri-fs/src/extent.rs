//! # extent映射层
//!
//! 把文件的逻辑扇区索引换算为(层级, 路径)后走索引块查找，
//! 伸长与释放都按 直接 → 一级间接 → 二级间接 的次序逐层进行。
//!
//! 错误语义：中途分配失败不回滚，已得扇区悬置；
//! 记录（含长度字段）只在整个操作成功后写回，
//! 因此失败的`extend`不会留下指向未分配扇区的长度。

use alloc::vec::Vec;

use crate::cache::SectorCache;
use crate::layout::{IndexBlock, InodeKind, InodeRecord};
use crate::layout::{DIRECT_COUNT, DOUBLE_CAP, INDEX_COUNT, SINGLE_CAP};
use crate::Error;
use crate::FreeMap;
use crate::SectorId;
use crate::MAX_LENGTH;
use crate::SECTOR_SIZE;

/// 逻辑扇区索引在三层索引中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectorPos {
    /// 记录内直接索引的下标
    Direct(usize),
    /// 一级间接索引块内的下标
    Single(usize),
    /// (顶层索引块内的下标, 子索引块内的下标)
    Double(usize, usize),
}

impl SectorPos {
    /// 超出最大可表示范围时为空
    pub(crate) fn of(index: usize) -> Option<Self> {
        if index < DIRECT_COUNT {
            Some(Self::Direct(index))
        } else if index < SINGLE_CAP {
            Some(Self::Single(index - DIRECT_COUNT))
        } else if index < DOUBLE_CAP {
            let index = index - SINGLE_CAP;
            Some(Self::Double(index / INDEX_COUNT, index % INDEX_COUNT))
        } else {
            None
        }
    }
}

/// 字节偏移 → 数据扇区号；
/// 偏移在长度之外（或从未被伸长触及）时为空
pub(crate) fn translate(
    cache: &SectorCache,
    record: &InodeRecord,
    offset: usize,
) -> Option<SectorId> {
    if offset >= record.length as usize {
        return None;
    }

    let entry = match SectorPos::of(offset / SECTOR_SIZE)? {
        SectorPos::Direct(i) => record.direct[i],
        SectorPos::Single(i) => cache.map(sid(record.indirect1), 0, |index: &IndexBlock| index[i]),
        SectorPos::Double(i, j) => {
            let child = cache.map(sid(record.indirect2), 0, |index: &IndexBlock| index[i]);
            cache.map(sid(child), 0, |index: &IndexBlock| index[j])
        }
    };
    Some(sid(entry))
}

/// 创建inode记录并伸长到初始长度，返回记录所在扇区。
/// 两个间接索引扇区此时就预留，与`deallocate`的无条件归还配对。
pub(crate) fn create(
    cache: &SectorCache,
    free_map: &dyn FreeMap,
    kind: InodeKind,
    parent: SectorId,
    length: u32,
) -> Result<SectorId, Error> {
    let record_sector = free_map.allocate(1).ok_or(Error::NoSpace)?;

    let mut record = InodeRecord::new(kind, parent);
    record.indirect1 = alloc_zeroed(cache, free_map)?.raw() as u32;
    record.indirect2 = alloc_zeroed(cache, free_map)?.raw() as u32;
    grow(cache, free_map, &mut record, length)?;

    cache.store(record_sector, &record);
    log::debug!("created inode at sector {record_sector}, length {length}");
    Ok(record_sector)
}

/// 把记录伸长到`new_length`并持久化；严格单调，拒绝收缩
pub(crate) fn extend(
    cache: &SectorCache,
    free_map: &dyn FreeMap,
    record_sector: SectorId,
    new_length: u32,
) -> Result<(), Error> {
    let mut record: InodeRecord = cache.load(record_sector);
    grow(cache, free_map, &mut record, new_length)?;
    cache.store(record_sector, &record);
    Ok(())
}

/// 释放记录当前长度蕴含的所有数据扇区与按需创建的子索引块，
/// 再无条件归还两个预留索引扇区；记录自身的扇区由调用方归还
pub(crate) fn deallocate(cache: &SectorCache, free_map: &dyn FreeMap, record_sector: SectorId) {
    let record: InodeRecord = cache.load(record_sector);
    let total = InodeRecord::count_sectors(record.length);
    log::debug!("deallocating inode at sector {record_sector}, {total} data sectors");

    // 直接层
    for &entry in &record.direct[..total.min(DIRECT_COUNT)] {
        free_map.release(sid(entry), 1);
    }

    // 一级间接层的叶扇区
    if total > DIRECT_COUNT {
        let leaves = total.min(SINGLE_CAP) - DIRECT_COUNT;
        let run: Vec<u32> =
            cache.map(sid(record.indirect1), 0, |index: &IndexBlock| {
                index[..leaves].to_vec()
            });
        for entry in run {
            free_map.release(sid(entry), 1);
        }
    }

    // 二级间接层：逐个子索引块，叶扇区连同子块一起归还
    if total > SINGLE_CAP {
        let leaves = total - SINGLE_CAP;
        let children = leaves.div_ceil(INDEX_COUNT);
        let child_run: Vec<u32> =
            cache.map(sid(record.indirect2), 0, |index: &IndexBlock| {
                index[..children].to_vec()
            });
        for (nth, &child) in child_run.iter().enumerate() {
            let in_child = (leaves - nth * INDEX_COUNT).min(INDEX_COUNT);
            let run: Vec<u32> =
                cache.map(sid(child), 0, |index: &IndexBlock| index[..in_child].to_vec());
            for entry in run {
                free_map.release(sid(entry), 1);
            }
            free_map.release(sid(child), 1);
        }
    }

    // 预留的索引扇区
    free_map.release(sid(record.indirect1), 1);
    free_map.release(sid(record.indirect2), 1);
}

/// 在内存副本上逐层补齐扇区；成功才更新长度字段
fn grow(
    cache: &SectorCache,
    free_map: &dyn FreeMap,
    record: &mut InodeRecord,
    new_length: u32,
) -> Result<(), Error> {
    if new_length < record.length {
        return Err(Error::ShrinkForbidden);
    }
    if new_length > MAX_LENGTH {
        return Err(Error::TooLarge);
    }

    let mut cur = InodeRecord::count_sectors(record.length);
    let new_total = InodeRecord::count_sectors(new_length);

    // 直接层
    while cur < new_total.min(DIRECT_COUNT) {
        record.direct[cur] = alloc_zeroed(cache, free_map)?.raw() as u32;
        cur += 1;
    }

    // 一级间接层
    if new_total > DIRECT_COUNT && cur < SINGLE_CAP {
        let first = cur - DIRECT_COUNT;
        let last = new_total.min(SINGLE_CAP) - DIRECT_COUNT; // exclusive
        let fresh = alloc_run(cache, free_map, last - first)?;
        cache.map_mut(sid(record.indirect1), 0, |index: &mut IndexBlock| {
            index[first..last].copy_from_slice(&fresh)
        });
        cur = new_total.min(SINGLE_CAP);
    }

    // 二级间接层
    if new_total > SINGLE_CAP {
        let last = new_total - SINGLE_CAP; // exclusive
        let mut leaf = cur - SINGLE_CAP;
        while leaf < last {
            let child_index = leaf / INDEX_COUNT;
            let child_first = leaf % INDEX_COUNT;
            let child_last = (last - child_index * INDEX_COUNT).min(INDEX_COUNT);

            // 越过子索引块边界时按需创建
            if child_first == 0 {
                let child = alloc_zeroed(cache, free_map)?;
                cache.map_mut(sid(record.indirect2), 0, |index: &mut IndexBlock| {
                    index[child_index] = child.raw() as u32
                });
            }
            let child =
                cache.map(sid(record.indirect2), 0, |index: &IndexBlock| index[child_index]);

            let fresh = alloc_run(cache, free_map, child_last - child_first)?;
            cache.map_mut(sid(child), 0, |index: &mut IndexBlock| {
                index[child_first..child_last].copy_from_slice(&fresh)
            });

            leaf = child_index * INDEX_COUNT + child_last;
        }
    }

    record.length = new_length;
    Ok(())
}

/// 分配一个扇区并先行清零，之后才会被挂进索引
fn alloc_zeroed(cache: &SectorCache, free_map: &dyn FreeMap) -> Result<SectorId, Error> {
    let sector = free_map.allocate(1).ok_or(Error::NoSpace)?;
    cache.zero(sector);
    Ok(sector)
}

/// 依次分配`count`个清零扇区
fn alloc_run(
    cache: &SectorCache,
    free_map: &dyn FreeMap,
    count: usize,
) -> Result<Vec<u32>, Error> {
    let mut run = Vec::with_capacity(count);
    for _ in 0..count {
        run.push(alloc_zeroed(cache, free_map)?.raw() as u32);
    }
    Ok(run)
}

#[inline]
fn sid(raw: u32) -> SectorId {
    SectorId::new(raw as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_SECTORS;

    #[test]
    fn tier_boundaries() {
        assert_eq!(SectorPos::of(0), Some(SectorPos::Direct(0)));
        assert_eq!(SectorPos::of(121), Some(SectorPos::Direct(121)));
        assert_eq!(SectorPos::of(122), Some(SectorPos::Single(0)));
        assert_eq!(SectorPos::of(249), Some(SectorPos::Single(127)));
        assert_eq!(SectorPos::of(250), Some(SectorPos::Double(0, 0)));
        assert_eq!(SectorPos::of(250 + 127), Some(SectorPos::Double(0, 127)));
        assert_eq!(SectorPos::of(250 + 128), Some(SectorPos::Double(1, 0)));
        assert_eq!(
            SectorPos::of(MAX_SECTORS - 1),
            Some(SectorPos::Double(127, 127))
        );
        assert_eq!(SectorPos::of(MAX_SECTORS), None);
    }

    #[test]
    fn sector_counting() {
        assert_eq!(InodeRecord::count_sectors(0), 0);
        assert_eq!(InodeRecord::count_sectors(1), 1);
        assert_eq!(InodeRecord::count_sectors(512), 1);
        assert_eq!(InodeRecord::count_sectors(513), 2);
        assert_eq!(InodeRecord::count_sectors(MAX_LENGTH), MAX_SECTORS);
    }
}
