//! # 空闲扇区分配契约
//!
//! 位图分配器的磁盘格式不在本层；
//! 存储层只经由此契约取得与归还扇区。

use crate::SectorId;

pub trait FreeMap: Send + Sync {
    /// 分配`count`个连续扇区，返回首扇区号；空间耗尽为空
    fn allocate(&self, count: usize) -> Option<SectorId>;

    /// 归还自`sector`起的`count`个扇区
    fn release(&self, sector: SectorId, count: usize);
}
