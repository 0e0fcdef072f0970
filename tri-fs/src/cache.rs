//! # 扇区缓存层
//!
//! 内存中开辟定容的扇区槽池，所有设备访问都经过这里；
//! 置换策略为时钟（二次机会）算法，脏槽写回后才被挪用。
//!
//! 锁序固定：结构锁 → 槽锁。
//! 结构锁只管槽目录与时钟指针，不跨设备I/O持有；
//! 槽锁保护单个槽的缓冲区与脏位，I/O期间持有，
//! 因此不同槽上的设备访问可以并发。
//! 槽锁内**不得**再进入缓存，否则锁序颠倒。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use block_dev::BlockDevice;
use spin::Mutex;

use crate::SectorBuf;
use crate::SectorId;
use crate::SECTOR_SIZE;

/// 扇区缓存，整体持有、可多实例，不做全局状态
pub struct SectorCache {
    dev: Arc<dyn BlockDevice>,
    slots: Box<[Slot]>,
    dir: Mutex<Directory>,
}

/// 槽目录：记录各槽当前占据的扇区号
struct Directory {
    resident: Box<[Option<SectorId>]>,
    /// 已投入使用的槽数，满容后不再增长
    used: usize,
    /// 时钟指针
    hand: usize,
}

struct Slot {
    /// 引用位：命中置1，时钟扫描清0
    referenced: AtomicBool,
    state: Mutex<SlotState>,
}

// 缓冲区放在头部，保证映射成`T`时的对齐
#[repr(C)]
struct SlotState {
    data: SectorBuf,
    id: SectorId,
    dirty: bool,
}

/// 未命中时槽的填充方式
enum Fill {
    /// 从设备读入现有内容
    ReadThrough,
    /// 调用者将覆写整个扇区，跳过设备读
    Overwrite,
}

impl SectorCache {
    /// 原实现的定容
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(dev: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0);

        let slots: Vec<Slot> = (0..capacity)
            .map(|_| Slot {
                referenced: AtomicBool::new(false),
                state: Mutex::new(SlotState {
                    data: [0; SECTOR_SIZE],
                    id: SectorId::new(0),
                    dirty: false,
                }),
            })
            .collect();

        Self {
            dev,
            slots: slots.into_boxed_slice(),
            dir: Mutex::new(Directory {
                resident: (0..capacity).map(|_| None).collect(),
                used: 0,
                hand: 0,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 读出整个扇区
    pub fn read(&self, id: SectorId, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let state = self.slot(id, Fill::ReadThrough);
        buf.copy_from_slice(&state.data);
    }

    /// 覆写整个扇区并置脏；未命中时不做读穿
    pub fn write(&self, id: SectorId, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut state = self.slot(id, Fill::Overwrite);
        state.data.copy_from_slice(buf);
        state.dirty = true;
    }

    /// 扇区清零并置脏
    pub fn zero(&self, id: SectorId) {
        let mut state = self.slot(id, Fill::Overwrite);
        state.data.fill(0);
        state.dirty = true;
    }

    /// 将扇区内容整体读出为一个`T`
    pub fn load<T: Copy>(&self, id: SectorId) -> T {
        let state = self.slot(id, Fill::ReadThrough);
        *state.get(0)
    }

    /// 将一个`T`整体写入扇区开头
    pub fn store<T: Copy>(&self, id: SectorId, value: &T) {
        let mut state = self.slot(id, Fill::ReadThrough);
        *state.get_mut(0) = *value;
    }

    /// 在槽锁内处理扇区的只读映射；`f`不得再进缓存
    #[inline]
    pub fn map<T, V>(&self, id: SectorId, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        let state = self.slot(id, Fill::ReadThrough);
        f(state.get(offset))
    }

    /// 在槽锁内修改扇区的映射并置脏；`f`不得再进缓存
    #[inline]
    pub fn map_mut<T, V>(&self, id: SectorId, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        let mut state = self.slot(id, Fill::ReadThrough);
        f(state.get_mut(offset))
    }

    /// 写回所有脏槽并清脏位；有序停机或外部需要持久点时调用
    pub fn flush_all(&self) {
        let dir = self.dir.lock();
        for index in 0..dir.used {
            let mut state = self.slots[index].state.lock();
            if state.dirty {
                state.dirty = false;
                self.dev.write_block(state.id.raw(), &state.data);
            }
        }
    }
}

impl SectorCache {
    /// 定位或腾出扇区所在的槽，返回其槽锁；
    /// 返回时结构锁已释放，设备访问只在槽锁内发生
    fn slot(&self, id: SectorId, fill: Fill) -> spin::MutexGuard<'_, SlotState> {
        let mut dir = self.dir.lock();

        // 命中。
        // 槽锁在结构锁内获取：目录项在两锁同持前不得改指，
        // 代价是等候正在I/O的槽时目录暂被占住
        if let Some(index) = dir.resident.iter().position(|slot| *slot == Some(id)) {
            self.slots[index].referenced.store(true, Ordering::Relaxed);
            let state = self.slots[index].state.lock();
            drop(dir);
            return state;
        }

        // 未命中：还有空槽则顺位取用，否则时钟置换
        let index = if dir.used < self.slots.len() {
            let index = dir.used;
            dir.used += 1;
            index
        } else {
            self.evict(&mut dir)
        };
        let evicted = dir.resident[index].replace(id);
        self.slots[index].referenced.store(true, Ordering::Relaxed);
        let mut state = self.slots[index].state.lock();
        drop(dir);

        // 槽已在目录中指向新扇区，旧内容写回**原**扇区
        if let Some(old) = evicted {
            debug_assert_eq!(old, state.id);
            if state.dirty {
                log::debug!("write back sector {old} on eviction");
                self.dev.write_block(old.raw(), &state.data);
            }
        }

        state.id = id;
        state.dirty = false;
        match fill {
            Fill::ReadThrough => self.dev.read_block(id.raw(), &mut state.data),
            Fill::Overwrite => {}
        }

        state
    }

    /// 时钟扫描：引用位为1者清零续命，为0者出局；
    /// 至多两轮必然停止，指针停在牺牲者之后
    fn evict(&self, dir: &mut Directory) -> usize {
        let mut index = dir.hand;
        while self.slots[index].referenced.swap(false, Ordering::Relaxed) {
            index = (index + 1) % self.slots.len();
        }
        dir.hand = (index + 1) % self.slots.len();
        index
    }
}

impl SlotState {
    fn get<T>(&self, offset: usize) -> &T {
        assert!(mem::size_of::<T>() + offset <= SECTOR_SIZE);
        let addr = (&self.data[offset] as *const u8).cast();
        unsafe { &*addr }
    }

    fn get_mut<T>(&mut self, offset: usize) -> &mut T {
        assert!(mem::size_of::<T>() + offset <= SECTOR_SIZE);
        self.dirty = true;
        let addr = (&mut self.data[offset] as *mut u8).cast();
        unsafe { &mut *addr }
    }
}
