// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Backing memory blocks
//!
//! The backing store owns the five raw memory blocks of the machine:
//!
//! | Block          | Size          | Alignment |
//! |----------------|---------------|-----------|
//! | RDRAM          | configurable  | 64KB      |
//! | Cartridge ROM  | 252MB         | 4KB       |
//! | RSP memory     | 8KB           | 4KB       |
//! | DD ROM         | 4MB           | 4KB       |
//! | PIF memory     | 2KB           | 4KB       |
//!
//! Blocks are created together and released together. Device handlers hold
//! `Rc<Block>` clones, so a block lives until both the store and every
//! handler using it are gone.
//!
//! Words are stored in host byte order. Images loaded from big-endian
//! dumps are converted word by word on load.

use super::window::{Location, WindowCatalog};
use crate::core::error::{EmulatorError, Result};
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

/// Default RDRAM size (4MB base + 4MB expansion pak)
pub const RDRAM_DEFAULT_SIZE: usize = 0x0080_0000;
/// Largest RDRAM reachable through the low and high DRAM windows
pub const RDRAM_MAX_SIZE: usize = 0x0BF0_0000;
/// Cartridge ROM window size (0x10000000-0x1FBFFFFF)
pub const CART_ROM_MAX_SIZE: usize = 0x0FC0_0000;
/// RSP DMEM + IMEM
pub const RSP_MEM_SIZE: usize = 0x2000;
/// 64DD IPL ROM
pub const DD_ROM_MAX_SIZE: usize = 0x0040_0000;
/// PIF boot ROM
pub const PIF_ROM_SIZE: usize = 0x7C0;
/// PIF RAM, directly after the boot ROM
pub const PIF_RAM_SIZE: usize = 0x40;

/// Alignment of the RDRAM block
pub const RDRAM_ALIGNMENT: usize = 0x1_0000;
/// Alignment of every other block
pub const BLOCK_ALIGNMENT: usize = 0x1000;

/// Identifies one of the backing blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Dynamic RAM
    Dram,
    /// Cartridge ROM
    CartRom,
    /// RSP local memory (DMEM/IMEM)
    RspMem,
    /// 64DD secondary drive ROM
    DdRom,
    /// PIF boot ROM and RAM
    PifMem,
}

impl BlockKind {
    /// Allocation order used by [`BackingStore::create`]
    pub const ALL: [BlockKind; 5] = [
        BlockKind::Dram,
        BlockKind::CartRom,
        BlockKind::RspMem,
        BlockKind::DdRom,
        BlockKind::PifMem,
    ];
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Dram => "RDRAM",
            BlockKind::CartRom => "cartridge ROM",
            BlockKind::RspMem => "RSP memory",
            BlockKind::DdRom => "DD ROM",
            BlockKind::PifMem => "PIF memory",
        };
        f.write_str(name)
    }
}

/// Source of raw block memory
///
/// The default [`SystemAllocator`] goes through the global allocator.
/// Custom allocators can place blocks elsewhere (or fail on purpose).
pub trait BlockAllocator {
    /// Allocate zero-filled memory for `layout`, or `None` on failure
    fn allocate(&self, kind: BlockKind, layout: Layout) -> Option<NonNull<u8>>;

    /// Return memory obtained from [`BlockAllocator::allocate`]
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn release(&self, kind: BlockKind, ptr: NonNull<u8>, layout: Layout);
}

/// Global-allocator backed [`BlockAllocator`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl BlockAllocator for SystemAllocator {
    fn allocate(&self, _kind: BlockKind, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: layout has a non-zero size
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn release(&self, _kind: BlockKind, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// One aligned, owned allocation
///
/// Accessors take `&self` and copy values in and out; no reference into
/// the block contents is ever handed out, so shared `Rc<Block>` clones may
/// read and write freely on the owning thread.
pub struct Block {
    kind: BlockKind,
    ptr: NonNull<u8>,
    layout: Layout,
    allocator: Rc<dyn BlockAllocator>,
}

impl Block {
    fn allocate(
        kind: BlockKind,
        size: usize,
        align: usize,
        allocator: &Rc<dyn BlockAllocator>,
    ) -> Result<Self> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| EmulatorError::AllocationFailure { block: kind })?;

        let Some(ptr) = allocator.allocate(kind, layout) else {
            log::error!("Failed to allocate {} ({} bytes)", kind, size);
            return Err(EmulatorError::AllocationFailure { block: kind });
        };

        if (ptr.as_ptr() as usize) % align != 0 {
            log::error!(
                "{} allocation at {:p} is not {}-byte aligned",
                kind,
                ptr.as_ptr(),
                align
            );
            // SAFETY: ptr was just returned by this allocator for this layout
            unsafe { allocator.release(kind, ptr, layout) };
            return Err(EmulatorError::AllocationFailure { block: kind });
        }

        log::trace!("Allocated {} ({} bytes at {:p})", kind, size, ptr.as_ptr());

        Ok(Self {
            kind,
            ptr,
            layout,
            allocator: Rc::clone(allocator),
        })
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Base address of the block
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Pointer to `offset`, if it lies inside the block
    pub fn ptr_at(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset >= self.len() {
            return None;
        }
        // SAFETY: offset is within the allocation
        Some(unsafe { self.ptr.add(offset) })
    }

    fn range_ok(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len())
    }

    /// Read a host-order word at `offset`
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        if !self.range_ok(offset, 4) {
            return None;
        }
        // SAFETY: bounds checked above, no outstanding references into the block
        Some(unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_unaligned() })
    }

    /// Merge `value` into the word at `offset`, touching only bits set in `mask`
    ///
    /// Returns `false` if the word is out of bounds.
    pub fn write_u32(&self, offset: usize, value: u32, mask: u32) -> bool {
        if !self.range_ok(offset, 4) {
            return false;
        }
        // SAFETY: bounds checked above, no outstanding references into the block
        unsafe {
            let p = self.ptr.as_ptr().add(offset).cast::<u32>();
            let old = p.read_unaligned();
            p.write_unaligned((old & !mask) | (value & mask));
        }
        true
    }

    /// Copy bytes out of the block
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> bool {
        if !self.range_ok(offset, buf.len()) {
            return false;
        }
        // SAFETY: bounds checked, `buf` cannot alias the block
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), buf.as_mut_ptr(), buf.len())
        };
        true
    }

    /// Copy bytes into the block
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> bool {
        if !self.range_ok(offset, data.len()) {
            return false;
        }
        // SAFETY: bounds checked, `data` cannot alias the block
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len())
        };
        true
    }

    /// Store a big-endian byte stream as host-order words starting at `offset`
    ///
    /// A trailing partial word is zero padded.
    pub fn load_be_words(&self, offset: usize, data: &[u8]) -> bool {
        let padded = data.len().div_ceil(4) * 4;
        if !self.range_ok(offset, padded) {
            return false;
        }
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_u32(offset + i * 4, u32::from_be_bytes(word), u32::MAX);
        }
        true
    }

    pub fn fill(&self, byte: u8) {
        // SAFETY: writes exactly the allocation
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), byte, self.len()) };
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        log::trace!("Releasing {} ({} bytes)", self.kind, self.len());
        // SAFETY: ptr/layout came from this allocator and are dropped once
        unsafe { self.allocator.release(self.kind, self.ptr, self.layout) };
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("kind", &self.kind)
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .field("align", &self.align())
            .finish()
    }
}

/// The machine's raw memory
///
/// # Example
///
/// ```
/// use n64bus::core::memory::{BackingStore, RDRAM_DEFAULT_SIZE};
///
/// let store = BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap();
/// assert!(store.translate(0x0000_1000).is_some());
/// assert!(store.translate(0x0430_0000).is_none()); // MI registers
/// store.destroy();
/// ```
pub struct BackingStore {
    dram: Rc<Block>,
    cart_rom: Rc<Block>,
    rsp_mem: Rc<Block>,
    dd_rom: Rc<Block>,
    pif_mem: Rc<Block>,

    /// Length of the loaded cartridge image
    cart_rom_len: usize,

    windows: WindowCatalog,
}

impl BackingStore {
    /// Allocate all blocks from the global allocator
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::AllocationFailure` naming the first block that
    /// could not be allocated. Blocks allocated before it are released.
    pub fn create(dram_size: usize) -> Result<Self> {
        Self::create_with(Rc::new(SystemAllocator), dram_size)
    }

    /// Allocate all blocks from `allocator`
    pub fn create_with(allocator: Rc<dyn BlockAllocator>, dram_size: usize) -> Result<Self> {
        // Blocks already allocated are dropped (and released) on early return
        let dram = Block::allocate(BlockKind::Dram, dram_size, RDRAM_ALIGNMENT, &allocator)?;
        let cart_rom = Block::allocate(
            BlockKind::CartRom,
            CART_ROM_MAX_SIZE,
            BLOCK_ALIGNMENT,
            &allocator,
        )?;
        let rsp_mem = Block::allocate(BlockKind::RspMem, RSP_MEM_SIZE, BLOCK_ALIGNMENT, &allocator)?;
        let dd_rom = Block::allocate(
            BlockKind::DdRom,
            DD_ROM_MAX_SIZE,
            BLOCK_ALIGNMENT,
            &allocator,
        )?;
        let pif_mem = Block::allocate(
            BlockKind::PifMem,
            PIF_ROM_SIZE + PIF_RAM_SIZE,
            BLOCK_ALIGNMENT,
            &allocator,
        )?;

        let windows = WindowCatalog::standard()?;

        log::info!(
            "Backing store ready: RDRAM {}KB, cartridge ROM {}MB",
            dram_size / 1024,
            CART_ROM_MAX_SIZE / (1024 * 1024)
        );

        Ok(Self {
            dram: Rc::new(dram),
            cart_rom: Rc::new(cart_rom),
            rsp_mem: Rc::new(rsp_mem),
            dd_rom: Rc::new(dd_rom),
            pif_mem: Rc::new(pif_mem),
            cart_rom_len: 0,
            windows,
        })
    }

    /// Release the store
    ///
    /// Blocks still referenced by attached handlers are freed when the last
    /// handler goes away.
    pub fn destroy(self) {
        log::debug!("Destroying backing store");
        drop(self);
    }

    pub fn block(&self, kind: BlockKind) -> &Rc<Block> {
        match kind {
            BlockKind::Dram => &self.dram,
            BlockKind::CartRom => &self.cart_rom,
            BlockKind::RspMem => &self.rsp_mem,
            BlockKind::DdRom => &self.dd_rom,
            BlockKind::PifMem => &self.pif_mem,
        }
    }

    pub fn dram(&self) -> &Rc<Block> {
        &self.dram
    }

    pub fn cart_rom(&self) -> &Rc<Block> {
        &self.cart_rom
    }

    pub fn rsp_mem(&self) -> &Rc<Block> {
        &self.rsp_mem
    }

    pub fn dd_rom(&self) -> &Rc<Block> {
        &self.dd_rom
    }

    pub fn pif_mem(&self) -> &Rc<Block> {
        &self.pif_mem
    }

    /// Length of the loaded cartridge image (0 if none)
    pub fn cart_rom_len(&self) -> usize {
        self.cart_rom_len
    }

    pub fn windows(&self) -> &WindowCatalog {
        &self.windows
    }

    /// Resolve an address to a block and an in-bounds offset
    ///
    /// Offsets past the end of the block (e.g. the unused tail of the PIF
    /// window) are a miss.
    pub fn locate(&self, address: u32) -> Option<Location> {
        self.windows
            .resolve(address)
            .filter(|loc| loc.offset < self.block(loc.block).len())
    }

    /// Translate a physical address into a pointer into backing memory
    ///
    /// Returns `None` for addresses without raw backing (register space,
    /// unmapped space, offsets beyond a block). The pointer is only valid
    /// while the block is alive.
    pub fn translate(&self, address: u32) -> Option<NonNull<u8>> {
        let loc = self.locate(address)?;
        self.block(loc.block).ptr_at(loc.offset)
    }

    /// Load a big-endian cartridge image
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::RomTooLarge` if the image exceeds the
    /// cartridge ROM block.
    pub fn load_cart_rom(&mut self, image: &[u8]) -> Result<()> {
        Self::load_image(&self.cart_rom, image, CART_ROM_MAX_SIZE)?;
        self.cart_rom_len = image.len();
        log::info!("Loaded cartridge ROM ({} bytes)", image.len());
        Ok(())
    }

    /// Load a big-endian PIF boot ROM image
    pub fn load_pif_rom(&mut self, image: &[u8]) -> Result<()> {
        Self::load_image(&self.pif_mem, image, PIF_ROM_SIZE)?;
        log::info!("Loaded PIF ROM ({} bytes)", image.len());
        Ok(())
    }

    /// Load a big-endian 64DD IPL ROM image
    pub fn load_dd_rom(&mut self, image: &[u8]) -> Result<()> {
        Self::load_image(&self.dd_rom, image, DD_ROM_MAX_SIZE)?;
        log::info!("Loaded DD ROM ({} bytes)", image.len());
        Ok(())
    }

    fn load_image(block: &Block, image: &[u8], max: usize) -> Result<()> {
        // A partial trailing word is padded, so round up before comparing
        if image.len().div_ceil(4) * 4 > max || !block.load_be_words(0, image) {
            return Err(EmulatorError::RomTooLarge {
                block: block.kind(),
                size: image.len(),
                max,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStore")
            .field("dram", &self.dram)
            .field("cart_rom", &self.cart_rom)
            .field("rsp_mem", &self.rsp_mem)
            .field("dd_rom", &self.dd_rom)
            .field("pif_mem", &self.pif_mem)
            .field("cart_rom_len", &self.cart_rom_len)
            .finish()
    }
}
