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

//! Memory bus implementation for the Nintendo 64 physical address space
//!
//! The Bus is the entry point for every load and store issued by the CPU.
//! It looks up the 64KB region of the address in the region table and calls
//! the handler installed there. Breakpoints are handled by swapping the
//! installed handler, so the dispatch path itself never checks them.
//!
//! # Memory Map
//!
//! | Physical Address Range | Device           | Size    |
//! |------------------------|------------------|---------|
//! | 0x00000000-0x03EFFFFF  | RDRAM            | 8MB+    |
//! | 0x03F00000-0x03FFFFFF  | RDRAM registers  |         |
//! | 0x04000000-0x0400FFFF  | RSP DMEM/IMEM    | 8KB     |
//! | 0x04040000-0x048FFFFF  | RCP registers    |         |
//! | 0x05000000-0x05FFFFFF  | 64DD registers   |         |
//! | 0x06000000-0x07FFFFFF  | 64DD IPL ROM     | 4MB     |
//! | 0x08000000-0x0FFFFFFF  | Cart domain 2    |         |
//! | 0x10000000-0x1FBFFFFF  | Cartridge ROM    | 252MB   |
//! | 0x1FC00000-0x1FC007FF  | PIF ROM/RAM      | 2KB     |
//!
//! # Byte Order
//!
//! Handlers work on whole words. Sub-word accesses select big-endian lanes:
//! the byte at `address & 3 == 0` is bits 31..24 of the word.
//!
//! # Example
//!
//! ```
//! use n64bus::core::memory::{standard_mappings, BackingStore, Bus, NoBreakpoints, RDRAM_DEFAULT_SIZE};
//!
//! let store = BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap();
//! let bus = Bus::init(&standard_mappings(&store), Box::new(NoBreakpoints)).unwrap();
//!
//! bus.write32(0x0000_1000, 0x12345678);
//! assert_eq!(bus.read32(0x0000_1000), 0x12345678);
//! assert_eq!(bus.read8(0x0000_1000), 0x12);
//! assert_eq!(store.dram().read_u32(0x1000), Some(0x12345678));
//! ```

use crate::core::error::Result;

// Sub-modules
mod backing;
mod breakpoint;
mod devices;
mod export;
mod handler;
mod table;
mod window;

// Re-export public types
pub use backing::{
    BackingStore, Block, BlockAllocator, BlockKind, SystemAllocator, BLOCK_ALIGNMENT,
    CART_ROM_MAX_SIZE, DD_ROM_MAX_SIZE, PIF_RAM_SIZE, PIF_ROM_SIZE, RDRAM_ALIGNMENT,
    RDRAM_DEFAULT_SIZE, RDRAM_MAX_SIZE, RSP_MEM_SIZE,
};
pub use breakpoint::{BpCheck, BreakpointLayer, Interceptor, NoBreakpoints, RegistryRef};
pub use devices::{standard_mappings, RamHandler, RomHandler};
pub use export::{CacheInvalidator, MemoryExport};
pub use handler::{handler_ref, HandlerRef, MemHandler, OpenBus};
pub use table::{region_of, DeviceType, Entry, MemMapping, RegionTable, REGION_COUNT, REGION_SHIFT};
pub use window::{
    Location, Window, WindowCatalog, MM_CART_ROM, MM_DD_ROM, MM_PIF_MEM, MM_RDRAM_DRAM,
    MM_RDRAM_DRAM2, MM_RDRAM_REGS, MM_RSP_MEM,
};

/// Width of a bus access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
    Double,
}

impl AccessWidth {
    /// Size in bytes
    pub fn bytes(self) -> u32 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Half => 2,
            AccessWidth::Word => 4,
            AccessWidth::Double => 8,
        }
    }
}

/// Memory bus routing accesses through the region table
pub struct Bus {
    table: RegionTable,
    breakpoints: Box<dyn BreakpointLayer>,
}

impl Bus {
    /// Create a bus with every region on open bus
    pub fn new(breakpoints: Box<dyn BreakpointLayer>) -> Self {
        Self {
            table: RegionTable::new(),
            breakpoints,
        }
    }

    /// Create a bus and apply `mappings` in order
    ///
    /// Later mappings override earlier ones where they overlap.
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidMapping` for a mapping with
    /// `begin > end`. Mappings before it have already been applied.
    pub fn init(mappings: &[MemMapping], breakpoints: Box<dyn BreakpointLayer>) -> Result<Self> {
        let mut bus = Self::new(breakpoints);
        for mapping in mappings {
            bus.apply_mapping(mapping)?;
        }
        Ok(bus)
    }

    /// Install a mapping over every region it covers
    pub fn apply_mapping(&mut self, mapping: &MemMapping) -> Result<()> {
        let regions = mapping.regions()?;
        log::debug!(
            "Mapping 0x{:08X}-0x{:08X} to {:?} ({})",
            mapping.begin,
            mapping.end,
            mapping.device_type,
            mapping.handler.borrow().name()
        );

        for region in regions {
            self.breakpoints
                .map_region(&mut self.table, region, mapping.device_type, &mapping.handler);
        }
        Ok(())
    }

    /// Full entry serving `address`
    pub fn lookup(&self, address: u32) -> Entry {
        self.table.lookup(address)
    }

    /// Device type at `address`, unaffected by breakpoints
    pub fn memory_type(&self, address: u32) -> DeviceType {
        self.table.classify(address)
    }

    pub fn table(&self) -> &RegionTable {
        &self.table
    }

    pub fn breakpoints(&self) -> &dyn BreakpointLayer {
        self.breakpoints.as_ref()
    }

    pub fn activate_break_read(&mut self, address: u32) {
        self.breakpoints.activate_read(&mut self.table, address);
    }

    pub fn deactivate_break_read(&mut self, address: u32) {
        self.breakpoints.deactivate_read(&mut self.table, address);
    }

    pub fn activate_break_write(&mut self, address: u32) {
        self.breakpoints.activate_write(&mut self.table, address);
    }

    pub fn deactivate_break_write(&mut self, address: u32) {
        self.breakpoints.deactivate_write(&mut self.table, address);
    }

    /// Record the CPU's pc for breakpoint hits
    ///
    /// Hits report `pc - 4`, the instruction that issued the access.
    pub fn set_last_pc(&mut self, pc: u32) {
        self.breakpoints.set_last_pc(pc);
    }

    #[inline]
    fn read_word(&self, address: u32) -> u32 {
        self.table.handler(address).borrow_mut().read_word(address)
    }

    /// Raw word write with a caller supplied byte-enable mask
    ///
    /// `address` is aligned down to a word.
    #[inline]
    pub fn write_masked(&self, address: u32, value: u32, mask: u32) {
        let address = address & !3;
        self.table
            .handler(address)
            .borrow_mut()
            .write_word(address, value, mask);
    }

    /// Read a value of `width` at `address`
    ///
    /// The address is aligned down to the access width; the CPU core is
    /// expected to raise address errors before reaching the bus.
    pub fn read(&self, address: u32, width: AccessWidth) -> u64 {
        match width {
            AccessWidth::Byte => self.read8(address) as u64,
            AccessWidth::Half => self.read16(address) as u64,
            AccessWidth::Word => self.read32(address) as u64,
            AccessWidth::Double => self.read64(address),
        }
    }

    /// Write the low `width` bytes of `value` at `address`
    pub fn write(&self, address: u32, value: u64, width: AccessWidth) {
        match width {
            AccessWidth::Byte => self.write8(address, value as u8),
            AccessWidth::Half => self.write16(address, value as u16),
            AccessWidth::Word => self.write32(address, value as u32),
            AccessWidth::Double => self.write64(address, value),
        }
    }

    pub fn read8(&self, address: u32) -> u8 {
        let shift = (3 - (address & 3)) * 8;
        (self.read_word(address & !3) >> shift) as u8
    }

    pub fn read16(&self, address: u32) -> u16 {
        let shift = (2 - (address & 2)) * 8;
        (self.read_word(address & !3) >> shift) as u16
    }

    pub fn read32(&self, address: u32) -> u32 {
        self.read_word(address & !3)
    }

    /// Two word reads, high word first
    pub fn read64(&self, address: u32) -> u64 {
        let address = address & !7;
        let hi = self.read_word(address) as u64;
        let lo = self.read_word(address + 4) as u64;
        (hi << 32) | lo
    }

    pub fn write8(&self, address: u32, value: u8) {
        let shift = (3 - (address & 3)) * 8;
        self.write_masked(address, (value as u32) << shift, 0xFF << shift);
    }

    pub fn write16(&self, address: u32, value: u16) {
        let shift = (2 - (address & 2)) * 8;
        self.write_masked(address, (value as u32) << shift, 0xFFFF << shift);
    }

    pub fn write32(&self, address: u32, value: u32) {
        self.write_masked(address, value, u32::MAX);
    }

    /// Two word writes, high word first
    pub fn write64(&self, address: u32, value: u64) {
        let address = address & !7;
        self.write_masked(address, (value >> 32) as u32, u32::MAX);
        self.write_masked(address + 4, value as u32, u32::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::debugger::{BreakpointFlags, BreakpointList};
    use crate::core::error::EmulatorError;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Handler recording every access
    #[derive(Default)]
    struct Recorder {
        words: std::collections::HashMap<u32, u32>,
        writes: Vec<(u32, u32, u32)>,
    }

    impl MemHandler for Recorder {
        fn read_word(&mut self, address: u32) -> u32 {
            self.words.get(&address).copied().unwrap_or(0)
        }

        fn write_word(&mut self, address: u32, value: u32, mask: u32) {
            self.writes.push((address, value, mask));
            let word = self.words.entry(address).or_insert(0);
            *word = (*word & !mask) | (value & mask);
        }
    }

    fn store() -> BackingStore {
        BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap()
    }

    fn dram_cart_bus(store: &BackingStore, layer: Box<dyn BreakpointLayer>) -> Bus {
        let mappings = vec![
            MemMapping::new(
                0x0000_0000,
                0x003F_FFFF,
                DeviceType::Rdram,
                handler_ref(RamHandler::new("RDRAM", Rc::clone(store.dram()), 0)),
            ),
            MemMapping::new(
                0x1000_0000,
                0x1FBF_FFFF,
                DeviceType::Rom,
                handler_ref(RomHandler::new(
                    "cartridge ROM",
                    Rc::clone(store.cart_rom()),
                    MM_CART_ROM,
                )),
            ),
        ];
        Bus::init(&mappings, layer).unwrap()
    }

    #[test]
    fn test_scenario_lookup_device_types() {
        let store = store();
        let bus = dram_cart_bus(&store, Box::new(NoBreakpoints));

        assert_eq!(bus.lookup(0x0001_2340).device_type, DeviceType::Rdram);
        assert_eq!(bus.lookup(0x1000_0004).device_type, DeviceType::Rom);
        assert_eq!(bus.lookup(0x0400_0000).device_type, DeviceType::Nothing);
    }

    #[test]
    fn test_scenario_write_breakpoint_still_reaches_dram() {
        let store = store();
        let mut bus = dram_cart_bus(&store, Box::new(Interceptor::new(None)));

        bus.activate_break_write(0x0001_2340);
        assert_eq!(bus.lookup(0x0001_2340).handler.borrow().name(), "debug handler");

        bus.write32(0x0001_2340, 0xDEAD_BEEF);
        assert_eq!(store.dram().read_u32(0x12340), Some(0xDEAD_BEEF));
        assert_eq!(bus.read32(0x0001_2340), 0xDEAD_BEEF);
        assert_eq!(bus.memory_type(0x0001_2340), DeviceType::Rdram);
    }

    #[test]
    fn test_later_mapping_wins() {
        let a = handler_ref(Recorder::default());
        let b = handler_ref(Recorder::default());
        let bus = Bus::init(
            &[
                MemMapping::new(0x0000_0000, 0x00FF_FFFF, DeviceType::Rdram, a.clone()),
                MemMapping::new(0x0010_0000, 0x001F_FFFF, DeviceType::Rom, b.clone()),
            ],
            Box::new(NoBreakpoints),
        )
        .unwrap();

        assert!(Rc::ptr_eq(&bus.lookup(0x000F_FFFF).handler, &a));
        assert!(Rc::ptr_eq(&bus.lookup(0x0010_0000).handler, &b));
        assert!(Rc::ptr_eq(&bus.lookup(0x001F_FFFF).handler, &b));
        assert!(Rc::ptr_eq(&bus.lookup(0x0020_0000).handler, &a));
        assert_eq!(bus.memory_type(0x0018_0000), DeviceType::Rom);
    }

    #[test]
    fn test_invalid_mapping_rejected() {
        let err = Bus::init(
            &[MemMapping::new(
                0x0002_0000,
                0x0001_0000,
                DeviceType::Rdram,
                handler_ref(OpenBus),
            )],
            Box::new(NoBreakpoints),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmulatorError::InvalidMapping { .. }));
    }

    #[test]
    fn test_top_region_mapping() {
        let h = handler_ref(Recorder::default());
        let bus = Bus::init(
            &[MemMapping::new(0xFFFF_0000, 0xFFFF_FFFF, DeviceType::IsViewer, h.clone())],
            Box::new(NoBreakpoints),
        )
        .unwrap();

        bus.write32(0xFFFF_FFFC, 7);
        assert_eq!(bus.read32(0xFFFF_FFFC), 7);
        assert_eq!(bus.memory_type(0xFFFF_FFFF), DeviceType::IsViewer);
    }

    #[test]
    fn test_sub_word_lanes_are_big_endian() {
        let rec = Rc::new(RefCell::new(Recorder::default()));
        let bus = Bus::init(
            &[MemMapping::new(0, 0xFFFF, DeviceType::Rdram, rec.clone())],
            Box::new(NoBreakpoints),
        )
        .unwrap();

        bus.write32(0x100, 0x1122_3344);
        assert_eq!(bus.read8(0x100), 0x11);
        assert_eq!(bus.read8(0x101), 0x22);
        assert_eq!(bus.read8(0x102), 0x33);
        assert_eq!(bus.read8(0x103), 0x44);
        assert_eq!(bus.read16(0x100), 0x1122);
        assert_eq!(bus.read16(0x102), 0x3344);

        bus.write8(0x101, 0xAA);
        bus.write16(0x102, 0xBBCC);
        assert_eq!(bus.read32(0x100), 0x11AA_BBCC);

        let writes = &rec.borrow().writes;
        assert_eq!(writes[1], (0x100, 0x00AA_0000, 0x00FF_0000));
        assert_eq!(writes[2], (0x100, 0x0000_BBCC, 0x0000_FFFF));
    }

    #[test]
    fn test_double_word_access() {
        let store = store();
        let bus = dram_cart_bus(&store, Box::new(NoBreakpoints));

        bus.write64(0x200, 0x0123_4567_89AB_CDEF);
        assert_eq!(bus.read32(0x200), 0x0123_4567);
        assert_eq!(bus.read32(0x204), 0x89AB_CDEF);
        assert_eq!(bus.read64(0x204), 0x0123_4567_89AB_CDEF);
        assert_eq!(bus.read(0x200, AccessWidth::Double), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn test_generic_read_write() {
        let store = store();
        let bus = dram_cart_bus(&store, Box::new(NoBreakpoints));

        bus.write(0x300, 0xFFFF_FFFF_1234_5678, AccessWidth::Word);
        assert_eq!(bus.read(0x300, AccessWidth::Word), 0x1234_5678);
        bus.write(0x302, 0x9999, AccessWidth::Half);
        assert_eq!(bus.read(0x300, AccessWidth::Word), 0x1234_9999);
        bus.write(0x300, 0x00, AccessWidth::Byte);
        assert_eq!(bus.read(0x300, AccessWidth::Byte), 0);
        assert_eq!(AccessWidth::Double.bytes(), 8);
    }

    #[test]
    fn test_rom_writes_ignored_through_bus() {
        let mut store = store();
        store.load_cart_rom(&[0x80, 0x37, 0x12, 0x40]).unwrap();
        let bus = dram_cart_bus(&store, Box::new(NoBreakpoints));

        bus.write32(0x1000_0000, 0);
        assert_eq!(bus.read32(0x1000_0000), 0x8037_1240);
        assert_eq!(bus.read8(0x1000_0000), 0x80);
    }

    #[test]
    fn test_read_breakpoint_reports_hit_and_returns_value() {
        let registry = Rc::new(RefCell::new(BreakpointList::new()));
        registry.borrow_mut().add(
            0x0001_2340,
            0x0001_2343,
            BreakpointFlags::ENABLED | BreakpointFlags::READ,
        );

        let store = store();
        let mut bus = dram_cart_bus(&store, Box::new(Interceptor::new(Some(registry.clone()))));

        // Mapped after the breakpoint existed, so the region starts intercepted
        assert_eq!(bus.breakpoints().check_mask(0x0001_2340), BpCheck::READ);

        store.dram().write_u32(0x12340, 0xCAFE_F00D, u32::MAX);
        bus.set_last_pc(0x8000_0180);
        assert_eq!(bus.read32(0x0001_2340), 0xCAFE_F00D);

        let hits = registry.borrow_mut().drain_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pc, 0x8000_017C);
        assert_eq!(hits[0].address, 0x0001_2340);
    }

    #[test]
    fn test_classification_survives_interception() {
        let store = store();
        let mut bus = dram_cart_bus(&store, Box::new(Interceptor::new(None)));

        bus.activate_break_read(0x1000_0000);
        bus.activate_break_write(0x1000_0000);
        assert_eq!(bus.memory_type(0x1000_0000), DeviceType::Rom);
        assert_eq!(bus.lookup(0x1000_0000).device_type, DeviceType::Rom);

        bus.deactivate_break_read(0x1000_0000);
        bus.deactivate_break_write(0x1000_0000);
        assert_eq!(
            bus.lookup(0x1000_0000).handler.borrow().name(),
            "cartridge ROM"
        );
    }
}
