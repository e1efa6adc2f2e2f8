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

//! Memory-backed device handlers and the standard device map
//!
//! Register devices (VI, AI, PI, ...) live outside this crate. The standard
//! map tags their regions and routes them to open bus until a real device is
//! attached over them with a later mapping.

use super::backing::{BackingStore, Block, PIF_ROM_SIZE};
use super::handler::{handler_ref, HandlerRef, MemHandler, OpenBus};
use super::table::{DeviceType, MemMapping};
use super::window::{MM_CART_ROM, MM_DD_ROM, MM_PIF_MEM, MM_RDRAM_DRAM, MM_RDRAM_DRAM2, MM_RDRAM_REGS, MM_RSP_MEM};
use std::rc::Rc;

/// Read/write memory over a backing block
///
/// `address - base` (optionally masked for mirroring) plus `block_offset`
/// selects the word. Accesses outside the block read zero and drop writes.
pub struct RamHandler {
    block: Rc<Block>,
    base: u32,
    block_offset: usize,
    mirror_mask: u32,
    read_only_below: usize,
    name: &'static str,
}

impl RamHandler {
    pub fn new(name: &'static str, block: Rc<Block>, base: u32) -> Self {
        Self {
            block,
            base,
            block_offset: 0,
            mirror_mask: u32::MAX,
            read_only_below: 0,
            name,
        }
    }

    /// Start at `offset` inside the block instead of at its beginning
    pub fn at_offset(mut self, offset: usize) -> Self {
        self.block_offset = offset;
        self
    }

    /// Mirror the block every `mask + 1` bytes
    pub fn mirrored(mut self, mask: u32) -> Self {
        self.mirror_mask = mask;
        self
    }

    /// Ignore writes to the first `len` bytes of the block
    pub fn read_only_below(mut self, len: usize) -> Self {
        self.read_only_below = len;
        self
    }

    #[inline]
    fn offset(&self, address: u32) -> usize {
        self.block_offset + (address.wrapping_sub(self.base) & self.mirror_mask) as usize
    }
}

impl MemHandler for RamHandler {
    fn read_word(&mut self, address: u32) -> u32 {
        self.block.read_u32(self.offset(address)).unwrap_or_else(|| {
            log::trace!("{} read32 at 0x{:08X} past end of block", self.name, address);
            0
        })
    }

    fn write_word(&mut self, address: u32, value: u32, mask: u32) {
        let offset = self.offset(address);
        if offset < self.read_only_below {
            log::trace!("Attempt to write to {} ROM at 0x{:08X} (ignored)", self.name, address);
            return;
        }
        if !self.block.write_u32(offset, value, mask) {
            log::trace!("{} write32 at 0x{:08X} past end of block", self.name, address);
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Read-only memory over a backing block
pub struct RomHandler {
    block: Rc<Block>,
    base: u32,
    name: &'static str,
}

impl RomHandler {
    pub fn new(name: &'static str, block: Rc<Block>, base: u32) -> Self {
        Self { block, base, name }
    }
}

impl MemHandler for RomHandler {
    fn read_word(&mut self, address: u32) -> u32 {
        let offset = address.wrapping_sub(self.base) as usize;
        self.block.read_u32(offset).unwrap_or(0)
    }

    fn write_word(&mut self, address: u32, value: u32, _mask: u32) {
        // ROM is read-only, ignore writes
        log::trace!(
            "Attempt to write to {} at 0x{:08X} = 0x{:08X} (ignored)",
            self.name,
            address,
            value
        );
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Build the standard device map over a backing store
///
/// Later entries override earlier ones, so the high DRAM window (present
/// only with more than 0x03F00000 bytes of RDRAM) replaces the domain 2
/// tag at 0x08000000.
pub fn standard_mappings(store: &BackingStore) -> Vec<MemMapping> {
    let open_bus = handler_ref(OpenBus);
    let dram_len = store.dram().len() as u32;
    let low_dram_len = dram_len.min(MM_RDRAM_REGS);

    let rdram: HandlerRef = handler_ref(RamHandler::new(
        "RDRAM",
        Rc::clone(store.dram()),
        MM_RDRAM_DRAM,
    ));

    let mut mappings = vec![
        MemMapping::new(
            MM_RDRAM_DRAM,
            MM_RDRAM_DRAM + low_dram_len - 1,
            DeviceType::Rdram,
            Rc::clone(&rdram),
        ),
        MemMapping::new(
            MM_RDRAM_REGS,
            MM_RDRAM_REGS + 0xF_FFFF,
            DeviceType::RdramRegs,
            Rc::clone(&open_bus),
        ),
        MemMapping::new(
            MM_RSP_MEM,
            MM_RSP_MEM + 0xFFFF,
            DeviceType::RspMem,
            handler_ref(
                RamHandler::new("RSP memory", Rc::clone(store.rsp_mem()), MM_RSP_MEM)
                    .mirrored(0x1FFF),
            ),
        ),
        MemMapping::new(0x0404_0000, 0x0407_FFFF, DeviceType::RspRegs, Rc::clone(&open_bus)),
        MemMapping::new(0x0408_0000, 0x040F_FFFF, DeviceType::Rsp, Rc::clone(&open_bus)),
        MemMapping::new(0x0410_0000, 0x041F_FFFF, DeviceType::Dp, Rc::clone(&open_bus)),
        MemMapping::new(0x0420_0000, 0x042F_FFFF, DeviceType::Dps, Rc::clone(&open_bus)),
        MemMapping::new(0x0430_0000, 0x043F_FFFF, DeviceType::Mi, Rc::clone(&open_bus)),
        MemMapping::new(0x0440_0000, 0x044F_FFFF, DeviceType::Vi, Rc::clone(&open_bus)),
        MemMapping::new(0x0450_0000, 0x045F_FFFF, DeviceType::Ai, Rc::clone(&open_bus)),
        MemMapping::new(0x0460_0000, 0x046F_FFFF, DeviceType::Pi, Rc::clone(&open_bus)),
        MemMapping::new(0x0470_0000, 0x047F_FFFF, DeviceType::Ri, Rc::clone(&open_bus)),
        MemMapping::new(0x0480_0000, 0x048F_FFFF, DeviceType::Si, Rc::clone(&open_bus)),
        MemMapping::new(0x0500_0000, 0x05FF_FFFF, DeviceType::DdRegs, Rc::clone(&open_bus)),
        MemMapping::new(
            MM_DD_ROM,
            MM_DD_ROM + 0x01FF_FFFF,
            DeviceType::DdRom,
            handler_ref(RomHandler::new("DD ROM", Rc::clone(store.dd_rom()), MM_DD_ROM)),
        ),
        MemMapping::new(
            MM_RDRAM_DRAM2,
            MM_CART_ROM - 1,
            DeviceType::FlashRamStat,
            Rc::clone(&open_bus),
        ),
        MemMapping::new(
            MM_CART_ROM,
            MM_PIF_MEM - 1,
            DeviceType::Rom,
            handler_ref(RomHandler::new(
                "cartridge ROM",
                Rc::clone(store.cart_rom()),
                MM_CART_ROM,
            )),
        ),
        MemMapping::new(
            MM_PIF_MEM,
            MM_PIF_MEM + 0xF_FFFF,
            DeviceType::Pif,
            handler_ref(
                RamHandler::new("PIF", Rc::clone(store.pif_mem()), MM_PIF_MEM)
                    .mirrored(0x7FF)
                    .read_only_below(PIF_ROM_SIZE),
            ),
        ),
    ];

    if dram_len > MM_RDRAM_REGS {
        let high_len = dram_len - MM_RDRAM_REGS;
        mappings.push(MemMapping::new(
            MM_RDRAM_DRAM2,
            MM_RDRAM_DRAM2 + high_len - 1,
            DeviceType::Rdram,
            handler_ref(
                RamHandler::new("RDRAM", Rc::clone(store.dram()), MM_RDRAM_DRAM2)
                    .at_offset(MM_RDRAM_REGS as usize),
            ),
        ));
    }

    mappings
}
