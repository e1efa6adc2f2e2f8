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

//! Address window catalog
//!
//! Maps physical addresses onto offsets inside the backing blocks. Only
//! addresses backed by raw memory resolve; register space has no window.
//!
//! | Window          | Physical Address Range   | Block          | Offset                     |
//! |-----------------|--------------------------|----------------|----------------------------|
//! | Low DRAM        | 0x00000000-0x03EFFFFF    | RDRAM          | addr                       |
//! | PIF memory      | 0x1FC00000-0x1FCFFFFF    | PIF memory     | addr - 0x1FC00000          |
//! | Cartridge ROM   | 0x10000000-0x1FBFFFFF    | cartridge ROM  | addr - 0x10000000          |
//! | Cartridge ROM   | 0x1FD00000-0xFFFFFFFF    | cartridge ROM  | addr - 0x10000000          |
//! | DD ROM          | 0x06000000-0x07FFFFFF    | DD ROM         | addr - 0x06000000          |
//! | RSP memory      | 0x04000000-0x04001FFF    | RSP memory     | addr - 0x04000000          |
//! | High DRAM       | 0x08000000-0x0FFFFFFF    | RDRAM          | addr - 0x08000000 + 0x03F00000 |
//!
//! The cartridge window excludes the PIF window, so it is stored as two
//! ranges with the same offset rule. Windows are validated for disjointness when the catalog is built.

use super::backing::BlockKind;
use crate::core::error::{EmulatorError, Result};

/// Start of RDRAM
pub const MM_RDRAM_DRAM: u32 = 0x0000_0000;
/// Start of the RDRAM register block, end of the low DRAM window
pub const MM_RDRAM_REGS: u32 = 0x03F0_0000;
/// RSP DMEM/IMEM
pub const MM_RSP_MEM: u32 = 0x0400_0000;
/// 64DD IPL ROM
pub const MM_DD_ROM: u32 = 0x0600_0000;
/// Second RDRAM window, continues DRAM past the register block
pub const MM_RDRAM_DRAM2: u32 = 0x0800_0000;
/// Cartridge ROM (domain 1 address 2)
pub const MM_CART_ROM: u32 = 0x1000_0000;
/// PIF boot ROM followed by PIF RAM
pub const MM_PIF_MEM: u32 = 0x1FC0_0000;

/// A resolved position inside a backing block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Block holding the address
    pub block: BlockKind,
    /// Byte offset inside the block
    pub offset: usize,
}

/// One translation rule
///
/// Addresses in `start..=end` map to `block` at
/// `block_base + (address - start)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub name: &'static str,
    pub start: u32,
    pub end: u32,
    pub block: BlockKind,
    pub block_base: usize,
}

impl Window {
    pub const fn new(
        name: &'static str,
        start: u32,
        end: u32,
        block: BlockKind,
        block_base: usize,
    ) -> Self {
        Self {
            name,
            start,
            end,
            block,
            block_base,
        }
    }

    /// Check if the window claims `address`
    #[inline]
    pub fn contains(&self, address: u32) -> bool {
        (self.start..=self.end).contains(&address)
    }

    fn overlaps(&self, other: &Window) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    #[inline]
    fn locate(&self, address: u32) -> Location {
        Location {
            block: self.block,
            offset: self.block_base + (address - self.start) as usize,
        }
    }
}

/// Ordered set of disjoint address windows
#[derive(Debug, Clone)]
pub struct WindowCatalog {
    windows: Vec<Window>,
}

impl WindowCatalog {
    /// Build a catalog, rejecting empty or overlapping windows
    ///
    /// Windows are evaluated in the order given, but because they are
    /// checked for disjointness here, order never changes the result.
    ///
    /// # Errors
    ///
    /// - `EmulatorError::InvalidMapping` if a window has `start > end`
    /// - `EmulatorError::OverlappingWindows` if two windows share an address
    pub fn new(windows: Vec<Window>) -> Result<Self> {
        for (i, window) in windows.iter().enumerate() {
            if window.start > window.end {
                return Err(EmulatorError::InvalidMapping {
                    begin: window.start,
                    end: window.end,
                });
            }
            if let Some(other) = windows[..i].iter().find(|w| w.overlaps(window)) {
                return Err(EmulatorError::OverlappingWindows {
                    first: other.name.to_string(),
                    second: window.name.to_string(),
                });
            }
        }

        Ok(Self { windows })
    }

    /// Standard N64 physical memory windows
    ///
    /// # Example
    ///
    /// ```
    /// use n64bus::core::memory::{BlockKind, WindowCatalog};
    ///
    /// let catalog = WindowCatalog::standard().unwrap();
    /// let loc = catalog.resolve(0x1000_0040).unwrap();
    /// assert_eq!(loc.block, BlockKind::CartRom);
    /// assert_eq!(loc.offset, 0x40);
    /// assert!(catalog.resolve(0x0440_0000).is_none()); // VI registers
    /// ```
    pub fn standard() -> Result<Self> {
        Self::new(vec![
            Window::new(
                "low DRAM",
                MM_RDRAM_DRAM,
                MM_RDRAM_REGS - 1,
                BlockKind::Dram,
                0,
            ),
            Window::new(
                "PIF memory",
                MM_PIF_MEM,
                MM_PIF_MEM | 0x000F_FFFF,
                BlockKind::PifMem,
                0,
            ),
            Window::new(
                "cartridge ROM",
                MM_CART_ROM,
                MM_PIF_MEM - 1,
                BlockKind::CartRom,
                0,
            ),
            Window::new(
                "cartridge ROM (above PIF)",
                (MM_PIF_MEM | 0x000F_FFFF) + 1,
                u32::MAX,
                BlockKind::CartRom,
                ((MM_PIF_MEM | 0x000F_FFFF) + 1 - MM_CART_ROM) as usize,
            ),
            Window::new(
                "DD ROM",
                MM_DD_ROM,
                MM_DD_ROM | 0x01FF_FFFF,
                BlockKind::DdRom,
                0,
            ),
            Window::new(
                "RSP memory",
                MM_RSP_MEM,
                MM_RSP_MEM | 0x1FFF,
                BlockKind::RspMem,
                0,
            ),
            Window::new(
                "high DRAM",
                MM_RDRAM_DRAM2,
                MM_CART_ROM - 1,
                BlockKind::Dram,
                MM_RDRAM_REGS as usize,
            ),
        ])
    }

    /// Find the window claiming `address`
    pub fn window_for(&self, address: u32) -> Option<&Window> {
        self.windows.iter().find(|w| w.contains(address))
    }

    /// Resolve an address to a block offset
    ///
    /// The offset is not checked against the block length here; the
    /// backing store does that because only it knows the block sizes.
    pub fn resolve(&self, address: u32) -> Option<Location> {
        self.window_for(address).map(|w| w.locate(address))
    }

    /// All windows claiming `address` (at most one in a valid catalog)
    pub fn matching(&self, address: u32) -> impl Iterator<Item = &Window> {
        self.windows.iter().filter(move |w| w.contains(address))
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }
}
