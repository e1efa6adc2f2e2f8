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

//! Region handler table
//!
//! The 32-bit address space is split into 65536 regions of 64KB. Each
//! region has a device type tag and a live handler. The table is total: a
//! fresh table routes every region to [`OpenBus`] with
//! [`DeviceType::Nothing`], and mappings overwrite whole entries.

use super::handler::{handler_ref, HandlerRef, OpenBus};
use crate::core::error::{EmulatorError, Result};
use serde::Serialize;
use std::ops::RangeInclusive;
use std::rc::Rc;

/// Region size is 1 << REGION_SHIFT bytes
pub const REGION_SHIFT: u32 = 16;

/// Number of regions covering the 32-bit address space
pub const REGION_COUNT: usize = 1 << (32 - REGION_SHIFT);

/// Region index of an address
#[inline]
pub fn region_of(address: u32) -> u16 {
    (address >> REGION_SHIFT) as u16
}

/// Kind of device mapped at a region
///
/// The tag survives breakpoint interception, so classification queries stay
/// accurate while a debug handler is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DeviceType {
    /// Nothing mapped
    #[default]
    Nothing,
    /// RDRAM
    Rdram,
    /// RDRAM configuration registers
    RdramRegs,
    /// RSP DMEM/IMEM
    RspMem,
    /// RSP registers
    RspRegs,
    /// RSP PC/BIST registers
    Rsp,
    /// RDP command registers
    Dp,
    /// RDP span registers
    Dps,
    /// Video interface
    Vi,
    /// Audio interface
    Ai,
    /// Peripheral interface
    Pi,
    /// RDRAM interface
    Ri,
    /// Serial interface
    Si,
    /// Flash RAM status
    FlashRamStat,
    /// Cartridge ROM
    Rom,
    /// PIF ROM/RAM
    Pif,
    /// MIPS interface
    Mi,
    /// 64DD registers
    DdRegs,
    /// 64DD IPL ROM
    DdRom,
    /// IS-Viewer debug output
    IsViewer,
}

/// Device attach record
///
/// Covers every region from `begin >> 16` to `end >> 16` inclusive. Bounds
/// that are not 64KB aligned are truncated to their region.
#[derive(Clone)]
pub struct MemMapping {
    pub begin: u32,
    pub end: u32,
    pub device_type: DeviceType,
    pub handler: HandlerRef,
}

impl MemMapping {
    pub fn new(begin: u32, end: u32, device_type: DeviceType, handler: HandlerRef) -> Self {
        Self {
            begin,
            end,
            device_type,
            handler,
        }
    }

    /// Regions covered by the mapping
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::InvalidMapping` if `begin > end`.
    pub fn regions(&self) -> Result<RangeInclusive<u16>> {
        if self.begin > self.end {
            return Err(EmulatorError::InvalidMapping {
                begin: self.begin,
                end: self.end,
            });
        }
        Ok(region_of(self.begin)..=region_of(self.end))
    }
}

impl std::fmt::Debug for MemMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemMapping")
            .field("begin", &format_args!("0x{:08X}", self.begin))
            .field("end", &format_args!("0x{:08X}", self.end))
            .field("device_type", &self.device_type)
            .field("handler", &self.handler.borrow().name())
            .finish()
    }
}

/// A full table entry
#[derive(Clone)]
pub struct Entry {
    pub device_type: DeviceType,
    pub handler: HandlerRef,
}

/// Handler table indexed by region
pub struct RegionTable {
    device_types: Box<[DeviceType]>,
    handlers: Box<[HandlerRef]>,
}

impl RegionTable {
    /// Create a table routing everything to open bus
    pub fn new() -> Self {
        let open_bus = handler_ref(OpenBus);
        Self {
            device_types: vec![DeviceType::Nothing; REGION_COUNT].into_boxed_slice(),
            handlers: vec![open_bus; REGION_COUNT].into_boxed_slice(),
        }
    }

    /// Entry serving `address`
    pub fn lookup(&self, address: u32) -> Entry {
        let region = region_of(address) as usize;
        Entry {
            device_type: self.device_types[region],
            handler: Rc::clone(&self.handlers[region]),
        }
    }

    /// Live handler serving `address`, without cloning
    #[inline]
    pub fn handler(&self, address: u32) -> &HandlerRef {
        &self.handlers[region_of(address) as usize]
    }

    /// Device type tag at `address`
    #[inline]
    pub fn classify(&self, address: u32) -> DeviceType {
        self.device_types[region_of(address) as usize]
    }

    pub(crate) fn region_handler(&self, region: u16) -> &HandlerRef {
        &self.handlers[region as usize]
    }

    pub(crate) fn set_handler(&mut self, region: u16, handler: HandlerRef) {
        self.handlers[region as usize] = handler;
    }

    pub(crate) fn set_device_type(&mut self, region: u16, device_type: DeviceType) {
        self.device_types[region as usize] = device_type;
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}
