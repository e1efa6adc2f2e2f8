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

//! Memory handler trait
//!
//! Every 64KB region of the address space is served by one handler. The bus
//! looks the handler up and calls it; handlers know nothing about regions,
//! breakpoints or the backing store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Memory Bus                     │
//! ├─────────────────────────────────────────────┤
//! │  RegionTable: [HandlerRef; 65536]           │
//! │                                             │
//! │  read32(addr) {                             │
//! │    table.handler(addr >> 16)                │
//! │         .read_word(addr)                    │
//! │  }                                          │
//! └─────────────────────────────────────────────┘
//!           ▲                   ▲
//!           │                   │
//!    ┌──────┴──────┐    ┌──────┴──────┐
//!    │   RDRAM     │    │ Debug       │
//!    │ (MemHandler)│    │ (MemHandler)│
//!    └─────────────┘    └─────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use n64bus::core::memory::MemHandler;
//!
//! struct Registers {
//!     regs: [u32; 4],
//! }
//!
//! impl MemHandler for Registers {
//!     fn read_word(&mut self, address: u32) -> u32 {
//!         self.regs[((address >> 2) & 3) as usize]
//!     }
//!
//!     fn write_word(&mut self, address: u32, value: u32, mask: u32) {
//!         let reg = &mut self.regs[((address >> 2) & 3) as usize];
//!         *reg = (*reg & !mask) | (value & mask);
//!     }
//! }
//! ```

use std::cell::RefCell;
use std::rc::Rc;

/// Device read/write implementation for one or more regions
///
/// Addresses passed in are word aligned physical addresses. Writes carry a
/// byte-enable `mask`: only bits set in `mask` may change, so sub-word
/// stores never need a read-modify-write by the caller.
pub trait MemHandler {
    /// Read the word at `address`
    fn read_word(&mut self, address: u32) -> u32;

    /// Merge `value` into the word at `address` under `mask`
    fn write_word(&mut self, address: u32, value: u32, mask: u32);

    /// Device name for logging
    fn name(&self) -> &str {
        "unnamed handler"
    }
}

/// Shared reference to a handler
///
/// One handler usually serves many regions, and the breakpoint layer keeps
/// a second reference while a region is intercepted.
pub type HandlerRef = Rc<RefCell<dyn MemHandler>>;

/// Wrap a handler for installation in the region table
pub fn handler_ref<H: MemHandler + 'static>(handler: H) -> HandlerRef {
    Rc::new(RefCell::new(handler))
}

/// Handler for regions with no device attached
///
/// Reads return zero; writes are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenBus;

impl MemHandler for OpenBus {
    fn read_word(&mut self, address: u32) -> u32 {
        log::trace!("Open bus read32 at 0x{:08X} -> 0x00000000", address);
        0
    }

    fn write_word(&mut self, address: u32, value: u32, mask: u32) {
        log::trace!(
            "Open bus write32 at 0x{:08X} = 0x{:08X} & 0x{:08X} (ignored)",
            address,
            value,
            mask
        );
    }

    fn name(&self) -> &str {
        "open bus"
    }
}
