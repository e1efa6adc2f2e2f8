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

//! System integration module
//!
//! This module ties the backing store, the memory bus and the debugger's
//! breakpoint registry together into one machine context.

use super::config::MemoryConfig;
use super::debugger::{BreakpointFlags, BreakpointHit, BreakpointList, BreakpointRegistry};
use super::error::Result;
use super::memory::{
    region_of, standard_mappings, BackingStore, BreakpointLayer, Bus, CacheInvalidator,
    Interceptor, MemoryExport, NoBreakpoints, RegistryRef, REGION_SHIFT,
};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Nintendo 64 memory system
///
/// Owns the five backing blocks, the bus with the standard map attached and,
/// when the debugger is enabled, the breakpoint registry shared with the
/// bus's interceptor.
///
/// # Example
/// ```
/// use n64bus::core::config::MemoryConfig;
/// use n64bus::core::debugger::BreakpointFlags;
/// use n64bus::core::system::System;
///
/// let config = MemoryConfig { debugger: true, ..MemoryConfig::default() };
/// let mut system = System::new(&config)?;
///
/// let bp = system.add_breakpoint(0x0000_1000, 0x0000_1003, BreakpointFlags::ENABLED | BreakpointFlags::WRITE);
/// system.bus().write32(0x0000_1000, 1);
/// assert_eq!(system.take_hits().len(), 1);
/// assert!(system.remove_breakpoint(bp.unwrap()));
/// # Ok::<(), n64bus::core::error::EmulatorError>(())
/// ```
pub struct System {
    /// Backing memory blocks
    store: BackingStore,
    /// Memory bus
    bus: Bus,
    /// Code cache invalidation hook for raw pokes
    invalidator: CacheInvalidator,
    /// Breakpoint registry (present when the debugger is enabled)
    registry: Option<Rc<RefCell<BreakpointList>>>,
}

impl System {
    /// Create a System from configuration
    ///
    /// Allocates the backing store, attaches the standard memory map and
    /// loads the images named in `config`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, allocation failure, unreadable images
    /// or images too large for their block.
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        config.validate()?;
        let store = BackingStore::create(config.dram_size)?;
        let mut system = Self::with_store(store, config.debugger)?;

        if let Some(path) = &config.pif_rom {
            system.load_pif_rom(path)?;
        }
        if let Some(path) = &config.cart_rom {
            system.load_cart_rom(path)?;
        }
        Ok(system)
    }

    /// Build a System around an existing store
    pub fn with_store(store: BackingStore, debugger: bool) -> Result<Self> {
        let registry = debugger.then(|| Rc::new(RefCell::new(BreakpointList::new())));

        let layer: Box<dyn BreakpointLayer> = match &registry {
            Some(list) => {
                let shared: RegistryRef = list.clone();
                Box::new(Interceptor::new(Some(shared)))
            }
            None => Box::new(NoBreakpoints),
        };
        let bus = Bus::init(&standard_mappings(&store), layer)?;

        log::info!(
            "Memory system ready ({} bytes RDRAM, debugger {})",
            store.dram().len(),
            if debugger { "on" } else { "off" }
        );

        Ok(Self {
            store,
            bus,
            invalidator: CacheInvalidator::new(),
            registry,
        })
    }

    /// Load a cartridge image from disk
    pub fn load_cart_rom(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        log::info!("Loading cartridge ROM from {}", path.display());
        let image = std::fs::read(path)?;
        self.store.load_cart_rom(&image)?;
        self.invalidator.invalidate();
        Ok(())
    }

    /// Load a PIF boot ROM image from disk
    pub fn load_pif_rom(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        log::info!("Loading PIF ROM from {}", path.display());
        let image = std::fs::read(path)?;
        self.store.load_pif_rom(&image)?;
        self.invalidator.invalidate();
        Ok(())
    }

    /// Register a breakpoint and intercept the regions it covers
    ///
    /// Returns `None` when the debugger is disabled.
    pub fn add_breakpoint(&mut self, start: u32, end: u32, flags: BreakpointFlags) -> Option<usize> {
        let index = self.registry.as_ref()?.borrow_mut().add(start, end, flags);
        self.sync_range(start, end);
        Some(index)
    }

    /// Remove a breakpoint
    ///
    /// Regions stay intercepted while another breakpoint still covers them.
    pub fn remove_breakpoint(&mut self, index: usize) -> bool {
        let Some(registry) = &self.registry else {
            return false;
        };
        let removed = registry.borrow_mut().remove(index);
        match removed {
            Some(bp) => {
                self.sync_range(bp.start, bp.end);
                true
            }
            None => false,
        }
    }

    /// Enable or disable a breakpoint
    pub fn set_breakpoint_enabled(&mut self, index: usize, enabled: bool) -> bool {
        let Some(registry) = &self.registry else {
            return false;
        };
        let range = {
            let mut list = registry.borrow_mut();
            if !list.set_enabled(index, enabled) {
                return false;
            }
            list.get(index).map(|bp| (bp.start, bp.end))
        };
        if let Some((start, end)) = range {
            self.sync_range(start, end);
        }
        true
    }

    /// Take the breakpoint hits recorded since the last call
    pub fn take_hits(&mut self) -> Vec<BreakpointHit> {
        self.registry
            .as_ref()
            .map(|list| list.borrow_mut().drain_hits())
            .unwrap_or_default()
    }

    /// Bring interception of every region in `start..=end` in line with the registry
    fn sync_range(&mut self, start: u32, end: u32) {
        let Some(registry) = self.registry.clone() else {
            return;
        };
        let read = BreakpointFlags::ENABLED | BreakpointFlags::READ;
        let write = BreakpointFlags::ENABLED | BreakpointFlags::WRITE;

        for region in region_of(start.min(end))..=region_of(start.max(end)) {
            let base = (region as u32) << REGION_SHIFT;
            let (want_read, want_write) = {
                let list = registry.borrow();
                (
                    list.lookup(base, 1 << REGION_SHIFT, read).is_some(),
                    list.lookup(base, 1 << REGION_SHIFT, write).is_some(),
                )
            };

            if want_read {
                self.bus.activate_break_read(base);
            } else {
                self.bus.deactivate_break_read(base);
            }
            if want_write {
                self.bus.activate_break_write(base);
            } else {
                self.bus.deactivate_break_write(base);
            }
        }
    }

    /// Raw memory view for debuggers and recompilers
    pub fn export(&mut self) -> MemoryExport<'_> {
        MemoryExport::new(&self.store, &mut self.invalidator)
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn registry(&self) -> Option<&Rc<RefCell<BreakpointList>>> {
        self.registry.as_ref()
    }

    pub fn debugger_enabled(&self) -> bool {
        self.registry.is_some()
    }
}
