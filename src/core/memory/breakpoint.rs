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

//! Breakpoint interception layer
//!
//! While a read or write breakpoint is active on a region, the region's
//! live handler is replaced by a shared debug handler. The debug handler
//! reports the access to the breakpoint registry and then forwards it to the
//! handler that was live before interception, so the access still takes
//! effect.
//!
//! # Per-region state
//!
//! | Check mask     | Live handler   | Saved handler       |
//! |----------------|----------------|---------------------|
//! | empty          | device handler | none                |
//! | READ           | debug handler  | device handler      |
//! | WRITE          | debug handler  | device handler      |
//! | READ \| WRITE  | debug handler  | device handler      |
//!
//! The saved handler is captured only on the empty to non-empty transition
//! and restored on the reverse transition.
//!
//! Two strategies implement [`BreakpointLayer`]: [`NoBreakpoints`] never
//! intercepts, [`Interceptor`] does. The choice is made when the bus is
//! built.

use super::handler::{handler_ref, HandlerRef, MemHandler};
use super::table::{region_of, DeviceType, RegionTable, REGION_COUNT, REGION_SHIFT};
use crate::core::debugger::{BreakpointFlags, BreakpointRegistry};
use bitflags::bitflags;
use std::cell::RefCell;
use std::rc::Rc;

bitflags! {
    /// Active breakpoint kinds on a region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BpCheck: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

/// Shared breakpoint registry
pub type RegistryRef = Rc<RefCell<dyn BreakpointRegistry>>;

/// Breakpoint strategy used by the bus
pub trait BreakpointLayer {
    /// Install `handler` for `region` on behalf of a mapping
    fn map_region(
        &mut self,
        table: &mut RegionTable,
        region: u16,
        device_type: DeviceType,
        handler: &HandlerRef,
    );

    fn activate_read(&mut self, table: &mut RegionTable, address: u32);
    fn deactivate_read(&mut self, table: &mut RegionTable, address: u32);
    fn activate_write(&mut self, table: &mut RegionTable, address: u32);
    fn deactivate_write(&mut self, table: &mut RegionTable, address: u32);

    /// Active kinds on the region containing `address`
    fn check_mask(&self, address: u32) -> BpCheck;

    /// Handler that was live before the region was intercepted
    fn saved_handler(&self, address: u32) -> Option<HandlerRef>;

    /// Record the CPU's pc
    ///
    /// The pc has already advanced past the accessing instruction, so hits
    /// report `pc - 4`.
    fn set_last_pc(&mut self, pc: u32);

    /// Whether this strategy ever intercepts
    fn is_enabled(&self) -> bool;
}

/// Strategy for builds without debugger support
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBreakpoints;

impl BreakpointLayer for NoBreakpoints {
    fn map_region(
        &mut self,
        table: &mut RegionTable,
        region: u16,
        device_type: DeviceType,
        handler: &HandlerRef,
    ) {
        table.set_device_type(region, device_type);
        table.set_handler(region, Rc::clone(handler));
    }

    fn activate_read(&mut self, _table: &mut RegionTable, address: u32) {
        log::debug!(
            "Read breakpoint at 0x{:08X} ignored (debugger disabled)",
            address
        );
    }

    fn deactivate_read(&mut self, _table: &mut RegionTable, _address: u32) {}

    fn activate_write(&mut self, _table: &mut RegionTable, address: u32) {
        log::debug!(
            "Write breakpoint at 0x{:08X} ignored (debugger disabled)",
            address
        );
    }

    fn deactivate_write(&mut self, _table: &mut RegionTable, _address: u32) {}

    fn check_mask(&self, _address: u32) -> BpCheck {
        BpCheck::empty()
    }

    fn saved_handler(&self, _address: u32) -> Option<HandlerRef> {
        None
    }

    fn set_last_pc(&mut self, _pc: u32) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

struct InterceptState {
    checks: Box<[BpCheck]>,
    saved: Box<[Option<HandlerRef>]>,
    last_pc: u32,
    registry: Option<RegistryRef>,
}

/// The shared handler installed on intercepted regions
struct DebugHandler {
    state: Rc<RefCell<InterceptState>>,
}

impl DebugHandler {
    /// Notify the registry if `kind` is active, then return the saved handler
    fn intercept(
        &self,
        address: u32,
        size: u32,
        kind: BpCheck,
        flag: BreakpointFlags,
    ) -> Option<HandlerRef> {
        let region = region_of(address) as usize;
        let (check, saved, pc, registry) = {
            let state = self.state.borrow();
            (
                state.checks[region],
                state.saved[region].clone(),
                state.last_pc,
                state.registry.clone(),
            )
        };

        if check.contains(kind) {
            if let Some(registry) = registry {
                registry.borrow_mut().check_mem_access(
                    pc.wrapping_sub(4),
                    address,
                    size,
                    BreakpointFlags::ENABLED | flag,
                );
            }
        }

        if saved.is_none() {
            log::warn!(
                "Debug handler reached at 0x{:08X} with no saved handler",
                address
            );
        }
        saved
    }
}

impl MemHandler for DebugHandler {
    fn read_word(&mut self, address: u32) -> u32 {
        match self.intercept(address, 4, BpCheck::READ, BreakpointFlags::READ) {
            Some(saved) => saved.borrow_mut().read_word(address),
            None => 0,
        }
    }

    fn write_word(&mut self, address: u32, value: u32, mask: u32) {
        // Report the enabled lanes, not the aligned word
        let first = address + (mask.leading_zeros() / 8).min(3);
        let size = (mask.count_ones() / 8).max(1);
        if let Some(saved) = self.intercept(first, size, BpCheck::WRITE, BreakpointFlags::WRITE) {
            saved.borrow_mut().write_word(address, value, mask);
        }
    }

    fn name(&self) -> &str {
        "debug handler"
    }
}

/// Strategy that swaps in a debug handler while breakpoints are active
///
/// # Example
///
/// ```
/// use n64bus::core::memory::{BpCheck, BreakpointLayer, Bus, Interceptor};
///
/// let mut bus = Bus::new(Box::new(Interceptor::new(None)));
/// bus.activate_break_read(0x0001_2340);
/// assert_eq!(bus.breakpoints().check_mask(0x0001_0000), BpCheck::READ);
/// bus.deactivate_break_read(0x0001_2340);
/// assert!(bus.breakpoints().check_mask(0x0001_0000).is_empty());
/// ```
pub struct Interceptor {
    state: Rc<RefCell<InterceptState>>,
    debug_handler: HandlerRef,
}

impl Interceptor {
    /// Create an interceptor reporting hits to `registry`
    ///
    /// The registry is also consulted when regions are mapped, so a region
    /// covered by an enabled breakpoint starts out intercepted.
    pub fn new(registry: Option<RegistryRef>) -> Self {
        let state = Rc::new(RefCell::new(InterceptState {
            checks: vec![BpCheck::empty(); REGION_COUNT].into_boxed_slice(),
            saved: vec![None; REGION_COUNT].into_boxed_slice(),
            last_pc: 0,
            registry,
        }));
        let debug_handler = handler_ref(DebugHandler {
            state: Rc::clone(&state),
        });

        Self {
            state,
            debug_handler,
        }
    }

    /// Whether `handler` is the shared debug handler
    pub fn is_debug_handler(&self, handler: &HandlerRef) -> bool {
        Rc::ptr_eq(handler, &self.debug_handler)
    }

    /// Checks the registry would start a freshly mapped region with
    fn registry_checks(&self, region: u16) -> BpCheck {
        let state = self.state.borrow();
        let Some(registry) = state.registry.as_ref() else {
            return BpCheck::empty();
        };
        let registry = registry.borrow();
        let start = (region as u32) << REGION_SHIFT;
        let size = 1 << REGION_SHIFT;

        let mut checks = BpCheck::empty();
        let read = BreakpointFlags::ENABLED | BreakpointFlags::READ;
        if registry.lookup(start, size, read).is_some() {
            checks |= BpCheck::READ;
        }
        let write = BreakpointFlags::ENABLED | BreakpointFlags::WRITE;
        if registry.lookup(start, size, write).is_some() {
            checks |= BpCheck::WRITE;
        }
        checks
    }

    fn activate(&mut self, table: &mut RegionTable, address: u32, kind: BpCheck) {
        let region = region_of(address);
        let mut state = self.state.borrow_mut();
        let index = region as usize;

        if state.checks[index].is_empty() {
            state.saved[index] = Some(Rc::clone(table.region_handler(region)));
            table.set_handler(region, Rc::clone(&self.debug_handler));
            log::debug!("Intercepting region 0x{:04X}", region);
        }

        state.checks[index] |= kind;
    }

    fn deactivate(&mut self, table: &mut RegionTable, address: u32, kind: BpCheck) {
        let region = region_of(address);
        let mut state = self.state.borrow_mut();
        let index = region as usize;

        state.checks[index].remove(kind);

        if state.checks[index].is_empty() {
            if let Some(saved) = state.saved[index].take() {
                table.set_handler(region, saved);
                log::debug!("Restored handler for region 0x{:04X}", region);
            }
        }
    }
}

impl BreakpointLayer for Interceptor {
    fn map_region(
        &mut self,
        table: &mut RegionTable,
        region: u16,
        device_type: DeviceType,
        handler: &HandlerRef,
    ) {
        table.set_device_type(region, device_type);
        let index = region as usize;

        // Remapped while intercepted: the new handler becomes the saved one
        if !self.state.borrow().checks[index].is_empty() {
            self.state.borrow_mut().saved[index] = Some(Rc::clone(handler));
            return;
        }

        let checks = self.registry_checks(region);
        if checks.is_empty() {
            table.set_handler(region, Rc::clone(handler));
            return;
        }

        let mut state = self.state.borrow_mut();
        state.checks[index] = checks;
        state.saved[index] = Some(Rc::clone(handler));
        table.set_handler(region, Rc::clone(&self.debug_handler));
        log::debug!(
            "Region 0x{:04X} mapped with breakpoints active ({:?})",
            region,
            checks
        );
    }

    fn activate_read(&mut self, table: &mut RegionTable, address: u32) {
        self.activate(table, address, BpCheck::READ);
    }

    fn deactivate_read(&mut self, table: &mut RegionTable, address: u32) {
        self.deactivate(table, address, BpCheck::READ);
    }

    fn activate_write(&mut self, table: &mut RegionTable, address: u32) {
        self.activate(table, address, BpCheck::WRITE);
    }

    fn deactivate_write(&mut self, table: &mut RegionTable, address: u32) {
        self.deactivate(table, address, BpCheck::WRITE);
    }

    fn check_mask(&self, address: u32) -> BpCheck {
        self.state.borrow().checks[region_of(address) as usize]
    }

    fn saved_handler(&self, address: u32) -> Option<HandlerRef> {
        self.state.borrow().saved[region_of(address) as usize].clone()
    }

    fn set_last_pc(&mut self, pc: u32) {
        self.state.borrow_mut().last_pc = pc;
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::debugger::BreakpointList;

    struct Word(u32);

    impl MemHandler for Word {
        fn read_word(&mut self, _address: u32) -> u32 {
            self.0
        }
        fn write_word(&mut self, _address: u32, value: u32, mask: u32) {
            self.0 = (self.0 & !mask) | (value & mask);
        }
    }

    fn setup() -> (RegionTable, Interceptor, HandlerRef) {
        let mut table = RegionTable::new();
        let mut layer = Interceptor::new(None);
        let h = handler_ref(Word(0x1111_1111));
        layer.map_region(&mut table, 0x0001, DeviceType::Rdram, &h);
        (table, layer, h)
    }

    #[test]
    fn test_activate_installs_debug_handler() {
        let (mut table, mut layer, h) = setup();

        layer.activate_read(&mut table, 0x0001_2340);

        assert!(layer.is_debug_handler(table.handler(0x0001_0000)));
        assert_eq!(layer.check_mask(0x0001_2340), BpCheck::READ);
        assert!(Rc::ptr_eq(&layer.saved_handler(0x0001_0000).unwrap(), &h));
        assert_eq!(table.classify(0x0001_0000), DeviceType::Rdram);
    }

    #[test]
    fn test_activate_read_twice_is_idempotent() {
        let (mut table, mut layer, h) = setup();

        layer.activate_read(&mut table, 0x0001_0000);
        layer.activate_read(&mut table, 0x0001_0004);

        assert!(layer.is_debug_handler(table.handler(0x0001_0000)));
        assert_eq!(layer.check_mask(0x0001_0000), BpCheck::READ);
        assert!(Rc::ptr_eq(&layer.saved_handler(0x0001_0000).unwrap(), &h));
    }

    #[test]
    fn test_second_kind_does_not_recapture() {
        let (mut table, mut layer, h) = setup();

        layer.activate_read(&mut table, 0x0001_0000);
        layer.activate_write(&mut table, 0x0001_0000);

        assert_eq!(layer.check_mask(0x0001_0000), BpCheck::READ | BpCheck::WRITE);
        let saved = layer.saved_handler(0x0001_0000).unwrap();
        assert!(Rc::ptr_eq(&saved, &h));
        assert!(!layer.is_debug_handler(&saved));
    }

    #[test]
    fn test_restore_after_both_kinds_deactivated() {
        let (mut table, mut layer, h) = setup();

        layer.activate_read(&mut table, 0x0001_0000);
        layer.activate_write(&mut table, 0x0001_0000);

        layer.deactivate_read(&mut table, 0x0001_0000);
        assert!(layer.is_debug_handler(table.handler(0x0001_0000)));
        assert_eq!(layer.check_mask(0x0001_0000), BpCheck::WRITE);

        layer.deactivate_write(&mut table, 0x0001_0000);
        assert!(Rc::ptr_eq(table.handler(0x0001_0000), &h));
        assert!(layer.check_mask(0x0001_0000).is_empty());
        assert!(layer.saved_handler(0x0001_0000).is_none());
    }

    #[test]
    fn test_deactivate_inactive_region_is_noop() {
        let (mut table, mut layer, h) = setup();
        layer.deactivate_write(&mut table, 0x0001_0000);
        assert!(Rc::ptr_eq(table.handler(0x0001_0000), &h));
    }

    #[test]
    fn test_other_regions_untouched() {
        let (mut table, mut layer, _h) = setup();
        let neighbour = Rc::clone(table.handler(0x0002_0000));

        layer.activate_read(&mut table, 0x0001_0000);

        assert!(Rc::ptr_eq(table.handler(0x0002_0000), &neighbour));
        assert!(!layer.is_debug_handler(table.handler(0x0000_0000)));
        assert!(layer.check_mask(0x0002_0000).is_empty());
    }

    #[test]
    fn test_debug_handler_forwards_to_saved() {
        let (mut table, mut layer, h) = setup();

        layer.activate_write(&mut table, 0x0001_0000);
        let live = Rc::clone(table.handler(0x0001_0000));

        live.borrow_mut().write_word(0x0001_0000, 0xABCD_0000, 0xFFFF_0000);
        assert_eq!(h.borrow_mut().read_word(0), 0xABCD_1111);
        assert_eq!(live.borrow_mut().read_word(0x0001_0000), 0xABCD_1111);
    }

    #[test]
    fn test_hits_reported_only_for_active_kind() {
        let registry = Rc::new(RefCell::new(BreakpointList::new()));
        registry.borrow_mut().add(
            0x0001_0000,
            0x0001_FFFF,
            BreakpointFlags::ENABLED | BreakpointFlags::READ | BreakpointFlags::WRITE,
        );

        let mut table = RegionTable::new();
        let mut layer = Interceptor::new(Some(registry.clone()));
        let h = handler_ref(Word(0));
        table.set_handler(0x0001, Rc::clone(&h));

        layer.activate_write(&mut table, 0x0001_0000);
        layer.set_last_pc(0x8000_1000);
        let live = Rc::clone(table.handler(0x0001_0000));

        live.borrow_mut().read_word(0x0001_0010);
        assert!(registry.borrow().hits().is_empty());

        live.borrow_mut().write_word(0x0001_0010, 0x12, 0x0000_00FF);
        let hits = registry.borrow_mut().drain_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pc, 0x8000_0FFC);
        assert_eq!(hits[0].address, 0x0001_0013);
        assert_eq!(hits[0].size, 1);
        assert!(hits[0].flags.contains(BreakpointFlags::WRITE));
    }

    #[test]
    fn test_map_region_starts_intercepted_when_registry_has_breakpoint() {
        let registry = Rc::new(RefCell::new(BreakpointList::new()));
        registry.borrow_mut().add(
            0x1000_0040,
            0x1000_0043,
            BreakpointFlags::ENABLED | BreakpointFlags::READ,
        );

        let mut table = RegionTable::new();
        let mut layer = Interceptor::new(Some(registry));
        let h = handler_ref(Word(0));

        layer.map_region(&mut table, 0x1000, DeviceType::Rom, &h);
        layer.map_region(&mut table, 0x1001, DeviceType::Rom, &h);

        assert!(layer.is_debug_handler(table.handler(0x1000_0000)));
        assert_eq!(layer.check_mask(0x1000_0000), BpCheck::READ);
        assert!(Rc::ptr_eq(&layer.saved_handler(0x1000_0000).unwrap(), &h));

        assert!(Rc::ptr_eq(table.handler(0x1001_0000), &h));
        assert!(layer.check_mask(0x1001_0000).is_empty());

        // Clearing the only kind restores the mapped handler
        layer.deactivate_read(&mut table, 0x1000_0000);
        assert!(Rc::ptr_eq(table.handler(0x1000_0000), &h));
    }

    #[test]
    fn test_remap_while_intercepted_updates_saved_handler() {
        let (mut table, mut layer, _h) = setup();
        layer.activate_read(&mut table, 0x0001_0000);

        let bank = handler_ref(Word(0x2222_2222));
        layer.map_region(&mut table, 0x0001, DeviceType::Rom, &bank);

        assert!(layer.is_debug_handler(table.handler(0x0001_0000)));
        assert!(Rc::ptr_eq(&layer.saved_handler(0x0001_0000).unwrap(), &bank));
        assert_eq!(table.classify(0x0001_0000), DeviceType::Rom);

        layer.deactivate_read(&mut table, 0x0001_0000);
        assert!(Rc::ptr_eq(table.handler(0x0001_0000), &bank));
    }

    #[test]
    fn test_no_breakpoints_never_intercepts() {
        let mut table = RegionTable::new();
        let mut layer = NoBreakpoints;
        let h = handler_ref(Word(5));

        layer.map_region(&mut table, 0x0001, DeviceType::Rdram, &h);
        layer.activate_read(&mut table, 0x0001_0000);
        layer.activate_write(&mut table, 0x0001_0000);

        assert!(Rc::ptr_eq(table.handler(0x0001_0000), &h));
        assert!(layer.check_mask(0x0001_0000).is_empty());
        assert!(layer.saved_handler(0x0001_0000).is_none());
        assert!(!layer.is_enabled());
    }
}
