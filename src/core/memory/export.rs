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

//! Raw memory export and code cache invalidation
//!
//! Debuggers and recompilers reach backing memory directly rather than
//! through the bus. Writing behind the CPU's back can leave translated code
//! stale, so pokes go through the invalidation hook registered by whoever
//! owns that code cache.

use super::backing::BackingStore;
use std::ptr::NonNull;

/// Holder for the code cache invalidation callback
#[derive(Default)]
pub struct CacheInvalidator {
    hook: Option<Box<dyn FnMut()>>,
}

impl CacheInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the hook
    pub fn set_hook(&mut self, hook: Box<dyn FnMut()>) {
        self.hook = Some(hook);
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Run the hook, if any
    pub fn invalidate(&mut self) {
        match self.hook.as_mut() {
            Some(hook) => hook(),
            None => log::debug!("Cache invalidation requested with no hook installed"),
        }
    }
}

impl std::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("hook", &self.has_hook())
            .finish()
    }
}

/// Borrowed view over backing memory for external tools
///
/// Pointers handed out stay valid only while the store is alive. No
/// ownership is conferred.
///
/// # Example
///
/// ```
/// use n64bus::core::memory::{BackingStore, CacheInvalidator, MemoryExport, RDRAM_DEFAULT_SIZE};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let store = BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap();
/// let mut invalidator = CacheInvalidator::new();
/// let flushed = Rc::new(Cell::new(0));
///
/// let mut export = MemoryExport::new(&store, &mut invalidator);
/// let counter = Rc::clone(&flushed);
/// export.set_invalidation_hook(Box::new(move || counter.set(counter.get() + 1)));
///
/// assert!(export.poke_u32(0x0000_0100, 0x2400_0001));
/// assert_eq!(export.peek_u32(0x0000_0100), Some(0x2400_0001));
/// assert_eq!(flushed.get(), 1);
/// ```
pub struct MemoryExport<'a> {
    store: &'a BackingStore,
    invalidator: &'a mut CacheInvalidator,
}

impl<'a> MemoryExport<'a> {
    pub fn new(store: &'a BackingStore, invalidator: &'a mut CacheInvalidator) -> Self {
        Self { store, invalidator }
    }

    /// Base of RDRAM
    pub fn dram_base(&self) -> *mut u8 {
        self.store.dram().as_ptr()
    }

    /// Base of cartridge ROM
    pub fn rom_base(&self) -> *mut u8 {
        self.store.cart_rom().as_ptr()
    }

    /// Length of the loaded cartridge image
    pub fn rom_size(&self) -> u32 {
        self.store.cart_rom_len() as u32
    }

    pub fn translate(&self, address: u32) -> Option<NonNull<u8>> {
        self.store.translate(address)
    }

    /// Read the word containing `address` from backing memory
    ///
    /// Bypasses the bus, so breakpoints are not triggered. Returns `None`
    /// for addresses without raw backing.
    pub fn peek_u32(&self, address: u32) -> Option<u32> {
        let loc = self.store.locate(address & !3)?;
        self.store.block(loc.block).read_u32(loc.offset)
    }

    /// Write the word containing `address` and invalidate cached code
    ///
    /// Returns `false` without invoking the hook on a translation miss.
    pub fn poke_u32(&mut self, address: u32, value: u32) -> bool {
        let Some(loc) = self.store.locate(address & !3) else {
            return false;
        };
        if !self.store.block(loc.block).write_u32(loc.offset, value, u32::MAX) {
            return false;
        }
        log::debug!("Poked 0x{:08X} = 0x{:08X}", address & !3, value);
        self.invalidator.invalidate();
        true
    }

    pub fn set_invalidation_hook(&mut self, hook: Box<dyn FnMut()>) {
        self.invalidator.set_hook(hook);
    }

    /// Invalidate translated code after memory changed outside the bus
    pub fn invalidate_cached_code(&mut self) {
        self.invalidator.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{MM_CART_ROM, RDRAM_DEFAULT_SIZE};
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_hook(invalidator: &mut CacheInvalidator) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        invalidator.set_hook(Box::new(move || c.set(c.get() + 1)));
        count
    }

    #[test]
    fn test_invalidate_without_hook_is_noop() {
        let mut invalidator = CacheInvalidator::new();
        assert!(!invalidator.has_hook());
        invalidator.invalidate();
    }

    #[test]
    fn test_bases_and_rom_size() {
        let mut store = BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap();
        store.load_cart_rom(&[0u8; 0x1000]).unwrap();
        let mut invalidator = CacheInvalidator::new();
        let export = MemoryExport::new(&store, &mut invalidator);

        assert_eq!(export.dram_base(), store.dram().as_ptr());
        assert_eq!(export.rom_base(), store.cart_rom().as_ptr());
        assert_eq!(export.rom_size(), 0x1000);
        assert_eq!(
            export.translate(MM_CART_ROM + 4).map(NonNull::as_ptr),
            Some(store.cart_rom().as_ptr().wrapping_add(4))
        );
    }

    #[test]
    fn test_poke_invokes_hook() {
        let store = BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap();
        let mut invalidator = CacheInvalidator::new();
        let count = counting_hook(&mut invalidator);
        let mut export = MemoryExport::new(&store, &mut invalidator);

        assert!(export.poke_u32(0x0000_0042, 0x1234_5678));
        assert_eq!(export.peek_u32(0x0000_0040), Some(0x1234_5678));
        assert_eq!(store.dram().read_u32(0x40), Some(0x1234_5678));
        assert_eq!(count.get(), 1);

        export.invalidate_cached_code();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_poke_miss_skips_hook() {
        let store = BackingStore::create(RDRAM_DEFAULT_SIZE).unwrap();
        let mut invalidator = CacheInvalidator::new();
        let count = counting_hook(&mut invalidator);
        let mut export = MemoryExport::new(&store, &mut invalidator);

        // Register space has no raw backing
        assert!(!export.poke_u32(0x0440_0000, 1));
        assert_eq!(export.peek_u32(0x0440_0000), None);
        // Past the end of the default RDRAM allocation
        assert!(!export.poke_u32(RDRAM_DEFAULT_SIZE as u32, 1));
        assert_eq!(count.get(), 0);
    }
}
