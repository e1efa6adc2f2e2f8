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

//! Debugger breakpoint registry
//!
//! The memory bus consumes two things from a debugger: a range lookup used
//! when a region is mapped, and a hit notification used by intercepted
//! accesses. [`BreakpointList`] is a simple in-memory registry implementing
//! both.

use bitflags::bitflags;
use std::collections::VecDeque;

/// Hits kept by [`BreakpointList`] before the oldest are discarded
pub const MAX_RECORDED_HITS: usize = 4096;

bitflags! {
    /// Breakpoint flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BreakpointFlags: u32 {
        const ENABLED = 0x01;
        const READ = 0x02;
        const WRITE = 0x04;
        const EXEC = 0x08;
        const LOG = 0x10;
    }
}

/// Breakpoint registry contract
pub trait BreakpointRegistry {
    /// Index of the first breakpoint overlapping `start..start+size` whose
    /// flags contain all of `flags`
    fn lookup(&self, start: u32, size: u32, flags: BreakpointFlags) -> Option<usize>;

    /// Notify the registry of an intercepted access
    ///
    /// `pc` is the address of the instruction performing the access.
    fn check_mem_access(&mut self, pc: u32, address: u32, size: u32, flags: BreakpointFlags);
}

/// A memory breakpoint covering `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBreakpoint {
    pub start: u32,
    pub end: u32,
    pub flags: BreakpointFlags,
}

impl MemBreakpoint {
    pub fn new(start: u32, end: u32, flags: BreakpointFlags) -> Self {
        Self { start, end, flags }
    }

    fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start <= end && start <= self.end
    }
}

/// A triggered breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointHit {
    /// Index of the breakpoint in the registry
    pub index: usize,
    pub pc: u32,
    pub address: u32,
    pub size: u32,
    pub flags: BreakpointFlags,
}

/// In-memory breakpoint registry
///
/// Removed breakpoints leave a hole so indices stay stable. Hits accumulate
/// until [`drain_hits`](Self::drain_hits) is called; past
/// [`MAX_RECORDED_HITS`] the oldest are dropped.
///
/// # Example
///
/// ```
/// use n64bus::core::debugger::{BreakpointFlags, BreakpointList, BreakpointRegistry};
///
/// let mut list = BreakpointList::new();
/// let idx = list.add(0x8000, 0x8003, BreakpointFlags::ENABLED | BreakpointFlags::WRITE);
///
/// assert_eq!(list.lookup(0x0000, 0x10000, BreakpointFlags::ENABLED), Some(idx));
/// assert_eq!(list.lookup(0x0000, 0x10000, BreakpointFlags::READ), None);
/// ```
#[derive(Debug, Default)]
pub struct BreakpointList {
    breakpoints: Vec<Option<MemBreakpoint>>,
    hits: VecDeque<BreakpointHit>,
}

impl BreakpointList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint, returning its index
    pub fn add(&mut self, start: u32, end: u32, flags: BreakpointFlags) -> usize {
        log::debug!(
            "Adding breakpoint 0x{:08X}-0x{:08X} ({:?})",
            start,
            end,
            flags
        );
        self.breakpoints
            .push(Some(MemBreakpoint::new(start, end, flags)));
        self.breakpoints.len() - 1
    }

    /// Remove a breakpoint, returning it if it existed
    pub fn remove(&mut self, index: usize) -> Option<MemBreakpoint> {
        self.breakpoints.get_mut(index).and_then(Option::take)
    }

    pub fn get(&self, index: usize) -> Option<&MemBreakpoint> {
        self.breakpoints.get(index).and_then(Option::as_ref)
    }

    /// Set or clear the ENABLED bit
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.breakpoints.get_mut(index).and_then(Option::as_mut) {
            Some(bp) => {
                bp.flags.set(BreakpointFlags::ENABLED, enabled);
                true
            }
            None => false,
        }
    }

    /// Hits recorded so far
    pub fn hits(&self) -> &VecDeque<BreakpointHit> {
        &self.hits
    }

    /// Take and clear recorded hits
    pub fn drain_hits(&mut self) -> Vec<BreakpointHit> {
        self.hits.drain(..).collect()
    }

    fn find(&self, start: u32, end: u32, flags: BreakpointFlags) -> Option<usize> {
        self.breakpoints.iter().position(|bp| {
            bp.as_ref()
                .is_some_and(|bp| bp.overlaps(start, end) && bp.flags.contains(flags))
        })
    }
}

impl BreakpointRegistry for BreakpointList {
    fn lookup(&self, start: u32, size: u32, flags: BreakpointFlags) -> Option<usize> {
        if size == 0 {
            return None;
        }
        let end = start.saturating_add(size - 1);
        self.find(start, end, flags)
    }

    fn check_mem_access(&mut self, pc: u32, address: u32, size: u32, flags: BreakpointFlags) {
        let end = address.saturating_add(size.saturating_sub(1));
        if let Some(index) = self.find(address, end, flags) {
            log::info!(
                "Breakpoint {} hit at 0x{:08X} (pc 0x{:08X}, {} bytes, {:?})",
                index,
                address,
                pc,
                size,
                flags
            );
            if self.hits.len() == MAX_RECORDED_HITS {
                self.hits.pop_front();
            }
            self.hits.push_back(BreakpointHit {
                index,
                pc,
                address,
                size,
                flags,
            });
        }
    }
}
