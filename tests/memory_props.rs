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

//! Property tests for region dispatch and breakpoint interception

use n64bus::core::memory::{
    handler_ref, BpCheck, BreakpointLayer, Bus, DeviceType, HandlerRef, Interceptor, MemHandler, MemMapping,
    NoBreakpoints, WindowCatalog,
};
use proptest::prelude::*;
use std::rc::Rc;

/// Handler answering every read with a fixed tag
struct Tagged(u32);

impl MemHandler for Tagged {
    fn read_word(&mut self, _address: u32) -> u32 {
        self.0
    }

    fn write_word(&mut self, _address: u32, _value: u32, _mask: u32) {}
}

const TYPES: [DeviceType; 4] = [
    DeviceType::Rdram,
    DeviceType::Rom,
    DeviceType::Pi,
    DeviceType::Si,
];

fn mapping_strategy() -> impl Strategy<Value = (u32, u32, usize)> {
    // Keep ranges inside a small window of regions so mappings overlap often
    (0u32..64, 0u32..16, 0usize..TYPES.len()).prop_map(|(first, span, ty)| {
        let begin = first << 16;
        let end = ((first + span) << 16) | 0xFFFF;
        (begin, end, ty)
    })
}

#[derive(Debug, Clone, Copy)]
enum Op {
    ActivateRead(u32),
    DeactivateRead(u32),
    ActivateWrite(u32),
    DeactivateWrite(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let addr = (0u32..4).prop_map(|r| (r << 16) | 0x1234);
    prop_oneof![
        addr.clone().prop_map(Op::ActivateRead),
        addr.clone().prop_map(Op::DeactivateRead),
        addr.clone().prop_map(Op::ActivateWrite),
        addr.prop_map(Op::DeactivateWrite),
    ]
}

proptest! {
    #[test]
    fn later_mapping_wins(
        specs in prop::collection::vec(mapping_strategy(), 1..8),
        probe in 0u32..(96 << 16),
    ) {
        let mappings: Vec<MemMapping> = specs
            .iter()
            .enumerate()
            .map(|(i, &(begin, end, ty))| {
                MemMapping::new(begin, end, TYPES[ty], handler_ref(Tagged(i as u32)))
            })
            .collect();
        let bus = Bus::init(&mappings, Box::new(NoBreakpoints)).unwrap();

        let winner = specs
            .iter()
            .enumerate()
            .rev()
            .find(|(_, spec)| (spec.0..=spec.1).contains(&probe));

        match winner {
            Some((i, &(_, _, ty))) => {
                prop_assert_eq!(bus.memory_type(probe), TYPES[ty]);
                prop_assert_eq!(bus.read32(probe), i as u32);
                prop_assert!(Rc::ptr_eq(&bus.lookup(probe).handler, &mappings[i].handler));
            }
            None => {
                prop_assert_eq!(bus.memory_type(probe), DeviceType::Nothing);
                prop_assert_eq!(bus.read32(probe), 0);
            }
        }
    }

    #[test]
    fn standard_windows_are_disjoint(address in any::<u32>()) {
        let catalog = WindowCatalog::standard().unwrap();
        prop_assert!(catalog.matching(address).count() <= 1);
    }

    #[test]
    fn interception_tracks_mask(ops in prop::collection::vec(op_strategy(), 0..32)) {
        let device: HandlerRef = handler_ref(Tagged(0xC0DE));
        let mapping = MemMapping::new(0, 0x0003_FFFF, DeviceType::Rdram, Rc::clone(&device));
        let mut bus = Bus::init(&[mapping], Box::new(Interceptor::new(None))).unwrap();

        for op in ops {
            match op {
                Op::ActivateRead(a) => bus.activate_break_read(a),
                Op::DeactivateRead(a) => bus.deactivate_break_read(a),
                Op::ActivateWrite(a) => bus.activate_break_write(a),
                Op::DeactivateWrite(a) => bus.deactivate_break_write(a),
            }
        }

        for region in 0u32..4 {
            let address = region << 16;
            let mask = bus.breakpoints().check_mask(address);
            let live = bus.lookup(address).handler;

            if mask.is_empty() {
                prop_assert!(Rc::ptr_eq(&live, &device));
                prop_assert!(bus.breakpoints().saved_handler(address).is_none());
            } else {
                let live_ref = live.borrow();
                prop_assert_eq!(live_ref.name(), "debug handler");
                drop(live_ref);
                let saved = bus.breakpoints().saved_handler(address);
                prop_assert!(saved.is_some_and(|h| Rc::ptr_eq(&h, &device)));
            }
            prop_assert_eq!(bus.memory_type(address), DeviceType::Rdram);
            // Forwarding keeps reads intact either way
            prop_assert_eq!(bus.read32(address), 0xC0DE);
        }
    }

    #[test]
    fn activate_is_idempotent(address in 0u32..0x0010_0000, times in 1usize..4) {
        let device: HandlerRef = handler_ref(Tagged(1));
        let mapping = MemMapping::new(0, 0x000F_FFFF, DeviceType::Rom, Rc::clone(&device));
        let mut bus = Bus::init(&[mapping], Box::new(Interceptor::new(None))).unwrap();

        for _ in 0..times {
            bus.activate_break_read(address);
        }
        prop_assert_eq!(bus.breakpoints().check_mask(address), BpCheck::READ);

        bus.deactivate_break_read(address);
        prop_assert!(bus.breakpoints().check_mask(address).is_empty());
        prop_assert!(Rc::ptr_eq(&bus.lookup(address).handler, &device));
    }
}
