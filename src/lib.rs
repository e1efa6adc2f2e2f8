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

//! n64bus: Nintendo 64 physical memory bus
//!
//! This crate provides the memory subsystem of an N64 emulator: backing
//! memory, the region-based handler dispatch used for every CPU load and
//! store, and transparent breakpoint interception for debuggers.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`core`]: Core components (memory bus, debugger boundary, system context)
//!
//! # Example
//!
//! ```
//! use n64bus::core::config::MemoryConfig;
//! use n64bus::core::memory::DeviceType;
//! use n64bus::core::system::System;
//!
//! let system = System::new(&MemoryConfig::default())?;
//! let bus = system.bus();
//!
//! bus.write32(0x0000_0100, 0x3C08_A430);
//! assert_eq!(bus.read32(0x0000_0100), 0x3C08_A430);
//! assert_eq!(bus.memory_type(0x0440_0000), DeviceType::Vi);
//! # Ok::<(), n64bus::EmulatorError>(())
//! ```
//!
//! # Modules
//!
//! - [`core::memory`]: Backing store, region table, breakpoint layer and the [`core::memory::Bus`]
//! - [`core::debugger`]: Breakpoint registry contract
//! - [`core::config`]: TOML configuration
//! - [`core::system`]: Owns the store, bus and registry
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`] which is an alias for
//! `Result<T, EmulatorError>`. Per-access dispatch never fails.

pub mod core;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
