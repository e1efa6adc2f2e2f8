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

//! Error types for the memory subsystem

use crate::core::memory::BlockKind;
use thiserror::Error;

/// Errors raised while building or configuring the memory subsystem
///
/// Per-access dispatch never fails: lookups always resolve and translation
/// misses are reported as `None`.
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// A backing block could not be allocated with its required size and alignment
    #[error("failed to allocate {block} backing memory")]
    AllocationFailure { block: BlockKind },

    /// An image does not fit into its backing block
    #[error("{block} image is {size} bytes, maximum is {max} bytes")]
    RomTooLarge {
        block: BlockKind,
        size: usize,
        max: usize,
    },

    /// Two address windows claim the same address
    #[error("address window {first} overlaps window {second}")]
    OverlappingWindows { first: String, second: String },

    /// A mapping with `begin > end`
    #[error("invalid mapping range 0x{begin:08X}-0x{end:08X}")]
    InvalidMapping { begin: u32, end: u32 },

    /// Configuration could not be read, parsed or validated
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, EmulatorError>;
