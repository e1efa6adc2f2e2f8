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

//! Memory subsystem configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! dram_size = 0x800000
//! debugger = true
//! cart_rom = "roms/game.z64"
//! ```

use crate::core::error::{EmulatorError, Result};
use crate::core::memory::{RDRAM_ALIGNMENT, RDRAM_DEFAULT_SIZE, RDRAM_MAX_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for building a [`System`](crate::core::system::System)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// RDRAM size in bytes
    pub dram_size: usize,
    /// Install the breakpoint interceptor
    pub debugger: bool,
    /// Cartridge image to load at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_rom: Option<PathBuf>,
    /// PIF boot ROM image to load at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pif_rom: Option<PathBuf>,
}

impl MemoryConfig {
    /// Default configuration: 8MB RDRAM, no debugger, no images
    pub fn new() -> Self {
        Self {
            dram_size: RDRAM_DEFAULT_SIZE,
            debugger: false,
            cart_rom: None,
            pif_rom: None,
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| EmulatorError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            EmulatorError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check the RDRAM size fits the address map
    ///
    /// # Errors
    ///
    /// Returns `EmulatorError::ConfigError` if `dram_size` is zero, not a
    /// multiple of 64KB, or larger than the two RDRAM windows combined.
    pub fn validate(&self) -> Result<()> {
        if self.dram_size == 0 || self.dram_size % RDRAM_ALIGNMENT != 0 {
            return Err(EmulatorError::ConfigError(format!(
                "dram_size 0x{:X} must be a non-zero multiple of 0x{:X}",
                self.dram_size, RDRAM_ALIGNMENT
            )));
        }
        if self.dram_size > RDRAM_MAX_SIZE {
            return Err(EmulatorError::ConfigError(format!(
                "dram_size 0x{:X} exceeds maximum 0x{:X}",
                self.dram_size, RDRAM_MAX_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}
