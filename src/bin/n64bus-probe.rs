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

//! n64bus probe
//!
//! Builds the memory system from configuration, attaches the standard map and
//! reports how each address given on the command line is routed.

use clap::Parser;
use n64bus::core::config::MemoryConfig;
use n64bus::core::debugger::{BreakpointFlags, BreakpointHit};
use n64bus::core::memory::DeviceType;
use n64bus::core::system::System;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "n64bus-probe",
    about = "Show how N64 physical addresses are routed through the memory bus"
)]
struct Args {
    /// Addresses to probe (hex with 0x prefix, or decimal)
    #[arg(value_parser = parse_address, required = true)]
    addresses: Vec<u32>,

    /// Config file (defaults to $N64BUS_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Cartridge image to load, overriding the config
    #[arg(long, value_name = "PATH")]
    rom: Option<PathBuf>,

    /// Install a read breakpoint on this word before probing
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    break_read: Vec<u32>,

    /// Install a write breakpoint on this word before probing
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    break_write: Vec<u32>,

    /// Print results as JSON
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Probe {
    address: String,
    device: DeviceType,
    handler: String,
    window: Option<String>,
    value: String,
}

#[derive(Debug, Serialize)]
struct Report {
    probes: Vec<Probe>,
    hits: Vec<Hit>,
}

#[derive(Debug, Serialize)]
struct Hit {
    index: usize,
    address: String,
    kind: &'static str,
}

impl From<BreakpointHit> for Hit {
    fn from(hit: BreakpointHit) -> Self {
        Self {
            index: hit.index,
            address: format!("0x{:08X}", hit.address),
            kind: if hit.flags.contains(BreakpointFlags::WRITE) {
                "write"
            } else {
                "read"
            },
        }
    }
}

fn parse_address(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", text, e))
}

fn load_config(args: &Args) -> n64bus::Result<MemoryConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os("N64BUS_CONFIG").map(PathBuf::from));

    let mut config = match path {
        Some(path) => MemoryConfig::load(path)?,
        None => MemoryConfig::default(),
    };
    if let Some(rom) = &args.rom {
        config.cart_rom = Some(rom.clone());
    }
    if !args.break_read.is_empty() || !args.break_write.is_empty() {
        config.debugger = true;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let mut system = System::new(&config)?;

    let read = BreakpointFlags::ENABLED | BreakpointFlags::READ;
    let write = BreakpointFlags::ENABLED | BreakpointFlags::WRITE;
    for &address in &args.break_read {
        system.add_breakpoint(address & !3, address | 3, read);
    }
    for &address in &args.break_write {
        system.add_breakpoint(address & !3, address | 3, write);
    }

    let mut probes = Vec::with_capacity(args.addresses.len());
    for &address in &args.addresses {
        let entry = system.bus().lookup(address);
        let handler = entry.handler.borrow().name().to_string();
        let window = system
            .store()
            .windows()
            .window_for(address)
            .map(|w| w.name.to_string());
        let value = system.bus().read32(address);

        probes.push(Probe {
            address: format!("0x{:08X}", address),
            device: system.bus().memory_type(address),
            handler,
            window,
            value: format!("0x{:08X}", value),
        });
    }

    let report = Report {
        probes,
        hits: system.take_hits().into_iter().map(Hit::from).collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for probe in &report.probes {
        println!(
            "{}  {:<14} {:<16} {:<20} {}",
            probe.address,
            format!("{:?}", probe.device),
            probe.handler,
            probe.window.as_deref().unwrap_or("-"),
            probe.value
        );
    }
    for hit in &report.hits {
        println!("breakpoint {} hit: {} at {}", hit.index, hit.kind, hit.address);
    }

    Ok(())
}
