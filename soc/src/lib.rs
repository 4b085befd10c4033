#![no_std]

mod config;
pub mod regs;

pub use config::{Devices, Region, SocConfig, Source, ZpuModel};
