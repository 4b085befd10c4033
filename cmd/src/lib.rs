#![no_std]

#[macro_use]
extern crate log;

mod args;
pub mod help;
mod keys;
pub mod table;

pub use args::Args;
pub use keys::{Group, Key};
pub use table::{Builtins, CommandDescriptor, CommandTable, Decoded, HelpDescriptor, HELP};
