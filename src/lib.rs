#![doc = include_str!("../README.md")]

extern crate crossbeam_utils;

pub mod ds_impl;

pub use ds_impl::{ConcurrentStack, HazardPointerStack, RefCountedStack};
pub use hp_reclaim::{default_domain, Config, Domain, Error, Result};
