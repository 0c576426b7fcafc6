//! Hazard pointers with a fixed slot table and deferred, rechecked freeing.
//!
//! A thread that is about to dereference a shared pointer first publishes it in its
//! hazard slot. Unlinked objects are [`retire`](Domain::retire)d into a list and only freed
//! by a [`sweep`](Domain::sweep) once no slot publishes them.

#[macro_use]
extern crate cfg_if;

mod alloc;
mod config;
mod domain;
mod error;
mod hazard;
mod retired;
mod thread;

pub use alloc::{assert_live, free, try_alloc, try_alloc_raw, POISON_BYTE};
pub use config::{Config, DEFAULT_CAPACITY};
pub use domain::Domain;
pub use error::{Error, Result};
pub use hazard::HazardPointer;
pub use retired::Reservation;

use std::sync::OnceLock;

static DEFAULT_DOMAIN: OnceLock<Domain> = OnceLock::new();

/// The process-wide domain, created with [`Config::default`] on first use.
#[inline]
pub fn default_domain() -> &'static Domain {
    DEFAULT_DOMAIN.get_or_init(Domain::new)
}
