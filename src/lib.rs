//! Deterministic replay of the order in which threads accessed shared memory.
//!
//! A recording lists, for every shared `(object, field)` location, the order
//! in which threads read and wrote it. `ReplayAgent` loads such a recording
//! and, through the `ReplayHooks` the instrumented program calls around each
//! access, holds threads back until their access is the next one the
//! recording allows.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

#[macro_use]
pub mod log;

pub mod agent;
pub mod commands;
pub mod config;
pub mod context;
pub mod event;
pub mod hooks;
pub mod object_id;
pub mod replay;
pub mod shared_memory;
pub mod thread_id;
pub mod trace;
