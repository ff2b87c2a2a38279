//! # LibOS Configuration
//!
//! Shared constants, runtime configuration and the status-code taxonomy used
//! by every crate of the deferred execution core.
//!
//! ## Overview
//!
//! The core runs inside a host kernel module and reaches the kernel only
//! through resolved symbols. Everything that has to agree between the page
//! allocator, the address-space managers, the deferred execution engine and
//! the delegated call dispatcher lives here so it cannot drift:
//!
//! * [`memory`]: page geometry, allocator limits, physical placement classes.
//! * [`deferred`]: private stack and return stub sizing, the delegated syscall
//!   number, and the runtime [`EngineConfig`](deferred::EngineConfig).
//! * [`status`]: the [`ErrorKind`](status::ErrorKind) taxonomy and the numeric
//!   status codes handed back across the delegated call boundary.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod deferred;
pub mod memory;
pub mod status;
