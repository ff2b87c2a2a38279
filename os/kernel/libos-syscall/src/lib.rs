//! # Delegated Calls
//!
//! The channel through which code in a controlled process talks to the
//! core. Every call carries an attention id and up to five word-sized
//! arguments, and gets one word back:
//!
//! | Id | Name | Arguments | Result |
//! |----|------|-----------|--------|
//! | 3 | `DB_PULL` | buffer, length | bytes needed or written |
//! | 4 | `EXTENDED` | callback id, buffer, length | callback result |
//! | 5 | `NTFY_COMPLETE` | work result | thread resumes elsewhere |
//! | 6 | `SHORT` | callback id, four words | callback result |
//!
//! Failures come back as negative [`status`](libos_info::status) words;
//! unknown ids are ignored.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod attention;
mod database;
mod dispatcher;
mod error;
mod user_memory;

pub use attention::AttentionId;
pub use database::{CallbackDatabase, CallbackKind, ExtendedCallback, ShortCallback};
pub use dispatcher::DelegatedCalls;
pub use error::DispatchError;
pub use user_memory::UserMemory;
