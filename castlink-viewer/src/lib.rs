//! castlink viewer library.
//!
//! Receives the host stream over TCP, renders frames through the
//! core's staleness filter into an in-memory surface, and plays audio
//! through a `cpal` sink behind the jitter buffer. The actual UI shell
//! is out of scope; this crate keeps the latest decoded picture and
//! render statistics available for one.

pub mod audio;
pub mod config;
pub mod input;
pub mod session;
pub mod surface;
