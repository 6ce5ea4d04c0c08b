//! PhantomSyn Library
//!
//! Decoy-injection engine for outbound TCP traffic on Windows. For every new
//! outbound flow to a configured server endpoint, a synthetic low-TTL "phantom"
//! SYN is injected ahead of the genuine packet so that in-path DPI equipment
//! binds its flow state to the decoy while the real connection is untouched.
//!
//! This library module exposes the engine for use by host processes,
//! test binaries and the CLI testbench.

pub mod control;
pub mod injector;
pub mod settings;

// Re-export commonly used items
pub use injector::driver::stub::StubDriver;
pub use injector::driver::DivertDriver;
pub use injector::engine::PhantomEngine;
pub use injector::{InjectorError, InjectorResult};
