//! Daemon assembly, shared by the `pulsed` binary and its integration tests.

pub mod daemon;

pub use daemon::{Daemon, open_store};
