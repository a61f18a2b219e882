//! Long-running tasks spawned next to the HTTP server.

pub mod reaper;
