//! Job lifecycle core: the in-memory job store, the broker operations
//! layered on it, and the seams (queue, render backend, workflow template)
//! the worker drives a job through.

pub mod backend;
pub mod broker;
pub mod error;
pub mod job;
pub mod media;
pub mod queue;
pub mod store;
pub mod types;
pub mod workflow;
