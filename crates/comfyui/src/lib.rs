//! ComfyUI REST client and render backend.
//!
//! Provides typed wrappers for the HTTP endpoints the worker needs
//! (upload, prompt submission, history, queue, file view), parsing of
//! history entries, and [`backend::ComfyUIBackend`], the
//! [`RenderBackend`](relay_core::backend::RenderBackend) implementation.

pub mod api;
pub mod backend;
pub mod history;
