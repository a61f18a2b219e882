//! Render worker: claims queued jobs and drives them through ComfyUI.
//!
//! The loop itself ([`worker_loop::WorkerLoop`]) is agnostic of where jobs
//! come from: it runs in-process against the broker's store, or remotely
//! through [`broker_client::BrokerClient`].

pub mod broker_client;
pub mod config;
pub mod worker_loop;
