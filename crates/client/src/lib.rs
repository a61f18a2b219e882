//! Client for the relay broker's job API.
//!
//! [`client::RelayClient`] wraps the client-facing endpoints (submit,
//! status, result, delete, health) and the poll-until-done contract:
//! submit a frame, poll its status at a fixed interval until it is
//! terminal or a ceiling is reached, then download the result.

pub mod client;
