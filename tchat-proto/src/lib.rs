//! Shared wire definitions for `tchat`: the hybrid envelope, realtime frames,
//! and REST request/response bodies.

pub mod api;
pub mod codec;
pub mod envelope;
pub mod frame;
