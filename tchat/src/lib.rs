//! `tchat`: terminal chat client with end-to-end encrypted messages.

pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod session;
pub mod transport;
pub mod unread;
