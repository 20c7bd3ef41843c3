//! Network adapters and terminal front end for the parley sync core.
//!
//! `rest` and `transport` implement the core's `ChatApi` and `Transport`
//! seams against the chat server; everything else supports the `parley`
//! binary.

pub mod cli;
pub mod config;
pub mod render;
pub mod rest;
pub mod session_file;
pub mod stomp;
pub mod transport;
