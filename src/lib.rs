//! h2drain - HTTP/2 server transport cores
//!
//! This crate provides the HPACK dynamic header table used by the header
//! decoding path and the two-phase graceful shutdown (GOAWAY / PING / GOAWAY)
//! an HTTP/2 server runs when asked to drain a connection.

pub mod http;
