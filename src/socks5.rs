//! SOCKS5 protocol engine served over tunneled streams
//!
//! - Features:
//!     - CONNECT (IPv4, IPv6, domain name targets)
//!     - No Authentication
//!     - Username/Password Authentication
//!     - Generic over the transport: any tokio `AsyncRead + AsyncWrite`
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)

pub mod address;
pub mod auth;
pub mod commands;
pub mod protocol;
pub mod server;

pub use auth::{Authenticator, CredentialStore, StaticCredentials};
pub use server::{Socks5Config, Socks5Server};
