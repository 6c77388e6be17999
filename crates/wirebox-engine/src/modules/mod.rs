#![forbid(unsafe_code)]

//! The machine module implementations.

pub mod browser;
pub mod internet;
pub mod static_server;
pub mod v86;

mod http;

pub use browser::Browser;
pub use internet::Internet;
pub use static_server::StaticServer;
pub use v86::V86;
