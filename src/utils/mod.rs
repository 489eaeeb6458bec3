//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;

pub use error::PbkvError;
pub use print::logger_init;

pub(crate) use safetcp::{read_frame, write_frame, tcp_call};
