//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;
use std::num;
use std::string;

/// Customized error type for pbkv. Protocol-level outcomes such as
/// `WrongServer` or `NoKey` are reply statuses, not errors; this type only
/// carries setup and transport failures.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PbkvError(String);

impl PbkvError {
    pub fn msg(msg: impl ToString) -> Self {
        PbkvError(msg.to_string())
    }
}

impl fmt::Display for PbkvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for PbkvError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `PbkvError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for PbkvError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                PbkvError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(string::FromUtf8Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(net::AddrParseError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::time::error::Elapsed);
impl_from_error!(tokio::task::JoinError);
impl_from_error!(ctrlc::Error);
