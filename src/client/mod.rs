//! Client side: a one-shot API stub. Retrying and choosing
//! which server to talk to are left to the caller.

mod apistub;

pub use apistub::{ClientApiStub, gen_request_id};
