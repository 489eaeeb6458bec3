//! Primary-backup key-value one-shot client executable.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

use tokio::runtime::Builder;
use tokio::time::Duration;

use pbkv::{
    gen_request_id, logger_init, pf_error, ClientApiStub, PbkvError, WriteOp,
};

/// Operation requested on the command line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ClientOp {
    Get,
    Write(WriteOp),
}

impl ClientOp {
    /// Parse command line string into ClientOp enum.
    fn parse_name(name: &str) -> Option<Self> {
        match name {
            "Get" => Some(Self::Get),
            _ => WriteOp::parse_name(name).map(Self::Write),
        }
    }
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Server to send the call to; normally the current primary.
    #[arg(short, long)]
    server: SocketAddr,

    /// Operation: Get|Put|Append.
    op: String,

    /// Key to operate on.
    key: String,

    /// Value to write; required by Put and Append.
    value: Option<String>,

    /// Request ID to use; reuse the same ID to retry an operation.
    #[arg(short, long)]
    id: Option<u64>,

    /// Reply timeout duration in millisecs.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(op)` on success or
    /// `Err(PbkvError)` on any error.
    fn sanitize(&self) -> Result<ClientOp, PbkvError> {
        if self.timeout_ms == 0 {
            return Err(PbkvError::msg(format!(
                "invalid timeout duration {} ms",
                self.timeout_ms
            )));
        }
        let op = ClientOp::parse_name(&self.op).ok_or(PbkvError::msg(
            format!("operation '{}' unrecognized", self.op),
        ))?;
        if matches!(op, ClientOp::Write(_)) && self.value.is_none() {
            return Err(PbkvError::msg(format!(
                "operation '{}' requires a value",
                self.op
            )));
        }
        Ok(op)
    }
}

/// Actual main function of pbkv client executable.
fn client_main() -> Result<(), PbkvError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let op = args.sanitize()?;

    // create tokio current-thread runtime; one call needs no more
    let runtime = Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async move {
        let stub = ClientApiStub::new(Duration::from_millis(args.timeout_ms));
        let server = args.server.to_string();
        let id = args.id.unwrap_or_else(gen_request_id);

        match op {
            ClientOp::Get => {
                let reply = stub.get(&server, id, &args.key).await?;
                println!("{:?} {:?}", reply.status, reply.value);
            }
            ClientOp::Write(write_op) => {
                let value = args.value.unwrap_or_default();
                let reply = stub
                    .put_append(&server, id, write_op, &args.key, &value)
                    .await?;
                println!("{:?} {:?}", reply.status, reply.value);
            }
        }

        Ok::<(), PbkvError>(()) // give type hint for this async closure
    })
}

/// Main function of pbkv client executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
