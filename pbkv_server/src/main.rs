//! Primary-backup key-value replica server executable.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use log::{self, LevelFilter};

use tokio::runtime::Builder;
use tokio::sync::watch;
use tokio::time::Duration;

use pbkv::{logger_init, pf_error, pf_info, PbServer, PbkvError, ViewClerk};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Local address 'ip:port' to listen on; also my identity in views, so
    /// the IP must be one that peers can reach.
    #[arg(short, long)]
    bind: SocketAddr,

    /// View authority's address.
    #[arg(short, long)]
    view_service: SocketAddr,

    /// Server configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Timeout of each view authority ping in millisecs.
    #[arg(long, default_value_t = 1000)]
    ping_timeout_ms: u64,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(PbkvError)` on any error.
    fn sanitize(&self) -> Result<(), PbkvError> {
        if self.threads < 2 {
            Err(PbkvError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else if self.bind.ip().is_unspecified() {
            Err(PbkvError::msg(format!(
                "bind address {} is not reachable by peers",
                self.bind
            )))
        } else if self.bind.port() <= 1024 {
            Err(PbkvError::msg(format!(
                "invalid bind port {}",
                self.bind.port()
            )))
        } else if self.view_service.port() <= 1024 {
            Err(PbkvError::msg(format!(
                "invalid view service port {}",
                self.view_service.port()
            )))
        } else if self.bind == self.view_service {
            Err(PbkvError::msg(format!(
                "bind address == view service address {}",
                self.bind
            )))
        } else if self.ping_timeout_ms == 0 {
            Err(PbkvError::msg(format!(
                "invalid ping timeout {} ms",
                self.ping_timeout_ms
            )))
        } else {
            Ok(())
        }
    }
}

/// Actual main function of pbkv server executable.
fn server_main() -> Result<(), PbkvError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    args.sanitize()?;

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };

    // set up termination signals handler
    let (tx_term, mut rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-replica")
            .build()?;

        // enter tokio runtime, set up the server, and serve until asked to
        // terminate
        let (bind, view_addr) = (args.bind, args.view_service);
        let ping_timeout = Duration::from_millis(args.ping_timeout_ms);
        runtime.block_on(async move {
            let view_service =
                Arc::new(ViewClerk::new(view_addr.to_string(), ping_timeout));
            let mut server =
                PbServer::new_and_setup(bind, view_service, config_str).await?;
            pf_info!(
                server.me();
                "serving with view service {}",
                view_addr
            );

            // wait for termination signal
            let _ = rx_term.changed().await;
            server.kill();

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), PbkvError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of pbkv server executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = server_main() {
        pf_error!("server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
