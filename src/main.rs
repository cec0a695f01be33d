//! appwire - command-line client
//!
//! Sends one request to a server speaking the framed protocol and prints
//! the result. The readiness loop runs on a blocking thread while the
//! async side waits for either its completion or Ctrl+C.

use anyhow::{anyhow, Context};
use appwire::event_loop::{LoopConfig, Multiplexer, RunReport};
use appwire::request::create_request;
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Client configuration
struct Config {
    /// Server host name or address
    host: String,
    /// Server port
    port: u16,
    /// Request action
    action: String,
    /// Request value
    value: String,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("appwire");

        match args.get(1).map(String::as_str) {
            Some("--help") => {
                print_help(program);
                std::process::exit(0);
            }
            Some("--version") | Some("-v") => {
                println!("appwire version {}", appwire::VERSION);
                std::process::exit(0);
            }
            _ => {}
        }

        if args.len() != 5 {
            eprintln!("Usage: {} <host> <port> <action> <value>", program);
            std::process::exit(1);
        }

        let port = args[2].parse().unwrap_or_else(|_| {
            eprintln!("Error: invalid port number '{}'", args[2]);
            eprintln!("Usage: {} <host> <port> <action> <value>", program);
            std::process::exit(1);
        });

        Config {
            host: args[1].clone(),
            port,
            action: args[3].clone(),
            value: args[4].clone(),
        }
    }

    /// Resolves host and port to the first matching socket address
    fn server_address(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {}:{}", self.host, self.port))?
            .next()
            .ok_or_else(|| anyhow!("no address found for {}:{}", self.host, self.port))
    }
}

fn print_help(program: &str) {
    println!(
        r#"
appwire - client for the framed JSON application protocol

USAGE:
    {program} <host> <port> <action> <value>

ARGUMENTS:
    <host>      Server host name or address
    <port>      Server port
    <action>    Request action (supported: search)
    <value>     Request value

OPTIONS:
    -v, --version        Print version information
        --help           Print this help message

ENVIRONMENT:
    RUST_LOG             Log filter (default: info)

EXAMPLES:
    {program} 127.0.0.1 65432 search ethan
    RUST_LOG=trace {program} localhost 65432 search morpheus
"#
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Reject unknown actions before any socket exists
    let request = create_request(&config.action, config.value.as_str())?;
    let addr = config.server_address()?;

    let mut mux = Multiplexer::new(LoopConfig::default()).context("failed to create event loop")?;
    // A connect that fails outright is reported like any other connection fault
    mux.start_connection(addr, request);
    let shutdown = mux.shutdown_handle();

    let mut run = tokio::task::spawn_blocking(move || mux.run());

    let report: RunReport = tokio::select! {
        joined = &mut run => joined.context("event loop panicked")??,
        Ok(()) = signal::ctrl_c() => {
            info!("Caught keyboard interrupt, exiting");
            shutdown.trigger();
            run.await.context("event loop panicked")??
        }
    };

    for completed in &report.responses {
        match completed.message.result() {
            Some(result) => println!("{}", result),
            None => println!("{}", completed.message.content),
        }
    }

    if report.failures > 0 {
        warn!(failures = report.failures, "Some connections ended with errors");
    }

    Ok(())
}
