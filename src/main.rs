#![deny(clippy::all)]

use std::sync::Arc;

use log::*;

use snowflake_mux::config::Config;
use snowflake_mux::idgen::SnowflakeSource;
use snowflake_mux::Service;

fn setup_logger() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "snowflake_mux=debug");
    }
    env_logger::init();
}

fn print_help() {
    println!("snowflake-mux v{}", env!("CARGO_PKG_VERSION"));
    println!("Snowflake ID service speaking gRPC, HTTP and a RESP-style text protocol on one port\n");
    println!("USAGE:");
    println!("    snowflake-mux [OPTIONS] [CONFIG_FILE]\n");
    println!("OPTIONS:");
    println!("    -h, --help           Show this help message");
    println!("    -l, --listen ADDR    Listening address (overrides server.listen)\n");
    println!("ARGUMENTS:");
    println!("    [CONFIG_FILE]        Path to configuration file (default: built-in defaults)\n");
    println!("CONFIGURATION:");
    println!("The configuration file uses a simple key=value format with sections.\n");
    println!("[server]");
    println!("  listen = \"localhost:8199\"                  # Shared listening address\n");
    println!("[limits] - Connection limits");
    println!("  sniff_timeout_ms = 3000                    # Deadline for classifying a connection (ms)");
    println!("  sniff_max_bytes = 4096                     # Max bytes buffered while classifying");
    println!("  handoff_capacity = 16                      # Queue size between accept and dispatch");
    println!("  text_read_buffer = 1024                    # Text-protocol request read size");
    println!("  text_read_timeout_ms = 15000               # Text-protocol read deadline (ms, 0 = none)");
    println!("  http_shutdown_grace_ms = 5000              # Wait for in-flight gRPC calls on close (ms)\n");
    println!("[snowflake]");
    println!("  epoch_ms = 1288834974657                   # Identifier epoch (unix ms)\n");
    println!("EXAMPLES:");
    println!("    snowflake-mux                             # Defaults, listen on localhost:8199");
    println!("    snowflake-mux -l 0.0.0.0:8199 my.conf     # Custom config and address");
}

struct Args {
    listen: Option<String>,
    config: Option<String>,
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut args = std::env::args().skip(1);
    let mut out = Args {
        listen: None,
        config: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-l" | "--listen" => {
                out.listen = Some(args.next().ok_or_else(|| format!("{} needs an address", arg))?);
            }
            s if s.starts_with('-') => return Err(format!("unknown option {}", s)),
            s if out.config.is_none() => out.config = Some(s.to_string()),
            s => return Err(format!("unexpected argument {}", s)),
        }
    }
    Ok(Some(out))
}

fn main() {
    let args = match parse_args() {
        Ok(Some(a)) => a,
        Ok(None) => {
            print_help();
            return;
        }
        Err(e) => {
            eprintln!("{}; see --help", e);
            std::process::exit(2);
        }
    };

    setup_logger();

    let mut cfg = match &args.config {
        Some(path) => {
            let cfg = Config::load(path).unwrap_or_else(|e| {
                eprintln!("failed to read config {}: {}", path, e);
                std::process::exit(1);
            });
            info!("config loaded from {}", path);
            cfg
        }
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        cfg.server.listen = listen;
    }

    run_server(Arc::new(cfg));
}

fn run_server(cfg: Arc<Config>) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("snowflake-worker")
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("failed to build runtime: {}", e);
            std::process::exit(1);
        });

    runtime.block_on(async move {
        let source = Arc::new(SnowflakeSource::new(cfg.snowflake.epoch_ms));
        let service = match Service::bind(cfg.clone(), source).await {
            Ok(s) => s,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        };
        match service.local_addr() {
            Ok(addr) => info!("snowflake-mux listening on {}; press Ctrl-C to stop.", addr),
            Err(e) => warn!("listening address unavailable: {}", e),
        }

        let running = service.start();
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {}", e);
        }
        info!("shutting down...");
        running.close().await;
    });

    info!("Goodbye.");
}
