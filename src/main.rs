/// Entry point: CLI parsing, config loading, runtime construction, and the
/// supervisor loop (§4.8, §6, §14). Everything that actually forwards
/// bytes lives in the library crate; this binary just wires it up.
use std::process::ExitCode;
use std::sync::Arc;

use rona_redir::acceptor;
use rona_redir::config::{self, Config};
use rona_redir::pool::{ConnectionPool, DEFAULT_POOL_SIZE};
use rona_redir::relay::RelayRegistry;

const USAGE: &str = "usage: rona-redir -c <config.toml>\n\n\
    -c <path>   path to the TOML configuration file (required)\n\
    -h, --help  print this message and exit";

struct Args {
    config_path: String,
}

enum ParsedArgs {
    Run(Args),
    Help,
}

fn parse_args(raw: impl Iterator<Item = String>) -> Result<ParsedArgs, String> {
    let mut config_path = None;
    let mut iter = raw.skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ParsedArgs::Help),
            "-c" => {
                let path = iter.next().ok_or("missing value for -c")?;
                config_path = Some(path);
            }
            other => return Err(format!("unrecognized argument: {}", other)),
        }
    }

    let config_path = config_path.ok_or("missing required -c <path>")?;
    Ok(ParsedArgs::Run(Args { config_path }))
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args(std::env::args()) {
        Ok(ParsedArgs::Help) => {
            println!("{}", USAGE);
            return ExitCode::from(0);
        }
        Ok(ParsedArgs::Run(args)) => args,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            return ExitCode::from(1);
        }
    };

    let raw_config = match std::fs::read_to_string(&args.config_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read {}: {}", args.config_path, e);
            return ExitCode::from(1);
        }
    };

    let config = match Config::parse(&raw_config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start async runtime: {}", e);
            return ExitCode::from(4);
        }
    };

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> ExitCode {
    config::set_config(config.clone());

    let relays = match RelayRegistry::resolve(&config.servers).await {
        Ok(relays) => relays,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };

    if relays.is_empty() {
        log::error!("no relays resolved");
        return ExitCode::from(2);
    }

    let listen_addr = format!("{}:{}", config.redir.address, config.redir.port);
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", listen_addr, e);
            return ExitCode::from(4);
        }
    };
    log::info!("listening on {}", listen_addr);

    let pool = ConnectionPool::new(DEFAULT_POOL_SIZE);
    let relays = Arc::new(relays);

    tokio::select! {
        _ = acceptor::run(listener, relays, pool) => {}
        _ = shutdown_signal() => {
            log::info!("shutting down");
        }
    }

    ExitCode::from(0)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
