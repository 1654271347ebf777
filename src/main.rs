//! `bunnylold`: the command-line entry point around the `bunnylol_core` library.
//!
//! Parses a handful of flags, loads configuration, optionally daemonizes, and serves the
//! HTTP Frontend until a SIGHUP (reload) or fatal error.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use bunnylol_core::{config, events::TracingEventSink, http};
use daemonize::Daemonize;
use futures::stream::StreamExt;
use signal_hook::consts::SIGHUP;
use signal_hook_tokio::Signals;

struct Args {
    verbose: bool,
    daemonize: bool,
    config_path: Option<PathBuf>,
    port: Option<u16>,
    plugin_dirs: Vec<PathBuf>,
    reload_only: bool,
}

fn parse_command_line() -> Args {
    let args: Vec<String> = env::args().collect();
    let mut verbose = false;
    let mut daemonize = false;
    let mut config_path = None;
    let mut port = None;
    let mut plugin_dirs = Vec::new();
    let mut reload_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--verbose" => verbose = true,
            "-d" | "--daemonize" => daemonize = true,
            "--reload-only" => reload_only = true,
            "--config" => {
                i += 1;
                config_path = args.get(i).map(PathBuf::from);
            }
            "--port" => {
                i += 1;
                port = args.get(i).and_then(|p| p.parse().ok());
            }
            "--plugin-dir" => {
                i += 1;
                if let Some(dir) = args.get(i) {
                    plugin_dirs.push(PathBuf::from(dir));
                }
            }
            other => {
                eprintln!("Unknown option: {other}");
                eprintln!(
                    "Usage: {} [-v|--verbose] [-d|--daemonize] [--config <path>] [--port <port>] \
                     [--plugin-dir <dir>]... [--reload-only]",
                    args[0]
                );
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Args {
        verbose,
        daemonize,
        config_path,
        port,
        plugin_dirs,
        reload_only,
    }
}

/// Sends a bare `GET /reload` to an already-running core over loopback TCP and prints its
/// response, without starting a server of its own. Lets the external menu-bar shell (or a
/// developer) trigger a plugin/config reload without restarting the whole process.
fn send_reload_request(port: u16) -> std::io::Result<()> {
    use std::io::{Read, Write};
    use std::net::TcpStream;

    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.write_all(
        format!("GET /reload HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nConnection: close\r\n\r\n")
            .as_bytes(),
    )?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;

    match response.split("\r\n\r\n").next() {
        Some(head) => println!("{head}"),
        None => println!("{response}"),
    }
    if let Some(body) = response.split("\r\n\r\n").nth(1) {
        print!("{body}");
    }
    Ok(())
}

fn daemonize_process() {
    let daemon = Daemonize::new()
        .working_directory(std::env::current_dir().expect("failed to get current directory"))
        .umask(0o027);

    if let Err(e) = daemon.start() {
        eprintln!("Failed to daemonize: {e}");
        std::process::exit(1);
    }
}

fn main() {
    let args = parse_command_line();

    if args.reload_only {
        let resolved_config_path = args.config_path.or_else(config::default_config_path);
        let port = args.port.unwrap_or_else(|| {
            resolved_config_path
                .as_deref()
                .and_then(|path| config::load_config(path).ok())
                .map(|cfg| cfg.server.port)
                .unwrap_or(bunnylol_core::constants::DEFAULT_PORT)
        });
        if let Err(err) = send_reload_request(port) {
            eprintln!("Failed to reach running core on port {port}: {err}");
            std::process::exit(bunnylol_core::EXIT_FATAL);
        }
        return;
    }

    if args.daemonize {
        println!("PID: {}", std::process::id());
        daemonize_process();
    }

    bunnylol_core::logging::init_logging(args.verbose);

    let resolved_config_path = args.config_path.or_else(config::default_config_path);
    let mut cfg = match &resolved_config_path {
        Some(path) => match config::load_config(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("Configuration error: {err}");
                std::process::exit(bunnylol_core::EXIT_CONFIG_ERROR);
            }
        },
        None => config::Config::default(),
    };

    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    cfg.plugin_dirs.extend(args.plugin_dirs);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], cfg.server.port));
    let sink = Arc::new(TracingEventSink);
    let state = http::AppState::new(
        cfg,
        resolved_config_path,
        sink,
        bunnylol_core::constants::DEFAULT_CONTEXT_POOL_SIZE,
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {e}");
            std::process::exit(bunnylol_core::EXIT_FATAL);
        }
    };

    runtime.block_on(async_main(addr, state, args.verbose));
}

async fn async_main(addr: std::net::SocketAddr, state: http::AppState, verbose: bool) {
    if verbose {
        println!("PID: {}", std::process::id());
        println!("bunnylol listening on http://{addr}");
        println!("Send SIGHUP to reload configuration and plugins");
    }

    let signals_task = setup_signal_handler(state.clone());

    tokio::select! {
        result = http::serve(addr, state) => {
            if let Err(e) = result {
                eprintln!("Server error: {e}");
                std::process::exit(bunnylol_core::EXIT_BIND_ERROR);
            }
        }
        _ = signals_task => {}
    }
}

fn setup_signal_handler(state: http::AppState) -> tokio::task::JoinHandle<()> {
    let signals = Signals::new([SIGHUP]).expect("failed to register signal handler");

    tokio::spawn(async move {
        let mut signals = signals;
        while let Some(signal) = signals.next().await {
            if signal == SIGHUP {
                tracing::info!("received SIGHUP, reloading configuration and plugins");
                state.reload().await;
            }
        }
    })
}
