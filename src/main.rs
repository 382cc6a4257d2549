//! xr-vdisplay -- virtual displays for AR glasses.
//!
//! Entry point, backend selection, and signal handling.

mod cli;
mod config;
mod display;

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use cli::{Cli, Cmd, Toggle};
use config::Config;
use display::session::DisplaySession;
use display::xr_manager::XrManagerBackend;
use display::BackendKind;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = cli.global.log_level {
        logger.filter_level(level);
    }
    logger.init();

    let mut config = match config::load_config(cli.global.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("xr-vdisplay: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(backend) = cli.global.backend {
        config.backend = backend;
    }
    log::debug!("xr-vdisplay: using {} backend", config.backend);

    match cli.command {
        Cmd::Run(args) => run(&config, &args.request()),
        Cmd::Remove(args) => {
            let mut backend = display::create_backend(config.backend, &config);
            exit_code(backend.remove(&args.id))
        }
        Cmd::List => {
            let mut backend = display::create_backend(config.backend, &config);
            for record in backend.list() {
                println!("{record}");
            }
            ExitCode::SUCCESS
        }
        Cmd::ArMode(args) => {
            let mut backend = display::create_backend(config.backend, &config);
            exit_code(match args.state {
                Toggle::On => backend.enable_ar_mode(),
                Toggle::Off => backend.disable_ar_mode(),
            })
        }
        Cmd::RefreshRates(args) => {
            if config.backend != BackendKind::XrManager {
                log::warn!(
                    "xr-vdisplay: refresh rates are read through the display tool regardless of the {} backend",
                    config.backend
                );
            }
            let backend = XrManagerBackend::new(display::xrandr_client(&config), &config.xr_manager);
            let rates: Vec<String> = backend
                .physical_connector_refresh_rates(args.connector.as_deref())
                .iter()
                .map(u32::to_string)
                .collect();
            println!("{}", rates.join(" "));
            ExitCode::SUCCESS
        }
        Cmd::Probe => {
            let mut backend = display::create_backend(config.backend, &config);
            let available = backend.available();
            println!(
                "{}: {}",
                config.backend,
                if available { "available" } else { "unavailable" }
            );
            exit_code(available)
        }
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Holds one virtual display until SIGINT or SIGTERM.
fn run(config: &Config, request: &display::DisplayRequest) -> ExitCode {
    let backend = display::create_backend(config.backend, config);
    let on_closed = Box::new(|| log::info!("xr-vdisplay: virtual display closed"));
    let mut session = match DisplaySession::open(backend, request, Some(on_closed)) {
        Ok(session) => session,
        Err(e) => {
            log::error!("xr-vdisplay: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("{}", session.id());

    let result = wait_for_shutdown();
    session.terminate();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("xr-vdisplay: signal handling failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async {
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                log::info!("xr-vdisplay: received SIGINT, shutting down");
            }
            _ = terminate.recv() => {
                log::info!("xr-vdisplay: received SIGTERM, shutting down");
            }
        }
        Ok(())
    })
}
