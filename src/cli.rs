//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::display::{BackendKind, DisplayRequest, DEFAULT_OUTPUT_NAME};

/// Virtual displays for AR glasses on X11 desktops.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// The backend to use. Overrides the `backend` key of the config file.
    #[arg(value_enum, long, global = true)]
    pub backend: Option<BackendKind>,

    /// Path of the config file.
    ///
    /// Defaults to $XDG_CONFIG_HOME/xr-vdisplay/config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The log level. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<log::LevelFilter>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create a virtual display and keep it until SIGINT/SIGTERM.
    Run(RunArgs),
    /// Remove a virtual display.
    Remove(RemoveArgs),
    /// List virtual displays.
    List,
    /// Toggle AR mode.
    ArMode(ArModeArgs),
    /// Print the refresh rates of the physical XR connector.
    RefreshRates(RefreshRatesArgs),
    /// Check whether the selected backend is usable.
    Probe,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Display width in pixels.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Display height in pixels.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Display framerate in Hz.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub framerate: u32,

    /// Virtual output name.
    #[arg(long, default_value = DEFAULT_OUTPUT_NAME)]
    pub output: String,

    /// Refresh rates to advertise, e.g. `60,72,90`.
    ///
    /// By default the rates are read from the physical XR connector.
    #[arg(long, value_delimiter = ',')]
    pub refresh_rates: Vec<u32>,

    /// Physical XR connector to read refresh rates from. Auto-detected by default.
    #[arg(long)]
    pub connector: Option<String>,
}

impl RunArgs {
    pub fn request(&self) -> DisplayRequest {
        let mut request =
            DisplayRequest::new(self.width, self.height, self.framerate).with_name(self.output.clone());
        if !self.refresh_rates.is_empty() {
            request = request.with_refresh_rates(self.refresh_rates.clone());
        }
        if let Some(connector) = &self.connector {
            request = request.with_physical_connector(connector.clone());
        }
        request
    }
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Id of the display, i.e. the output name or the service-assigned id.
    pub id: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
pub struct ArModeArgs {
    pub state: Toggle,
}

#[derive(Args, Debug)]
pub struct RefreshRatesArgs {
    /// Connector to query. Auto-detected by default.
    #[arg(long)]
    pub connector: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
