//! Display-output protocol client.
//!
//! Wraps the host display-configuration tool (`xrandr` by default) and the
//! modeline generator (`cvt`). Each method is one tool invocation with no
//! state kept between calls, so every call is independently retryable.
//!
//! Invocation surface:
//! - `--listoutputs`                              list outputs
//! - `--output <o> --query` / `--props`           per-output query
//! - `--output <o> --set <prop> <value>`          property set
//! - `--newmode`, `--addmode`, `--mode`, `--off`,
//!   `--delmode`, `--rmmode`                      modeline management
//! - `cvt <w> <h> <rate>`                         modeline generation

mod parse;
mod runner;

use std::sync::Arc;

pub use parse::{
    contains_output, is_non_desktop, mentions_mode, mode_is_active, normalize_rates,
    parse_modeline, parse_outputs, refresh_rates_or_fallback, Modeline, OutputDescriptor,
    FALLBACK_REFRESH_RATE, MAX_REFRESH_RATE, MIN_REFRESH_RATE,
};
#[cfg(test)]
pub use runner::ToolOutput;
pub use runner::{CommandRunner, SystemRunner};

use crate::display::error::ToolError;

// ---------------------------------------------------------------------------
// Display tool client
// ---------------------------------------------------------------------------

/// Client for the display-configuration tool.
#[derive(Clone)]
pub struct XrandrClient {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl XrandrClient {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Runs the tool and requires a zero exit.
    fn run_checked(&self, args: &[&str]) -> Result<String, ToolError> {
        let out = self
            .runner
            .run(&self.program, args)?
            .checked(&self.program, args)?;
        Ok(out.stdout)
    }

    /// Lists outputs in tool order.
    ///
    /// `Err(ToolError::Unavailable)` means the tool could not be run; an
    /// empty `Vec` is a valid "no outputs" answer.
    pub fn list_outputs(&self) -> Result<Vec<OutputDescriptor>, ToolError> {
        self.run_checked(&["--listoutputs"])
            .map(|text| parse_outputs(&text))
    }

    /// Sets `property` to `value` on `output`.
    pub fn set_property(&self, output: &str, property: &str, value: &str) -> Result<(), ToolError> {
        log::debug!("xrandr: {output}.{property} = {value:?}");
        self.run_checked(&["--output", output, "--set", property, value])
            .map(drop)
    }

    /// Raw per-output query text (modes and, with some drivers, vendor info).
    pub fn query_output(&self, output: &str) -> Result<String, ToolError> {
        self.run_checked(&["--output", output, "--query"])
    }

    /// Refresh rates advertised for `output`, ascending.
    ///
    /// Falls back to `[60]` when the query succeeds but nothing parses.
    pub fn query_modes(&self, output: &str) -> Result<Vec<u32>, ToolError> {
        self.query_output(output)
            .map(|text| refresh_rates_or_fallback(&text))
    }

    /// Property listing for `output`. Any failure reads as no properties.
    pub fn query_properties(&self, output: &str) -> String {
        let args = ["--output", output, "--props"];
        match self.runner.run(&self.program, &args) {
            Ok(out) => out.stdout,
            Err(e) => {
                log::debug!("xrandr: props query for {output} failed: {e}");
                String::new()
            }
        }
    }

    /// Plain query of the whole screen: outputs with their modes.
    pub fn query(&self) -> Result<String, ToolError> {
        self.run_checked(&[])
    }

    /// Registers a new mode from a generated modeline.
    pub fn new_mode(&self, modeline: &Modeline) -> Result<(), ToolError> {
        let mut args = vec!["--newmode", modeline.name.as_str()];
        args.extend(modeline.params.iter().map(String::as_str));
        self.run_checked(&args).map(drop)
    }

    pub fn add_mode(&self, output: &str, mode: &str) -> Result<(), ToolError> {
        self.run_checked(&["--addmode", output, mode]).map(drop)
    }

    pub fn set_mode(&self, output: &str, mode: &str) -> Result<(), ToolError> {
        self.run_checked(&["--output", output, "--mode", mode])
            .map(drop)
    }

    pub fn output_off(&self, output: &str) -> Result<(), ToolError> {
        self.run_checked(&["--output", output, "--off"]).map(drop)
    }

    pub fn delete_mode(&self, output: &str, mode: &str) -> Result<(), ToolError> {
        self.run_checked(&["--delmode", output, mode]).map(drop)
    }

    pub fn remove_mode(&self, mode: &str) -> Result<(), ToolError> {
        self.run_checked(&["--rmmode", mode]).map(drop)
    }
}

// ---------------------------------------------------------------------------
// Modeline generator
// ---------------------------------------------------------------------------

/// Client for the modeline generator (`cvt <w> <h> <rate>`).
#[derive(Clone)]
pub struct ModelineGenerator {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl ModelineGenerator {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Generates a modeline. `Ok(None)` when the tool printed no `Modeline` line.
    pub fn generate(&self, width: u32, height: u32, rate: u32) -> Result<Option<Modeline>, ToolError> {
        let (w, h, r) = (width.to_string(), height.to_string(), rate.to_string());
        let args = [w.as_str(), h.as_str(), r.as_str()];
        let out = self
            .runner
            .run(&self.program, &args)?
            .checked(&self.program, &args)?;
        Ok(parse_modeline(&out.stdout))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::fake::FakeXrandr;

    fn client(fake: &Arc<FakeXrandr>) -> XrandrClient {
        XrandrClient::new(fake.clone(), "xrandr")
    }

    #[test]
    fn list_outputs_reports_unavailable_tool() {
        let fake = Arc::new(FakeXrandr::new());
        fake.set_tool_missing(true);
        let err = client(&fake).list_outputs().unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn empty_listing_is_not_an_error() {
        let fake = Arc::new(FakeXrandr::new());
        assert!(client(&fake).list_outputs().unwrap().is_empty());
    }

    #[test]
    fn failed_property_set_carries_stderr() {
        let fake = Arc::new(FakeXrandr::new());
        fake.fail_on("--set", "BadMatch (invalid parameter attributes)");
        let err = client(&fake)
            .set_property("XR-Manager", "AR_MODE", "1")
            .unwrap_err();
        match err {
            ToolError::Protocol { stderr, .. } => assert!(stderr.contains("BadMatch")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn new_mode_passes_params_as_separate_arguments() {
        let fake = Arc::new(FakeXrandr::new());
        let modeline = Modeline {
            name: "800x600_60.00".into(),
            params: vec!["38.25".into(), "800".into(), "+vsync".into()],
        };
        client(&fake).new_mode(&modeline).unwrap();
        assert_eq!(
            fake.calls().last().unwrap(),
            &["xrandr", "--newmode", "800x600_60.00", "38.25", "800", "+vsync"]
        );
    }

    #[test]
    fn query_modes_parses_connector_rates() {
        let fake = Arc::new(FakeXrandr::new());
        fake.add_output("DisplayPort-0", true);
        fake.set_modes("DisplayPort-0", "   1920x1080  90.00  60.00*+  72.00\n");
        assert_eq!(client(&fake).query_modes("DisplayPort-0").unwrap(), vec![60, 72, 90]);
    }

    #[test]
    fn generator_returns_none_without_modeline() {
        let fake = Arc::new(FakeXrandr::new());
        fake.set_cvt_output("# nothing useful\n");
        let generator = ModelineGenerator::new(fake.clone(), "cvt");
        assert_eq!(generator.generate(1920, 1080, 60).unwrap(), None);
    }
}
