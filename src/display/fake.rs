//! Scripted stand-in for `xrandr` and `cvt`, used by the backend tests.
//!
//! Keeps an in-memory output list and mode table, reacts to the XR-Manager
//! property protocol, and records every invocation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::display::error::ToolError;
use crate::display::xrandr::{CommandRunner, ToolOutput};

pub const MANAGER: &str = "XR-Manager";

#[derive(Default)]
struct State {
    outputs: Vec<(String, bool)>,
    mode_text: HashMap<String, String>,
    props_text: HashMap<String, String>,
    ignore_create: bool,
    ignore_delete: bool,
    ignore_mode_switch: bool,
    query_hides_modes: bool,
    missing: HashSet<String>,
    failures: Vec<(String, String)>,
    calls: Vec<Vec<String>>,
    cvt_output: Option<String>,
    defined_modes: Vec<String>,
    attached: HashMap<String, Vec<String>>,
    active: HashMap<String, String>,
}

#[derive(Default)]
pub struct FakeXrandr {
    state: Mutex<State>,
}

impl FakeXrandr {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tool that exposes the XR-Manager output.
    pub fn with_manager() -> Self {
        let fake = Self::new();
        fake.add_output(MANAGER, true);
        fake
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_output(&self, name: &str, connected: bool) {
        self.state().outputs.push((name.to_owned(), connected));
    }

    pub fn remove_output(&self, name: &str) {
        self.state().outputs.retain(|(n, _)| n != name);
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.state().outputs.iter().any(|(n, _)| n == name)
    }

    pub fn set_modes(&self, output: &str, text: &str) {
        self.state().mode_text.insert(output.to_owned(), text.to_owned());
    }

    pub fn set_props(&self, output: &str, text: &str) {
        self.state().props_text.insert(output.to_owned(), text.to_owned());
    }

    /// Accept `CREATE_XR_OUTPUT` with exit 0 but never create the output.
    pub fn ignore_create(&self) {
        self.state().ignore_create = true;
    }

    /// Accept `DELETE_XR_OUTPUT` with exit 0 but keep the output listed.
    pub fn ignore_delete(&self) {
        self.state().ignore_delete = true;
    }

    /// Accept `--mode` with exit 0 but leave the active mode unchanged.
    pub fn ignore_mode_switch(&self) {
        self.state().ignore_mode_switch = true;
    }

    /// Leave defined-but-unattached modes out of the plain query.
    pub fn set_query_hides_modes(&self) {
        self.state().query_hides_modes = true;
    }

    pub fn set_tool_missing(&self, missing: bool) {
        let mut state = self.state();
        if missing {
            state.missing.insert("xrandr".into());
        } else {
            state.missing.remove("xrandr");
        }
    }

    pub fn set_program_missing(&self, program: &str) {
        self.state().missing.insert(program.to_owned());
    }

    /// Fail (exit 1, `stderr`) every call that has `needle` as an argument.
    pub fn fail_on(&self, needle: &str, stderr: &str) {
        self.state()
            .failures
            .push((needle.to_owned(), stderr.to_owned()));
    }

    pub fn set_cvt_output(&self, text: &str) {
        self.state().cvt_output = Some(text.to_owned());
    }

    /// Every invocation so far, program first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state().calls.clone()
    }

    /// `(output, property, value)` of every property set.
    pub fn property_sets(&self) -> Vec<(String, String, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c.as_slice() {
                [_, flag, o, set, p, v] if flag == "--output" && set == "--set" => {
                    Some((o.clone(), p.clone(), v.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Number of calls that include `needle` as an argument.
    pub fn count_calls_with(&self, needle: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.iter().any(|a| a == needle))
            .count()
    }

    pub fn defined_modes(&self) -> Vec<String> {
        self.state().defined_modes.clone()
    }

    pub fn define_mode(&self, mode: &str) {
        self.state().defined_modes.push(mode.to_owned());
    }

    pub fn attached_modes(&self, output: &str) -> Vec<String> {
        self.state().attached.get(output).cloned().unwrap_or_default()
    }

    pub fn active_mode(&self, output: &str) -> Option<String> {
        self.state().active.get(output).cloned()
    }
}

fn ok(stdout: impl Into<String>) -> Result<ToolOutput, ToolError> {
    Ok(ToolOutput {
        code: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    })
}

fn fail(stderr: impl Into<String>) -> Result<ToolOutput, ToolError> {
    Ok(ToolOutput {
        code: Some(1),
        stdout: String::new(),
        stderr: stderr.into(),
    })
}

impl CommandRunner for FakeXrandr {
    fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        let mut state = self.state();
        let mut call = vec![program.to_owned()];
        call.extend(args.iter().map(|a| (*a).to_owned()));
        state.calls.push(call);

        if state.missing.contains(program) {
            return Err(ToolError::Unavailable {
                program: program.to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        if let Some((_, stderr)) = state
            .failures
            .iter()
            .find(|(needle, _)| args.contains(&needle.as_str()))
        {
            return fail(stderr.clone());
        }

        if program == "cvt" {
            if let Some(text) = &state.cvt_output {
                return ok(text.clone());
            }
            let [w, h, r] = args else {
                return fail("usage: cvt w h rate");
            };
            return ok(format!(
                "# {w}x{h} {r}.00 Hz (CVT)\n\
                 Modeline \"{w}x{h}_{r}.00\"  173.00  {w} 2048 2248 2576  {h} 1083 1088 1120 -hsync +vsync\n"
            ));
        }

        let known = |state: &State, o: &str| state.outputs.iter().any(|(n, _)| n == o);
        match args {
            ["--listoutputs"] => ok(listing(&state)),
            [] => {
                let mut text = String::from("Screen 0: minimum 8 x 8, current 1920 x 1080, maximum 16384 x 16384\n");
                for (name, connected) in &state.outputs {
                    text.push_str(&format!("{name} {}\n", connection(*connected)));
                    for mode in state.attached.get(name).into_iter().flatten() {
                        let current = if state.active.get(name) == Some(mode) { "*" } else { "" };
                        text.push_str(&format!("   {mode}  60.00{current}\n"));
                    }
                }
                // Defined but unattached modes trail the output sections.
                for mode in state.defined_modes.iter().filter(|_| !state.query_hides_modes) {
                    if !state.attached.values().flatten().any(|m| m == mode) {
                        text.push_str(&format!("  {mode} (0x1c1)  173.000MHz -HSync +VSync\n"));
                    }
                }
                ok(text)
            }
            ["--output", o, "--query"] if known(&state, o) => {
                ok(state.mode_text.get(*o).cloned().unwrap_or_default())
            }
            ["--output", o, "--props"] if known(&state, o) => {
                ok(state.props_text.get(*o).cloned().unwrap_or_default())
            }
            ["--output", o, "--set", prop, value] if known(&state, o) => {
                if *o == MANAGER && *prop == "CREATE_XR_OUTPUT" && !state.ignore_create {
                    let name = value.split(':').next().unwrap_or_default().to_owned();
                    if !known(&state, &name) {
                        state.outputs.push((name, true));
                    }
                }
                if *o == MANAGER && *prop == "DELETE_XR_OUTPUT" && !state.ignore_delete {
                    state.outputs.retain(|(n, _)| n != value);
                }
                ok("")
            }
            ["--newmode", name, ..] => {
                if state.defined_modes.iter().any(|m| m == name) {
                    return fail("X Error: BadName (named color or font does not exist)");
                }
                state.defined_modes.push((*name).to_owned());
                ok("")
            }
            ["--addmode", o, mode] if known(&state, o) => {
                if !state.defined_modes.iter().any(|m| m == mode) {
                    return fail(format!("cannot find mode \"{mode}\""));
                }
                let modes = state.attached.entry((*o).to_owned()).or_default();
                if !modes.iter().any(|m| m == mode) {
                    modes.push((*mode).to_owned());
                }
                ok("")
            }
            ["--output", o, "--mode", mode] if known(&state, o) => {
                let attached = state
                    .attached
                    .get(*o)
                    .is_some_and(|modes| modes.iter().any(|m| m == mode));
                if !attached {
                    return fail(format!("cannot find mode {mode}"));
                }
                if !state.ignore_mode_switch {
                    state.active.insert((*o).to_owned(), (*mode).to_owned());
                }
                ok("")
            }
            ["--output", o, "--off"] if known(&state, o) => {
                state.active.remove(*o);
                ok("")
            }
            ["--delmode", o, mode] => {
                let Some(modes) = state.attached.get_mut(*o) else {
                    return fail("X Error: BadMatch");
                };
                let before = modes.len();
                modes.retain(|m| m != mode);
                if modes.len() == before {
                    return fail("X Error: BadMatch");
                }
                ok("")
            }
            ["--rmmode", mode] => {
                let in_use = state.attached.values().flatten().any(|m| m == mode);
                if in_use || !state.defined_modes.iter().any(|m| m == mode) {
                    return fail("X Error: BadAccess");
                }
                state.defined_modes.retain(|m| m != mode);
                ok("")
            }
            ["--output", o, ..] => fail(format!("warning: output {o} not found; ignoring")),
            _ => fail("unrecognized option"),
        }
    }
}

fn connection(connected: bool) -> &'static str {
    if connected {
        "connected"
    } else {
        "disconnected"
    }
}

fn listing(state: &State) -> String {
    state
        .outputs
        .iter()
        .map(|(name, connected)| format!("{name} {}\n", connection(*connected)))
        .collect()
}
