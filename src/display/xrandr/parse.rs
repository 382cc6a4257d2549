//! Parsers for the display tool's free-form text output.
//!
//! The tool has no machine-readable mode, so everything here is
//! line/token scanning. Parsers never fail: unparseable input yields an
//! empty (or documented fallback) result.

/// Refresh rate reported when a mode query yields nothing parseable.
pub const FALLBACK_REFRESH_RATE: u32 = 60;

/// Accepted refresh-rate range in Hz, inclusive.
pub const MIN_REFRESH_RATE: u32 = 1;
pub const MAX_REFRESH_RATE: u32 = 1000;

// ---------------------------------------------------------------------------
// Output list
// ---------------------------------------------------------------------------

/// One output as reported by the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Output name, e.g. `XR-Manager`, `DisplayPort-0`, `VIRTUAL1`.
    pub name: String,
    /// The line reports the output as `connected` (not `disconnected`).
    pub connected: bool,
    /// The unmodified line, for vendor-substring heuristics and logging.
    pub line: String,
}

/// Parses an output listing.
///
/// Accepts both the dedicated list mode (one output per line) and the
/// plain query mode, where output headers start at column 0 and their modes
/// are indented beneath them. `Screen N:` headers are skipped.
pub fn parse_outputs(text: &str) -> Vec<OutputDescriptor> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with(char::is_whitespace))
        .filter(|line| !line.starts_with("Screen "))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let name = tokens.next()?.trim_end_matches(':');
            if name.is_empty() {
                return None;
            }
            let connected = line.split_whitespace().any(|t| t == "connected");
            Some(OutputDescriptor {
                name: name.to_owned(),
                connected,
                line: line.to_owned(),
            })
        })
        .collect()
}

/// True when `name` is one of the listed outputs (exact match).
pub fn contains_output(outputs: &[OutputDescriptor], name: &str) -> bool {
    outputs.iter().any(|o| o.name == name)
}

// ---------------------------------------------------------------------------
// Refresh rates
// ---------------------------------------------------------------------------

/// Extracts refresh rates from a mode query.
///
/// Every whitespace token that is a plain decimal number (optionally
/// followed by the `*` current / `+` preferred markers or an `Hz` suffix) is
/// truncated to whole Hz. Values outside 1..=1000 are dropped. The result is
/// ascending and deduplicated, and empty when nothing parsed.
pub fn parse_refresh_rates(text: &str) -> Vec<u32> {
    let rates = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("Screen "))
        .flat_map(str::split_whitespace)
        .filter_map(parse_rate_token);
    normalize_rates(rates)
}

/// `parse_refresh_rates`, falling back to `[60]` when nothing parsed.
pub fn refresh_rates_or_fallback(text: &str) -> Vec<u32> {
    let rates = parse_refresh_rates(text);
    if rates.is_empty() {
        vec![FALLBACK_REFRESH_RATE]
    } else {
        rates
    }
}

/// Sorts, deduplicates and range-filters a set of rates.
pub fn normalize_rates(rates: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut rates: Vec<u32> = rates
        .into_iter()
        .filter(|r| (MIN_REFRESH_RATE..=MAX_REFRESH_RATE).contains(r))
        .collect();
    rates.sort_unstable();
    rates.dedup();
    rates
}

fn parse_rate_token(token: &str) -> Option<u32> {
    let token = token.trim_end_matches(['*', '+']);
    let token = token.strip_suffix("Hz").unwrap_or(token);
    let starts_with_digit = token.chars().next().is_some_and(|c| c.is_ascii_digit());
    let numeric = token.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !starts_with_digit || !numeric || token.matches('.').count() > 1 {
        return None;
    }
    let value: f64 = token.parse().ok()?;
    // Truncation toward zero is the documented rounding rule.
    if value < f64::from(MIN_REFRESH_RATE) || value >= f64::from(MAX_REFRESH_RATE + 1) {
        return None;
    }
    Some(value as u32)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// True when a property listing marks the output `non-desktop: 1`.
///
/// Head-mounted displays carry this property so desktops do not extend
/// onto them. Every output lists the property; only the value matters.
pub fn is_non_desktop(props: &str) -> bool {
    props.lines().any(|line| {
        let line = line.trim();
        line.strip_prefix("non-desktop:")
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|value| value == "1")
    })
}

// ---------------------------------------------------------------------------
// Modelines
// ---------------------------------------------------------------------------

/// A synthesized timing mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modeline {
    /// Mode name with quotes stripped, e.g. `1920x1080_60.00`.
    pub name: String,
    /// Pixel clock, timings and sync flags, one argument each.
    pub params: Vec<String>,
}

/// Finds the first `Modeline "<name>" <params...>` line.
pub fn parse_modeline(text: &str) -> Option<Modeline> {
    text.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        if tokens.next()? != "Modeline" {
            return None;
        }
        let name = tokens.next()?.trim_matches('"');
        let params: Vec<String> = tokens.map(str::to_owned).collect();
        if name.is_empty() || params.is_empty() {
            return None;
        }
        Some(Modeline {
            name: name.to_owned(),
            params,
        })
    })
}

/// True when `mode_name` appears as a token anywhere in a query listing.
pub fn mentions_mode(text: &str, mode_name: &str) -> bool {
    text.split_whitespace()
        .any(|t| t.trim_matches('"') == mode_name)
}

/// True when `output`'s section of a query listing marks `mode_name` current.
///
/// Mode lines are indented beneath their output header; the current rate
/// carries a `*` marker, e.g. `   1920x1080_60.00  59.96*+`.
pub fn mode_is_active(text: &str, output: &str, mode_name: &str) -> bool {
    let mut in_section = false;
    for line in text.lines() {
        if !line.starts_with(char::is_whitespace) {
            in_section = line.split_whitespace().next() == Some(output);
            continue;
        }
        if !in_section {
            continue;
        }
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some(mode_name) && tokens.any(|t| t.contains('*')) {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
