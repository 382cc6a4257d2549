//! Apply-then-verify for output mutations.
//!
//! The display tool has no acknowledgement channel: a property set or mode
//! change can exit 0 without taking effect. Every mutation is therefore
//! followed by a fresh listing that must show the expected output state:
//! the output listed (or gone), or the mode marked current on its output.
//! The check is a snapshot, not a transaction; another client can change
//! the outputs between the two calls.

use crate::display::error::{BackendError, Presence, ToolError};
use crate::display::xrandr::{contains_output, mode_is_active, XrandrClient};

pub struct Verifier<'a> {
    client: &'a XrandrClient,
}

impl<'a> Verifier<'a> {
    pub fn new(client: &'a XrandrClient) -> Self {
        Self { client }
    }

    /// Re-lists outputs and checks that `name` is `expected`.
    pub fn confirm(&self, name: &str, expected: Presence) -> Result<(), BackendError> {
        let present = contains_output(&self.client.list_outputs()?, name);
        if present == (expected == Presence::Present) {
            Ok(())
        } else {
            Err(BackendError::VerificationMismatch {
                name: name.to_owned(),
                expected,
            })
        }
    }

    /// Re-queries the screen and checks that `mode` is current on `output`.
    pub fn confirm_mode(&self, output: &str, mode: &str) -> Result<(), BackendError> {
        if mode_is_active(&self.client.query()?, output, mode) {
            Ok(())
        } else {
            Err(BackendError::ModeNotActive {
                output: output.to_owned(),
                mode: mode.to_owned(),
            })
        }
    }

    /// Runs `mutation`, then confirms `name` is `expected`.
    pub fn apply<F>(&self, name: &str, expected: Presence, mutation: F) -> Result<(), BackendError>
    where
        F: FnOnce(&XrandrClient) -> Result<(), ToolError>,
    {
        mutation(self.client)?;
        self.confirm(name, expected)
    }

    /// Runs `mutation`, then confirms `mode` is current on `output`.
    pub fn apply_mode<F>(&self, output: &str, mode: &str, mutation: F) -> Result<(), BackendError>
    where
        F: FnOnce(&XrandrClient) -> Result<(), ToolError>,
    {
        mutation(self.client)?;
        self.confirm_mode(output, mode)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::display::fake::{FakeXrandr, MANAGER};

    #[test]
    fn mutation_that_takes_effect_is_confirmed() {
        let fake = Arc::new(FakeXrandr::with_manager());
        let client = XrandrClient::new(fake.clone(), "xrandr");
        let verifier = Verifier::new(&client);
        verifier
            .apply("XR-1", Presence::Present, |c| {
                c.set_property(MANAGER, "CREATE_XR_OUTPUT", "XR-1:800:600:60")
            })
            .unwrap();
    }

    #[test]
    fn silent_no_op_is_a_mismatch() {
        let fake = Arc::new(FakeXrandr::with_manager());
        fake.ignore_create();
        let client = XrandrClient::new(fake.clone(), "xrandr");
        let err = Verifier::new(&client)
            .apply("XR-1", Presence::Present, |c| {
                c.set_property(MANAGER, "CREATE_XR_OUTPUT", "XR-1:800:600:60")
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::VerificationMismatch {
                expected: Presence::Present,
                ..
            }
        ));
    }

    #[test]
    fn failed_mutation_skips_verification() {
        let fake = Arc::new(FakeXrandr::with_manager());
        fake.fail_on("CREATE_XR_OUTPUT", "BadValue");
        let client = XrandrClient::new(fake.clone(), "xrandr");
        let err = Verifier::new(&client)
            .apply("XR-1", Presence::Present, |c| {
                c.set_property(MANAGER, "CREATE_XR_OUTPUT", "XR-1:800:600:60")
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::Tool(ToolError::Protocol { .. })));
        assert_eq!(fake.count_calls_with("--listoutputs"), 0);
    }

    #[test]
    fn output_presence_is_checked_both_ways() {
        let fake = Arc::new(FakeXrandr::new());
        fake.add_output("VIRTUAL1", false);
        let client = XrandrClient::new(fake.clone(), "xrandr");
        let verifier = Verifier::new(&client);
        verifier.confirm("VIRTUAL1", Presence::Present).unwrap();
        assert!(verifier.confirm("VIRTUAL2", Presence::Present).is_err());
        verifier.confirm("VIRTUAL2", Presence::Absent).unwrap();
    }

    #[test]
    fn mode_switch_that_did_not_take_is_a_mismatch() {
        let fake = Arc::new(FakeXrandr::new());
        fake.add_output("VIRTUAL1", false);
        fake.define_mode("800x600_60.00");
        fake.ignore_mode_switch();
        let client = XrandrClient::new(fake.clone(), "xrandr");
        client.add_mode("VIRTUAL1", "800x600_60.00").unwrap();

        let err = Verifier::new(&client)
            .apply_mode("VIRTUAL1", "800x600_60.00", |c| c.set_mode("VIRTUAL1", "800x600_60.00"))
            .unwrap_err();
        assert!(matches!(err, BackendError::ModeNotActive { .. }), "{err}");
    }

    #[test]
    fn active_mode_is_confirmed() {
        let fake = Arc::new(FakeXrandr::new());
        fake.add_output("VIRTUAL1", false);
        fake.define_mode("800x600_60.00");
        let client = XrandrClient::new(fake.clone(), "xrandr");
        client.add_mode("VIRTUAL1", "800x600_60.00").unwrap();

        Verifier::new(&client)
            .apply_mode("VIRTUAL1", "800x600_60.00", |c| c.set_mode("VIRTUAL1", "800x600_60.00"))
            .unwrap();
    }
}
