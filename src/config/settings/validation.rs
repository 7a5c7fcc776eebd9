// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{Result, TandemError};

use super::Settings;

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(TandemError::Config(format!(
            "{} must be strictly between 0 and 1, got {}",
            name, value
        )))
    }
}

impl Settings {
    /// Reject settings the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        check_fraction(
            "conversation.compression_threshold",
            self.conversation.compression_threshold,
        )?;
        check_fraction(
            "conversation.preserve_threshold",
            self.conversation.preserve_threshold,
        )?;

        if self.session.max_steps == 0 {
            return Err(TandemError::Config(
                "session.max_steps must be at least 1".into(),
            ));
        }
        if self.session.stream_buffer == 0 {
            return Err(TandemError::Config(
                "session.stream_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_fraction_bounds_are_exclusive() {
        let mut settings = Settings::default();
        settings.conversation.preserve_threshold = 0.0;
        assert!(settings.validate().is_err());

        settings.conversation.preserve_threshold = 1.0;
        assert!(settings.validate().is_err());

        settings.conversation.preserve_threshold = 0.5;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_steps_rejected() {
        let mut settings = Settings::default();
        settings.session.max_steps = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn test_zero_queue_depth_allowed() {
        // Zero depth means "never queue": every busy call is rejected.
        let mut settings = Settings::default();
        settings.session.max_queue_depth = 0;
        assert!(settings.validate().is_ok());
    }
}
