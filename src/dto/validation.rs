//! Validation helpers for DTOs.

use validator::ValidationError;

pub const MAX_OPTIONS: usize = 6;
pub const MAX_TIME_LIMIT_SECS: u32 = 600;

fn error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Rejects empty or whitespace-only text.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(error("blank", "must not be blank".into()));
    }
    Ok(())
}

/// A question offers between two and [`MAX_OPTIONS`] non-blank options.
pub fn validate_options(options: &[String]) -> Result<(), ValidationError> {
    if !(2..=MAX_OPTIONS).contains(&options.len()) {
        return Err(error(
            "option_count",
            format!("between 2 and {MAX_OPTIONS} options required (got {})", options.len()),
        ));
    }
    if options.iter().any(|option| option.trim().is_empty()) {
        return Err(error("option_blank", "options must not be blank".into()));
    }
    Ok(())
}

pub fn validate_time_limit(seconds: u32) -> Result<(), ValidationError> {
    if !(1..=MAX_TIME_LIMIT_SECS).contains(&seconds) {
        return Err(error(
            "time_limit_range",
            format!("time limit must be between 1 and {MAX_TIME_LIMIT_SECS} seconds"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_need_two_to_six_entries() {
        assert!(validate_options(&["a".into()]).is_err());
        assert!(validate_options(&["a".into(), "b".into()]).is_ok());
        assert!(validate_options(&vec!["x".to_string(); 7]).is_err());
        assert!(validate_options(&["a".into(), " ".into()]).is_err());
    }

    #[test]
    fn time_limits_are_bounded() {
        assert!(validate_time_limit(0).is_err());
        assert!(validate_time_limit(20).is_ok());
        assert!(validate_time_limit(601).is_err());
    }
}
