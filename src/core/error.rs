use thiserror::Error;

/// Failures surfaced by the projection engine.
///
/// Every operation is deterministic, so none of these are worth retrying:
/// the caller has to change its inputs or its reference data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProjectionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed bracket table: {0}")]
    MalformedBracketTable(String),
}

impl ProjectionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedBracketTable(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;

pub(crate) fn ensure_amount(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ProjectionError::invalid(format!(
            "{name} must be a finite amount >= 0, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_rate(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= -1.0 {
        return Err(ProjectionError::invalid(format!(
            "{name} must be a finite rate > -100%, got {value}"
        )));
    }
    Ok(())
}

pub(crate) const MAX_AGE: u32 = 130;

pub(crate) fn ensure_age(name: &str, value: u32) -> Result<()> {
    if value > MAX_AGE {
        return Err(ProjectionError::invalid(format!(
            "{name} must be <= {MAX_AGE}, got {value}"
        )));
    }
    Ok(())
}

/// `start_year` advanced by `years_ahead` calendar years.
pub(crate) fn offset_year(start_year: i32, years_ahead: u32) -> Result<i32> {
    i32::try_from(years_ahead)
        .ok()
        .and_then(|n| start_year.checked_add(n))
        .ok_or_else(|| {
            ProjectionError::invalid(format!(
                "start year {start_year} cannot be advanced {years_ahead} years"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_reject_negative_and_non_finite_values() {
        assert!(ensure_amount("income", 0.0).is_ok());
        assert!(ensure_amount("income", -1.0).is_err());
        assert!(ensure_amount("income", f64::NAN).is_err());
        assert!(ensure_amount("income", f64::INFINITY).is_err());
    }

    #[test]
    fn rates_allow_negative_growth_above_minus_one() {
        assert!(ensure_rate("inflation", -0.5).is_ok());
        assert!(ensure_rate("inflation", -1.0).is_err());
        assert!(ensure_rate("inflation", f64::NAN).is_err());
    }

    #[test]
    fn error_messages_name_the_offending_field() {
        let err = ensure_age("current age", 200).expect_err("age over limit");
        assert_eq!(
            err.to_string(),
            "invalid input: current age must be <= 130, got 200"
        );
    }

    #[test]
    fn calendar_years_stop_at_the_last_representable_year() {
        assert_eq!(offset_year(2023, 30), Ok(2053));
        assert_eq!(offset_year(i32::MAX, 0), Ok(i32::MAX));
        assert!(matches!(
            offset_year(i32::MAX, 1),
            Err(ProjectionError::InvalidInput(_))
        ));
        assert!(offset_year(0, u32::MAX).is_err());
    }
}
