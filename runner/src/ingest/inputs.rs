use super::FieldError;
use once_cell::sync::Lazy;
use regex::Regex;

static MAX_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*max_step\s*=\s*(?P<steps>\S+)").expect("valid max_step pattern")
});

/// whole step counts written in float notation, e.g. `1e3`
fn whole_number(value: &str) -> Option<u64> {
    let number = value.parse::<f64>().ok()?;

    (number.is_finite() && number.fract() == 0.0 && number <= u64::MAX as f64)
        .then_some(number as u64)
}

/// number of simulation steps requested by an input file
pub fn max_step(text: &str) -> Result<u64, FieldError> {
    let value = MAX_STEP
        .captures(text)
        .map(|captures| captures["steps"].to_owned())
        .ok_or(FieldError::NotFound("max_step"))?;

    match value.parse::<u64>().ok().or_else(|| whole_number(&value)) {
        Some(steps) if steps > 0 => Ok(steps),
        _ => Err(FieldError::InvalidNumber {
            field: "max_step",
            value,
        }),
    }
}
