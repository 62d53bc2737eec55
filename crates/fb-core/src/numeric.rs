use crate::CoreError;

/// Floating point type used for every parameter and QoI value.
pub type Real = f64;

pub fn ensure_finite(v: Real, what: &str) -> Result<Real, CoreError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite {
            what: what.to_string(),
            value: v,
        })
    }
}

/// Check `v` against optional inclusive bounds.
pub fn ensure_within(
    v: Real,
    min: Option<Real>,
    max: Option<Real>,
    what: &str,
) -> Result<Real, CoreError> {
    let lo = min.unwrap_or(Real::NEG_INFINITY);
    let hi = max.unwrap_or(Real::INFINITY);
    if v < lo || v > hi {
        return Err(CoreError::OutOfBounds {
            what: what.to_string(),
            value: v,
            min: lo,
            max: hi,
        });
    }
    Ok(v)
}

/// Render a number the way it is written into case dictionaries.
///
/// Shortest decimal form that parses back to the same `f64`; negative zero
/// is written as `0`.
pub fn format_dict_number(v: Real) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    format!("{}", v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(Real::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn ensure_within_open_bounds() {
        assert!(ensure_within(5.0, None, None, "x").is_ok());
        assert!(ensure_within(0.0, Some(0.0), None, "x").is_ok());
        assert!(ensure_within(-0.1, Some(0.0), None, "x").is_err());
        assert!(ensure_within(10.1, None, Some(10.0), "x").is_err());
    }

    #[test]
    fn dict_numbers() {
        assert_eq!(format_dict_number(34.6), "34.6");
        assert_eq!(format_dict_number(69.2), "69.2");
        assert_eq!(format_dict_number(-0.0), "0");
        assert_eq!(format_dict_number(1.0), "1");
        assert_eq!(format_dict_number(-2.5), "-2.5");
    }

    proptest! {
        #[test]
        fn dict_number_parses_back(v in -1.0e12_f64..1.0e12_f64) {
            let text = format_dict_number(v);
            let parsed: f64 = text.parse().unwrap();
            prop_assert!(parsed == v || (v == 0.0 && parsed == 0.0));
        }
    }
}
