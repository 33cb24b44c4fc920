//! Cluster API resource quantities
//!
//! Quantities arrive as strings such as `250m`, `2`, `4Gi` or `1e3`. The
//! exporter publishes them as integers at a fixed decimal scale, rounding
//! up the same way the API server does:
//! - CPU in milli-units (`1` core = `1000`)
//! - memory in kilo-units (`4Gi` = `4294968`)

use crate::models::Resource;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from parsing or rescaling a quantity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity out of range")]
    Overflow,
}

/// Decimal scale to express a quantity in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Milli,
    Unit,
    Kilo,
}

impl Scale {
    fn exponent(self) -> i32 {
        match self {
            Scale::Milli => -3,
            Scale::Unit => 0,
            Scale::Kilo => 3,
        }
    }
}

/// Exact value `mantissa * 10^exp10 * 2^exp2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedQuantity {
    mantissa: i128,
    exp10: i32,
    exp2: u32,
}

impl ParsedQuantity {
    /// Parse the quantity grammar: `<sign><digits>[.<digits>]<suffix>`
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let invalid = || QuantityError::Invalid(input.to_string());

        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(invalid());
        }

        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or(QuantityError::Overflow)?;
        }

        let mut exp10 = -i32::try_from(frac_part.len()).map_err(|_| QuantityError::Overflow)?;
        let mut exp2 = 0;

        match suffix {
            "" => {}
            "Ki" => exp2 = 10,
            "Mi" => exp2 = 20,
            "Gi" => exp2 = 30,
            "Ti" => exp2 = 40,
            "Pi" => exp2 = 50,
            "Ei" => exp2 = 60,
            "n" => exp10 -= 9,
            "u" => exp10 -= 6,
            "m" => exp10 -= 3,
            "k" => exp10 += 3,
            "M" => exp10 += 6,
            "G" => exp10 += 9,
            "T" => exp10 += 12,
            "P" => exp10 += 15,
            "E" => exp10 += 18,
            other => {
                let exponent = other
                    .strip_prefix('e')
                    .or_else(|| other.strip_prefix('E'))
                    .ok_or_else(invalid)?;
                let exponent: i32 = exponent.parse().map_err(|_| invalid())?;
                exp10 = exp10.checked_add(exponent).ok_or(QuantityError::Overflow)?;
            }
        }

        if negative {
            mantissa = -mantissa;
        }

        Ok(Self {
            mantissa,
            exp10,
            exp2,
        })
    }

    /// `ceil(value / 10^scale)` as an integer
    pub fn scaled_value(&self, scale: Scale) -> Result<i64, QuantityError> {
        if self.mantissa == 0 {
            return Ok(0);
        }

        let value = self
            .mantissa
            .checked_mul(1i128 << self.exp2)
            .ok_or(QuantityError::Overflow)?;
        let shift = self
            .exp10
            .checked_sub(scale.exponent())
            .ok_or(QuantityError::Overflow)?;

        let scaled = if shift >= 0 {
            10i128
                .checked_pow(shift.unsigned_abs())
                .and_then(|factor| value.checked_mul(factor))
                .ok_or(QuantityError::Overflow)?
        } else {
            match 10i128.checked_pow(shift.unsigned_abs()) {
                Some(divisor) => ceil_div(value, divisor),
                // Smaller than one unit of the target scale
                None => i128::from(value > 0),
            }
        };

        i64::try_from(scaled).map_err(|_| QuantityError::Overflow)
    }
}

fn ceil_div(value: i128, divisor: i128) -> i128 {
    if value > 0 {
        (value - 1) / divisor + 1
    } else {
        value / divisor
    }
}

/// Quantity in milli-units
pub fn milli_value(quantity: &Quantity) -> Result<i64, QuantityError> {
    ParsedQuantity::parse(&quantity.0)?.scaled_value(Scale::Milli)
}

/// Quantity at the given decimal scale
pub fn scaled_value(quantity: &Quantity, scale: Scale) -> Result<i64, QuantityError> {
    ParsedQuantity::parse(&quantity.0)?.scaled_value(scale)
}

/// Published value of `resource` in a resource list
///
/// CPU is reported in milli-units and memory in kilo-units for every gauge.
/// A resource absent from the list reads as zero.
pub fn resource_value(
    resources: &BTreeMap<String, Quantity>,
    resource: Resource,
) -> Result<f64, QuantityError> {
    let Some(quantity) = resources.get(resource.as_str()) else {
        return Ok(0.0);
    };

    let value = match resource {
        Resource::Cpu => milli_value(quantity)?,
        Resource::Memory => scaled_value(quantity, Scale::Kilo)?,
    };

    Ok(value as f64)
}
