//! Binary encoding of exact decimals in the Postgres `NUMERIC` wire format.
//!
//! The format is a header of four 16-bit fields (digit count, weight, sign, display scale)
//! followed by base-10000 digits, most significant first. The value is
//! `sum(digit[i] * 10000^(weight - i))`.

use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::{BigInt, Sign};
use bytes::{BufMut, BytesMut};

use crate::conversions::BindError;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_MAX_DSCALE: i64 = 0x3FFF;
const DIGITS_PER_GROUP: usize = 4;

/// Writes `decimal` into `out` as a binary `NUMERIC` value.
pub fn encode_numeric(decimal: &BigDecimal, out: &mut BytesMut) -> Result<(), BindError> {
    let (bigint, exponent) = decimal.as_bigint_and_exponent();
    let negative = bigint.sign() == Sign::Minus;
    let mut magnitude = bigint.magnitude().to_string();

    // A negative exponent means trailing zeros were folded into the exponent.
    let scale = if exponent < 0 {
        if exponent.unsigned_abs() / DIGITS_PER_GROUP as u64 > i16::MAX as u64 {
            return Err(out_of_range(&bigint, exponent));
        }
        let zeros = usize::try_from(exponent.unsigned_abs())
            .map_err(|_| out_of_range(&bigint, exponent))?;
        magnitude.push_str(&"0".repeat(zeros));
        0
    } else {
        exponent
    };

    if scale > NUMERIC_MAX_DSCALE {
        return Err(out_of_range(&bigint, exponent));
    }
    let scale_digits = scale as usize;

    let (integer, fraction) = if magnitude.len() > scale_digits {
        let split = magnitude.len() - scale_digits;
        (magnitude[..split].to_string(), magnitude[split..].to_string())
    } else {
        (
            String::new(),
            format!("{magnitude:0>scale_digits$}"),
        )
    };

    let integer = pad_to_group(&integer, true);
    let fraction = pad_to_group(&fraction, false);
    let integer_groups = integer.len() / DIGITS_PER_GROUP;

    let mut digits = to_groups(&integer)
        .chain(to_groups(&fraction))
        .collect::<Vec<u16>>();
    let mut weight = integer_groups as i64 - 1;

    let leading_zeros = digits.iter().take_while(|digit| **digit == 0).count();
    digits.drain(..leading_zeros);
    weight -= leading_zeros as i64;
    while digits.last() == Some(&0) {
        digits.pop();
    }

    let sign = if digits.is_empty() {
        weight = 0;
        NUMERIC_POS
    } else if negative {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    let n_digits = u16::try_from(digits.len())
        .map_err(|_| out_of_range(&bigint, exponent))?;
    let weight =
        i16::try_from(weight).map_err(|_| out_of_range(&bigint, exponent))?;

    out.reserve(8 + digits.len() * 2);
    out.put_u16(n_digits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(scale as u16);
    for digit in digits {
        out.put_u16(digit);
    }

    Ok(())
}

/// Renders a rejected value as `<digits>E<exponent>` without expanding the exponent.
fn out_of_range(bigint: &BigInt, exponent: i64) -> BindError {
    BindError::NumericOutOfRange(format!("{bigint}E{}", -i128::from(exponent)))
}

fn pad_to_group(digits: &str, left: bool) -> String {
    let remainder = digits.len() % DIGITS_PER_GROUP;
    if remainder == 0 {
        return digits.to_string();
    }

    let padding = "0".repeat(DIGITS_PER_GROUP - remainder);
    if left {
        format!("{padding}{digits}")
    } else {
        format!("{digits}{padding}")
    }
}

fn to_groups(digits: &str) -> impl Iterator<Item = u16> + '_ {
    digits.as_bytes().chunks(DIGITS_PER_GROUP).map(|chunk| {
        chunk
            .iter()
            .fold(0u16, |group, digit| group * 10 + u16::from(digit - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn encode(raw: &str) -> Vec<u16> {
        let mut out = BytesMut::new();
        encode_numeric(&BigDecimal::from_str(raw).unwrap(), &mut out).unwrap();
        out.chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn encodes_integers() {
        assert_eq!(encode("30"), vec![1, 0, NUMERIC_POS, 0, 30]);
        assert_eq!(encode("10000"), vec![1, 1, NUMERIC_POS, 0, 1]);
        assert_eq!(encode("-123456"), vec![2, 1, NUMERIC_NEG, 0, 12, 3456]);
    }

    #[test]
    fn encodes_fractions() {
        assert_eq!(
            encode("12345.678"),
            vec![3, 1, NUMERIC_POS, 3, 1, 2345, 6780]
        );
        // Weight -1 is stored as 0xFFFF.
        assert_eq!(encode("0.5"), vec![1, 0xFFFF, NUMERIC_POS, 1, 5000]);
        assert_eq!(encode("0.00001"), vec![1, 0xFFFE, NUMERIC_POS, 5, 1000]);
        assert_eq!(encode("12.50"), vec![2, 0, NUMERIC_POS, 2, 12, 5000]);
    }

    #[test]
    fn encodes_zero_and_folded_exponents() {
        assert_eq!(encode("0"), vec![0, 0, NUMERIC_POS, 0]);
        assert_eq!(encode("-0.00"), vec![0, 0, NUMERIC_POS, 2]);
        assert_eq!(encode("1e8"), vec![1, 2, NUMERIC_POS, 0, 1]);
    }

    #[test]
    fn rejects_excessive_weight() {
        let mut out = BytesMut::new();
        let huge = BigDecimal::new(1.into(), -4_611_686_018_427_387_904);

        assert!(matches!(
            encode_numeric(&huge, &mut out),
            Err(BindError::NumericOutOfRange(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_excessive_scale() {
        let mut out = BytesMut::new();
        let tiny = BigDecimal::from_str("1e-20000").unwrap();

        assert!(matches!(
            encode_numeric(&tiny, &mut out),
            Err(BindError::NumericOutOfRange(_))
        ));
    }
}
