//! Parameter binding of decoded values for the warehouse driver.
//!
//! The server infers each parameter's type from the statement, so a [`Value`] accepts every
//! type and converts itself at bind time. Combinations that cannot be represented fail with a
//! [`BindError`].

use bigdecimal::{BigDecimal, ToPrimitive};
use bytes::BytesMut;
use std::error::Error;
use std::str::FromStr;
use thiserror::Error;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

use crate::conversions::numeric::encode_numeric;
use crate::types::Value;

/// Errors raised while converting a [`Value`] into a statement parameter.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("cannot bind a {value} value to a parameter of type {ty}")]
    UnsupportedType { value: &'static str, ty: String },

    #[error("number {0} does not fit the NUMERIC wire format")]
    NumericOutOfRange(String),

    #[error("number {value} is out of range for {ty}")]
    OutOfRange { value: String, ty: String },

    #[error("string {0:?} is not a number")]
    InvalidNumber(String),

    #[error("string {0:?} is not a boolean")]
    InvalidBool(String),
}

type BoxedError = Box<dyn Error + Sync + Send>;

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::String(s) => bind_string(s, ty, out),
            Value::Number(n) => bind_number(n, ty, out),
            Value::Bool(b) => bind_bool(*b, ty, out),
            Value::Binary(bytes) => bind_binary(self, bytes, ty, out),
            Value::Sequence(_) | Value::Mapping(_) => bind_document(self, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn bind_string(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
    if is_text(ty) {
        return s.to_sql(ty, out);
    }

    match *ty {
        Type::NUMERIC | Type::INT2 | Type::INT4 | Type::INT8 | Type::FLOAT4 | Type::FLOAT8 => {
            let number = BigDecimal::from_str(s.trim())
                .map_err(|_| BindError::InvalidNumber(s.to_string()))?;
            bind_number(&number, ty, out)
        }
        Type::BOOL => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => true.to_sql(ty, out),
            "false" | "f" | "0" => false.to_sql(ty, out),
            _ => Err(BindError::InvalidBool(s.to_string()).into()),
        },
        Type::JSON | Type::JSONB => serde_json::Value::String(s.to_string()).to_sql(ty, out),
        _ => Err(unsupported("string", ty)),
    }
}

fn bind_number(n: &BigDecimal, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::NUMERIC => {
            encode_numeric(n, out)?;
            Ok(IsNull::No)
        }
        Type::INT2 => integer::<i16>(n, ty)?.to_sql(ty, out),
        Type::INT4 => integer::<i32>(n, ty)?.to_sql(ty, out),
        Type::INT8 => integer::<i64>(n, ty)?.to_sql(ty, out),
        Type::FLOAT4 => (float(n, ty)? as f32).to_sql(ty, out),
        Type::FLOAT8 => float(n, ty)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => Value::Number(n.clone()).to_json().to_sql(ty, out),
        _ if is_text(ty) => n.to_string().as_str().to_sql(ty, out),
        _ => Err(unsupported("number", ty)),
    }
}

fn integer<T>(n: &BigDecimal, ty: &Type) -> Result<T, BindError>
where
    T: TryFrom<i64>,
{
    let out_of_range = || BindError::OutOfRange {
        value: n.to_string(),
        ty: ty.to_string(),
    };

    if !n.is_integer() {
        return Err(out_of_range());
    }

    n.to_i64()
        .and_then(|value| T::try_from(value).ok())
        .ok_or_else(out_of_range)
}

fn float(n: &BigDecimal, ty: &Type) -> Result<f64, BindError> {
    n.to_f64().ok_or_else(|| BindError::OutOfRange {
        value: n.to_string(),
        ty: ty.to_string(),
    })
}

fn bind_bool(b: bool, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::BOOL => b.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::Bool(b).to_sql(ty, out),
        _ if is_text(ty) => b.to_string().as_str().to_sql(ty, out),
        _ => Err(unsupported("bool", ty)),
    }
}

fn bind_binary(
    value: &Value,
    bytes: &[u8],
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::BYTEA => bytes.to_sql(ty, out),
        Type::JSON | Type::JSONB => value.to_json().to_sql(ty, out),
        _ if is_text(ty) => value.to_string().as_str().to_sql(ty, out),
        _ => Err(unsupported("binary", ty)),
    }
}

fn bind_document(value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedError> {
    match *ty {
        Type::JSON | Type::JSONB => value.to_json().to_sql(ty, out),
        _ if is_text(ty) => value.to_json().to_string().as_str().to_sql(ty, out),
        _ => Err(unsupported(value.type_name(), ty)),
    }
}

fn unsupported(value: &'static str, ty: &Type) -> BoxedError {
    BindError::UnsupportedType {
        value,
        ty: ty.to_string(),
    }
    .into()
}
