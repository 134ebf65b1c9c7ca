//! Conversions between field types and document values.
//!
//! Decoding is lenient, because documents may come from hand-edited files
//! or from an older version of the entity:
//!
//! | declared type | accepted stored forms |
//! |---------------|-----------------------|
//! | integers | any number (floats truncate toward zero), numeric strings; out-of-range fails |
//! | floats | any number, numeric strings |
//! | `bool` | booleans, `"true"`/`"false"` (any case), `1`/`0` |
//! | `String` | strings, numbers and booleans (rendered) |
//! | `Uuid` | canonical or simple string forms |
//! | `DateTime<Utc>` | RFC 3339 strings, integer epoch seconds |
//! | enums ([`name_codec!`](crate::name_codec)) | variant name, any case |
//!
//! Values are encoded in their canonical form: UUIDs and timestamps as
//! strings, enums by variant name.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CoercionError;

/// A type that can be stored as a document value.
pub trait FieldCodec: Sized {
    /// The canonical stored form.
    fn encode(&self) -> Value;

    /// Convert a stored value, coercing where the table above allows.
    ///
    /// # Errors
    ///
    /// [`CoercionError`] when `value` has no sensible conversion.
    fn decode(value: &Value) -> Result<Self, CoercionError>;
}

/// A type that can be rendered as a string key: map-field keys and entity
/// identities.
pub trait KeyCodec: Sized {
    /// The canonical key form.
    fn to_key(&self) -> String;

    /// Parse a key.
    ///
    /// # Errors
    ///
    /// [`CoercionError`] when `key` is not a valid rendering.
    fn from_key(key: &str) -> Result<Self, CoercionError>;
}

fn key_error(expected: &'static str, key: &str) -> CoercionError {
    CoercionError::new(expected, &Value::String(key.to_owned()))
}

// =============================================================================
// Numbers
// =============================================================================

#[allow(clippy::cast_possible_truncation)]
fn truncate(float: f64) -> Option<i128> {
    float.is_finite().then(|| float.trunc() as i128)
}

fn integral(value: &Value, expected: &'static str) -> Result<i128, CoercionError> {
    let error = || CoercionError::new(expected, value);
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(i128::from(int));
            }
            if let Some(uint) = number.as_u64() {
                return Ok(i128::from(uint));
            }
            number.as_f64().and_then(truncate).ok_or_else(error)
        }
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i128>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(truncate))
                .ok_or_else(error)
        }
        _ => Err(error()),
    }
}

fn fractional(value: &Value, expected: &'static str) -> Result<f64, CoercionError> {
    let error = || CoercionError::new(expected, value);
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(error),
        Value::String(text) => text.trim().parse::<f64>().map_err(|_parse| error()),
        _ => Err(error()),
    }
}

macro_rules! integer_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldCodec for $ty {
                fn encode(&self) -> Value {
                    Value::from(*self)
                }

                fn decode(value: &Value) -> Result<Self, CoercionError> {
                    let wide = integral(value, stringify!($ty))?;
                    Self::try_from(wide).map_err(|_range| CoercionError::new(stringify!($ty), value))
                }
            }

            impl KeyCodec for $ty {
                fn to_key(&self) -> String {
                    self.to_string()
                }

                fn from_key(key: &str) -> Result<Self, CoercionError> {
                    key.trim().parse().map_err(|_parse| key_error(stringify!($ty), key))
                }
            }
        )*
    };
}

integer_codec!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FieldCodec for f64 {
    fn encode(&self) -> Value {
        Value::from(*self)
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        fractional(value, "f64")
    }
}

impl FieldCodec for f32 {
    fn encode(&self) -> Value {
        Value::from(f64::from(*self))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn decode(value: &Value) -> Result<Self, CoercionError> {
        let wide = fractional(value, "f32")?;
        let narrow = wide as Self;
        if wide.is_finite() && !narrow.is_finite() {
            return Err(CoercionError::new("f32", value));
        }
        Ok(narrow)
    }
}

// =============================================================================
// Scalars
// =============================================================================

impl FieldCodec for bool {
    fn encode(&self) -> Value {
        Value::Bool(*self)
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Bool(flag) => Ok(*flag),
            Value::String(text) if text.trim().eq_ignore_ascii_case("true") => Ok(true),
            Value::String(text) if text.trim().eq_ignore_ascii_case("false") => Ok(false),
            Value::Number(number) => match number.as_i64() {
                Some(1) => Ok(true),
                Some(0) => Ok(false),
                _ => Err(CoercionError::new("bool", value)),
            },
            _ => Err(CoercionError::new("bool", value)),
        }
    }
}

impl FieldCodec for String {
    fn encode(&self) -> Value {
        Value::String(self.clone())
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            _ => Err(CoercionError::new("String", value)),
        }
    }
}

impl KeyCodec for String {
    fn to_key(&self) -> String {
        self.clone()
    }

    fn from_key(key: &str) -> Result<Self, CoercionError> {
        Ok(key.to_owned())
    }
}

impl FieldCodec for Uuid {
    fn encode(&self) -> Value {
        Value::String(self.to_string())
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_str()
            .and_then(|text| Self::parse_str(text.trim()).ok())
            .ok_or_else(|| CoercionError::new("Uuid", value))
    }
}

impl KeyCodec for Uuid {
    fn to_key(&self) -> String {
        self.to_string()
    }

    fn from_key(key: &str) -> Result<Self, CoercionError> {
        Self::parse_str(key.trim()).map_err(|_parse| key_error("Uuid", key))
    }
}

impl FieldCodec for DateTime<Utc> {
    fn encode(&self) -> Value {
        Value::String(self.to_rfc3339())
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        let parsed = match value {
            Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|stamp| stamp.with_timezone(&Utc)),
            Value::Number(number) => number
                .as_i64()
                .and_then(|seconds| Self::from_timestamp(seconds, 0)),
            _ => None,
        };
        parsed.ok_or_else(|| CoercionError::new("DateTime<Utc>", value))
    }
}

// =============================================================================
// Containers
// =============================================================================

impl<T: FieldCodec> FieldCodec for Option<T> {
    fn encode(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldCodec::encode)
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        match value {
            Value::Null => Ok(None),
            other => T::decode(other).map(Some),
        }
    }
}

impl<T: FieldCodec> FieldCodec for Vec<T> {
    fn encode(&self) -> Value {
        Value::Array(self.iter().map(FieldCodec::encode).collect())
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        value
            .as_array()
            .ok_or_else(|| CoercionError::new("list", value))?
            .iter()
            .map(T::decode)
            .collect()
    }
}

/// Decode an object's entries, failing on the first bad key or value.
pub(crate) fn decode_entries<K: KeyCodec, V: FieldCodec>(
    value: &Value,
) -> Result<Vec<(K, V)>, CoercionError> {
    value
        .as_object()
        .ok_or_else(|| CoercionError::new("map", value))?
        .iter()
        .map(|(key, item)| -> Result<(K, V), CoercionError> {
            Ok((K::from_key(key)?, V::decode(item)?))
        })
        .collect()
}

/// Encode entries as an object.
pub(crate) fn encode_entries<'a, K, V>(entries: impl IntoIterator<Item = (&'a K, &'a V)>) -> Value
where
    K: KeyCodec + 'a,
    V: FieldCodec + 'a,
{
    Value::Object(
        entries
            .into_iter()
            .map(|(key, item)| (key.to_key(), item.encode()))
            .collect(),
    )
}

impl<K: KeyCodec + Ord, V: FieldCodec> FieldCodec for BTreeMap<K, V> {
    fn encode(&self) -> Value {
        encode_entries(self)
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        decode_entries(value).map(|entries| entries.into_iter().collect())
    }
}

impl<K, V, S> FieldCodec for HashMap<K, V, S>
where
    K: KeyCodec + Eq + Hash,
    V: FieldCodec,
    S: BuildHasher + Default,
{
    fn encode(&self) -> Value {
        encode_entries(self)
    }

    fn decode(value: &Value) -> Result<Self, CoercionError> {
        decode_entries(value).map(|entries| entries.into_iter().collect())
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Implement [`FieldCodec`] and [`StateField`](crate::StateField) for a
/// field-less enum, storing each variant by name.
///
/// ```
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// enum Rank {
///     #[default]
///     Novice,
///     Veteran,
/// }
///
/// keepsake_state::name_codec!(Rank { Novice, Veteran });
/// ```
#[macro_export]
macro_rules! name_codec {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::FieldCodec for $ty {
            fn encode(&self) -> $crate::Value {
                match self {
                    $(Self::$variant => $crate::Value::String(stringify!($variant).to_owned()),)+
                }
            }

            fn decode(value: &$crate::Value) -> ::core::result::Result<Self, $crate::CoercionError> {
                let name = value.as_str().map(str::trim).unwrap_or_default();
                $(
                    if name.eq_ignore_ascii_case(stringify!($variant)) {
                        return Ok(Self::$variant);
                    }
                )+
                Err($crate::CoercionError::new(stringify!($ty), value))
            }
        }

        impl $crate::StateField for $ty {
            fn capture(&self) -> $crate::Value {
                $crate::FieldCodec::encode(self)
            }

            fn restore(&mut self, value: &$crate::Value) -> ::core::result::Result<(), $crate::CoercionError> {
                *self = <Self as $crate::FieldCodec>::decode(value)?;
                Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Rank {
        Novice,
        Elite,
    }

    crate::name_codec!(Rank { Novice, Elite });

    #[test]
    fn integers_widen_narrow_and_truncate() {
        assert_eq!(i32::decode(&json!(42_u64)), Ok(42));
        assert_eq!(i64::decode(&json!(7.9)), Ok(7));
        assert_eq!(i64::decode(&json!(-7.9)), Ok(-7));
        assert_eq!(u8::decode(&json!("200")), Ok(200));
        assert!(u8::decode(&json!(300)).is_err());
        assert!(u32::decode(&json!(-1)).is_err());
        assert!(i32::decode(&json!([1])).is_err());
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn floats_accept_integers_and_strings() {
        assert_eq!(f64::decode(&json!(3)), Ok(3.0));
        assert_eq!(f32::decode(&json!("1.5")), Ok(1.5));
        assert!(f32::decode(&json!(f64::MAX)).is_err());
    }

    #[test]
    fn booleans_from_strings_and_digits() {
        assert_eq!(bool::decode(&json!("TRUE")), Ok(true));
        assert_eq!(bool::decode(&json!(0)), Ok(false));
        assert!(bool::decode(&json!("maybe")).is_err());
        assert!(bool::decode(&json!(2)).is_err());
    }

    #[test]
    fn uuid_round_trips_through_string() {
        let id = Uuid::new_v4();
        let stored = id.encode();
        assert_eq!(stored, json!(id.to_string()));
        assert_eq!(Uuid::decode(&stored), Ok(id));
        assert!(Uuid::decode(&json!(12)).is_err());
    }

    #[test]
    fn timestamps_from_rfc3339_and_epoch() {
        let parsed = DateTime::<Utc>::decode(&json!("2024-05-01T12:00:00Z"));
        let epoch = DateTime::<Utc>::decode(&json!(1_714_564_800_i64));
        assert!(parsed.is_ok());
        assert_eq!(parsed, epoch);
    }

    #[test]
    fn containers_decode_element_wise() {
        assert_eq!(Vec::<u16>::decode(&json!([1, "2", 3.7])), Ok(vec![1, 2, 3]));
        assert!(Vec::<u16>::decode(&json!([1, "x"])).is_err());
        assert_eq!(Option::<u8>::decode(&json!(null)), Ok(None));

        let map = BTreeMap::<u32, String>::decode(&json!({"1": "one", "2": 2}));
        let expected: BTreeMap<u32, String> =
            [(1, "one".to_owned()), (2, "2".to_owned())].into_iter().collect();
        assert_eq!(map, Ok(expected));
    }

    #[test]
    fn enums_store_by_name() {
        assert_eq!(Rank::Elite.encode(), json!("Elite"));
        assert_eq!(Rank::decode(&json!("novice")), Ok(Rank::Novice));
        assert_eq!(
            Rank::decode(&json!("Legend")).map_err(|error| error.expected),
            Err("Rank")
        );
    }
}
