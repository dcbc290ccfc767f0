//! Typed policy values and their native storage representations

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of an expected value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    String,
    ExpandableString,
    MultiString,
    Binary,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::ExpandableString => "expandable_string",
            Self::MultiString => "multi_string",
            Self::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// A typed configuration value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PolicyValue {
    Integer(i64),
    String(String),
    ExpandableString(String),
    MultiString(Vec<String>),
    Binary(Vec<u8>),
}

impl PolicyValue {
    /// Build a value from its raw JSON form and declared type.
    ///
    /// Integers accept JSON numbers and decimal or `0x` hex strings. Binary
    /// accepts an array of bytes or a hex string (spaces, commas allowed).
    /// Multi-strings accept an array of strings or a single string.
    pub fn from_raw(value_type: ValueType, raw: &Value) -> Result<Self, String> {
        match value_type {
            ValueType::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(Self::Integer)
                    .ok_or_else(|| format!("{} is not a 64-bit integer", n)),
                Value::String(s) => parse_integer(s)
                    .map(Self::Integer)
                    .ok_or_else(|| format!("'{}' is not an integer", s)),
                Value::Bool(b) => Ok(Self::Integer(i64::from(*b))),
                other => Err(format!("expected integer, got {}", other)),
            },
            ValueType::String => expect_string(raw).map(Self::String),
            ValueType::ExpandableString => expect_string(raw).map(Self::ExpandableString),
            ValueType::MultiString => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(expect_string)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::MultiString),
                Value::String(s) => Ok(Self::MultiString(vec![s.clone()])),
                other => Err(format!("expected list of strings, got {}", other)),
            },
            ValueType::Binary => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(|| format!("{} is not a byte", item))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Binary),
                Value::String(s) => parse_hex_bytes(s)
                    .map(Self::Binary)
                    .ok_or_else(|| format!("'{}' is not a hex byte string", s)),
                other => Err(format!("expected bytes, got {}", other)),
            },
        }
    }

    /// Raw JSON form, the inverse of [`PolicyValue::from_raw`].
    pub fn to_raw(&self) -> Value {
        match self {
            Self::Integer(i) => Value::from(*i),
            Self::String(s) | Self::ExpandableString(s) => Value::from(s.clone()),
            Self::MultiString(items) => Value::from(items.clone()),
            Self::Binary(bytes) => Value::from(bytes.clone()),
        }
    }

    /// Declared type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Integer(_) => ValueType::Integer,
            Self::String(_) => ValueType::String,
            Self::ExpandableString(_) => ValueType::ExpandableString,
            Self::MultiString(_) => ValueType::MultiString,
            Self::Binary(_) => ValueType::Binary,
        }
    }
}

impl fmt::Display for PolicyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::String(s) | Self::ExpandableString(s) => write!(f, "\"{}\"", s),
            Self::MultiString(items) => write!(f, "{:?}", items),
            Self::Binary(bytes) => f.write_str(&to_hex(bytes)),
        }
    }
}

/// Native storage kinds of the key-value and group-policy surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeKind {
    Dword,
    Qword,
    Sz,
    ExpandSz,
    MultiSz,
    Binary,
}

impl NativeKind {
    /// The enumerated value-type mapping used when creating a value.
    ///
    /// Integers map to a dword when they fit in 32 unsigned bits and to a
    /// qword otherwise, so reading back always yields the written integer.
    pub fn for_value(value: &PolicyValue) -> Self {
        match value {
            PolicyValue::Integer(i) if u32::try_from(*i).is_ok() => Self::Dword,
            PolicyValue::Integer(_) => Self::Qword,
            PolicyValue::String(_) => Self::Sz,
            PolicyValue::ExpandableString(_) => Self::ExpandSz,
            PolicyValue::MultiString(_) => Self::MultiSz,
            PolicyValue::Binary(_) => Self::Binary,
        }
    }

    /// Registry type name as used by native tools.
    pub fn reg_name(&self) -> &'static str {
        match self {
            Self::Dword => "REG_DWORD",
            Self::Qword => "REG_QWORD",
            Self::Sz => "REG_SZ",
            Self::ExpandSz => "REG_EXPAND_SZ",
            Self::MultiSz => "REG_MULTI_SZ",
            Self::Binary => "REG_BINARY",
        }
    }

    /// Parse a registry type name.
    pub fn from_reg_name(name: &str) -> Option<Self> {
        match name {
            "REG_DWORD" => Some(Self::Dword),
            "REG_QWORD" => Some(Self::Qword),
            "REG_SZ" => Some(Self::Sz),
            "REG_EXPAND_SZ" => Some(Self::ExpandSz),
            "REG_MULTI_SZ" => Some(Self::MultiSz),
            "REG_BINARY" => Some(Self::Binary),
            _ => None,
        }
    }
}

/// A value as physically stored on a registry-like surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NativeValue {
    Dword(u32),
    Qword(u64),
    Sz(String),
    ExpandSz(String),
    MultiSz(Vec<String>),
    Binary(Vec<u8>),
}

impl NativeValue {
    /// Encode a policy value with its mapped native kind.
    pub fn encode(value: &PolicyValue) -> Self {
        match (NativeKind::for_value(value), value) {
            (NativeKind::Dword, PolicyValue::Integer(i)) => Self::Dword(*i as u32),
            (_, PolicyValue::Integer(i)) => Self::Qword(*i as u64),
            (_, PolicyValue::String(s)) => Self::Sz(s.clone()),
            (_, PolicyValue::ExpandableString(s)) => Self::ExpandSz(s.clone()),
            (_, PolicyValue::MultiString(items)) => Self::MultiSz(items.clone()),
            (_, PolicyValue::Binary(bytes)) => Self::Binary(bytes.clone()),
        }
    }

    /// Storage kind of this value.
    pub fn kind(&self) -> NativeKind {
        match self {
            Self::Dword(_) => NativeKind::Dword,
            Self::Qword(_) => NativeKind::Qword,
            Self::Sz(_) => NativeKind::Sz,
            Self::ExpandSz(_) => NativeKind::ExpandSz,
            Self::MultiSz(_) => NativeKind::MultiSz,
            Self::Binary(_) => NativeKind::Binary,
        }
    }

    /// Decode into a policy value.
    pub fn to_policy_value(&self) -> PolicyValue {
        match self {
            Self::Dword(d) => PolicyValue::Integer(i64::from(*d)),
            Self::Qword(q) => PolicyValue::Integer(*q as i64),
            Self::Sz(s) => PolicyValue::String(s.clone()),
            Self::ExpandSz(s) => PolicyValue::ExpandableString(s.clone()),
            Self::MultiSz(items) => PolicyValue::MultiString(items.clone()),
            Self::Binary(bytes) => PolicyValue::Binary(bytes.clone()),
        }
    }
}

/// Coerce a value to its canonical integer, whatever its storage form.
///
/// Handles native integers, decimal and `0x` hex text, and little-endian
/// 4- or 8-byte binary blobs.
pub fn canonical_integer(value: &PolicyValue) -> Option<i64> {
    match value {
        PolicyValue::Integer(i) => Some(*i),
        PolicyValue::String(s) | PolicyValue::ExpandableString(s) => parse_integer(s),
        PolicyValue::MultiString(items) if items.len() == 1 => parse_integer(&items[0]),
        PolicyValue::MultiString(_) => None,
        PolicyValue::Binary(bytes) => match bytes.len() {
            4 => Some(i64::from(u32::from_le_bytes(bytes[..4].try_into().ok()?))),
            8 => Some(i64::from_le_bytes(bytes[..8].try_into().ok()?)),
            _ => None,
        },
    }
}

/// Type-aware comparison of an expected value with what a surface returned.
///
/// The expected value's declared type decides the rule: integers compare
/// canonically, multi-strings as ordered sequences, strings literally, binary
/// byte-wise.
pub fn values_match(expected: &PolicyValue, actual: &PolicyValue) -> bool {
    match expected {
        PolicyValue::Integer(want) => canonical_integer(actual) == Some(*want),
        PolicyValue::String(want) | PolicyValue::ExpandableString(want) => match actual {
            PolicyValue::String(got) | PolicyValue::ExpandableString(got) => got == want,
            PolicyValue::Integer(got) => got.to_string() == *want,
            _ => false,
        },
        PolicyValue::MultiString(want) => {
            let got: Vec<String> = match actual {
                PolicyValue::MultiString(items) => items.clone(),
                PolicyValue::String(s) | PolicyValue::ExpandableString(s) => {
                    s.split(',').map(str::to_string).collect()
                }
                _ => return false,
            };
            got.len() == want.len() && got.iter().zip(want).all(|(g, w)| g == w)
        }
        PolicyValue::Binary(want) => match actual {
            PolicyValue::Binary(got) => got == want,
            PolicyValue::String(s) => parse_hex_bytes(s).as_ref() == Some(want),
            _ => false,
        },
    }
}

/// Parse decimal or `0x`-prefixed hex text into an integer.
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok().map(|v| v as i64);
    }
    text.parse::<i64>().ok()
}

/// Parse a hex byte string such as `"01 ff 0a"`, `"01,ff,0a"` or `"01ff0a"`.
pub fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Render bytes as contiguous lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn expect_string(raw: &Value) -> Result<String, String> {
    raw.as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("expected string, got {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(PolicyValue::Integer(1), NativeKind::Dword)]
    #[case(PolicyValue::Integer(u32::MAX as i64), NativeKind::Dword)]
    #[case(PolicyValue::Integer(u32::MAX as i64 + 1), NativeKind::Qword)]
    #[case(PolicyValue::Integer(-1), NativeKind::Qword)]
    #[case(PolicyValue::String("x".into()), NativeKind::Sz)]
    #[case(PolicyValue::ExpandableString("%SystemRoot%".into()), NativeKind::ExpandSz)]
    #[case(PolicyValue::MultiString(vec!["a".into()]), NativeKind::MultiSz)]
    #[case(PolicyValue::Binary(vec![1]), NativeKind::Binary)]
    fn mapping_table_is_explicit(#[case] value: PolicyValue, #[case] kind: NativeKind) {
        assert_eq!(NativeKind::for_value(&value), kind);
        assert_eq!(NativeValue::encode(&value).kind(), kind);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(4_294_967_295)]
    #[case(4_294_967_296)]
    #[case(-1)]
    #[case(i64::MIN)]
    fn integers_survive_native_encoding(#[case] v: i64) {
        let native = NativeValue::encode(&PolicyValue::Integer(v));
        assert_eq!(canonical_integer(&native.to_policy_value()), Some(v));
    }

    #[rstest]
    #[case(PolicyValue::Integer(14), true)]
    #[case(PolicyValue::String("14".into()), true)]
    #[case(PolicyValue::String(" 0xE ".into()), true)]
    #[case(PolicyValue::Binary(vec![14, 0, 0, 0]), true)]
    #[case(PolicyValue::String("fourteen".into()), false)]
    #[case(PolicyValue::Integer(15), false)]
    fn integers_compare_canonically(#[case] actual: PolicyValue, #[case] matches: bool) {
        assert_eq!(values_match(&PolicyValue::Integer(14), &actual), matches);
    }

    #[test]
    fn multi_strings_compare_in_order() {
        let expected = PolicyValue::MultiString(vec!["a".into(), "b".into()]);

        assert!(values_match(
            &expected,
            &PolicyValue::MultiString(vec!["a".into(), "b".into()])
        ));
        assert!(!values_match(
            &expected,
            &PolicyValue::MultiString(vec!["b".into(), "a".into()])
        ));
        assert!(!values_match(
            &expected,
            &PolicyValue::MultiString(vec!["a".into()])
        ));
        assert!(values_match(&expected, &PolicyValue::String("a,b".into())));
    }

    #[test]
    fn strings_compare_literally() {
        let expected = PolicyValue::String("Enabled".into());
        assert!(values_match(&expected, &PolicyValue::String("Enabled".into())));
        assert!(!values_match(&expected, &PolicyValue::String("enabled".into())));
    }

    #[rstest]
    #[case(ValueType::Integer, json!(1), PolicyValue::Integer(1))]
    #[case(ValueType::Integer, json!("0x10"), PolicyValue::Integer(16))]
    #[case(ValueType::Integer, json!(true), PolicyValue::Integer(1))]
    #[case(ValueType::String, json!("x"), PolicyValue::String("x".into()))]
    #[case(ValueType::MultiString, json!("one"), PolicyValue::MultiString(vec!["one".into()]))]
    #[case(ValueType::Binary, json!("01 ff"), PolicyValue::Binary(vec![1, 255]))]
    #[case(ValueType::Binary, json!([1, 255]), PolicyValue::Binary(vec![1, 255]))]
    fn raw_values_convert(#[case] ty: ValueType, #[case] raw: Value, #[case] expected: PolicyValue) {
        assert_eq!(PolicyValue::from_raw(ty, &raw).unwrap(), expected);
    }

    #[rstest]
    #[case(ValueType::Integer, json!("abc"))]
    #[case(ValueType::Integer, json!(1.5))]
    #[case(ValueType::String, json!(3))]
    #[case(ValueType::Binary, json!([256]))]
    #[case(ValueType::Binary, json!("abc"))]
    fn raw_values_reject_type_mismatch(#[case] ty: ValueType, #[case] raw: Value) {
        assert!(PolicyValue::from_raw(ty, &raw).is_err());
    }
}
