//! Typed values shared by cleaned form data and model instances.
//!
//! Field cleaning coerces raw submitted strings into a [`Value`]; a model
//! form copies the same values into its instance, so one type flows from
//! the submission to the store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A cleaned field value or a stored model field.
///
/// ```
/// use betterforms_core::value::Value;
///
/// assert_eq!(Value::from(7), Value::Int(7));
/// assert_eq!(Value::from(Some("bio")), Value::String("bio".into()));
/// assert!(Value::from(None::<bool>).is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(chrono::NaiveDate),
    DateTime(chrono::NaiveDateTime),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    /// Multiple-choice selections and related primary keys.
    List(Vec<Value>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

/// `Null` renders as the empty string, the way an empty input is submitted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => b.fmt(f),
            Self::Int(n) => n.fmt(f),
            Self::Float(x) => x.fmt(f),
            Self::String(s) => f.write_str(s),
            Self::Date(d) => d.fmt(f),
            Self::DateTime(dt) => dt.fmt(f),
            Self::Uuid(u) => u.fmt(f),
            Self::Json(j) => j.fmt(f),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => String,
    &str => String,
    chrono::NaiveDate => Date,
    chrono::NaiveDateTime => DateTime,
    uuid::Uuid => Uuid,
    serde_json::Value => Json,
    Vec<Value> => List,
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_submitted_text() {
        let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::from(day).to_string(), "2024-03-09");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(false).to_string(), "false");
    }

    #[test]
    fn test_display_list() {
        let picks = Value::from(vec![Value::from("rust"), Value::Int(2)]);
        assert_eq!(picks.to_string(), "[rust, 2]");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(3_i32).as_int(), Some(3));
        assert_eq!(Value::from("alice").as_str(), Some("alice"));
        assert_eq!(Value::Int(3).as_str(), None);
        assert!(Value::from(None::<String>).is_null());
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_value(Value::Int(5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Int", "value": 5}));
        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, Value::Int(5));
    }
}
