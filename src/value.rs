use std::{fmt::Display, sync::Arc};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use thiserror::Error;

/// The only runtime value a dialog script can produce or consume.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variant {
    Bool(bool),
    Float(f64),
    String(Arc<str>),
    Void,
}

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum VariantError {
    #[error("Expected {}, but found {}", .expected.fmt_a(), .actual.fmt_a())]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },
}

impl Variant {
    pub fn type_of(&self) -> ValueType {
        match self {
            Variant::Void => ValueType::Void,
            Variant::Bool(_) => ValueType::Bool,
            Variant::Float(_) => ValueType::Float,
            Variant::String(_) => ValueType::String,
        }
    }
    pub fn string(value: impl AsRef<str>) -> Self {
        Variant::String(Arc::from(value.as_ref()))
    }
    fn mismatch(&self, expected: ValueType) -> VariantError {
        VariantError::TypeMismatch {
            expected,
            actual: self.type_of(),
        }
    }
    pub fn as_bool(&self) -> Result<bool, VariantError> {
        match self {
            Variant::Bool(value) => Ok(*value),
            other => Err(other.mismatch(ValueType::Bool)),
        }
    }
    pub fn as_float(&self) -> Result<f64, VariantError> {
        match self {
            Variant::Float(value) => Ok(*value),
            other => Err(other.mismatch(ValueType::Float)),
        }
    }
    pub fn as_str(&self) -> Result<&str, VariantError> {
        match self {
            Variant::String(value) => Ok(value),
            other => Err(other.mismatch(ValueType::String)),
        }
    }
    pub fn is_void(&self) -> bool {
        matches!(self, Variant::Void)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}
impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}
impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}
impl From<()> for Variant {
    fn from(_: ()) -> Self {
        Self::Void
    }
}

/// Plain rendering, as used when a value is interpolated into line text.
impl Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(string) => f.write_str(string),
            Self::Float(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Void => Ok(()),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    /// Type of an expression that failed to check; never stored.
    Undefined,
    Void,
    Bool,
    Float,
    String,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        f.write_str(name)
    }
}

impl ValueType {
    pub fn fmt_a(&self) -> &str {
        match self {
            ValueType::Undefined => "an undefined value",
            ValueType::Void => "void",
            ValueType::Bool => "a bool",
            ValueType::Float => "a float",
            ValueType::String => "a string",
        }
    }
    pub fn is_defined(&self) -> bool {
        !matches!(self, ValueType::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accessors_reject_other_kinds() {
        assert_eq!(Variant::from(2.5).as_float(), Ok(2.5));
        assert_eq!(
            Variant::from("hi").as_float(),
            Err(VariantError::TypeMismatch {
                expected: ValueType::Float,
                actual: ValueType::String,
            })
        );
        assert_eq!(Variant::from(true).as_bool(), Ok(true));
        assert!(Variant::Void.as_str().is_err());
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(Variant::from(3.0).to_string(), "3");
        assert_eq!(Variant::from(0.5).to_string(), "0.5");
        assert_eq!(Variant::from("Bob").to_string(), "Bob");
        assert_eq!(Variant::Void.to_string(), "");
    }

    #[test]
    fn value_types_parse_lowercase() {
        assert_eq!("float".parse::<ValueType>(), Ok(ValueType::Float));
        assert_eq!(ValueType::String.to_string(), "string");
    }

    #[test]
    fn variants_deserialize_from_plain_json() {
        let values: Vec<Variant> = serde_json::from_str(r#"[1.5, true, "x", null]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Variant::Float(1.5),
                Variant::Bool(true),
                Variant::from("x"),
                Variant::Void
            ]
        );
    }
}
