use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// declared type of a property
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyType {
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Binary => "binary",
            PropertyType::Long => "long",
            PropertyType::Double => "double",
            PropertyType::Date => "date",
            PropertyType::Boolean => "boolean",
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(PropertyType::String),
            "binary" => Ok(PropertyType::Binary),
            "long" => Ok(PropertyType::Long),
            "double" => Ok(PropertyType::Double),
            "date" => Ok(PropertyType::Date),
            "boolean" => Ok(PropertyType::Boolean),
            other => Err(Error::UnsupportedPropertyType(other.to_string())),
        }
    }
}

/// a typed property value
///
/// binary is a declared type only; there is no binary value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Long(_) => PropertyType::Long,
            PropertyValue::Double(_) => PropertyType::Double,
            PropertyValue::Date(_) => PropertyType::Date,
            PropertyValue::Boolean(_) => PropertyType::Boolean,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::String(v) => f.write_str(v),
            PropertyValue::Long(v) => write!(f, "{}", v),
            PropertyValue::Double(v) => write!(f, "{}", v),
            PropertyValue::Date(v) => f.write_str(&crate::meta::format_date(v)),
            PropertyValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::Date(v)
    }
}

/// a named, typed value attached to a node or revision
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn property_type(&self) -> PropertyType {
        self.value.property_type()
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self.value {
            PropertyValue::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.value {
            PropertyValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self.value {
            PropertyValue::Date(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            PropertyValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// binary values are not implemented
    pub fn as_binary(&self) -> Result<Vec<u8>> {
        Err(Error::UnsupportedPropertyType(
            PropertyType::Binary.to_string(),
        ))
    }

    /// the value as a date, or a type error naming this property
    pub fn expect_date(&self) -> Result<DateTime<Utc>> {
        self.as_date().ok_or_else(|| Error::PropertyType {
            name: self.name.clone(),
            expected: PropertyType::Date.as_str(),
            actual: self.property_type().as_str(),
        })
    }
}

/// property set of one node, ordered by name
pub type PropertyMap = BTreeMap<String, Property>;
