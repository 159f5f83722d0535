mod kind;
mod property;

pub mod names;

pub use kind::NodeKind;
pub use property::{Property, PropertyMap, PropertyType, PropertyValue};
