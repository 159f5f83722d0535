//! property codec for meta files
//!
//! one property per line:
//!
//! ```text
//! strata_metaVersion<string>:1
//! name<type>:value
//! ```
//!
//! in the current format names and values are escaped: `\` becomes `\\`, line
//! breaks become `\n` / `\r`, the separator `:` is doubled, and `<` inside a
//! name becomes `\<`. files without the version line are read with the legacy
//! rules (raw value after the first `>:`). unknown versions are rejected.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::types::{Property, PropertyMap, PropertyType, PropertyValue};

/// synthetic first line naming the format version
pub const VERSION_PROPERTY: &str = "strata_metaVersion";

/// version written by this crate
pub const CURRENT_VERSION: &str = "1";

const SEPARATOR: char = ':';

/// date format with millisecond precision (written)
const DATE_FORMAT_MILLIS: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";
/// date format with second precision (accepted on read)
const DATE_FORMAT_SECONDS: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MetaFormat {
    /// no version line, no escaping
    Legacy,
    /// escaped names and values
    V1,
}

/// read and parse a meta file
pub fn read_properties(path: &Path) -> Result<PropertyMap> {
    let text = fs::read_to_string(path).with_path(path)?;
    parse_properties(&text, path)
}

/// rewrite a meta file from scratch
pub fn write_properties(path: &Path, properties: &PropertyMap) -> Result<()> {
    write_atomic(path, format_properties(properties).as_bytes())
}

/// parse meta file text; `path` is used for error reporting only
pub fn parse_properties(text: &str, path: &Path) -> Result<PropertyMap> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .peekable();

    let version_prefix = format!("{}<{}>{}", VERSION_PROPERTY, PropertyType::String, SEPARATOR);
    let format = match lines.peek() {
        Some((_, first)) if first.starts_with(&version_prefix) => {
            let version = &first[version_prefix.len()..];
            if version != CURRENT_VERSION {
                return Err(Error::UnsupportedMetaVersion {
                    path: path.to_path_buf(),
                    version: version.to_string(),
                });
            }
            lines.next();
            MetaFormat::V1
        }
        _ => MetaFormat::Legacy,
    };

    let mut properties = PropertyMap::new();
    for (index, line) in lines {
        let corrupt = |message: String| Error::CorruptMeta {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };

        let (name, type_name, raw) = match format {
            MetaFormat::V1 => parse_v1_line(line).map_err(corrupt)?,
            MetaFormat::Legacy => parse_legacy_line(line).map_err(corrupt)?,
        };
        let property_type: PropertyType = type_name.parse()?;
        let value = parse_value(property_type, &raw).map_err(corrupt)?;
        properties.insert(name.clone(), Property { name, value });
    }
    Ok(properties)
}

/// serialize properties in the current format
pub fn format_properties(properties: &PropertyMap) -> String {
    let mut out = format!(
        "{}<{}>{}{}\n",
        VERSION_PROPERTY,
        PropertyType::String,
        SEPARATOR,
        CURRENT_VERSION
    );
    for property in properties.values() {
        if property.name == VERSION_PROPERTY {
            continue;
        }
        out.push_str(&escape(&property.name, true));
        out.push('<');
        out.push_str(property.property_type().as_str());
        out.push('>');
        out.push(SEPARATOR);
        out.push_str(&escape(&format_value(&property.value), false));
        out.push('\n');
    }
    out
}

pub(crate) fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT_MILLIS).to_string()
}

/// parse a date, trying millisecond precision first
pub(crate) fn parse_date(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_str(s, DATE_FORMAT_MILLIS)
        .or_else(|_| DateTime::parse_from_str(s, DATE_FORMAT_SECONDS))
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("invalid date {:?}: {}", s, e))
}

fn format_value(value: &PropertyValue) -> String {
    match value {
        PropertyValue::String(s) => s.clone(),
        PropertyValue::Long(v) => v.to_string(),
        PropertyValue::Double(v) => v.to_string(),
        PropertyValue::Boolean(v) => v.to_string(),
        PropertyValue::Date(d) => format_date(d),
    }
}

fn parse_value(
    property_type: PropertyType,
    raw: &str,
) -> std::result::Result<PropertyValue, String> {
    match property_type {
        PropertyType::String => Ok(PropertyValue::String(raw.to_string())),
        PropertyType::Long => raw
            .parse()
            .map(PropertyValue::Long)
            .map_err(|e| format!("invalid long {:?}: {}", raw, e)),
        PropertyType::Double => raw
            .parse()
            .map(PropertyValue::Double)
            .map_err(|e| format!("invalid double {:?}: {}", raw, e)),
        PropertyType::Boolean => raw
            .parse()
            .map(PropertyValue::Boolean)
            .map_err(|e| format!("invalid boolean {:?}: {}", raw, e)),
        PropertyType::Date => parse_date(raw).map(PropertyValue::Date),
        PropertyType::Binary => Err("binary properties are not supported".to_string()),
    }
}

fn escape(s: &str, is_name: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' if is_name => out.push_str("\\<"),
            SEPARATOR => {
                out.push(SEPARATOR);
                out.push(SEPARATOR);
            }
            c => out.push(c),
        }
    }
    out
}

/// split a current-format line into unescaped name, type name, unescaped value
fn parse_v1_line(line: &str) -> std::result::Result<(String, &str, String), String> {
    let mut name = String::new();
    let mut type_start = None;
    let mut chars = line.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => name.push('\n'),
                Some((_, 'r')) => name.push('\r'),
                Some((_, '\\')) => name.push('\\'),
                Some((_, '<')) => name.push('<'),
                other => return Err(format!("invalid escape in name: {:?}", other)),
            },
            SEPARATOR => match chars.next() {
                Some((_, SEPARATOR)) => name.push(SEPARATOR),
                _ => return Err("unescaped separator in name".to_string()),
            },
            '<' => {
                type_start = Some(i + 1);
                break;
            }
            c => name.push(c),
        }
    }

    let start = type_start.ok_or("missing property type")?;
    let rest = &line[start..];
    let close = rest.find('>').ok_or("unterminated property type")?;
    let value = rest[close + 1..]
        .strip_prefix(SEPARATOR)
        .ok_or("missing separator after type")?;

    Ok((name, &rest[..close], unescape_value(value)?))
}

fn unescape_value(s: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                other => return Err(format!("invalid escape in value: {:?}", other)),
            },
            SEPARATOR => match chars.next() {
                Some(SEPARATOR) => out.push(SEPARATOR),
                _ => return Err("unescaped separator in value".to_string()),
            },
            c => out.push(c),
        }
    }
    Ok(out)
}

fn parse_legacy_line(line: &str) -> std::result::Result<(String, &str, String), String> {
    let open = line.find('<').ok_or("missing property type")?;
    let close = line[open..]
        .find('>')
        .map(|i| open + i)
        .ok_or("unterminated property type")?;
    let value = line[close + 1..]
        .strip_prefix(SEPARATOR)
        .ok_or("missing separator after type")?;
    Ok((line[..open].to_string(), &line[open + 1..close], value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn meta_path() -> PathBuf {
        PathBuf::from("meta")
    }

    fn map(properties: Vec<Property>) -> PropertyMap {
        properties
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect()
    }

    #[test]
    fn test_write_read_all_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.meta/meta");
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 15).unwrap()
            + chrono::Duration::milliseconds(250);

        let props = map(vec![
            Property::new("title", "hello"),
            Property::new("count", 42i64),
            Property::new("ratio", 0.25f64),
            Property::new("flag", true),
            Property::new("when", date),
        ]);
        write_properties(&path, &props).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("strata_metaVersion<string>:1\n"));

        let read = read_properties(&path).unwrap();
        assert_eq!(read, props);
    }

    #[test]
    fn test_separator_and_newlines_survive() {
        let value = "a:b::c\nsecond line\r\nback\\slash\\n";
        let props = map(vec![Property::new("we:ird<name>", value)]);

        let text = format_properties(&props);
        // one property, one line
        assert_eq!(text.lines().count(), 2);

        let read = parse_properties(&text, &meta_path()).unwrap();
        assert_eq!(read["we:ird<name>"].as_str(), Some(value));
    }

    #[test]
    fn test_legacy_format() {
        let text = "strata_type<string>:resource\nnote<string>:a:b\nsize<long>:12\n";
        let read = parse_properties(text, &meta_path()).unwrap();
        assert_eq!(read["strata_type"].as_str(), Some("resource"));
        assert_eq!(read["note"].as_str(), Some("a:b"));
        assert_eq!(read["size"].as_long(), Some(12));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let text = "strata_metaVersion<string>:2\ntitle<string>:x\n";
        let err = parse_properties(text, &meta_path()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMetaVersion { ref version, .. } if version == "2"));
    }

    #[test]
    fn test_date_without_millis() {
        let text = "strata_metaVersion<string>:1\nwhen<date>:2020-05-06T07::08::09+0000\n";
        let read = parse_properties(text, &meta_path()).unwrap();
        assert_eq!(
            read["when"].as_date(),
            Some(Utc.with_ymd_and_hms(2020, 5, 6, 7, 8, 9).unwrap())
        );
    }

    #[test]
    fn test_type_mismatch_is_corruption() {
        let text = "strata_metaVersion<string>:1\ncount<long>:twelve\n";
        let err = parse_properties(text, &meta_path()).unwrap_err();
        assert!(matches!(err, Error::CorruptMeta { line: 2, .. }));
    }

    #[test]
    fn test_binary_line_rejected() {
        let text = "strata_metaVersion<string>:1\ndata<binary>:AAAA\n";
        assert!(parse_properties(text, &meta_path()).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let text = "strata_metaVersion<string>:1\ndata<blob>:AAAA\n";
        assert!(matches!(
            parse_properties(text, &meta_path()),
            Err(Error::UnsupportedPropertyType(_))
        ));
    }

    #[test]
    fn test_single_separator_in_value_rejected() {
        let text = "strata_metaVersion<string>:1\nnote<string>:a:b\n";
        assert!(matches!(
            parse_properties(text, &meta_path()),
            Err(Error::CorruptMeta { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_string_roundtrip(name in "[a-z:<>\\\\\n]{1,12}", value in "(?s).{0,64}") {
            let props = map(vec![Property::new(name.clone(), value.clone())]);
            let read = parse_properties(&format_properties(&props), &meta_path()).unwrap();
            prop_assert_eq!(read[&name].as_str(), Some(value.as_str()));
        }
    }
}
