//! Dynamically typed configuration values.
//!
//! Configuration arrives from YAML, environment variables and CLI arguments
//! before it is known which session (if any) a key belongs to, so it is kept
//! as a tree of [`ConfigValue`] until it is applied to a typed session.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A mapping of configuration keys to values.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// A single configuration value.
///
/// `Path` is distinct from `String` so that attributes which must be a
/// filesystem path (for example `build_dir`) can reject plain strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Path(PathBuf),
    List(Vec<ConfigValue>),
    Map(ConfigMap),
}

impl ConfigValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map_mut(&mut self) -> Option<&mut ConfigMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Name of the variant, used in log and error messages so that values
    /// (which may be secrets) are never printed.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Path(_) => "path",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Path(value) => write!(f, "{}", value.display()),
            Self::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<PathBuf> for ConfigValue {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for ConfigValue {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(values: Vec<ConfigValue>) -> Self {
        Self::List(values)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(map: ConfigMap) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<ConfigValue>> From<Option<T>> for ConfigValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_conversion() {
        assert_eq!(ConfigValue::from(None::<String>), ConfigValue::Null);
        assert_eq!(
            ConfigValue::from(Some("12")),
            ConfigValue::String("12".to_string())
        );
    }

    #[test]
    fn test_accessors_reject_other_variants() {
        let value = ConfigValue::from("true");
        assert_eq!(value.as_bool(), None);
        assert_eq!(value.as_str(), Some("true"));
        assert!(ConfigValue::from(PathBuf::from("/build")).as_str().is_none());
    }

    #[test]
    fn test_display_nested() {
        let mut map = ConfigMap::new();
        map.insert("a".to_string(), ConfigValue::from(vec![ConfigValue::Integer(1), ConfigValue::Bool(true)]));
        assert_eq!(ConfigValue::Map(map).to_string(), "{a: [1, true]}");
    }
}
