//! Record types produced by the assembler.

use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// An object record: header-name to value, iterated in header order.
///
/// The header snapshot is shared between all records of one parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    header: Arc<[String]>,
    values: Vec<String>,
}

impl ObjectRecord {
    pub(crate) fn new(header: Arc<[String]>, values: Vec<String>) -> Self {
        debug_assert_eq!(header.len(), values.len());
        Self { header, values }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value for a header field, if the field exists.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|h| h == name)
            .map(|i| self.values[i].as_str())
    }

    /// `(name, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for ObjectRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A record in the shape selected by the assembler's output format and
/// column-count strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Object output: every header key present, header order preserved.
    Object(ObjectRecord),
    /// Array output.
    Array(Vec<String>),
    /// Array output under the `sparse` strategy: padded cells are absent
    /// (`None`), which is distinct from an empty string.
    Sparse(Vec<Option<String>>),
}

impl Record {
    /// Field count after strategy application.
    pub fn len(&self) -> usize {
        match self {
            Record::Object(object) => object.len(),
            Record::Array(values) => values.len(),
            Record::Sparse(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_object(&self) -> Option<&ObjectRecord> {
        match self {
            Record::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Record::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Record::Object(object) => object.serialize(serializer),
            Record::Array(values) => values.serialize(serializer),
            Record::Sparse(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(header: &[&str], values: &[&str]) -> ObjectRecord {
        ObjectRecord::new(
            header.iter().map(|s| s.to_string()).collect(),
            values.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_object_record_preserves_header_order() {
        let record = object(&["b", "a"], &["1", "2"]);
        let pairs: Vec<_> = record.iter().collect();
        assert_eq!(pairs, vec![("b", "1"), ("a", "2")]);
        assert_eq!(record.get("a"), Some("2"));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_object_record_serializes_as_map() {
        let record = Record::Object(object(&["name", "age"], &["Alice", "42"]));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"name":"Alice","age":"42"}"#);
    }

    #[test]
    fn test_sparse_record_serializes_absent_as_null() {
        let record = Record::Sparse(vec![Some("1".to_string()), None]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"["1",null]"#);
    }
}
