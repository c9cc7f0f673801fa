//! Serde adapter for columns that are stored as JSON text.
//!
//! Tabular stores keep nested values (driver lists, member cells, geometries) as a
//! single JSON-encoded string column; readers decode them back into structured form.

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    let text = serde_json::to_string(value).map_err(S::Error::custom)?;
    serializer.serialize_str(&text)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: DeserializeOwned,
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    serde_json::from_str(text.trim()).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        #[serde(with = "crate::json")]
        tags: Vec<String>,
    }

    #[test]
    fn nested_column_is_a_json_string() {
        let row = Row {
            id: 7,
            tags: vec!["a".to_string(), "b".to_string()],
        };
        let encoded = serde_json::to_value(&row).unwrap();
        assert_eq!(encoded["tags"], serde_json::json!("[\"a\",\"b\"]"));
        let decoded: Row = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, row);
    }
}
