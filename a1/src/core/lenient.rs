//! Tolerant field decoders for documents the agent edits by hand.
//!
//! A single off-vocabulary value must not make a whole document unreadable,
//! so these decode what they can and fall back per field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Decode `T`, or use its default when the value has the wrong shape.
pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Any JSON number or numeric string, floored into `u32`. Anything else is 0.
pub fn whole_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(to_whole_number(&value).unwrap_or(0))
}

pub fn to_whole_number(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    // Saturating: negatives become 0, NaN becomes 0.
    Some(n.floor() as u32)
}

/// The string entries of an array. Other entries, or a non-array, are dropped.
pub fn strings<'de, D, C>(deserializer: D) -> Result<C, D::Error>
where
    D: Deserializer<'de>,
    C: FromIterator<String>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

/// Lowercase with `-` and spaces folded to `_`, for matching status words.
pub fn status_word(value: &Value) -> Option<String> {
    let raw = value.as_str()?;
    Some(
        raw.trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_number_accepts_any_number() {
        assert_eq!(to_whole_number(&json!(45.5)), Some(45));
        assert_eq!(to_whole_number(&json!(-3)), Some(0));
        assert_eq!(to_whole_number(&json!("7")), Some(7));
        assert_eq!(to_whole_number(&json!(null)), None);
        assert_eq!(to_whole_number(&json!("seven")), None);
    }

    #[test]
    fn status_words_are_normalized() {
        assert_eq!(status_word(&json!(" In-Progress ")).as_deref(), Some("in_progress"));
        assert_eq!(status_word(&json!(3)), None);
    }
}
