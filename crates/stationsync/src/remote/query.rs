//! Query-string encoding for remote requests.

use serde::Serialize;
use serde_json::Value;

/// Flatten a query struct into URL query pairs.
///
/// Arrays are comma-joined, scalars are stringified and null fields are
/// left out. Nested objects are not supported and are skipped.
///
/// # Errors
///
/// Returns an error if the value does not serialize to a JSON object.
pub fn to_query_pairs<T: Serialize>(query: &T) -> serde_json::Result<Vec<(String, String)>> {
    let Value::Object(fields) = serde_json::to_value(query)? else {
        return Err(serde::ser::Error::custom("query must serialize to an object"));
    };

    let pairs = fields
        .into_iter()
        .filter_map(|(key, value)| encode_value(&value).map(|encoded| (key, encoded)))
        .collect();
    Ok(pairs)
}

fn encode_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(encode_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
    }
}
