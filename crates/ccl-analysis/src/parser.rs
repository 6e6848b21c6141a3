//! Reads benchmark result files that may be a single JSON object, a JSON
//! array, or line-delimited JSON.

use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;

pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Object,
    Array,
    Lines,
    Scalar,
}

#[derive(Debug)]
pub struct ParsedContent {
    pub encoding: Encoding,
    pub records: Vec<RawRecord>,
    /// Lines or array items that were not JSON objects.
    pub skipped: usize,
}

/// Whole-document parse first; line-delimited fallback only when the
/// document is not valid JSON. Never fails: unusable content yields no records.
pub fn parse_content(content: &[u8]) -> ParsedContent {
    match serde_json::from_slice::<Value>(content) {
        Ok(Value::Object(obj)) => ParsedContent {
            encoding: Encoding::Object,
            records: vec![obj],
            skipped: 0,
        },
        Ok(Value::Array(items)) => {
            let total = items.len();
            let records: Vec<RawRecord> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(obj) => Some(obj),
                    _ => None,
                })
                .collect();
            ParsedContent {
                encoding: Encoding::Array,
                skipped: total - records.len(),
                records,
            }
        }
        Ok(_) => ParsedContent {
            encoding: Encoding::Scalar,
            records: Vec::new(),
            skipped: 0,
        },
        Err(_) => parse_lines(content),
    }
}

fn parse_lines(content: &[u8]) -> ParsedContent {
    let mut records = Vec::new();
    let mut skipped = 0;
    for line in content.split(|b| *b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            skipped += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => records.push(obj),
            _ => skipped += 1,
        }
    }
    ParsedContent {
        encoding: Encoding::Lines,
        records,
        skipped,
    }
}

pub fn parse_records(content: &[u8]) -> Vec<RawRecord> {
    parse_content(content).records
}

pub fn parse_result_file(path: &Path) -> io::Result<Vec<RawRecord>> {
    let bytes = fs::read(path)?;
    let parsed = parse_content(&bytes);
    if parsed.skipped > 0 {
        tracing::debug!(
            file = %path.display(),
            skipped = parsed.skipped,
            "skipped malformed result entries"
        );
    }
    Ok(parsed.records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<Value> {
        vec![
            json!({"name": "AllReduce", "type": "float", "redop": "sum", "size": 1024, "inPlace": 0, "time": 12.5}),
            json!({"name": "AllReduce", "type": "float", "redop": "sum", "size": 2048, "inPlace": 1, "time": 20.0}),
            json!({"name": "AllReduce", "type": "half", "redop": "max", "size": 4096, "inPlace": 0, "time": 31.0}),
        ]
    }

    fn as_records(values: &[Value]) -> Vec<RawRecord> {
        values
            .iter()
            .map(|v| v.as_object().expect("object").clone())
            .collect()
    }

    #[test]
    fn single_object_is_wrapped() {
        let one = &sample()[..1];
        let parsed = parse_content(serde_json::to_string(&one[0]).expect("ser").as_bytes());
        assert_eq!(parsed.encoding, Encoding::Object);
        assert_eq!(parsed.records, as_records(one));
    }

    #[test]
    fn array_and_lines_yield_the_same_records() {
        let values = sample();
        let array = serde_json::to_vec(&values).expect("ser");
        let lines = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let from_array = parse_content(&array);
        let from_lines = parse_content(lines.as_bytes());
        assert_eq!(from_array.encoding, Encoding::Array);
        assert_eq!(from_lines.encoding, Encoding::Lines);
        assert_eq!(from_array.records, as_records(&values));
        assert_eq!(from_lines.records, from_array.records);
    }

    #[test]
    fn one_malformed_line_is_skipped() {
        let values = sample();
        let mut lines: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        lines.insert(1, "{\"name\": \"AllReduce\", \"size\": ".to_string());
        lines.push(String::new());
        let parsed = parse_content(lines.join("\r\n").as_bytes());
        assert_eq!(parsed.records.len(), values.len());
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn garbage_and_empty_content_yield_nothing() {
        assert!(parse_records(b"").is_empty());
        assert!(parse_records(b"not json at all\nstill not").is_empty());
        assert!(parse_records(b"42").is_empty());
    }

    #[test]
    fn non_object_array_items_are_dropped() {
        let parsed = parse_content(br#"[{"size": 1}, 3, "x"]"#);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.skipped, 2);
    }
}
