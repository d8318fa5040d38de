//! Oversized tool output reduction.
//!
//! Tool results are fed back into the model's context, so anything huge
//! has to be cut down first. Size is estimated with the bytes-per-token
//! heuristic; outputs over the configured token threshold are reduced:
//!
//! - Tabular JSON (row arrays) becomes a summary object carrying the
//!   headers, a handful of sample rows, the true row count and a hint
//!   telling the model to ask a narrower question.
//! - Everything else is hard-truncated on a char boundary with an
//!   explicit truncation notice appended.

use powernode_config::LimitsConfig;
use serde_json::Value;

/// What happened to one tool output on its way into the context.
#[derive(Debug, Clone)]
pub struct TruncationOutcome {
    /// The content to feed back to the model.
    pub content: String,

    /// Whether the original was reduced.
    pub truncated: bool,

    /// Byte length of the original output.
    pub original_bytes: usize,

    /// Token estimate for the original output.
    pub estimated_tokens: usize,
}

/// Estimate the token count of a byte length.
pub fn estimate_tokens(byte_len: usize, bytes_per_token: usize) -> usize {
    byte_len / bytes_per_token.max(1)
}

/// Reduce a tool output if its token estimate exceeds the threshold.
///
/// Under the threshold the content passes through unmodified. Over it,
/// tabular JSON gets summarized and everything else gets hard-truncated;
/// either way the returned content is strictly smaller than the original.
pub fn prepare_output(raw: String, limits: &LimitsConfig) -> TruncationOutcome {
    let original_bytes = raw.len();
    let estimated_tokens = estimate_tokens(original_bytes, limits.bytes_per_token);

    if estimated_tokens <= limits.truncation_token_threshold {
        return TruncationOutcome {
            content: raw,
            truncated: false,
            original_bytes,
            estimated_tokens,
        };
    }

    let max_bytes = limits.truncation_token_threshold * limits.bytes_per_token;

    if let Some(summary) = summarize_tabular(&raw, limits.sample_rows) {
        // Pathological rows can blow past the limit even as a summary
        let content = if summary.len() > max_bytes {
            truncate_text(&summary, max_bytes, original_bytes, estimated_tokens)
        } else {
            summary
        };
        return TruncationOutcome {
            content,
            truncated: true,
            original_bytes,
            estimated_tokens,
        };
    }

    TruncationOutcome {
        content: truncate_text(&raw, max_bytes, original_bytes, estimated_tokens),
        truncated: true,
        original_bytes,
        estimated_tokens,
    }
}

/// Hard-truncate to `max_bytes` on a char boundary and append a notice.
fn truncate_text(raw: &str, max_bytes: usize, original_bytes: usize, estimated_tokens: usize) -> String {
    let mut cut = max_bytes.min(raw.len());
    while cut > 0 && !raw.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut result = raw[..cut].to_string();
    result.push_str(&format!(
        "\n\n[CONTENT TRUNCATED: original output was {original_bytes} bytes (~{estimated_tokens} tokens), \
         showing the first {cut} bytes. Request a narrower range for the rest.]"
    ));
    result
}

/// Try to render an oversized output as a tabular summary.
///
/// Recognized shapes:
/// - a bare JSON array of row objects or row arrays
/// - a JSON object with the rows under `rows` or `data`, optionally with
///   an explicit `headers` array
///
/// A bare array of arrays treats its first row as the header row.
fn summarize_tabular(raw: &str, sample_rows: usize) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;

    let (rows, explicit_headers) = match &value {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(map) => {
            let rows = map.get("rows").or_else(|| map.get("data"))?.as_array()?;
            let headers = map.get("headers").and_then(Value::as_array);
            (rows.as_slice(), headers)
        }
        _ => return None,
    };

    if rows.is_empty() {
        return None;
    }

    let all_objects = rows.iter().all(Value::is_object);
    let all_arrays = rows.iter().all(Value::is_array);
    if !all_objects && !all_arrays {
        return None;
    }

    let (headers, data_rows) = match explicit_headers {
        Some(headers) => {
            let headers: Vec<String> = headers.iter().map(stringify_cell).collect();
            (headers, rows)
        }
        None if all_objects => {
            let headers = rows[0]
                .as_object()
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default();
            (headers, rows)
        }
        None => {
            // Array-of-arrays: first row is the header row
            let headers = rows[0]
                .as_array()
                .map(|cells| cells.iter().map(stringify_cell).collect())
                .unwrap_or_default();
            (headers, &rows[1..])
        }
    };

    let total_rows = data_rows.len();
    let samples: Vec<&Value> = data_rows.iter().take(sample_rows).collect();
    let shown = samples.len();

    let summary = serde_json::json!({
        "type": "tabular_summary",
        "truncated": true,
        "totalRows": total_rows,
        "headers": headers,
        "sampleRows": samples,
        "hint": format!(
            "The full result ({total_rows} rows) was too large to return. Showing {shown} sample rows. \
             Ask a more specific question or request a narrower range to see other rows."
        ),
    });

    serde_json::to_string_pretty(&summary).ok()
}

fn stringify_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
