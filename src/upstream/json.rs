//! JSON decoding with readable failure messages.

use anyhow::Result;
use serde::de::DeserializeOwned;

/// Deserialize `body`, reporting the serde path and a snippet of the offending
/// line on failure.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        let snippet = snippet_around(body, inner.line(), inner.column(), 40);

        let location = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("at path '{path}': ")
        };
        anyhow::anyhow!("{location}{inner}\n{snippet}")
    })
}

/// Show up to `width` characters around `column` of the 1-based `line`, with a
/// caret under the error position. Works on chars so multi-byte text never
/// splits.
fn snippet_around(body: &str, line: usize, column: usize, width: usize) -> String {
    let chars: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .chars()
        .collect();
    if chars.is_empty() {
        return "(empty line)".to_owned();
    }

    let error_idx = column.saturating_sub(1).min(chars.len() - 1);
    let start = error_idx.saturating_sub(width / 2);
    let end = (error_idx + width / 2).min(chars.len());

    let slice: String = chars[start..end].iter().collect();
    let caret = " ".repeat(error_idx - start) + "^";
    format!("...{slice}...\n   {caret}")
}
