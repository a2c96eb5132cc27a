//! Pulling JSON out of free-form service answers

/// Strip markdown code fences, if any
pub fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (`json`, `text`, ...) on the opening line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Best-effort location of the JSON object in a response
///
/// Looks for a fenced block first, then for the outermost `{...}` span.
pub fn extract_json_block(response: &str) -> Option<&str> {
    if let Some(start) = response.find("```") {
        let after = &response[start + 3..];
        if let Some(newline) = after.find('\n') {
            let body = &after[newline + 1..];
            if let Some(end) = body.find("```") {
                let block = body[..end].trim();
                if block.starts_with('{') {
                    return Some(block);
                }
            }
        }
    }

    match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&response[start..=end]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("```\nSUFFICIENT\n```"), "SUFFICIENT");
        assert_eq!(strip_fences("  SUFFICIENT  "), "SUFFICIENT");
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let response = "Here you go:\n```json\n{\"classes\": []}\n```\nThanks";
        assert_eq!(extract_json_block(response), Some("{\"classes\": []}"));
    }

    #[test]
    fn test_extract_raw_json_object() {
        let response = "Sure! {\"classes\": [{\"name\": \"Flight\"}]} done";
        assert_eq!(
            extract_json_block(response),
            Some("{\"classes\": [{\"name\": \"Flight\"}]}")
        );
    }

    #[test]
    fn test_no_json() {
        assert_eq!(extract_json_block("no braces here"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }
}
