use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of input: `{"id": "...", "tool": "...", "args": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// One line of output. Failures are reported in `content`, never by
/// dropping the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub tool: String,
    pub ok: bool,
    pub content: String,
}

impl ToolResponse {
    pub fn success(id: String, tool: impl Into<String>, content: String) -> Self {
        Self { id, tool: tool.into(), ok: true, content }
    }

    pub fn failure(id: String, tool: impl Into<String>, content: String) -> Self {
        Self { id, tool: tool.into(), ok: false, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request: ToolRequest = serde_json::from_str(r#"{"tool":"get_timeline"}"#).unwrap();
        assert!(request.id.is_none());
        assert!(request.args.is_null());

        let line = r#"{"id":"7","tool":"get_trends","args":{"woeid":23424977}}"#;
        let request: ToolRequest = serde_json::from_str(line).unwrap();
        assert_eq!(request.id.as_deref(), Some("7"));
        assert_eq!(request.args, json!({"woeid": 23424977}));
    }

    #[test]
    fn test_response_wire_shape() {
        let response = ToolResponse::failure("1".into(), "post_tweet", "boom".into());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"id": "1", "tool": "post_tweet", "ok": false, "content": "boom"})
        );
    }
}
