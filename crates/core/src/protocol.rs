//! Request bodies and streamed frames of the same-origin API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/token`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub instructions: String,
}

/// The two searches the model may ask the client to run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Web,
    Document,
}

impl SearchKind {
    /// Maps a model-facing function name to a search, if it is one we serve.
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            WEB_SEARCH_FUNCTION => Some(Self::Web),
            DOCUMENT_SEARCH_FUNCTION => Some(Self::Document),
            _ => None,
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Web => WEB_SEARCH_FUNCTION,
            Self::Document => DOCUMENT_SEARCH_FUNCTION,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Web => "/api/web-search",
            Self::Document => "/api/document-search",
        }
    }
}

pub const WEB_SEARCH_FUNCTION: &str = "web_search";
pub const DOCUMENT_SEARCH_FUNCTION: &str = "document_search";

/// Body of `POST /api/web-search` and `POST /api/document-search`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store_id: Option<String>,
}

impl SearchRequest {
    pub fn web(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            vector_store_id: None,
        }
    }

    pub fn document(query: impl Into<String>, vector_store_id: Option<String>) -> Self {
        Self {
            query: query.into(),
            vector_store_id,
        }
    }
}

/// Body of `POST /api/openai-responses`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResponsesRequest {
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
}

/// Frames streamed back by the search endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchFrame {
    /// Progress reporting, shown but not part of the result.
    Status { message: String },
    /// A piece of the result text.
    Content { content: String },
    /// End of the result. May carry the full text.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Error { message: String },
}

impl SearchFrame {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Encodes the frame as one `data:` line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Function tools advertised to the realtime session.
pub fn search_tool_definitions() -> Value {
    serde_json::json!([
        {
            "type": "function",
            "name": WEB_SEARCH_FUNCTION,
            "description": "Search the web for current information.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query."}
                },
                "required": ["query"]
            }
        },
        {
            "type": "function",
            "name": DOCUMENT_SEARCH_FUNCTION,
            "description": "Search the user's uploaded documents.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query."}
                },
                "required": ["query"]
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_names() {
        assert_eq!(SearchKind::from_function_name("web_search"), Some(SearchKind::Web));
        assert_eq!(
            SearchKind::from_function_name("document_search"),
            Some(SearchKind::Document)
        );
        assert_eq!(SearchKind::from_function_name("send_email"), None);
        assert_eq!(SearchKind::Document.endpoint(), "/api/document-search");
    }

    #[test]
    fn test_search_request_body() {
        let body = serde_json::to_value(SearchRequest::web("weather")).unwrap();
        assert_eq!(body, json!({"query": "weather"}));

        let body =
            serde_json::to_value(SearchRequest::document("q", Some("vs_1".into()))).unwrap();
        assert_eq!(body, json!({"query": "q", "vector_store_id": "vs_1"}));
    }

    #[test]
    fn test_search_frame_line() {
        let line = SearchFrame::Content {
            content: "hi".into(),
        }
        .to_line()
        .unwrap();
        assert_eq!(line, "data: {\"type\":\"content\",\"content\":\"hi\"}\n\n");

        let frame = SearchFrame::from_value(&json!({"type": "complete"})).unwrap();
        assert_eq!(frame, SearchFrame::Complete { content: None });
    }

    #[test]
    fn test_tool_definitions_names() {
        let tools = search_tool_definitions();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["web_search", "document_search"]);
    }
}
