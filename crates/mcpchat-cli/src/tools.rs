use mcpchat::errors::ToolError;
use mcpchat::models::tool::Tool;
use mcpchat::tools::StaticToolRegistry;
use serde_json::{json, Value};

/// Tools that run inside the CLI process
pub fn local_tools() -> StaticToolRegistry {
    StaticToolRegistry::new().register(
        Tool::new(
            "count_words",
            "Count the number of words in text",
            json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to count words in"
                    }
                },
                "required": ["text"]
            }),
        ),
        count_words,
    )
}

fn count_words(args: Value) -> Result<String, ToolError> {
    let text = args
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::Execution("expected a 'text' string argument".to_string()))?;
    Ok(json!({ "count": text.split_whitespace().count() }).to_string())
}
