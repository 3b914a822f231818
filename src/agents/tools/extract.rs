//! Extraction of tool-call requests from raw provider responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::domain::ToolCall;

/// Response shape a raw payload follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFormat {
    /// `choices[0].message.tool_calls[]` with JSON-string arguments
    OpenAi,
    /// `tool_use` list / `toolUse` object, or Claude `content[]` tool_use blocks
    Bedrock,
    /// `{"tool_calls": [{name, arguments}]}`, optionally nested under `message`
    Ollama,
}

/// Pull every `{id, name, arguments}` triple out of a raw response.
///
/// Unknown shapes yield an empty list. Arguments that are missing or
/// cannot be parsed as a JSON object become `{}`.
pub fn extract_tool_calls(raw: &Value, format: ProviderFormat) -> Vec<ToolCall> {
    match format {
        ProviderFormat::OpenAi => extract_openai(raw),
        ProviderFormat::Bedrock => extract_bedrock(raw),
        ProviderFormat::Ollama => extract_ollama(raw),
    }
}

fn arguments_from(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(raw)) => ToolCall::parse_arguments(raw),
        Some(obj @ Value::Object(_)) => obj.clone(),
        _ => Value::Object(Default::default()),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn extract_openai(raw: &Value) -> Vec<ToolCall> {
    let Some(calls) = raw
        .pointer("/choices/0/message/tool_calls")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    calls
        .iter()
        .map(|call| {
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            ToolCall::new(
                str_field(call, "id"),
                str_field(&function, "name"),
                arguments_from(function.get("arguments")),
            )
        })
        .collect()
}

fn bedrock_call(call: &Value) -> ToolCall {
    let id = call
        .get("toolUseId")
        .or_else(|| call.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = arguments_from(call.get("parameters").or_else(|| call.get("input")));
    ToolCall::new(id, str_field(call, "name"), arguments)
}

fn extract_bedrock(raw: &Value) -> Vec<ToolCall> {
    if let Some(calls) = raw.get("tool_use").and_then(Value::as_array) {
        return calls.iter().map(bedrock_call).collect();
    }

    if let Some(call) = raw.get("toolUse").filter(|v| v.is_object()) {
        return vec![bedrock_call(call)];
    }

    if let Some(blocks) = raw.get("content").and_then(Value::as_array) {
        return blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .map(bedrock_call)
            .collect();
    }

    Vec::new()
}

fn extract_ollama(raw: &Value) -> Vec<ToolCall> {
    let calls = raw
        .get("tool_calls")
        .or_else(|| raw.pointer("/message/tool_calls"))
        .and_then(Value::as_array);

    let Some(calls) = calls else {
        return Vec::new();
    };

    calls
        .iter()
        .map(|call| {
            let call = call.get("function").unwrap_or(call);
            ToolCall::new(String::new(), str_field(call, "name"), arguments_from(call.get("arguments")))
        })
        .collect()
}
