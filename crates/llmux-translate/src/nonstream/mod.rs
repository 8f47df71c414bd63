use serde_json::{Map, Value, json};

use llmux_protocol::Dialect;

use crate::callid::derive_call_id;
use crate::stream::StreamContext;
use crate::value_util::str_field;
use crate::{TranslateError, TranslateResult};

/// Translates a complete (non-streaming) provider response body into the
/// client dialect.
pub fn translate_nonstream(
    from: Dialect,
    to: Dialect,
    ctx: &StreamContext,
    body: &Value,
) -> TranslateResult<Value> {
    if from == to
        || matches!(
            (from, to),
            (Dialect::Codex, Dialect::OpenAIResponses) | (Dialect::OpenAIResponses, Dialect::Codex)
        )
    {
        return Ok(body.clone());
    }
    match (from, to) {
        (Dialect::Claude, Dialect::OpenAI) => Ok(claude_to_openai(ctx, body)),
        (Dialect::OpenAI, Dialect::Claude) => Ok(openai_to_claude(ctx, body)),
        (Dialect::Gemini, Dialect::OpenAI) => Ok(gemini_to_openai(ctx, body)),
        (Dialect::OpenAI, Dialect::Gemini) => Ok(openai_to_gemini(ctx, body)),
        (Dialect::OpenAIResponses, Dialect::OpenAI) | (Dialect::Codex, Dialect::OpenAI) => {
            Ok(responses_to_openai(ctx, body))
        }
        (Dialect::OpenAI, Dialect::OpenAIResponses) | (Dialect::OpenAI, Dialect::Codex) => {
            Ok(openai_to_responses(ctx, body))
        }
        (Dialect::OpenAIResponses, Dialect::Gemini) | (Dialect::Codex, Dialect::Gemini) => {
            Ok(responses_to_gemini(ctx, body))
        }
        (Dialect::Grok, Dialect::OpenAI) => Ok(grok_to_openai(ctx, body)),
        _ => Err(TranslateError::UnsupportedPair { from, to }),
    }
}

fn chat_completion(
    ctx: &StreamContext,
    id: &str,
    content: String,
    tool_calls: Vec<Value>,
    finish_reason: &str,
    usage: Value,
) -> Value {
    let mut message = Map::new();
    message.insert("role".to_string(), Value::String("assistant".to_string()));
    message.insert("content".to_string(), Value::String(content));
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    json!({
        "id": id,
        "object": "chat.completion",
        "created": ctx.created,
        "model": ctx.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": usage,
    })
}

fn claude_to_openai(ctx: &StreamContext, body: &Value) -> Value {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    if let Some(blocks) = body.get("content").and_then(Value::as_array) {
        for block in blocks {
            match str_field(block, "type") {
                Some("text") => content.push_str(str_field(block, "text").unwrap_or_default()),
                Some("tool_use") => tool_calls.push(json!({
                    "id": str_field(block, "id").unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": str_field(block, "name").unwrap_or_default(),
                        "arguments": block.get("input").map(Value::to_string).unwrap_or_else(|| "{}".to_string()),
                    },
                })),
                _ => {}
            }
        }
    }
    let finish_reason = match str_field(body, "stop_reason") {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    };
    let prompt = body
        .get("usage")
        .and_then(|usage| usage.get("input_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = body
        .get("usage")
        .and_then(|usage| usage.get("output_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    chat_completion(
        ctx,
        str_field(body, "id").unwrap_or(&ctx.response_id),
        content,
        tool_calls,
        finish_reason,
        json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        }),
    )
}

fn openai_to_claude(ctx: &StreamContext, body: &Value) -> Value {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());
    let message = choice.and_then(|choice| choice.get("message"));

    let mut blocks = Vec::new();
    if let Some(text) = message
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        && !text.is_empty()
    {
        blocks.push(json!({"type": "text", "text": text}));
    }
    if let Some(calls) = message
        .and_then(|message| message.get("tool_calls"))
        .and_then(Value::as_array)
    {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or_default();
            blocks.push(json!({
                "type": "tool_use",
                "id": str_field(call, "id").unwrap_or_default(),
                "name": str_field(&function, "name").unwrap_or_default(),
                "input": str_field(&function, "arguments")
                    .map(crate::value_util::parse_args)
                    .unwrap_or_else(|| json!({})),
            }));
        }
    }
    let stop_reason = match choice
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(Value::as_str)
    {
        Some("length") => "max_tokens",
        Some("tool_calls") | Some("function_call") => "tool_use",
        _ => "end_turn",
    };
    json!({
        "id": str_field(body, "id").unwrap_or(&ctx.response_id),
        "type": "message",
        "role": "assistant",
        "model": ctx.model,
        "content": blocks,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": body.get("usage").and_then(|u| u.get("prompt_tokens")).and_then(Value::as_i64).unwrap_or(0),
            "output_tokens": body.get("usage").and_then(|u| u.get("completion_tokens")).and_then(Value::as_i64).unwrap_or(0),
        },
    })
}

fn gemini_to_openai(ctx: &StreamContext, body: &Value) -> Value {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first());
    if let Some(parts) = candidate
        .and_then(|candidate| candidate.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text) = str_field(part, "text") {
                content.push_str(text);
            }
            if let Some(call) = part.get("functionCall") {
                let name = str_field(call, "name").unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": derive_call_id(name, &args),
                    "type": "function",
                    "function": {"name": name, "arguments": args.to_string()},
                }));
            }
        }
    }
    let finish_reason = match candidate
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)
    {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") => "content_filter",
        _ if !tool_calls.is_empty() => "tool_calls",
        _ => "stop",
    };
    let usage = body.get("usageMetadata");
    let prompt = usage
        .and_then(|u| u.get("promptTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("candidatesTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    chat_completion(
        ctx,
        &ctx.response_id,
        content,
        tool_calls,
        finish_reason,
        json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        }),
    )
}

fn openai_to_gemini(ctx: &StreamContext, body: &Value) -> Value {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());
    let mut parts = Vec::new();
    if let Some(text) = choice
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        && !text.is_empty()
    {
        parts.push(json!({"text": text}));
    }
    if let Some(calls) = choice
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("tool_calls"))
        .and_then(Value::as_array)
    {
        for call in calls {
            let Some(function) = call.get("function") else {
                continue;
            };
            parts.push(json!({"functionCall": {
                "name": str_field(function, "name").unwrap_or_default(),
                "args": str_field(function, "arguments")
                    .map(crate::value_util::parse_args)
                    .unwrap_or_else(|| json!({})),
            }}));
        }
    }
    let finish_reason = match choice
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(Value::as_str)
    {
        Some("length") => "MAX_TOKENS",
        Some("content_filter") => "SAFETY",
        _ => "STOP",
    };
    let usage = body.get("usage");
    json!({
        "candidates": [{
            "content": {"parts": parts, "role": "model"},
            "finishReason": finish_reason,
            "index": 0,
        }],
        "usageMetadata": {
            "promptTokenCount": usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_i64).unwrap_or(0),
            "candidatesTokenCount": usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_i64).unwrap_or(0),
            "totalTokenCount": usage.and_then(|u| u.get("total_tokens")).and_then(Value::as_i64).unwrap_or(0),
        },
        "modelVersion": ctx.model,
    })
}

fn responses_to_openai(ctx: &StreamContext, body: &Value) -> Value {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    if let Some(output) = body.get("output").and_then(Value::as_array) {
        for item in output {
            match str_field(item, "type") {
                Some("message") => {
                    if let Some(parts) = item.get("content").and_then(Value::as_array) {
                        for part in parts {
                            if str_field(part, "type") == Some("output_text") {
                                content.push_str(str_field(part, "text").unwrap_or_default());
                            }
                        }
                    }
                }
                Some("function_call") => tool_calls.push(json!({
                    "id": str_field(item, "call_id").unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": str_field(item, "name").unwrap_or_default(),
                        "arguments": str_field(item, "arguments").unwrap_or("{}"),
                    },
                })),
                _ => {}
            }
        }
    }
    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else if str_field(body, "status") == Some("incomplete") {
        "length"
    } else {
        "stop"
    };
    let usage = body.get("usage");
    let prompt = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    chat_completion(
        ctx,
        str_field(body, "id").unwrap_or(&ctx.response_id),
        content,
        tool_calls,
        finish_reason,
        json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        }),
    )
}

fn openai_to_responses(ctx: &StreamContext, body: &Value) -> Value {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());
    let message = choice.and_then(|choice| choice.get("message"));
    let mut output = Vec::new();
    if let Some(text) = message
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        && !text.is_empty()
    {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{}", ctx.response_id),
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text, "annotations": []}],
        }));
    }
    if let Some(calls) = message
        .and_then(|message| message.get("tool_calls"))
        .and_then(Value::as_array)
    {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or_default();
            output.push(json!({
                "type": "function_call",
                "id": format!("fc_{}", str_field(call, "id").unwrap_or_default()),
                "call_id": str_field(call, "id").unwrap_or_default(),
                "name": str_field(&function, "name").unwrap_or_default(),
                "arguments": str_field(&function, "arguments").unwrap_or("{}"),
                "status": "completed",
            }));
        }
    }
    let usage = body.get("usage");
    let prompt = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let mut response = json!({
        "id": ctx.response_id,
        "object": "response",
        "created_at": ctx.created,
        "status": "completed",
        "model": ctx.model,
        "output": output,
        "usage": {
            "input_tokens": prompt,
            "output_tokens": completion,
            "total_tokens": prompt + completion,
        },
    });
    if let Some(instructions) = ctx.instructions.as_deref()
        && let Some(obj) = response.as_object_mut()
    {
        obj.insert(
            "instructions".to_string(),
            Value::String(instructions.to_string()),
        );
    }
    response
}

fn responses_to_gemini(ctx: &StreamContext, body: &Value) -> Value {
    let chat = responses_to_openai(ctx, body);
    openai_to_gemini(ctx, &chat)
}

fn grok_to_openai(ctx: &StreamContext, body: &Value) -> Value {
    let message = body
        .get("result")
        .and_then(|result| result.get("response"))
        .and_then(|response| response.get("modelResponse"))
        .and_then(|model_response| model_response.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    chat_completion(
        ctx,
        &ctx.response_id,
        message.to_string(),
        Vec::new(),
        "stop",
        json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}),
    )
}
