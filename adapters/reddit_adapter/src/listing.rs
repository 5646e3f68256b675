//! Mapping of Reddit JSON payloads onto core types.

use collector_core::domain::RawPost;
use collector_core::error::SourceError;
use collector_core::ports::Page;
use serde::Deserialize;
use serde_json::Value;

/// Parses a `Listing` body into a page of raw posts.
pub fn parse_listing(body: &str) -> Result<Page, SourceError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| SourceError::Upstream(format!("listing is not valid JSON: {err}")))?;

    let data = value
        .get("data")
        .ok_or_else(|| SourceError::Upstream("listing without `data`".to_string()))?;
    let children = data
        .get("children")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Upstream("listing without `data.children`".to_string()))?;

    let items = children
        .iter()
        .map(|child| map_post(child.get("data").unwrap_or(&Value::Null)))
        .collect();
    let after = data
        .get("after")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string);

    Ok(Page { items, after })
}

/// Maps one `t3` payload. Fields of the wrong type come back as `None`.
pub fn map_post(item: &Value) -> RawPost {
    RawPost {
        id: string_field(item, "id"),
        created_at: integer_field(item, "created_utc"),
        title: string_field(item, "title"),
        body: string_field(item, "selftext"),
        score: integer_field(item, "score"),
        num_comments: integer_field(item, "num_comments"),
        author: string_field(item, "author"),
        url: string_field(item, "url"),
        over_18: bool_field(item, "over_18"),
        is_self: bool_field(item, "is_self"),
    }
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reddit sends `created_utc` as a float; some mirrors send numeric strings.
fn integer_field(item: &Value, key: &str) -> Option<i64> {
    match item.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        _ => None,
    }
}

fn truncate(f: f64) -> Option<i64> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

fn bool_field(item: &Value, key: &str) -> Option<bool> {
    item.get(key).and_then(Value::as_bool)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<Value>,
    message: Option<String>,
}

/// Parses the access token endpoint's reply into `(token, expires_in_secs)`.
pub fn parse_token(body: &str) -> Result<(String, u64), SourceError> {
    let reply: TokenResponse = serde_json::from_str(body)
        .map_err(|err| SourceError::Upstream(format!("token reply is not valid JSON: {err}")))?;

    if let Some(error) = reply.error {
        let error = match error {
            Value::String(code) => code,
            other => other.to_string(),
        };
        let detail = reply.message.unwrap_or_default();
        return Err(SourceError::Authentication(
            format!("{error} {detail}").trim().to_string(),
        ));
    }
    match reply.access_token {
        Some(token) if !token.is_empty() => Ok((token, reply.expires_in.unwrap_or(3600))),
        _ => Err(SourceError::Authentication(
            "token reply without access_token".to_string(),
        )),
    }
}
