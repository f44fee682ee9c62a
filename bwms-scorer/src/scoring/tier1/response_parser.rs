// Tier 1: Judge Response Parser
//
// Concept: Normalize a judge's completion text into a `JudgeVerdict`
// Shared by every provider adapter; provider shapes are unwrapped before this point.
//
// Chain: strip code fences → JSON → outermost {...} → regex salvage → Malformed

use crate::scoring::types::{Bucket, BucketTable, Confidence, JudgeError, JudgeVerdict, RejectionReason};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static SALVAGE_BUCKET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?bucket"?\s*[:=]\s*"?([A-Za-z]+)"#).expect("static regex")
});

static SALVAGE_SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?score"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#).expect("static regex")
});

static SALVAGE_CONFIDENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?confidence"?\s*[:=]\s*"?([A-Za-z]+)"#).expect("static regex")
});

/// Parse raw completion text into a verdict
pub fn parse_judge_response(raw: &str, buckets: &BucketTable) -> Result<JudgeVerdict, JudgeError> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Err(JudgeError::Malformed("empty completion".to_string()));
    }

    if let Some(object) = parse_object(text) {
        return verdict_from_object(&object, buckets);
    }

    salvage(text, buckets)
}

/// Remove a surrounding ```json ... ``` fence if present
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) {
        return Some(object);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn verdict_from_object(object: &Map<String, Value>, buckets: &BucketTable) -> Result<JudgeVerdict, JudgeError> {
    let rationale = string_field(object, &["rationale", "reasoning", "explanation"]).unwrap_or_default();

    let rejection = string_field(object, &["rejection", "rejectionReason", "rejection_reason"]);
    let scoreable = object
        .get("scoreable")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let rejected_flag = object.get("rejected").and_then(Value::as_bool).unwrap_or(false);

    if !scoreable || rejected_flag || rejection.is_some() {
        let raw_reason = rejection.ok_or_else(|| {
            JudgeError::Malformed("rejection without a reason".to_string())
        })?;
        let reason = RejectionReason::from_label(&raw_reason).ok_or_else(|| {
            JudgeError::Malformed(format!("unknown rejection reason: {}", raw_reason))
        })?;
        return Ok(JudgeVerdict::Rejected { reason, rationale });
    }

    let raw_bucket = string_field(object, &["bucket"])
        .ok_or_else(|| JudgeError::Malformed("missing bucket".to_string()))?;
    let score = object
        .get("score")
        .and_then(number_value)
        .ok_or_else(|| JudgeError::Malformed("missing or non-numeric score".to_string()))?;
    let confidence = string_field(object, &["confidence"])
        .and_then(|c| Confidence::from_label(&c))
        .unwrap_or(Confidence::Low);
    let key_quote = string_field(object, &["keyQuote", "key_quote", "quote"]);

    build_scored(&raw_bucket, score, confidence, rationale, key_quote, buckets)
}

fn salvage(text: &str, buckets: &BucketTable) -> Result<JudgeVerdict, JudgeError> {
    let bucket = SALVAGE_BUCKET_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let score = SALVAGE_SCORE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    match (bucket, score) {
        (Some(bucket), Some(score)) => {
            let confidence = SALVAGE_CONFIDENCE_RE
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| Confidence::from_label(m.as_str()))
                .unwrap_or(Confidence::Low);
            tracing::debug!(bucket = %bucket, score, "Salvaged verdict from unstructured completion");
            build_scored(
                &bucket,
                score,
                confidence,
                "(salvaged from unstructured output)".to_string(),
                None,
                buckets,
            )
        }
        _ => Err(JudgeError::Malformed(format!(
            "no verdict found in completion: {}",
            preview(text)
        ))),
    }
}

fn build_scored(
    raw_bucket: &str,
    score: f64,
    confidence: Confidence,
    rationale: String,
    key_quote: Option<String>,
    buckets: &BucketTable,
) -> Result<JudgeVerdict, JudgeError> {
    let bucket = Bucket::from_label(raw_bucket)
        .ok_or_else(|| JudgeError::Malformed(format!("unknown bucket: {}", raw_bucket)))?;

    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(JudgeError::Malformed(format!("score {} outside 0-100", score)));
    }

    let clamped_score = buckets.clamp_to(bucket, score);
    let clamped = clamped_score != score;
    if clamped {
        tracing::debug!(%bucket, score, clamped_score, "Judge score outside its bucket range, clamped");
    }

    Ok(JudgeVerdict::Scored {
        bucket,
        score: clamped_score,
        confidence,
        rationale,
        key_quote,
        clamped,
    })
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null") && !s.eq_ignore_ascii_case("none"))
        .map(str::to_string)
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        out.push('…');
    }
    out
}
