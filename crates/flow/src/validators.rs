//! Built-in output validators.

use anyi_core::{ExecutorError, StepEnv, StepValidator};
use regex_lite::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::executors::parse_config;

/// Accepts everything.
#[derive(Debug, Default)]
pub struct NoopValidator;

impl StepValidator for NoopValidator {
    fn kind(&self) -> &str {
        "noop"
    }

    fn validate(&self, _output: &str, _env: &StepEnv) -> bool {
        true
    }
}

#[derive(Debug, Default, Deserialize)]
struct JsonConfig {
    #[serde(default)]
    required_keys: Vec<String>,
}

/// Accepts output that parses as JSON, optionally wrapped in a ```json
/// fence. With `required_keys`, the value must be an object holding them.
#[derive(Debug, Default)]
pub struct JsonValidator {
    required_keys: Vec<String>,
}

impl JsonValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: JsonConfig = parse_config("json", config)?;
        Ok(Self {
            required_keys: cfg.required_keys,
        })
    }

    pub fn with_required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Strip a surrounding Markdown code fence, if any.
pub fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = body.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    match body.split_once('\n') {
        Some((_, rest)) => rest.trim(),
        None => body.trim(),
    }
}

impl StepValidator for JsonValidator {
    fn kind(&self) -> &str {
        "json"
    }

    fn validate(&self, output: &str, env: &StepEnv) -> bool {
        let value: serde_json::Value = match serde_json::from_str(strip_code_fence(output)) {
            Ok(v) => v,
            Err(e) => {
                debug!(step = %env.step_name, error = %e, "Output is not valid JSON");
                return false;
            }
        };

        if self.required_keys.is_empty() {
            return true;
        }

        match value.as_object() {
            Some(obj) => self.required_keys.iter().all(|k| obj.contains_key(k)),
            None => false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StringConfig {
    #[serde(default, alias = "equalTo")]
    equal_to: Option<String>,
    #[serde(default, alias = "matchRegex")]
    match_regex: Option<String>,
    #[serde(default)]
    trim: bool,
}

/// Exact match and/or regular-expression check. Every configured check must
/// hold.
#[derive(Debug, Default)]
pub struct StringValidator {
    equal_to: Option<String>,
    match_regex: Option<Regex>,
    trim: bool,
}

impl StringValidator {
    pub fn equal_to(expected: impl Into<String>) -> Self {
        Self {
            equal_to: Some(expected.into()),
            ..Self::default()
        }
    }

    pub fn matching(pattern: &str) -> Result<Self, ExecutorError> {
        Ok(Self {
            match_regex: Some(compile("string", pattern)?),
            ..Self::default()
        })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        let cfg: StringConfig = parse_config("string", config)?;
        if cfg.equal_to.is_none() && cfg.match_regex.is_none() {
            return Err(ExecutorError::InvalidConfig {
                kind: "string".into(),
                reason: "needs equal_to or match_regex".into(),
            });
        }
        Ok(Self {
            equal_to: cfg.equal_to,
            match_regex: cfg
                .match_regex
                .as_deref()
                .map(|p| compile("string", p))
                .transpose()?,
            trim: cfg.trim,
        })
    }

    /// Compare against the output with surrounding whitespace removed.
    pub fn trimmed(mut self) -> Self {
        self.trim = true;
        self
    }
}

fn compile(kind: &str, pattern: &str) -> Result<Regex, ExecutorError> {
    Regex::new(pattern).map_err(|e| ExecutorError::InvalidConfig {
        kind: kind.to_string(),
        reason: format!("invalid regex '{pattern}': {e}"),
    })
}

impl StepValidator for StringValidator {
    fn kind(&self) -> &str {
        "string"
    }

    fn validate(&self, output: &str, _env: &StepEnv) -> bool {
        let output = if self.trim { output.trim() } else { output };
        if let Some(expected) = &self.equal_to {
            if output != expected {
                return false;
            }
        }
        if let Some(re) = &self.match_regex {
            if !re.is_match(output) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> StepEnv {
        StepEnv::new("check", None)
    }

    #[test]
    fn noop_accepts_anything() {
        assert!(NoopValidator.validate("", &env()));
        assert!(NoopValidator.validate("whatever", &env()));
    }

    #[test]
    fn json_accepts_plain_and_fenced() {
        let v = JsonValidator::new();
        assert!(v.validate(r#"{"a": 1}"#, &env()));
        assert!(v.validate("```json\n{\"a\": 1}\n```", &env()));
        assert!(v.validate("```\n[1, 2]\n```", &env()));
        assert!(!v.validate("not json", &env()));
        assert!(!v.validate("```json\n{broken\n```", &env()));
    }

    #[test]
    fn json_required_keys() {
        let v =
            JsonValidator::from_config(&serde_json::json!({"required_keys": ["title", "score"]}))
                .unwrap();
        assert!(v.validate(r#"{"title": "x", "score": 1, "extra": true}"#, &env()));
        assert!(!v.validate(r#"{"title": "x"}"#, &env()));
        assert!(!v.validate("[1]", &env()));
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("  {}  "), "{}");
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```{}```"), "{}");
        assert_eq!(strip_code_fence("```json\n{}"), "```json\n{}");
    }

    #[test]
    fn string_equal_to() {
        let v = StringValidator::equal_to("6");
        assert!(v.validate("6", &env()));
        assert!(!v.validate("6\n", &env()));
        assert!(v.trimmed().validate("6\n", &env()));
    }

    #[test]
    fn string_regex_and_both() {
        let v = StringValidator::matching(r"^\d+$").unwrap();
        assert!(v.validate("123", &env()));
        assert!(!v.validate("12a", &env()));

        let both = StringValidator::from_config(&serde_json::json!({
            "equal_to": "42",
            "match_regex": r"^\d+$"
        }))
        .unwrap();
        assert!(both.validate("42", &env()));
        assert!(!both.validate("43", &env()));
    }

    #[test]
    fn string_config_errors() {
        assert!(StringValidator::from_config(&serde_json::json!({})).is_err());
        let err = StringValidator::from_config(&serde_json::json!({"match_regex": "("}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("invalid regex"));
    }
}
