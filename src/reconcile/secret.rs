//! Secret shape checks, masking, and YAML-safe rendering.

use serde_yaml::Value;

/// Minimum length for a non-UUID secret to look deliberate.
pub const MIN_SECRET_LEN: usize = 16;

/// How a candidate secret looks before it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    /// Empty or whitespace only; always rejected
    Empty,
    /// Still the template's placeholder literal; always rejected
    Placeholder,
    /// Usable, but neither UUID-shaped nor long; needs extra confirmation
    Weak,
    /// UUID-shaped or at least [`MIN_SECRET_LEN`] characters
    Valid,
}

impl SecretCheck {
    /// Whether the value may be written at all (possibly after confirmation).
    pub fn is_acceptable(&self) -> bool {
        matches!(self, SecretCheck::Weak | SecretCheck::Valid)
    }
}

/// Classify a candidate secret against the placeholder and the shape rule.
pub fn classify_secret(secret: &str, placeholder: &str) -> SecretCheck {
    let secret = secret.trim();
    if secret.is_empty() {
        return SecretCheck::Empty;
    }
    if secret == placeholder {
        return SecretCheck::Placeholder;
    }
    if looks_like_uuid(secret) || secret.chars().count() >= MIN_SECRET_LEN {
        SecretCheck::Valid
    } else {
        SecretCheck::Weak
    }
}

/// Loose UUID shape: hyphenated, simple, braced, or URN forms.
pub fn looks_like_uuid(s: &str) -> bool {
    uuid::Uuid::try_parse(s).is_ok()
}

/// Short preview safe to show an operator or write to a log.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=4 => "****".to_string(),
        5..=12 => format!("{}...", chars[..2].iter().collect::<String>()),
        n => format!(
            "{}...{}",
            chars[..4].iter().collect::<String>(),
            chars[n - 4..].iter().collect::<String>()
        ),
    }
}

/// Render `value` so that `key: <rendered>` parses back to exactly `value`.
///
/// Plain style is kept when it round-trips; anything YAML would read as a
/// number, bool, null, comment, or nested structure is single-quoted.
pub fn yaml_scalar(value: &str) -> String {
    if !value.is_empty() && !value.contains(['\n', '\r']) && plain_round_trips(value) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "''"))
}

fn plain_round_trips(value: &str) -> bool {
    let probe = format!("k: {}", value);
    match serde_yaml::from_str::<Value>(&probe) {
        Ok(Value::Mapping(map)) => {
            map.len() == 1 && map.get("k") == Some(&Value::String(value.to_string()))
        }
        _ => false,
    }
}
