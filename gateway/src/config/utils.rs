use std::env;
use std::str::FromStr;

/// Read an environment variable, treating empty values as unset.
pub fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional environment variable into `T`.
///
/// Unset variables yield `Ok(None)`; malformed values are an error naming
/// the variable.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: '{raw}' ({e})")),
        None => Ok(None),
    }
}

/// Parse a boolean flag accepting the usual spellings.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn env_bool(key: &str) -> Result<Option<bool>, String> {
    match env_string(key) {
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid boolean for {key}: '{raw}'")),
        None => Ok(None),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("goodbye, have a great day ,,"),
            vec!["goodbye".to_string(), "have a great day".to_string()]
        );
        assert!(parse_list("").is_empty());
    }
}
