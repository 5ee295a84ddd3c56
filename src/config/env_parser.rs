//! Environment variable parsing utilities for configuration.

use crate::errors::Error;
use std::path::PathBuf;
use std::str::FromStr;

use super::paths;

/// Parse environment variable value or return error if empty/whitespace.
pub fn parse_env_string(name: &str, value: &str) -> Result<String, Error> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} cannot be empty")));
    }
    Ok(value.to_string())
}

/// Parse environment variable as a path, expanding tilde.
pub fn parse_env_path(name: &str, value: &str) -> Result<PathBuf, Error> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} cannot be empty")));
    }
    Ok(paths::expand_tilde_path(&PathBuf::from(value)))
}

/// Parse environment variable as a number. Range checks happen in validation.
pub fn parse_env_number<T>(name: &str, value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} cannot be empty")));
    }
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {name} value: {e}")))
}

/// `1/true/yes/on` or `0/false/no/off`, case-insensitive.
pub fn parse_env_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("Invalid {name} value: {other}"))),
    }
}

/// Comma-separated list; blank entries are dropped. An empty value clears the list.
pub fn parse_env_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read `name` and parse it when set.
pub fn read_env<T>(
    name: &str,
    parse: impl FnOnce(&str, &str) -> Result<T, Error>,
) -> Result<Option<T>, Error> {
    match std::env::var(name) {
        Ok(val) => parse(name, &val).map(Some),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_string_empty() {
        let result = parse_env_string("TEST_VAR", "");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_env_string_whitespace() {
        let result = parse_env_string("TEST_VAR", "   ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_env_number() {
        assert_eq!(parse_env_number::<u64>("N", " 250 ").unwrap(), 250);
        assert!(matches!(
            parse_env_number::<u32>("N", "-1"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_env_number::<usize>("N", "lots"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("B", "Yes").unwrap());
        assert!(!parse_env_bool("B", "0").unwrap());
        assert!(matches!(parse_env_bool("B", "maybe"), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_env_list() {
        assert_eq!(
            parse_env_list(" a/* , ,*.pem"),
            vec!["a/*".to_string(), "*.pem".to_string()]
        );
        assert!(parse_env_list("").is_empty());
    }
}
