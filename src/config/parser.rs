//! Configuration file parser.
//!
//! Accepts `section.key = value` lines, or bare `key = value` lines below a
//! `[section]` header. Values may be quoted; `#` starts a comment.

use super::types::*;
use crate::common::now_ts_ms;
use std::{fs, io};

/// Load configuration from a file path.
pub fn load_config(path: &str) -> io::Result<Config> {
    let s = fs::read_to_string(path)?;
    parse_config(&s)
}

/// Parse configuration from a string.
pub fn parse_config(s: &str) -> io::Result<Config> {
    let mut cfg = Config::default();
    let mut current = String::new();

    for (lineno, line) in s.lines().enumerate() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        let bad = |msg: String| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line {}: {}", lineno + 1, msg),
            )
        };

        if let Some(header) = line.strip_prefix('[') {
            let Some(name) = header.strip_suffix(']') else {
                return Err(bad(format!("unterminated section header {line}")));
            };
            current = name.trim().to_string();
            continue;
        }

        let Some((lhs, rhs)) = line.split_once('=') else {
            return Err(bad(format!("expected key = value, got {line}")));
        };
        let lhs = lhs.trim();
        let val = rhs.trim();

        let (section, key) = match lhs.split_once('.') {
            Some((a, b)) => (a.trim(), b.trim()),
            None => (current.as_str(), lhs),
        };

        set_config_value(section, key, val, &mut cfg).map_err(bad)?;
    }

    Ok(cfg)
}

/// Drop a trailing `#` comment that is not inside a quoted value.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Set a configuration value based on section, key, and value strings.
fn set_config_value(section: &str, key: &str, val: &str, cfg: &mut Config) -> Result<(), String> {
    macro_rules! parse {
        (s) => {
            val.trim_matches('"').to_string()
        };
        (u) => {
            val.parse::<u64>().map_err(|e| format!("{key}: {e}"))?
        };
        (i) => {
            val.parse::<i64>().map_err(|e| format!("{key}: {e}"))?
        };
        (usize_) => {
            val.parse::<usize>().map_err(|e| format!("{key}: {e}"))?
        };
    }

    match (section, key) {
        ("server", "listen") => cfg.server.listen = parse!(s),

        ("limits", "sniff_timeout_ms") => cfg.limits.sniff_timeout_ms = parse!(u),
        ("limits", "sniff_max_bytes") => cfg.limits.sniff_max_bytes = parse!(usize_),
        ("limits", "handoff_capacity") => {
            let v = parse!(usize_);
            if v == 0 {
                return Err("handoff_capacity must be at least 1".into());
            }
            cfg.limits.handoff_capacity = v;
        }
        ("limits", "text_read_buffer") => {
            let v = parse!(usize_);
            if v < 4 {
                return Err("text_read_buffer must be at least 4".into());
            }
            cfg.limits.text_read_buffer = v;
        }
        ("limits", "text_read_timeout_ms") => cfg.limits.text_read_timeout_ms = parse!(u),
        ("limits", "http_shutdown_grace_ms") => cfg.limits.http_shutdown_grace_ms = parse!(u),

        ("snowflake", "epoch_ms") => {
            let v = parse!(i);
            if v < 0 {
                return Err("epoch_ms must not be negative".into());
            }
            if v > now_ts_ms() {
                return Err("epoch_ms lies in the future".into());
            }
            cfg.snowflake.epoch_ms = v;
        }

        _ => return Err(format!("unknown key {section}.{key}")),
    }

    Ok(())
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &str) -> io::Result<Self> {
        load_config(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.server.listen, "localhost:8199");
        assert_eq!(cfg.limits.handoff_capacity, 16);
        assert_eq!(cfg.limits.text_read_buffer, 1024);
        assert_eq!(cfg.limits.http_shutdown_grace_ms, 5000);
        assert_eq!(cfg.snowflake.epoch_ms, 1_288_834_974_657);
    }

    #[test]
    fn dotted_and_sectioned_keys() {
        let cfg = parse_config(
            r#"
# listening socket
server.listen = "0.0.0.0:9000"   # all interfaces

[limits]
sniff_timeout_ms = 250
handoff_capacity = 4
snowflake.epoch_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.listen, "0.0.0.0:9000");
        assert_eq!(cfg.limits.sniff_timeout_ms, 250);
        assert_eq!(cfg.limits.handoff_capacity, 4);
        assert_eq!(cfg.snowflake.epoch_ms, 0);
    }

    #[test]
    fn hash_inside_quotes_is_kept() {
        let cfg = parse_config("server.listen = \"host#1:80\"").unwrap();
        assert_eq!(cfg.server.listen, "host#1:80");
    }

    #[test]
    fn unknown_key_reports_line() {
        let err = parse_config("\n\nlimits.bogus = 1").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().starts_with("line 3:"), "{err}");
    }

    #[test]
    fn bad_values_rejected() {
        assert!(parse_config("limits.sniff_max_bytes = lots").is_err());
        assert!(parse_config("limits.handoff_capacity = 0").is_err());
        assert!(parse_config("limits.text_read_buffer = 2").is_err());
        assert!(parse_config("[limits").is_err());
        assert!(parse_config("just words").is_err());
    }

    #[test]
    fn epoch_must_lie_between_unix_epoch_and_now() {
        assert!(parse_config("snowflake.epoch_ms = -1").is_err());
        assert!(parse_config("snowflake.epoch_ms = -9223372036854775808").is_err());
        assert!(parse_config("snowflake.epoch_ms = 9223372036854775807").is_err());
        let cfg = parse_config("snowflake.epoch_ms = 1420070400000").unwrap();
        assert_eq!(cfg.snowflake.epoch_ms, 1_420_070_400_000);
    }
}
