//! Log line wire format.
//!
//! Every record is one UTF-8 line of `|`-separated tokens:
//!
//! ```text
//! type|version|logtime|field1|field2|...|fieldN
//! ```
//!
//! `version` is the model version and `logtime` is Unix seconds. The number
//! of trailing fields is checked against the model later, not here.

use crate::month::MonthKey;
use thiserror::Error;

/// Separator between tokens of a log line.
pub const FIELD_DELIMITER: char = '|';

/// Reasons a raw line cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("empty line")]
    Empty,

    #[error("expected at least 3 tokens, got {0}")]
    TooFewTokens(usize),

    #[error("version is not an integer: {0:?}")]
    InvalidVersion(String),

    #[error("logtime is not a Unix timestamp: {0:?}")]
    InvalidLogtime(String),
}

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub log_type: String,
    pub version: i32,
    pub logtime: i64,
    /// Calendar month of `logtime`.
    pub month: MonthKey,
    /// Declared-field values, in order.
    pub values: Vec<String>,
}

impl LogLine {
    /// Parse one raw line. Surrounding whitespace (including the line
    /// terminator) is ignored.
    pub fn parse(raw: &str) -> Result<Self, LineError> {
        let line = raw.trim();
        if line.is_empty() {
            return Err(LineError::Empty);
        }
        let mut tokens = line.split(FIELD_DELIMITER);
        let (log_type, version, logtime) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(t), Some(v), Some(l)) => (t, v, l),
            _ => return Err(LineError::TooFewTokens(line.split(FIELD_DELIMITER).count())),
        };

        let version: i32 = version
            .trim()
            .parse()
            .map_err(|_| LineError::InvalidVersion(version.to_string()))?;
        let logtime_secs: i64 = logtime
            .trim()
            .parse()
            .map_err(|_| LineError::InvalidLogtime(logtime.to_string()))?;
        let month = MonthKey::from_logtime(logtime_secs)
            .ok_or_else(|| LineError::InvalidLogtime(logtime.to_string()))?;

        Ok(LogLine {
            log_type: log_type.to_string(),
            version,
            logtime: logtime_secs,
            month,
            values: tokens.map(str::to_string).collect(),
        })
    }

    /// Registry key for this line: `type + "v" + version`.
    pub fn versioned_name(&self) -> String {
        format!("{}v{}", self.log_type, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kill_line() {
        let line = LogLine::parse("kill|1|1700000000|alice|bob\n").unwrap();
        assert_eq!(line.log_type, "kill");
        assert_eq!(line.version, 1);
        assert_eq!(line.logtime, 1_700_000_000);
        assert_eq!(line.month.as_u32(), 202311);
        assert_eq!(line.values, vec!["alice", "bob"]);
        assert_eq!(line.versioned_name(), "killv1");
    }

    #[test]
    fn keeps_empty_values() {
        let line = LogLine::parse("chat|2|1700000000||hello|").unwrap();
        assert_eq!(line.values, vec!["", "hello", ""]);
    }

    #[test]
    fn header_only_line_has_no_values() {
        let line = LogLine::parse("login|1|1700000000").unwrap();
        assert!(line.values.is_empty());
    }

    #[test]
    fn rejects_blank_and_short_lines() {
        assert_eq!(LogLine::parse("   \r\n"), Err(LineError::Empty));
        assert_eq!(LogLine::parse("kill|1"), Err(LineError::TooFewTokens(2)));
    }

    #[test]
    fn rejects_non_numeric_header() {
        assert!(matches!(
            LogLine::parse("kill|one|1700000000|a|b"),
            Err(LineError::InvalidVersion(_))
        ));
        assert!(matches!(
            LogLine::parse("kill|1|yesterday|a|b"),
            Err(LineError::InvalidLogtime(_))
        ));
    }

    #[test]
    fn rejects_logtime_outside_calendar_range() {
        assert_eq!(
            LogLine::parse("kill|1|-100000000000|a|b"),
            Err(LineError::InvalidLogtime("-100000000000".to_string()))
        );
        assert!(matches!(
            LogLine::parse("kill|1|9223372036854775807|a|b"),
            Err(LineError::InvalidLogtime(_))
        ));
    }
}
