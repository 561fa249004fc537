//! GRBL Response Parser
//!
//! Classifies the lines GRBL sends back for a command. Every transaction is a
//! run of data lines closed by exactly one terminator, `ok` or `error:<n>`.
//! Status reports (`<...>`) and bracketed reports (`[...]`) are data lines whose
//! delimiters are stripped by [`unwrap_angled`] and [`unwrap_bracketed`].

use grblink_core::ControllerError;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error_decoder;

/// Classification of one received line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    /// `ok` terminator
    Ok,
    /// `error:<n>` terminator
    Error {
        /// Numeric code, `0` when none could be parsed
        code: u32,
        /// Text from the error table
        message: String,
    },
    /// Any other line
    Data(String),
}

impl LineKind {
    /// True for `ok` and `error:<n>`
    pub fn is_terminator(&self) -> bool {
        !matches!(self, LineKind::Data(_))
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error { code, message } => write!(f, "error:{} - {}", code, message),
            Self::Data(line) => write!(f, "{}", line),
        }
    }
}

/// Classify a line; `line` is expected to be trimmed already
pub fn classify_line(line: &str) -> LineKind {
    if line == "ok" {
        return LineKind::Ok;
    }

    if let Some(rest) = line.strip_prefix("error") {
        let code = rest
            .strip_prefix(':')
            .and_then(|c| c.trim().parse::<u32>().ok());
        return match code {
            Some(code) => LineKind::Error {
                code,
                message: error_decoder::describe_error(code).to_string(),
            },
            None => LineKind::Error {
                code: 0,
                message: error_decoder::UNKNOWN_ERROR.to_string(),
            },
        };
    }

    LineKind::Data(line.to_string())
}

/// Strip `[` and `]` from a bracketed report line
pub fn unwrap_bracketed(line: &str) -> Result<&str, ControllerError> {
    line.strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .ok_or_else(|| ControllerError::malformed(line, "expected a [...] report"))
}

/// Strip `<` and `>` from a status report line
pub fn unwrap_angled(line: &str) -> Result<&str, ControllerError> {
    line.strip_prefix('<')
        .and_then(|l| l.strip_suffix('>'))
        .ok_or_else(|| ControllerError::malformed(line, "expected a <...> status report"))
}

/// Parse an `ALARM:<n>` line into its code
pub fn parse_alarm(line: &str) -> Option<u32> {
    let upper = line.to_ascii_uppercase();
    let rest = upper.strip_prefix("ALARM")?;
    rest.strip_prefix(':')?.trim().parse().ok()
}

/// Parse a `$n=value` setting line
pub fn parse_setting(line: &str) -> Option<(u16, String)> {
    let (number, value) = line.strip_prefix('$')?.split_once('=')?;
    let number = number.trim().parse::<u16>().ok()?;
    Some((number, value.trim().to_string()))
}
