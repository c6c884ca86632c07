//! Navigation scripts for the `folio` simulator.
//!
//! A script is a list of steps separated by commas or whitespace. `#` starts
//! a comment that runs to the end of the line.
//!
//! | Token | Step |
//! |-------|------|
//! | `7` | Enter window 7 |
//! | `3..6` | Enter 3, 4, 5, 6 in turn (descending ranges walk backward) |
//! | `fwd` / `back` | Shift the buffer directly |
//! | `font=900` | Re-paginate at 900 characters per page, keeping the position |
//! | `capture=2` | Capture the reading position at page 2 of the active window |
//!
//! ```ignore
//! let steps = parse_script("0..3, capture=1, font=600  # zoom in")?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::WindowIndex;
use crate::window::ShiftDirection;

/// One scripted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Report entry into a window.
    Enter(WindowIndex),
    /// Shift the buffer without an entry event.
    Shift(ShiftDirection),
    /// Change the layout to this many characters per page.
    Font(usize),
    /// Capture the reading position at this page of the active window.
    Capture(usize),
}

/// Errors from reading or parsing a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script step `{token}`: {reason}")]
    InvalidStep { token: String, reason: String },
}

impl ScriptError {
    fn invalid(token: &str, reason: impl Into<String>) -> Self {
        Self::InvalidStep {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a script into steps. An empty script yields no steps.
pub fn parse_script(source: &str) -> Result<Vec<ScriptStep>, ScriptError> {
    let mut steps = Vec::new();
    for line in source.lines() {
        let code = line.split('#').next().unwrap_or_default();
        for token in code
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            parse_token(token, &mut steps)?;
        }
    }
    Ok(steps)
}

/// Read and parse a script file.
pub fn load_script(path: impl AsRef<Path>) -> Result<Vec<ScriptStep>, ScriptError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_script(&source)
}

fn parse_token(token: &str, steps: &mut Vec<ScriptStep>) -> Result<(), ScriptError> {
    if let Some((key, value)) = token.split_once('=') {
        let value = parse_number(token, value)?;
        let step = match key {
            "font" if value == 0 => {
                return Err(ScriptError::invalid(token, "page size must be positive"));
            }
            "font" => ScriptStep::Font(value),
            "capture" => ScriptStep::Capture(value),
            _ => return Err(ScriptError::invalid(token, format!("unknown setting `{key}`"))),
        };
        steps.push(step);
        return Ok(());
    }

    if let Some((from, to)) = token.split_once("..") {
        let from = parse_number(token, from)?;
        let to = parse_number(token, to)?;
        if from <= to {
            steps.extend((from..=to).map(ScriptStep::Enter));
        } else {
            steps.extend((to..=from).rev().map(ScriptStep::Enter));
        }
        return Ok(());
    }

    let step = match token {
        "fwd" => ScriptStep::Shift(ShiftDirection::Forward),
        "back" => ScriptStep::Shift(ShiftDirection::Backward),
        _ => ScriptStep::Enter(parse_number(token, token)?),
    };
    steps.push(step);
    Ok(())
}

fn parse_number(token: &str, text: &str) -> Result<usize, ScriptError> {
    text.trim()
        .parse()
        .map_err(|_| ScriptError::invalid(token, format!("`{text}` is not a window or page number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_entries_and_settings() {
        let steps = parse_script("2,3 4, font=900,capture=1").unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep::Enter(2),
                ScriptStep::Enter(3),
                ScriptStep::Enter(4),
                ScriptStep::Font(900),
                ScriptStep::Capture(1),
            ]
        );
    }

    #[test]
    fn ranges_expand_in_both_directions() {
        assert_eq!(
            parse_script("3..5").unwrap(),
            vec![
                ScriptStep::Enter(3),
                ScriptStep::Enter(4),
                ScriptStep::Enter(5)
            ]
        );
        assert_eq!(
            parse_script("5..4").unwrap(),
            vec![ScriptStep::Enter(5), ScriptStep::Enter(4)]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let steps = parse_script("# open\n\n2, 3  # steady\nfwd\nback\n").unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep::Enter(2),
                ScriptStep::Enter(3),
                ScriptStep::Shift(ShiftDirection::Forward),
                ScriptStep::Shift(ShiftDirection::Backward),
            ]
        );
        assert!(parse_script("").unwrap().is_empty());
    }

    #[test]
    fn bad_tokens_are_reported() {
        let err = parse_script("2, soon").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid script step `soon`: `soon` is not a window or page number"
        );
        assert!(parse_script("zoom=3").is_err());
        assert!(parse_script("font=0").is_err());
        assert!(parse_script("-1").is_err());
    }

    #[test]
    fn loads_scripts_from_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0..2 # warm up").unwrap();
        writeln!(file, "capture=3").unwrap();
        let steps = load_script(file.path()).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[3], ScriptStep::Capture(3));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_script(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, ScriptError::Io { .. }));
    }
}
