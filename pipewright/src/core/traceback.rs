//! Structured fault extraction from Python tracebacks.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Fault, FaultKind};

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File "(?P<file>[^"]+)", line (?P<line>\d+)"#).expect("frame regex is valid")
});

static EXCEPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_.]*)(?::\s?(?P<message>.*))?$")
        .expect("exception regex is valid")
});

/// Parse the last traceback in `stderr` into a [`Fault`].
///
/// `script_name` is the file name of the candidate program; the reported line
/// is taken from the innermost frame that points into it. Returns `None` when
/// no traceback is present.
pub fn parse_traceback(stderr: &str, script_name: &str) -> Option<Fault> {
    let start = stderr.rfind(TRACEBACK_HEADER)?;
    let body = &stderr[start + TRACEBACK_HEADER.len()..];

    let mut line = None;
    let mut lines = body.lines().skip_while(|l| l.trim().is_empty()).peekable();
    while let Some(next) = lines.peek() {
        if !next.starts_with(' ') && !next.starts_with('\t') {
            break;
        }
        if let Some(caps) = FRAME_RE.captures(next)
            && caps["file"].ends_with(script_name)
        {
            line = caps["line"].parse::<u32>().ok();
        }
        lines.next();
    }

    let header = lines.next()?;
    let caps = EXCEPTION_RE.captures(header.trim_end())?;
    let name = caps["name"].to_string();
    let mut message = caps
        .name("message")
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    for rest in lines {
        message.push('\n');
        message.push_str(rest.trim_end());
    }

    Some(
        Fault::new(FaultKind::Raised { name }, message.trim().to_string()).with_line(line),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_error_with_candidate_line() {
        let stderr = r#"Traceback (most recent call last):
  File "<string>", line 9, in <module>
  File "/tmp/ws/attempt-1/candidate.py", line 14, in <module>
    df = df[df["CCN"].str[2:4] == "13"]
  File "/usr/lib/python3/site-packages/pandas/core/frame.py", line 4102, in __getitem__
    indexer = self.columns.get_loc(key)
KeyError: 'CCN'
"#;
        let fault = parse_traceback(stderr, "candidate.py").expect("fault");
        assert_eq!(
            fault.kind,
            FaultKind::Raised {
                name: "KeyError".to_string()
            }
        );
        assert_eq!(fault.message, "'CCN'");
        assert_eq!(fault.line, Some(14));
        assert_eq!(fault.to_string(), "KeyError: 'CCN'");
    }

    #[test]
    fn parses_syntax_error() {
        let stderr = r#"Traceback (most recent call last):
  File "<string>", line 8, in <module>
  File "/tmp/ws/candidate.py", line 3
    x = = 1
        ^
SyntaxError: invalid syntax
"#;
        let fault = parse_traceback(stderr, "candidate.py").expect("fault");
        assert_eq!(
            fault.kind,
            FaultKind::Raised {
                name: "SyntaxError".to_string()
            }
        );
        assert_eq!(fault.line, Some(3));
        assert_eq!(fault.message, "invalid syntax");
    }

    #[test]
    fn uses_last_traceback_of_a_chain() {
        let stderr = r#"Traceback (most recent call last):
  File "/tmp/candidate.py", line 2, in <module>
ValueError: first

During handling of the above exception, another exception occurred:

Traceback (most recent call last):
  File "/tmp/candidate.py", line 5, in <module>
RuntimeError: second
"#;
        let fault = parse_traceback(stderr, "candidate.py").expect("fault");
        assert_eq!(fault.to_string(), "RuntimeError: second");
        assert_eq!(fault.line, Some(5));
    }

    #[test]
    fn keeps_multiline_messages_and_bare_names() {
        let stderr = "Traceback (most recent call last):\n  File \"x.py\", line 1, in <module>\npandas.errors.MergeError: keys overlap\nleft: CCN\n";
        let fault = parse_traceback(stderr, "candidate.py").expect("fault");
        assert_eq!(fault.line, None);
        assert_eq!(fault.message, "keys overlap\nleft: CCN");

        let bare = "Traceback (most recent call last):\n  File \"candidate.py\", line 4, in <module>\nKeyboardInterrupt\n";
        let fault = parse_traceback(bare, "candidate.py").expect("fault");
        assert_eq!(
            fault.kind,
            FaultKind::Raised {
                name: "KeyboardInterrupt".to_string()
            }
        );
        assert!(fault.message.is_empty());
    }

    #[test]
    fn returns_none_without_traceback() {
        assert!(parse_traceback("Segmentation fault", "candidate.py").is_none());
        assert!(parse_traceback("", "candidate.py").is_none());
    }
}
