//! REPL command parsing

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the value at a path, or the whole document
    Get { path: Option<String> },
    Set { path: String, value: Value },
    /// Insert text at a character offset
    Insert { path: String, pos: usize, text: String },
    /// Remove the characters in `[from, to)`
    Remove { path: String, from: usize, to: usize },
    Create { path: String, value: Value },
    Delete { path: String },
    /// Move the focus, optionally selecting `[anchor, head]`
    Focus {
        path: Option<String>,
        selection: Option<(usize, usize)>,
    },
    Who,
    Comments,
    Status,
    Reconnect,
    Help,
    Clear,
    Quit,
}

/// Values are JSON when they parse as JSON, plain strings otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_offset(raw: Option<&str>, name: &str) -> Result<usize> {
    let raw = raw.with_context(|| format!("missing {}", name))?;
    raw.parse()
        .with_context(|| format!("{} must be a number, got '{}'", name, raw))
}

fn required<'a>(raw: Option<&'a str>, name: &str) -> Result<&'a str> {
    match raw {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("missing {}", name),
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim_start();

        let command = match name.to_lowercase().as_str() {
            "get" => Command::Get {
                path: (!rest.is_empty()).then(|| rest.to_string()),
            },
            "set" | "create" => {
                let (path, raw) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let path = required(Some(path), "path")?.to_string();
                let value = parse_value(required(Some(raw.trim_start()), "value")?);
                if name.eq_ignore_ascii_case("set") {
                    Command::Set { path, value }
                } else {
                    Command::Create { path, value }
                }
            }
            "insert" => {
                let mut parts = rest.splitn(3, char::is_whitespace);
                let path = required(parts.next(), "path")?.to_string();
                let pos = parse_offset(parts.next(), "position")?;
                let text = required(parts.next(), "text")?.to_string();
                Command::Insert { path, pos, text }
            }
            "remove" => {
                let mut parts = rest.split_whitespace();
                let path = required(parts.next(), "path")?.to_string();
                let from = parse_offset(parts.next(), "start")?;
                let to = parse_offset(parts.next(), "end")?;
                if from > to {
                    bail!("start {} is after end {}", from, to);
                }
                Command::Remove { path, from, to }
            }
            "delete" | "del" => Command::Delete {
                path: required(Some(rest), "path")?.to_string(),
            },
            "focus" => {
                let mut parts = rest.split_whitespace();
                let path = parts.next().map(str::to_string);
                let selection = match (parts.next(), parts.next()) {
                    (None, _) => None,
                    (Some(anchor), head) => {
                        let anchor = parse_offset(Some(anchor), "anchor")?;
                        let head = match head {
                            Some(head) => parse_offset(Some(head), "head")?,
                            None => anchor,
                        };
                        Some((anchor, head))
                    }
                };
                Command::Focus { path, selection }
            }
            "who" => Command::Who,
            "comments" => Command::Comments,
            "status" => Command::Status,
            "reconnect" => Command::Reconnect,
            "help" => Command::Help,
            "clear" => Command::Clear,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{}', type 'help' for commands", other),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_get() {
        assert_eq!(Command::parse("get").unwrap(), Command::Get { path: None });
        assert_eq!(
            Command::parse("GET a.b").unwrap(),
            Command::Get {
                path: Some("a.b".into())
            }
        );
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(
            Command::parse("set count 3").unwrap(),
            Command::Set {
                path: "count".into(),
                value: json!(3)
            }
        );
        assert_eq!(
            Command::parse("set title Hello world").unwrap(),
            Command::Set {
                path: "title".into(),
                value: json!("Hello world")
            }
        );
        assert_eq!(
            Command::parse(r#"create list {"id": "x"}"#).unwrap(),
            Command::Create {
                path: "list".into(),
                value: json!({"id": "x"})
            }
        );
        assert!(Command::parse("set title").is_err());
    }

    #[test]
    fn test_parse_text_edits() {
        assert_eq!(
            Command::parse("insert body 4 two words").unwrap(),
            Command::Insert {
                path: "body".into(),
                pos: 4,
                text: "two words".into()
            }
        );
        assert_eq!(
            Command::parse("remove body 1 3").unwrap(),
            Command::Remove {
                path: "body".into(),
                from: 1,
                to: 3
            }
        );
        assert!(Command::parse("remove body 3 1").is_err());
        assert!(Command::parse("insert body x y").is_err());
    }

    #[test]
    fn test_parse_focus() {
        assert_eq!(
            Command::parse("focus").unwrap(),
            Command::Focus {
                path: None,
                selection: None
            }
        );
        assert_eq!(
            Command::parse("focus body 2").unwrap(),
            Command::Focus {
                path: Some("body".into()),
                selection: Some((2, 2))
            }
        );
        assert_eq!(
            Command::parse("focus body 5 1").unwrap(),
            Command::Focus {
                path: Some("body".into()),
                selection: Some((5, 1))
            }
        );
    }

    #[test]
    fn test_unknown_command() {
        assert!(Command::parse("frobnicate").is_err());
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
    }
}
