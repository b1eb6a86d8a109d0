// src/exec/template.rs

//! Command templates and shell-style tokenisation.
//!
//! Templates may reference the changed file:
//!
//! | token           | replaced with                                  |
//! |-----------------|------------------------------------------------|
//! | `$filerelative` | changed path relative to the working directory |
//! | `$file`         | absolute changed path                          |
//! | `$wd`           | working directory                              |
//!
//! Tokens are substituted in that order, every occurrence, before the
//! command line is split into arguments.

use std::path::Path;

use crate::errors::{DevloopError, Result};

const TOKEN_FILE_RELATIVE: &str = "$filerelative";
const TOKEN_FILE: &str = "$file";
const TOKEN_WORKING_DIR: &str = "$wd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    template: String,
}

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute the path tokens for one changed file.
    ///
    /// `$filerelative` is only defined for files under `working_dir`; using
    /// it for any other file is a [`DevloopError::TemplateError`].
    pub fn render(&self, changed: &Path, working_dir: &Path) -> Result<String> {
        let mut out = self.template.clone();

        if out.contains(TOKEN_FILE_RELATIVE) {
            let relative = changed.strip_prefix(working_dir).map_err(|_| {
                DevloopError::TemplateError {
                    path: changed.to_path_buf(),
                    working_dir: working_dir.to_path_buf(),
                }
            })?;
            out = out.replace(TOKEN_FILE_RELATIVE, &relative.to_string_lossy());
        }

        out = out.replace(TOKEN_FILE, &changed.to_string_lossy());
        out = out.replace(TOKEN_WORKING_DIR, &working_dir.to_string_lossy());
        Ok(out)
    }
}

/// Split a command line into arguments the way a POSIX shell would for a
/// simple command: whitespace separates words, single quotes are literal,
/// double quotes allow `\"` and `\\`, a bare backslash escapes the next
/// character. No expansion of any kind takes place.
pub fn tokenize(line: &str) -> std::result::Result<Vec<String>, String> {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut mode = Mode::Plain;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\'' => {
                    mode = Mode::Single;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::Double;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_word = true;
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Plain,
                c => current.push(c),
            },
            Mode::Double => match c {
                '"' => mode = Mode::Plain,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                c => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err(format!("unterminated quote in command: {line}"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn tokens_are_replaced_everywhere() {
        let t = CommandTemplate::new("gofmt -w $filerelative && echo $file in $wd; echo $file");
        let out = t
            .render(Path::new("/src/app/pkg/x.go"), Path::new("/src/app"))
            .unwrap();
        assert_eq!(
            out,
            "gofmt -w pkg/x.go && echo /src/app/pkg/x.go in /src/app; echo /src/app/pkg/x.go"
        );
    }

    #[test]
    fn relative_token_outside_working_dir_is_an_error() {
        let t = CommandTemplate::new("lint $filerelative");
        let err = t
            .render(Path::new("/other/x.go"), Path::new("/src/app"))
            .unwrap_err();
        match err {
            DevloopError::TemplateError { path, working_dir } => {
                assert_eq!(path, PathBuf::from("/other/x.go"));
                assert_eq!(working_dir, PathBuf::from("/src/app"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn absolute_token_works_for_any_path() {
        let t = CommandTemplate::new("lint $file");
        let out = t
            .render(Path::new("/other/x.go"), Path::new("/src/app"))
            .unwrap();
        assert_eq!(out, "lint /other/x.go");
    }

    #[test]
    fn tokenize_handles_quotes_and_escapes() {
        assert_eq!(
            tokenize(r#"go build -o 'out dir/bin' -ldflags "-X main.v=\"1\"" a\ b"#).unwrap(),
            vec!["go", "build", "-o", "out dir/bin", "-ldflags", r#"-X main.v="1""#, "a b"]
        );
        assert_eq!(tokenize("  ").unwrap(), Vec::<String>::new());
        assert_eq!(tokenize("echo ''").unwrap(), vec!["echo", ""]);
        assert!(tokenize("echo 'open").is_err());
    }
}
