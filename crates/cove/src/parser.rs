//! Command line parser.
//!
//! A line is one or more commands joined by `;` (always run the next) or
//! `&&` (run the next only on success). Tokens are split on unquoted
//! whitespace and may mix quoting styles:
//!
//! - `'single'` keeps every character literally
//! - `"double"` honours the `\"` and `\\` escapes
//! - an unquoted `\` escapes the following character
//!
//! Adjacent fragments concatenate, so `hello"world"` is one token.
//! Pipelines, redirections-as-operators and background jobs are not part of
//! the grammar: an unquoted `|` or lone `&` is a syntax error.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{Error, Result, ShellReason};

/// Operator joining a command to the one before it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainOp {
    /// `;`: run regardless of the previous outcome.
    Then,
    /// `&&`: run only if the previous command succeeded.
    And,
}

impl ChainOp {
    /// Source form of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOp::Then => ";",
            ChainOp::And => "&&",
        }
    }
}

/// One command of a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Operator preceding this command (`None` for the first).
    pub op: Option<ChainOp>,
    /// Command name.
    pub name: String,
    /// Arguments after the name.
    pub args: Vec<String>,
}

/// A parsed line: a non-empty, ordered sequence of commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chain {
    commands: Vec<ParsedCommand>,
}

impl Chain {
    /// The commands in execution order.
    pub fn commands(&self) -> &[ParsedCommand] {
        &self.commands
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always false; parsing never produces an empty chain.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Render the chain back to a line that parses to the same chain.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        for cmd in &self.commands {
            match cmd.op {
                Some(ChainOp::Then) => out.push_str("; "),
                Some(ChainOp::And) => out.push_str(" && "),
                None => {}
            }
            out.push_str(&quote(&cmd.name));
            for arg in &cmd.args {
                out.push(' ');
                out.push_str(&quote(arg));
            }
        }
        out
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a ParsedCommand;
    type IntoIter = std::slice::Iter<'a, ParsedCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Quote a token so that it parses back unchanged.
pub fn quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%^~".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Op(ChainOp, usize),
}

fn syntax_error(message: impl Into<String>, position: usize) -> Error {
    Error::shell(ShellReason::SyntaxError, message).with_context("position", position)
}

fn unclosed_quote(quote: char, position: usize) -> Error {
    Error::shell(
        ShellReason::UnclosedQuote,
        format!("unterminated {quote} quote"),
    )
    .with_context("position", position)
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    tokens: Vec<Token>,
    current: String,
    in_word: bool,
}

impl<'a> Lexer<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            chars: line.char_indices().peekable(),
            tokens: Vec::new(),
            current: String::new(),
            in_word: false,
        }
    }

    fn flush(&mut self) {
        if self.in_word {
            self.tokens
                .push(Token::Word(std::mem::take(&mut self.current)));
            self.in_word = false;
        }
    }

    fn single_quoted(&mut self, start: usize) -> Result<()> {
        loop {
            match self.chars.next() {
                Some((_, '\'')) => return Ok(()),
                Some((_, c)) => self.current.push(c),
                None => return Err(unclosed_quote('\'', start)),
            }
        }
    }

    fn double_quoted(&mut self, start: usize) -> Result<()> {
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(()),
                Some((_, '\\')) => match self.chars.peek() {
                    Some((_, c @ ('"' | '\\'))) => {
                        self.current.push(*c);
                        self.chars.next();
                    }
                    _ => self.current.push('\\'),
                },
                Some((_, c)) => self.current.push(c),
                None => return Err(unclosed_quote('"', start)),
            }
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some((pos, c)) = self.chars.next() {
            match c {
                c if c.is_whitespace() => self.flush(),
                '\'' => {
                    self.in_word = true;
                    self.single_quoted(pos)?;
                }
                '"' => {
                    self.in_word = true;
                    self.double_quoted(pos)?;
                }
                '\\' => match self.chars.next() {
                    Some((_, escaped)) => {
                        self.in_word = true;
                        self.current.push(escaped);
                    }
                    None => return Err(syntax_error("line ends with a backslash", pos)),
                },
                ';' => {
                    self.flush();
                    self.tokens.push(Token::Op(ChainOp::Then, pos));
                }
                '&' => {
                    if matches!(self.chars.peek(), Some((_, '&'))) {
                        self.chars.next();
                        self.flush();
                        self.tokens.push(Token::Op(ChainOp::And, pos));
                    } else {
                        return Err(syntax_error("background jobs are not supported", pos));
                    }
                }
                '|' => return Err(syntax_error("pipelines are not supported", pos)),
                other => {
                    self.in_word = true;
                    self.current.push(other);
                }
            }
        }
        self.flush();
        Ok(self.tokens)
    }
}

/// Parse one input line into a chain.
pub fn parse(line: &str) -> Result<Chain> {
    if line.trim().is_empty() {
        return Err(Error::shell(ShellReason::EmptyCommand, "empty command"));
    }

    let tokens = Lexer::new(line).run()?;

    let mut commands = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut pending_op = None;
    let mut trailing: Option<(ChainOp, usize)> = None;

    for token in tokens {
        match token {
            Token::Word(word) => {
                words.push(word);
                trailing = None;
            }
            Token::Op(op, pos) => {
                if words.is_empty() {
                    return Err(syntax_error(
                        format!("unexpected `{}`", op.as_str()),
                        pos,
                    ));
                }
                let mut iter = std::mem::take(&mut words).into_iter();
                let name = iter.next().unwrap_or_default();
                commands.push(ParsedCommand {
                    op: pending_op,
                    name,
                    args: iter.collect(),
                });
                pending_op = Some(op);
                trailing = Some((op, pos));
            }
        }
    }

    if !words.is_empty() {
        let mut iter = words.into_iter();
        let name = iter.next().unwrap_or_default();
        commands.push(ParsedCommand {
            op: pending_op,
            name,
            args: iter.collect(),
        });
    } else if let Some((ChainOp::And, pos)) = trailing {
        return Err(syntax_error("line ends with `&&`", pos));
    }

    Ok(Chain { commands })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names_and_args(line: &str) -> Vec<(Option<ChainOp>, String, Vec<String>)> {
        parse(line)
            .unwrap()
            .commands()
            .iter()
            .map(|c| (c.op, c.name.clone(), c.args.clone()))
            .collect()
    }

    #[test]
    fn test_simple_command() {
        let chain = parse("echo hello world").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.commands()[0].name, "echo");
        assert_eq!(chain.commands()[0].args, vec!["hello", "world"]);
        assert_eq!(chain.commands()[0].op, None);
    }

    #[test]
    fn test_chain_operators() {
        let parsed = names_and_args("mkdir /a; write /a/f hi && cat /a/f");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].0, None);
        assert_eq!(parsed[1].0, Some(ChainOp::Then));
        assert_eq!(parsed[1].1, "write");
        assert_eq!(parsed[2].0, Some(ChainOp::And));
        assert_eq!(parsed[2].2, vec!["/a/f"]);
    }

    #[test]
    fn test_operators_without_spaces() {
        let parsed = names_and_args("a;b&&c");
        let names: Vec<_> = parsed.iter().map(|p| p.1.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_quoting() {
        let parsed = names_and_args(r#"echo 'a b' "c d" e\ f"#);
        assert_eq!(parsed[0].2, vec!["a b", "c d", "e f"]);
    }

    #[test]
    fn test_single_quotes_are_literal() {
        let parsed = names_and_args(r#"echo 'x\"y; && z'"#);
        assert_eq!(parsed[0].2, vec![r#"x\"y; && z"#]);
    }

    #[test]
    fn test_double_quote_escapes() {
        let parsed = names_and_args(r#"echo "say \"hi\" \\ \n""#);
        assert_eq!(parsed[0].2, vec![r#"say "hi" \ \n"#]);
    }

    #[test]
    fn test_adjacent_fragments_concatenate() {
        let parsed = names_and_args(r#"echo hello"world" 'a'"b"c"#);
        assert_eq!(parsed[0].2, vec!["helloworld", "abc"]);
    }

    #[test]
    fn test_empty_quotes_make_empty_token() {
        let parsed = names_and_args(r#"echo "" ''"#);
        assert_eq!(parsed[0].2, vec!["", ""]);
    }

    #[test]
    fn test_quoted_operators_are_words() {
        let parsed = names_and_args("echo ';' \"&&\" a\\;b");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].2, vec![";", "&&", "a;b"]);
    }

    #[test]
    fn test_empty_command() {
        assert!(parse("").unwrap_err().is(ShellReason::EmptyCommand));
        assert!(parse("   \t ").unwrap_err().is(ShellReason::EmptyCommand));
    }

    #[test]
    fn test_unclosed_quotes() {
        assert!(parse("echo 'abc").unwrap_err().is(ShellReason::UnclosedQuote));
        assert!(parse("echo \"abc").unwrap_err().is(ShellReason::UnclosedQuote));
        assert!(parse(r#"echo "abc\""#).unwrap_err().is(ShellReason::UnclosedQuote));
    }

    #[test]
    fn test_syntax_errors() {
        for line in [
            "; echo a",
            "echo a ;; echo b",
            "echo a && && echo b",
            "echo a &&",
            "&& echo a",
            "echo a | cat",
            "echo a &",
            "echo a\\",
        ] {
            let err = parse(line).unwrap_err();
            assert!(err.is(ShellReason::SyntaxError), "{line}: {err}");
        }
    }

    #[test]
    fn test_trailing_semicolon_allowed() {
        let chain = parse("echo a;").unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse("echo a | cat").unwrap_err();
        assert_eq!(err.context().get("position").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_round_trip_unquoted() {
        for line in ["a", "a b c", "a; b && c d", "cd /x && ls -a; pwd"] {
            let chain = parse(line).unwrap();
            assert_eq!(parse(&chain.to_source()).unwrap(), chain);
            assert_eq!(chain.to_source(), line);
        }
    }

    #[test]
    fn test_round_trip_quoted_tokens() {
        let chain = parse(r#"write "/a b" 'it'"'"'s' "" x\;y"#).unwrap();
        assert_eq!(chain.commands()[0].args, vec!["/a b", "it's", "", "x;y"]);
        assert_eq!(parse(&chain.to_source()).unwrap(), chain);
    }
}
