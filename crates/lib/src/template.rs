//! Command templates for per-function tool invocations.
//!
//! Compile and minify commands are configured once and rendered per function
//! by substituting `$${name}` placeholders.
//!
//! # Placeholders
//!
//! - `$${entry}` - the function's source file
//! - `$${outfile}` - the compiled bundle path
//! - `$${outdir}` - the directory holding the bundle
//! - `$${module}`, `$${function}` - the function identity
//! - `$${platform}` - the runtime platform profile (e.g. `node`)
//! - `$${source}` - the source root
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Quoting
//!
//! [`render_shell`] quotes every substituted value for a POSIX shell, so paths
//! with spaces or shell metacharacters reach the tool as one word. Do not wrap
//! placeholders in quotes yourself.
//!
//! # Example
//!
//! ```
//! use fnpack_lib::template::{parse, Segment};
//!
//! let segments = parse("esbuild $${entry} --outfile=$HOME/x").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("esbuild ".to_string()),
//!     Segment::Placeholder("entry".to_string()),
//!     Segment::Literal(" --outfile=$HOME/x".to_string()),
//! ]);
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;

use thiserror::Error;

/// Placeholder names a per-function command may reference.
pub const FUNCTION_PLACEHOLDERS: &[&str] = &["entry", "outfile", "outdir", "module", "function", "platform", "source"];

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A named placeholder to be resolved
  Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("empty placeholder at position {0}")]
  Empty(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),
}

/// Supplies values for placeholders.
pub trait Resolver {
  fn resolve(&self, name: &str) -> Option<&str>;
}

/// A fixed set of placeholder values.
#[derive(Debug, Clone, Default)]
pub struct Vars(BTreeMap<&'static str, String>);

impl Vars {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
    self.0.insert(name, value.into());
    self
  }
}

impl Resolver for Vars {
  fn resolve(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }
}

/// Parse a string containing placeholders into segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();
            match chars.peek() {
              Some((_, '{')) => {
                // $$${ -> literal $${
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut name = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              name.push(c);
            }

            if !found_close {
              return Err(TemplateError::Unclosed(pos));
            }
            let name = name.trim();
            if name.is_empty() {
              return Err(TemplateError::Empty(pos));
            }
            segments.push(Segment::Placeholder(name.to_string()));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Check that `input` parses and only names placeholders in `allowed`.
pub fn validate(input: &str, allowed: &[&str]) -> Result<(), TemplateError> {
  for segment in parse(input)? {
    if let Segment::Placeholder(name) = segment
      && !allowed.contains(&name.as_str())
    {
      return Err(TemplateError::Unknown(name));
    }
  }
  Ok(())
}

/// Parse and substitute in one step.
pub fn render(input: &str, resolver: &impl Resolver) -> Result<String, TemplateError> {
  let segments = parse(input)?;
  render_segments(&segments, resolver)
}

pub fn render_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, TemplateError> {
  substitute(segments, resolver, Cow::Borrowed)
}

/// Substitute placeholders with values quoted for a POSIX shell script.
pub fn render_shell(segments: &[Segment], resolver: &impl Resolver) -> Result<String, TemplateError> {
  substitute(segments, resolver, shell_quote)
}

/// Single-quote `value` unless it is made only of characters no shell treats
/// specially.
pub fn shell_quote(value: &str) -> Cow<'_, str> {
  let plain = !value.is_empty()
    && value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ','));
  if plain {
    Cow::Borrowed(value)
  } else {
    Cow::Owned(format!("'{}'", value.replace('\'', "'\\''")))
  }
}

fn substitute<'v, R: Resolver>(
  segments: &[Segment],
  resolver: &'v R,
  encode: impl Fn(&'v str) -> Cow<'v, str>,
) -> Result<String, TemplateError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(name) => {
        let value = resolver
          .resolve(name)
          .ok_or_else(|| TemplateError::Unknown(name.clone()))?;
        result.push_str(&encode(value));
      }
    }
  }

  Ok(result)
}
