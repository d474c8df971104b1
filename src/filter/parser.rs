//! Filter descriptor parser using winnow.
//!
//! Parses filter chain descriptors of the form:
//!
//! ```text
//! scale=800:600,hue=h=30:s=1
//! crop=640:480:0:0,hflip,grayscale
//! null
//! ```
//!
//! # Syntax
//!
//! - Filters are separated by `,`
//! - A filter is a name optionally followed by `=` and arguments
//! - Arguments are separated by `:` and are either positional values
//!   (`scale=800:600`) or `key=value` pairs (`hue=h=30:s=1`)
//!
//! Descriptors are byte-exact cache keys, so the grammar accepts no
//! whitespace padding anywhere.

use super::FilterError;
use winnow::Parser;
use winnow::ascii::alpha1;
use winnow::combinator::{alt, opt, preceded, separated};
use winnow::error::ContextError;
use winnow::token::take_while;

type WResult<T> = std::result::Result<T, ContextError>;

/// A single argument to a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterArg {
    /// A bare positional value (`800` in `scale=800:600`).
    Positional(String),
    /// A `key=value` pair (`h=30` in `hue=h=30`).
    Named(String, String),
}

/// A parsed filter with its name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilter {
    /// The filter name (e.g. `"scale"`, `"hue"`).
    pub name: String,
    /// Arguments in descriptor order.
    pub args: Vec<FilterArg>,
}

impl ParsedFilter {
    /// Get the positional argument at `index`, if present.
    pub fn positional(&self, index: usize) -> Option<&str> {
        self.args
            .iter()
            .filter_map(|a| match a {
                FilterArg::Positional(v) => Some(v.as_str()),
                FilterArg::Named(..) => None,
            })
            .nth(index)
    }

    /// Get the value of the named argument `key`, if present.
    pub fn named(&self, key: &str) -> Option<&str> {
        self.args.iter().find_map(|a| match a {
            FilterArg::Named(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    /// Number of arguments.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Parse a filter chain descriptor.
///
/// # Example
///
/// ```rust
/// use refract::filter::parser::parse_chain;
///
/// let chain = parse_chain("scale=800:600,hue=h=30:s=1").unwrap();
/// assert_eq!(chain.len(), 2);
/// assert_eq!(chain[0].name, "scale");
/// assert_eq!(chain[1].named("h"), Some("30"));
/// ```
pub fn parse_chain(input: &str) -> std::result::Result<Vec<ParsedFilter>, FilterError> {
    if input.is_empty() {
        return Err(FilterError::Parse("empty descriptor".into()));
    }
    chain
        .parse(input)
        .map_err(|e| FilterError::Parse(format!("{e}")))
}

/// Parse a complete chain (consumes all input).
fn chain(input: &mut &str) -> WResult<Vec<ParsedFilter>> {
    separated(1.., filter, ',').parse_next(input)
}

/// Parse one filter (name + optional `=args`).
fn filter(input: &mut &str) -> WResult<ParsedFilter> {
    let name: &str = identifier.parse_next(input)?;
    let args: Option<Vec<FilterArg>> =
        opt(preceded('=', separated(1.., filter_arg, ':'))).parse_next(input)?;

    Ok(ParsedFilter {
        name: name.to_string(),
        args: args.unwrap_or_default(),
    })
}

/// Parse one argument: `key=value` or a bare value.
fn filter_arg(input: &mut &str) -> WResult<FilterArg> {
    alt((named_arg, value.map(|v: &str| FilterArg::Positional(v.to_string()))))
        .parse_next(input)
}

/// Parse a `key=value` argument.
fn named_arg(input: &mut &str) -> WResult<FilterArg> {
    let checkpoint = *input;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(e) => {
            *input = checkpoint;
            return Err(e);
        }
    };

    if input.starts_with('=') {
        let _ = '='.parse_next(input)?;
    } else {
        // Bare value, not a key=value pair; backtrack.
        *input = checkpoint;
        return Err(ContextError::new());
    }

    let val: &str = value.parse_next(input)?;
    Ok(FilterArg::Named(key.to_string(), val.to_string()))
}

/// Parse an identifier (filter or argument name).
fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Parse an argument value (number, format name, ...).
fn value<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || matches!(c, '.' | '-' | '_')
    })
    .parse_next(input)
}
