//! Client-side parameter substitution for servers without HTTP parameters.
//!
//! Scans query text for `{name:type}` placeholders and replaces each one with
//! its pre-formatted literal.
//!
//! ```text
//! select * from t where id = {id:UInt32} and tag = {tag:String}
//!                            ─────┬─────           ──────┬─────
//!                                 └── name `id`          └── name `tag`
//! ```
//!
//! The type part is everything after the last `:` and is not checked here.

use std::collections::HashMap;

use nom::{
    bytes::complete::{take_until, take_until1},
    character::complete::char,
    sequence::delimited,
    IResult,
};

use crate::error::{ChError, ChResult};

/// Everything up to the next `{`.
fn literal_text(input: &str) -> IResult<&str, &str> {
    take_until("{")(input)
}

/// A `{...}` span, yielding its body.
fn placeholder(input: &str) -> IResult<&str, &str> {
    delimited(char('{'), take_until1("}"), char('}'))(input)
}

/// Replace every placeholder in `sql` with its value from `params`.
///
/// Single left-to-right pass; substituted values are not scanned again.
pub fn substitute(sql: &str, params: &HashMap<String, String>) -> ChResult<String> {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;

    while let Ok((at_brace, before)) = literal_text(rest) {
        out.push_str(before);

        let (after, body) = placeholder(at_brace).map_err(|_: nom::Err<nom::error::Error<&str>>| {
            ChError::UnsupportedParameterSyntax(at_brace.to_string())
        })?;

        let (name, _type) = body
            .rsplit_once(':')
            .ok_or_else(|| ChError::UnsupportedParameterSyntax(body.to_string()))?;

        let value = params
            .get(name)
            .ok_or_else(|| ChError::MissingParameter(name.to_string()))?;
        out.push_str(value);

        rest = after;
    }

    out.push_str(rest);
    Ok(out)
}
