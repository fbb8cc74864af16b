//! Template parser for annotated SQL.
//!
//! Turns one annotated SQL string into rewritten SQL plus ordered
//! parameter/result definitions.
//!
//! # Syntax Overview
//!
//! ```text
//! select id {%%} from person where name = {clob%1} and tel = {%2phone(tel,1,-)}
//!            ─┬─                           ─┬── ┬           ┬ ─┬─── ────┬─────
//!             │                             │   │           │  │        │
//!             │                             │   │           │  │        └── Partial part (group, part, separator)
//!             │                             │   │           │  └── Field path
//!             │                             │   │           └── Parameter index
//!             │                             │   └── Parameter definition
//!             │                             └── Explicit adapter key
//!             └── Result definition
//! ```
//!
//! Non-block text is opaque and copied verbatim. Each index-addressed
//! definition consumes one positional `?` marker, left to right; results
//! addressed by explicit column names (`{%%addr:street,city}`) consume
//! none. `*` right after `%%` marks the map-key definition of a block.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, opt, peek},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde::Serialize;

use crate::error::{Error, Result};

/// Byte range of a definition in the template source, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// What a definition maps: method parameter N, or a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// 1-based method parameter index.
    Parameter(usize),
    Result,
}

/// Partial-definition membership: one part of a value assembled from
/// adjacent placeholders sharing a group name and separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partial {
    pub group: String,
    /// 1-based part number; parts of a group must be contiguous from 1.
    pub part: usize,
    pub separator: String,
}

/// One parsed placeholder definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Definition {
    pub role: Role,
    /// Explicit adapter key; `None` selects the type-inferred adapter.
    pub adapter: Option<String>,
    /// Positional marker indexes (1-based, shared across the statement).
    /// Empty for column-addressed results.
    pub indexes: Vec<usize>,
    /// Explicit result column names. Column binding replaces index binding.
    pub columns: Vec<String>,
    /// Bean property chain targeted by this definition.
    pub path: Vec<String>,
    pub partial: Option<Partial>,
    pub map_key: bool,
    pub span: Span,
}

impl Definition {
    /// True when this definition binds through explicit column names.
    pub fn column_addressed(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// Parser output: rewritten SQL plus ordered definitions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTemplate {
    pub sql: String,
    pub parameters: Vec<Definition>,
    pub results: Vec<Definition>,
}

/// Parse one annotated SQL template.
///
/// With `single_definition_only`, any block holding more than one
/// definition fails, even if one of them is a map key. Statement kinds
/// other than select parse templates in this mode.
pub fn parse(text: &str, single_definition_only: bool) -> Result<ParsedTemplate> {
    let mut sql = String::new();
    let mut parameters = Vec::new();
    let mut results = Vec::new();
    let mut next_marker = 1usize;

    let mut rest = text;
    let mut offset = 0usize;
    while let Some(open) = rest.find('{') {
        sql.push_str(&rest[..open]);
        let block_start = offset + open;
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(Error::parse(
                rest[open..].trim(),
                block_start,
                offset + rest.len(),
                "unterminated definition block",
            ));
        };
        let body = &after[..close];
        let span = Span {
            start: block_start,
            end: block_start + close + 2,
        };
        let defs = parse_block(body, span, single_definition_only)?;

        // Assign markers left to right; column-addressed results consume none.
        let mut markers = Vec::new();
        for mut def in defs {
            if !def.column_addressed() {
                def.indexes = vec![next_marker];
                next_marker += 1;
                markers.push("?");
            }
            match def.role {
                Role::Parameter(_) => parameters.push(def),
                Role::Result => results.push(def),
            }
        }
        sql.push_str(&markers.join(", "));

        rest = &after[close + 1..];
        offset = span.end;
    }
    sql.push_str(rest);

    Ok(ParsedTemplate {
        sql,
        parameters,
        results,
    })
}

/// Parse the comma-separated definitions of one `{...}` block.
fn parse_block(body: &str, span: Span, single_definition_only: bool) -> Result<Vec<Definition>> {
    let stripped = body.trim().to_string();
    let mut defs: Vec<Definition> = Vec::new();

    for piece in split_pieces(body) {
        if piece.cleaned.is_empty() {
            return Err(Error::parse(&stripped, span.start, span.end, "empty definition"));
        }
        if !piece.cleaned.contains('%') {
            // A comma piece without '%' extends the column list of the
            // preceding column-addressed result definition.
            match defs.last_mut() {
                Some(prev) if prev.role == Role::Result && prev.column_addressed() => {
                    prev.columns.push(piece.cleaned);
                    continue;
                }
                _ => {
                    return Err(Error::parse(
                        piece.stripped,
                        span.start + 1 + piece.offset,
                        span.start + 1 + piece.offset + piece.len,
                        "unknown token in definition block",
                    ));
                }
            }
        }
        let piece_span = Span {
            start: span.start + 1 + piece.offset,
            end: span.start + 1 + piece.offset + piece.len,
        };
        defs.push(parse_definition(&piece.cleaned, &piece.stripped, piece_span)?);
    }

    if defs.is_empty() {
        return Err(Error::parse(&stripped, span.start, span.end, "empty definition block"));
    }
    if defs.len() > 1 {
        if single_definition_only {
            return Err(Error::parse(
                &stripped,
                span.start,
                span.end,
                "Only one parameter and result definition are allowed",
            ));
        }
        let keys = defs.iter().filter(|d| d.map_key).count();
        if keys != 1 {
            return Err(Error::parse(
                &stripped,
                span.start,
                span.end,
                "One of the definitions must be a map key definition",
            ));
        }
    }
    Ok(defs)
}

struct Piece {
    /// Whitespace removed outside parentheses; what the grammar sees.
    cleaned: String,
    /// Trimmed source text, for error messages.
    stripped: String,
    offset: usize,
    len: usize,
}

/// Split a block body on commas that are not inside a partial-definition
/// parenthesis (separators may contain commas' neighbors, never `)`).
fn split_pieces(body: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(make_piece(body, start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(make_piece(body, start, body.len()));
    pieces
}

fn make_piece(body: &str, start: usize, end: usize) -> Piece {
    let raw = &body[start..end];
    let mut cleaned = String::new();
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth > 0 || !c.is_whitespace() {
            cleaned.push(c);
        }
    }
    Piece {
        cleaned,
        stripped: raw.trim().to_string(),
        offset: start,
        len: raw.len(),
    }
}

enum Marker {
    Result { map_key: bool },
    Param(String),
}

struct RawDef {
    adapter: Option<String>,
    marker: Marker,
    path: Vec<String>,
    partial: Option<(String, String, String)>,
    column: Option<String>,
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn field_path(input: &str) -> IResult<&str, Vec<String>> {
    map(separated_list1(char('.'), ident), |segs| {
        segs.into_iter().map(str::to_string).collect()
    })(input)
}

fn partial(input: &str) -> IResult<&str, (String, String, String)> {
    map(
        delimited(
            char('('),
            tuple((
                ident,
                char(','),
                digit1,
                char(','),
                take_while(|c| c != ')'),
            )),
            char(')'),
        ),
        |(group, _, part, _, sep): (&str, char, &str, char, &str)| {
            (group.to_string(), part.to_string(), sep.trim().to_string())
        },
    )(input)
}

fn definition(input: &str) -> IResult<&str, RawDef> {
    let (input, adapter) = opt(terminated(ident, peek(char('%'))))(input)?;
    let (input, _) = char('%')(input)?;
    let (input, marker) = alt((
        map(pair(char('%'), opt(char('*'))), |(_, star)| Marker::Result {
            map_key: star.is_some(),
        }),
        map(digit1, |d: &str| Marker::Param(d.to_string())),
    ))(input)?;
    let (input, path) = opt(field_path)(input)?;
    let (input, part) = opt(partial)(input)?;
    let (input, column) = opt(preceded(char(':'), ident))(input)?;
    Ok((
        input,
        RawDef {
            adapter: adapter.map(str::to_string),
            marker,
            path: path.unwrap_or_default(),
            partial: part,
            column: column.map(str::to_string),
        },
    ))
}

fn parse_definition(cleaned: &str, stripped: &str, span: Span) -> Result<Definition> {
    let bad = |message: String| Error::parse(stripped, span.start, span.end, message);

    let (rest, raw) = definition(cleaned)
        .map_err(|_| bad("unknown token in definition".to_string()))?;
    if !rest.is_empty() {
        return Err(bad(format!("unexpected token '{}'", rest)));
    }

    let (role, map_key) = match raw.marker {
        Marker::Result { map_key } => (Role::Result, map_key),
        Marker::Param(digits) => {
            let n: usize = digits
                .parse()
                .map_err(|_| bad(format!("invalid parameter index '{}'", digits)))?;
            if n == 0 {
                return Err(bad("parameter index must be positive".to_string()));
            }
            (Role::Parameter(n), false)
        }
    };

    if role != Role::Result && raw.column.is_some() {
        return Err(bad(
            "column binding is only allowed on result definitions".to_string(),
        ));
    }

    let partial = match raw.partial {
        None => None,
        Some((group, part, separator)) => {
            let part: usize = part
                .parse()
                .map_err(|_| bad(format!("invalid partial part number '{}'", part)))?;
            if part == 0 {
                return Err(bad("partial part number must be positive".to_string()));
            }
            Some(Partial {
                group,
                part,
                separator,
            })
        }
    };

    Ok(Definition {
        role,
        adapter: raw.adapter,
        indexes: Vec::new(),
        columns: raw.column.into_iter().collect(),
        path: raw.path,
        partial,
        map_key,
        span,
    })
}
