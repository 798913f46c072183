use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_until};
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{all_consuming, map};
use nom::multi::{many1, separated_list1};
use nom::sequence::delimited;
use nom::{IResult, Parser};
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{AnalysisMode, CaseFunction, QueryNode};

/// Parser for the surface query grammar: `field:value` clauses, quoted
/// phrases, `[a TO b]` ranges, `upper()`/`lower()` functions, AND/OR/NOT
/// and parentheses. Produces an AST; field semantics are applied by the
/// compile stage.
pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        QueryParser
    }

    pub fn parse(&self, input: &str) -> Result<QueryNode> {
        if input.trim().is_empty() {
            return Ok(QueryNode::MatchAll);
        }
        match all_consuming(delimited(multispace0, expr, multispace0)).parse(input) {
            Ok((_, node)) => Ok(node),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::new(
                ErrorKind::Parse,
                format!("query syntax error at '{}'", snippet(e.input)),
            )),
            Err(nom::Err::Incomplete(_)) => Err(Error::new(
                ErrorKind::Parse,
                "incomplete query".to_string(),
            )),
        }
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

fn snippet(input: &str) -> &str {
    let end = input
        .char_indices()
        .nth(24)
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    &input[..end]
}

fn expr(i: &str) -> IResult<&str, QueryNode> {
    map(
        separated_list1(
            delimited(multispace0, tag("OR"), multispace1),
            and_level,
        ),
        |mut nodes| {
            if nodes.len() == 1 {
                nodes.pop().unwrap()
            } else {
                QueryNode::Disjunction(nodes)
            }
        },
    )
    .parse(i)
}

fn and_level(i: &str) -> IResult<&str, QueryNode> {
    map(
        separated_list1(
            delimited(multispace0, tag("AND"), multispace1),
            sequence_level,
        ),
        |mut nodes| {
            if nodes.len() == 1 {
                nodes.pop().unwrap()
            } else {
                QueryNode::Conjunction(nodes)
            }
        },
    )
    .parse(i)
}

/// Juxtaposed clauses combine with OR.
fn sequence_level(i: &str) -> IResult<&str, QueryNode> {
    map(many1(delimited(multispace0, unary, multispace0)), |mut nodes| {
        if nodes.len() == 1 {
            nodes.pop().unwrap()
        } else {
            QueryNode::Disjunction(nodes)
        }
    })
    .parse(i)
}

fn unary(i: &str) -> IResult<&str, QueryNode> {
    alt((negation, parens, clause)).parse(i)
}

fn negation(i: &str) -> IResult<&str, QueryNode> {
    let (i, _) = tag("NOT").parse(i)?;
    let (i, _) = multispace1(i)?;
    let (i, inner) = unary(i)?;
    Ok((i, QueryNode::Negation(Box::new(inner))))
}

fn parens(i: &str) -> IResult<&str, QueryNode> {
    delimited(
        char('('),
        delimited(multispace0, expr, multispace0),
        char(')'),
    )
    .parse(i)
}

fn clause(i: &str) -> IResult<&str, QueryNode> {
    let (rest, field) = match field_prefix(i) {
        Ok((rest, field)) => (rest, Some(field)),
        Err(_) => (i, None),
    };
    clause_value(rest, field)
}

fn clause_value(i: &str, field: Option<String>) -> IResult<&str, QueryNode> {
    if let Ok((rest, text)) = quoted(i) {
        return Ok((rest, QueryNode::FieldPhrase { field, text }));
    }
    if let Ok((rest, node)) = range_value(i, field.clone()) {
        return Ok((rest, node));
    }
    if let Ok((rest, node)) = function_value(i, field.clone()) {
        return Ok((rest, node));
    }
    term_value(i, field)
}

/// `fieldname:` — structural names, or `@`-prefixed property names in
/// either `@{uri}local` or `@prefix\:local` form.
fn field_prefix(i: &str) -> IResult<&str, String> {
    let mut out = String::new();
    let mut rest = i;
    if let Some(r) = rest.strip_prefix('@') {
        out.push('@');
        rest = r;
        if let Some(r) = rest.strip_prefix('{') {
            let close = r.find('}').ok_or_else(|| fail(rest))?;
            out.push('{');
            out.push_str(&r[..close]);
            out.push('}');
            rest = &r[close + 1..];
        }
    }
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
            Some('\\') if rest[1..].starts_with(':') => {
                out.push(':');
                rest = &rest[2..];
            }
            _ => break,
        }
    }
    if out.is_empty() || out == "@" {
        return Err(fail(i));
    }
    let rest = rest.strip_prefix(':').ok_or_else(|| fail(rest))?;
    Ok((rest, out))
}

fn fail(i: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
}

fn quoted(i: &str) -> IResult<&str, String> {
    map(
        delimited(char('"'), take_until("\""), char('"')),
        |s: &str| s.to_string(),
    )
    .parse(i)
}

fn range_value(i: &str, field: Option<String>) -> IResult<&str, QueryNode> {
    let (rest, open) = alt((char('['), char('{'))).parse(i)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, lower) = range_endpoint(rest)?;
    let (rest, _) = delimited(multispace1, tag("TO"), multispace1).parse(rest)?;
    let (rest, upper) = range_endpoint(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, close) = alt((char(']'), char('}'))).parse(rest)?;
    Ok((
        rest,
        QueryNode::FieldRange {
            field,
            lower,
            upper,
            include_lower: open == '[',
            include_upper: close == ']',
        },
    ))
}

fn range_endpoint(i: &str) -> IResult<&str, String> {
    let end = i
        .find(|c: char| c.is_whitespace() || c == ']' || c == '}')
        .unwrap_or(i.len());
    if end == 0 {
        return Err(fail(i));
    }
    Ok((&i[end..], i[..end].to_string()))
}

fn function_value(i: &str, field: Option<String>) -> IResult<&str, QueryNode> {
    let (rest, name) = alt((tag_no_case("upper"), tag_no_case("lower"))).parse(i)?;
    let (rest, inner) = delimited(
        char('('),
        delimited(multispace0, function_argument, multispace0),
        char(')'),
    )
    .parse(rest)?;
    let function = if name.eq_ignore_ascii_case("upper") {
        CaseFunction::Upper
    } else {
        CaseFunction::Lower
    };
    Ok((
        rest,
        QueryNode::FieldQuery {
            field,
            text: inner,
            mode: AnalysisMode::Identifier,
            function: Some(function),
        },
    ))
}

fn function_argument(i: &str) -> IResult<&str, String> {
    if let Ok((rest, text)) = quoted(i) {
        return Ok((rest, text));
    }
    let end = i
        .find(|c: char| c.is_whitespace() || c == ')')
        .unwrap_or(i.len());
    if end == 0 {
        return Err(fail(i));
    }
    Ok((&i[end..], i[..end].to_string()))
}

fn term_value(i: &str, field: Option<String>) -> IResult<&str, QueryNode> {
    let end = i
        .find(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == '"')
        .unwrap_or(i.len());
    if end == 0 {
        return Err(fail(i));
    }
    let raw = &i[..end];
    // Operator keywords end the clause sequence
    if raw == "AND" || raw == "OR" || raw == "NOT" || raw == "TO" {
        return Err(fail(i));
    }
    let rest = &i[end..];

    let (text, mode) = derive_mode(raw);
    Ok((
        rest,
        QueryNode::FieldQuery {
            field,
            text,
            mode,
            function: None,
        },
    ))
}

/// The literal's shape selects the analysis mode: `=` prefix for exact
/// identifier matching, a `~` suffix for fuzzy, a single trailing `*` for
/// prefix, any other `*`/`?` for wildcard.
fn derive_mode(raw: &str) -> (String, AnalysisMode) {
    if let Some(stripped) = raw.strip_prefix('=') {
        return (stripped.to_string(), AnalysisMode::Identifier);
    }
    if let Some(tilde) = raw.rfind('~') {
        let suffix = &raw[tilde + 1..];
        if suffix.is_empty() || suffix.chars().all(|c| c.is_ascii_digit()) {
            return (raw[..tilde].to_string(), AnalysisMode::Fuzzy);
        }
    }
    let wildcards: Vec<usize> = raw
        .match_indices(|c| c == '*' || c == '?')
        .map(|(p, _)| p)
        .collect();
    if wildcards.is_empty() {
        return (raw.to_string(), AnalysisMode::Default);
    }
    if wildcards.len() == 1 && raw.ends_with('*') {
        return (raw[..raw.len() - 1].to_string(), AnalysisMode::Prefix);
    }
    (raw.to_string(), AnalysisMode::Wildcard)
}
