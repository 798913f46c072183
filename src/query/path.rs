use crate::core::error::{Error, ErrorKind, Result};

/// One parsed path step, namespace prefix still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub enum RawStep {
    /// `//` — descendant-or-self.
    Descendant,
    /// `prefix:local`, either part may be `*` (or absent) for a wildcard.
    Name {
        prefix: Option<String>,
        local: Option<String>,
    },
}

fn name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn parse_part(part: &str, whole: &str) -> Result<Option<String>> {
    if part == "*" {
        return Ok(None);
    }
    if part.is_empty() || !part.chars().all(name_char) {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("bad path step '{}' in '{}'", part, whole),
        ));
    }
    Ok(Some(part.to_string()))
}

/// Parse the restricted path-expression grammar: absolute paths of
/// `prefix:local` steps separated by `/`, with `*` wildcards and `//` for
/// descendant-or-self.
pub fn parse_path(text: &str) -> Result<Vec<RawStep>> {
    let rest = text.strip_prefix('/').ok_or_else(|| {
        Error::new(
            ErrorKind::Parse,
            format!("path must be absolute: '{}'", text),
        )
    })?;
    if rest.is_empty() {
        // "/" selects the root itself
        return Ok(Vec::new());
    }

    let mut steps = Vec::new();
    for segment in rest.split('/') {
        if segment.is_empty() {
            match steps.last() {
                Some(RawStep::Descendant) => {
                    return Err(Error::new(
                        ErrorKind::Parse,
                        format!("'///' is not a valid step in '{}'", text),
                    ));
                }
                _ => steps.push(RawStep::Descendant),
            }
            continue;
        }
        let step = match segment.split_once(':') {
            None => RawStep::Name {
                prefix: Some(String::new()), // No prefix: the empty namespace
                local: parse_part(segment, text)?,
            },
            Some((prefix, local)) => RawStep::Name {
                prefix: parse_part(prefix, text)?,
                local: parse_part(local, text)?,
            },
        };
        steps.push(step);
    }

    if matches!(steps.last(), Some(RawStep::Descendant)) {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("path may not end with '//': '{}'", text),
        ));
    }
    Ok(steps)
}

/// Parse a path expression restricted to depth one, as used by the
/// qualified-name and association-type fields.
pub fn parse_single_step(text: &str) -> Result<RawStep> {
    let with_slash = if text.starts_with('/') {
        text.to_string()
    } else {
        format!("/{}", text)
    };
    let mut steps = parse_path(&with_slash)?;
    match (steps.len(), steps.pop()) {
        (1, Some(step @ RawStep::Name { .. })) => Ok(step),
        _ => Err(Error::new(
            ErrorKind::Parse,
            format!("expected a single name step: '{}'", text),
        )),
    }
}
