//! CoRE link-format (RFC 6690) parsing for registration payloads

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LinkFormatError {
    #[error("Link must start with '<': {0}")]
    MissingTarget(String),
    #[error("Unterminated link target: {0}")]
    UnterminatedTarget(String),
    #[error("Unterminated quoted value in: {0}")]
    UnterminatedQuote(String),
}

/// One link of a link-format document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Target URI reference, e.g. `/sensors/temp`
    pub target: String,
    /// Link parameters in document order; valueless parameters carry `None`
    pub params: Vec<(String, Option<String>)>,
}

impl Link {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Parse a link-format payload into its links
pub fn parse_link_format(input: &str) -> Result<Vec<Link>, LinkFormatError> {
    let mut links = Vec::new();
    for raw in split_unquoted(input, ',')? {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        links.push(parse_link(raw)?);
    }
    Ok(links)
}

fn parse_link(raw: &str) -> Result<Link, LinkFormatError> {
    let rest = raw
        .strip_prefix('<')
        .ok_or_else(|| LinkFormatError::MissingTarget(raw.to_string()))?;
    let end = rest
        .find('>')
        .ok_or_else(|| LinkFormatError::UnterminatedTarget(raw.to_string()))?;
    let target = rest[..end].to_string();

    let mut params = Vec::new();
    for param in split_unquoted(&rest[end + 1..], ';')? {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        match param.split_once('=') {
            Some((key, value)) => {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                params.push((key.trim().to_string(), Some(value.to_string())));
            }
            None => params.push((param.to_string(), None)),
        }
    }

    Ok(Link { target, params })
}

/// Split on `sep` outside of double quotes
fn split_unquoted(input: &str, sep: char) -> Result<Vec<&str>, LinkFormatError> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    if in_quotes {
        return Err(LinkFormatError::UnterminatedQuote(input.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registration_payload() {
        let links = parse_link_format(
            "</sensors/temp>;rt=\"temperature-c\";if=\"sensor\",</sensors/light>;obs,</actuators/led>",
        )
        .unwrap();

        assert_eq!(links.len(), 3);
        assert_eq!(links[0].target, "/sensors/temp");
        assert_eq!(links[0].param("rt"), Some("temperature-c"));
        assert_eq!(links[0].param("if"), Some("sensor"));
        assert_eq!(links[1].params, vec![("obs".to_string(), None)]);
        assert_eq!(links[2].target, "/actuators/led");
    }

    #[test]
    fn test_comma_inside_quotes() {
        let links = parse_link_format("</a>;title=\"x, y\",</b>").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].param("title"), Some("x, y"));
    }

    #[test]
    fn test_malformed_links() {
        assert_eq!(parse_link_format("").unwrap(), Vec::new());
        assert!(matches!(
            parse_link_format("/no-brackets"),
            Err(LinkFormatError::MissingTarget(_))
        ));
        assert!(matches!(
            parse_link_format("</open"),
            Err(LinkFormatError::UnterminatedTarget(_))
        ));
        assert!(matches!(
            parse_link_format("</a>;rt=\"open"),
            Err(LinkFormatError::UnterminatedQuote(_))
        ));
    }
}
