//! Subscription channel patterns.
//!
//! A pattern is a channel name whose segments may include `*` (exactly one
//! segment) or a trailing `**` (one or more segments). Matching is
//! case-sensitive and segment-aligned, and a pattern never matches a
//! `/meta/...` or `/service/...` channel unless the pattern itself carries
//! that prefix.

use std::fmt;

/// Error for a subscription pattern that violates the channel grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid channel pattern `{0}`")]
pub struct InvalidPattern(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*`: exactly one segment.
    Any,
    /// `**`: one or more trailing segments.
    Tail,
}

/// A compiled subscription pattern.
#[derive(Debug, Clone)]
pub struct ChannelPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl ChannelPattern {
    pub fn parse(pattern: &str) -> Result<Self, InvalidPattern> {
        let invalid = || InvalidPattern(pattern.to_owned());

        let rest = pattern.strip_prefix('/').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid())
        }

        let parts: Vec<&str> = rest.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => return Err(invalid()),
                "*" => Segment::Any,
                "**" => {
                    if index + 1 != parts.len() {
                        return Err(invalid())
                    }
                    Segment::Tail
                }
                literal => {
                    if literal.contains('*') {
                        return Err(invalid())
                    }
                    Segment::Literal(literal.to_owned())
                }
            };
            segments.push(segment);
        }

        Ok(Self { raw: pattern.to_owned(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `channel` is accepted by this pattern.
    pub fn matches(&self, channel: &str) -> bool {
        for reserved in ["/meta/", "/service/"] {
            if channel.starts_with(reserved) && !self.raw.starts_with(reserved) {
                return false
            }
        }

        let rest = match channel.strip_prefix('/') {
            Some(rest) if !rest.is_empty() => rest,
            _ => return false,
        };
        let parts: Vec<&str> = rest.split('/').collect();

        let mut at = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(at).map(|p| *p == literal.as_str()) != Some(true) {
                        return false
                    }
                    at += 1;
                }
                Segment::Any => {
                    if at >= parts.len() {
                        return false
                    }
                    at += 1;
                }
                Segment::Tail => return at < parts.len(),
            }
        }
        at == parts.len()
    }
}

impl PartialEq for ChannelPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ChannelPattern {}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
