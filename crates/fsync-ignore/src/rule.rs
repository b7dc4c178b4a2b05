// rule.rs — One parsed ignore pattern.
//
// A rule is compiled once into a list of path segments, each segment a list
// of glob tokens. Matching later is a walk over these tokens — no regex
// engine, no per-match allocation on the hot path.

use crate::error::IgnoreError;

/// One glob token inside a path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tok {
    /// A literal character.
    Char(char),
    /// `?` — exactly one character.
    AnyChar,
    /// `*` — zero or more characters within the segment.
    Star,
    /// `[abc]` / `[!abc]` — a character class, optionally negated.
    Class { negated: bool, chars: Vec<char> },
}

/// One path segment of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// `**` — zero or more whole path segments.
    DoubleStar,
    /// A glob over a single path component.
    Glob(Vec<Tok>),
}

/// One parsed ignore rule.
///
/// `text` keeps the original line (minus surrounding whitespace) so a rule
/// list can be rendered back out byte-for-byte; `parse(render(rules))` is
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub(crate) text: String,
    pub(crate) negated: bool,
    pub(crate) anchored: bool,
    pub(crate) dir_only: bool,
    pub(crate) segments: Vec<Segment>,
}

impl Rule {
    /// Parse a single non-comment, non-empty line into a rule.
    pub fn parse(line: &str) -> Result<Self, IgnoreError> {
        let text = line.trim().to_string();
        let mut rest = text.as_str();

        let negated = rest.starts_with('!');
        if negated {
            rest = &rest[1..];
        }

        let anchored = rest.starts_with('/');
        if anchored {
            rest = &rest[1..];
        }

        let dir_only = rest.ends_with('/') && rest.len() > 1;
        if dir_only {
            rest = &rest[..rest.len() - 1];
        }

        if rest.is_empty() {
            return Err(IgnoreError::EmptyPattern { pattern: text });
        }

        let mut segments = Vec::new();
        for part in rest.split('/') {
            if part == "**" {
                // Collapse runs of `**` — one is enough.
                if segments.last() != Some(&Segment::DoubleStar) {
                    segments.push(Segment::DoubleStar);
                }
            } else {
                segments.push(Segment::Glob(compile_segment(part, &text)?));
            }
        }

        Ok(Self {
            text,
            negated,
            anchored,
            dir_only,
            segments,
        })
    }

    /// The original pattern line this rule was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }
}

/// Compile one path component into glob tokens.
fn compile_segment(part: &str, whole: &str) -> Result<Vec<Tok>, IgnoreError> {
    let mut toks = Vec::new();
    let mut chars = part.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '?' => toks.push(Tok::AnyChar),
            '*' => {
                // `**` inside a segment degrades to `*`; segment-spanning
                // `**` is only recognized as a whole component.
                if toks.last() != Some(&Tok::Star) {
                    toks.push(Tok::Star);
                }
            }
            '[' => {
                let mut negated = false;
                let mut members = Vec::new();
                if chars.peek() == Some(&'!') {
                    negated = true;
                    chars.next();
                }
                let mut closed = false;
                let mut prev: Option<char> = None;
                while let Some(cc) = chars.next() {
                    match cc {
                        ']' if !members.is_empty() || prev.is_some() => {
                            closed = true;
                            break;
                        }
                        '-' if prev.is_some() && chars.peek().is_some_and(|n| *n != ']') => {
                            // Range like a-z: expand it.
                            let lo = prev.take();
                            let hi = chars.next();
                            if let (Some(lo), Some(hi)) = (lo, hi) {
                                members.pop();
                                for r in lo..=hi {
                                    members.push(r);
                                }
                            }
                        }
                        other => {
                            members.push(other);
                            prev = Some(other);
                        }
                    }
                }
                if !closed {
                    return Err(IgnoreError::UnterminatedClass {
                        pattern: whole.to_string(),
                    });
                }
                toks.push(Tok::Class {
                    negated,
                    chars: members,
                });
            }
            other => toks.push(Tok::Char(other)),
        }
    }

    Ok(toks)
}

/// The curated default exclusions prepended when `ignore_defaults` is set.
///
/// Covers VCS metadata, the hub's own runtime directory, the agent-side
/// chunk cache, and the usual editor/OS droppings.
pub fn default_rules() -> Vec<&'static str> {
    vec![
        ".git/",
        ".hg/",
        ".svn/",
        "runtime/",
        ".fsync-cache/",
        ".DS_Store",
        "Thumbs.db",
        "*.swp",
        "*~",
    ]
}
