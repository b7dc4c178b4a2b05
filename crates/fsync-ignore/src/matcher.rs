// matcher.rs — Ordered rule list and the ignore decision.
//
// Evaluation is last-match-wins over the merged list: project rules first,
// node rules appended after, defaults (when enabled) before everything.
// A rule that matches a directory also matches every path below it, which
// is what makes `node_modules/` ignore the whole subtree while a later
// `!node_modules/keep/**` can still re-include part of it.

use std::path::Path;

use crate::error::IgnoreError;
use crate::rule::{default_rules, Rule, Segment, Tok};

/// An ordered, merged set of ignore rules.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    rules: Vec<Rule>,
    fold_case: bool,
    has_negation: bool,
}

/// Builder for [`IgnoreSet`] — layers are appended in call order.
#[derive(Debug, Default)]
pub struct IgnoreSetBuilder {
    rules: Vec<Rule>,
    fold_case: bool,
}

impl IgnoreSetBuilder {
    /// Case-insensitive matching for Windows-compatible runs.
    /// Folding is ASCII-only; that is what NTFS-style collisions need.
    pub fn fold_case(mut self, fold: bool) -> Self {
        self.fold_case = fold;
        self
    }

    /// Prepend the curated defaults (`.git/`, `runtime/`, …).
    /// Call this first so explicit rules can override them.
    pub fn defaults(mut self) -> Self {
        for line in default_rules() {
            // The defaults are static and known-good.
            if let Ok(rule) = Rule::parse(line) {
                self.rules.push(rule);
            }
        }
        self
    }

    /// Append a layer of pattern lines. Comments and blanks are dropped here,
    /// malformed patterns are reported.
    pub fn lines<'a, I>(mut self, lines: I) -> Result<Self, IgnoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.rules.push(Rule::parse(trimmed)?);
        }
        Ok(self)
    }

    /// Append the contents of an ignore file.
    pub fn file(self, path: &Path) -> Result<Self, IgnoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| IgnoreError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        self.lines(content.lines())
    }

    pub fn build(self) -> IgnoreSet {
        let has_negation = self.rules.iter().any(Rule::is_negated);
        IgnoreSet {
            rules: self.rules,
            fold_case: self.fold_case,
            has_negation,
        }
    }
}

impl IgnoreSet {
    pub fn builder() -> IgnoreSetBuilder {
        IgnoreSetBuilder::default()
    }

    /// A set that ignores nothing.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            fold_case: false,
            has_negation: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the merged list contains any negated rule. The indexer uses
    /// this to decide if it may prune an ignored directory without walking
    /// it: with no negations nothing below can be re-included.
    pub fn has_negations(&self) -> bool {
        self.has_negation
    }

    /// The ignore decision for a relative path. Last matching rule wins;
    /// no match means not ignored.
    pub fn is_ignored(&self, relpath: &str, is_dir: bool) -> bool {
        let comps: Vec<&str> = split_components(relpath);
        if comps.is_empty() {
            return false;
        }

        let mut decision = false;
        for rule in &self.rules {
            if self.rule_matches(rule, &comps, is_dir) {
                decision = !rule.negated;
            }
        }
        decision
    }

    /// Whether a walk may skip descending into an ignored directory.
    /// Conservative: any negation in the set forces the walk to descend,
    /// since a deeper path could be re-included.
    pub fn allows_descend(&self, dir_relpath: &str) -> bool {
        if !self.is_ignored(dir_relpath, true) {
            return true;
        }
        self.has_negation
    }

    /// Render the rule list back to pattern lines. Parsing the rendered
    /// lines yields an equivalent set.
    pub fn render(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.text.clone()).collect()
    }

    /// A rule matches the path itself, or any ancestor directory of it.
    fn rule_matches(&self, rule: &Rule, comps: &[&str], is_dir: bool) -> bool {
        // Full-path match. Directory-only rules need a directory.
        if (!rule.dir_only || is_dir) && self.segments_match(rule, comps) {
            return true;
        }
        // Ancestor match: every proper prefix is a directory by construction.
        for k in 1..comps.len() {
            if self.segments_match(rule, &comps[..k]) {
                return true;
            }
        }
        false
    }

    fn segments_match(&self, rule: &Rule, comps: &[&str]) -> bool {
        if rule.anchored {
            match_from(&rule.segments, comps, self.fold_case)
        } else {
            // Unanchored rules float: try every start depth.
            (0..comps.len()).any(|start| match_from(&rule.segments, &comps[start..], self.fold_case))
        }
    }
}

/// Match a compiled segment list against path components, `**` spanning
/// zero or more components. Small backtracking matcher; rule lists are
/// short and components shorter.
fn match_from(segs: &[Segment], comps: &[&str], fold: bool) -> bool {
    match segs.split_first() {
        None => comps.is_empty(),
        Some((Segment::DoubleStar, rest)) => {
            // `**` then the remainder anywhere at or after here.
            (0..=comps.len()).any(|skip| match_from(rest, &comps[skip..], fold))
        }
        Some((Segment::Glob(toks), rest)) => match comps.split_first() {
            None => false,
            Some((comp, comps_rest)) => {
                glob_match(toks, comp, fold) && match_from(rest, comps_rest, fold)
            }
        },
    }
}

/// Match one segment's tokens against one path component.
fn glob_match(toks: &[Tok], comp: &str, fold: bool) -> bool {
    let chars: Vec<char> = comp.chars().collect();
    glob_match_at(toks, &chars, fold)
}

fn glob_match_at(toks: &[Tok], chars: &[char], fold: bool) -> bool {
    match toks.split_first() {
        None => chars.is_empty(),
        Some((Tok::Star, rest)) => {
            (0..=chars.len()).any(|skip| glob_match_at(rest, &chars[skip..], fold))
        }
        Some((tok, rest)) => match chars.split_first() {
            None => false,
            Some((c, chars_rest)) => {
                let hit = match tok {
                    Tok::Char(p) => char_eq(*p, *c, fold),
                    Tok::AnyChar => true,
                    Tok::Class { negated, chars: members } => {
                        let inside = members.iter().any(|m| char_eq(*m, *c, fold));
                        inside != *negated
                    }
                    Tok::Star => unreachable!("handled above"),
                };
                hit && glob_match_at(rest, chars_rest, fold)
            }
        },
    }
}

fn char_eq(a: char, b: char, fold: bool) -> bool {
    if fold {
        a.eq_ignore_ascii_case(&b)
    } else {
        a == b
    }
}

fn split_components(relpath: &str) -> Vec<&str> {
    relpath
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}
