use std::collections::HashMap;

use crate::models::{basename, ResourceArchive, ResourceEntry};

/// Which resolution rule matched a reference token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    FinalSegment,
    Stem,
}

/// Lookup from the reference tokens found in the rendering to archive
/// entries. The two backend calls are separate extractions, so the names
/// they use for the same object do not always agree; resolution falls back
/// from exact name, to final path segment, to name without extension.
#[derive(Debug, Default)]
pub struct ResourceIndex {
    entries: Vec<ResourceEntry>,
    by_name: HashMap<String, usize>,
    by_basename: HashMap<String, usize>,
    by_stem: HashMap<String, usize>,
}

impl ResourceIndex {
    /// Never fails. When two entries share a key the later one wins.
    pub fn build(archive: ResourceArchive) -> Self {
        let mut index = ResourceIndex {
            entries: archive.entries,
            ..Default::default()
        };
        for (i, entry) in index.entries.iter().enumerate() {
            index.by_name.insert(entry.name.clone(), i);
            let base = basename(&entry.name);
            if base.is_empty() {
                continue;
            }
            index.by_basename.insert(base.to_lowercase(), i);
            index.by_stem.insert(stem(base).to_lowercase(), i);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, token: &str) -> Option<&ResourceEntry> {
        self.lookup(token).map(|(entry, _)| entry)
    }

    pub fn lookup(&self, token: &str) -> Option<(&ResourceEntry, MatchRule)> {
        let token = token.trim();
        if token.is_empty() || self.entries.is_empty() {
            return None;
        }
        let candidates = token_candidates(token);

        let found = candidates
            .iter()
            .find_map(|c| self.by_name.get(*c).map(|&i| (i, MatchRule::Exact)))
            .or_else(|| {
                candidates.iter().find_map(|c| {
                    let base = basename(c).to_lowercase();
                    self.by_basename
                        .get(&base)
                        .map(|&i| (i, MatchRule::FinalSegment))
                })
            })
            .or_else(|| {
                candidates.iter().find_map(|c| {
                    let base = basename(c);
                    if base.is_empty() {
                        return None;
                    }
                    self.by_stem
                        .get(&stem(base).to_lowercase())
                        .map(|&i| (i, MatchRule::Stem))
                })
            });

        found.map(|(i, rule)| (&self.entries[i], rule))
    }

    /// True when some entry's file name equals `name`, ignoring case.
    pub fn has_basename(&self, name: &str) -> bool {
        self.by_basename.contains_key(&name.to_lowercase())
    }
}

/// Forms of a reference token worth trying, most specific first: as given,
/// without query string or fragment, and without a scheme such as
/// `embedded:`.
fn token_candidates(token: &str) -> Vec<&str> {
    let bare = token.split(['?', '#']).next().unwrap_or(token);
    let unschemed = match bare.split_once(':') {
        Some((scheme, rest)) if !scheme.contains('/') => Some(rest),
        _ => None,
    };

    let mut out = vec![token];
    let extra = [
        Some(bare),
        unschemed.map(|r| r.trim_start_matches('/')),
        unschemed,
    ];
    for c in extra.into_iter().flatten() {
        let c = c.trim();
        if !c.is_empty() && !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((s, _)) if !s.is_empty() => s,
        _ => name,
    }
}
