//! Identity resolver: one canonical roster across every source.
//!
//! RULES:
//!   - The identifier column and scheme of each source come from its
//!     `SourceBinding`; schemes are never inferred from values.
//!   - Two identifiers are the same customer iff they are literally equal
//!     after canonicalization AND share a scheme.
//!   - unified_ids are assigned scheme by scheme (five-digit, nine-digit,
//!     unresolved), values in sorted order, so identical input always
//!     yields identical ids.
//!   - Cross-scheme matching only proposes candidates. It never merges.

use crate::{
    config::PipelineConfig,
    event::PipelineEvent,
    table::{Table, Value},
    types::{IdScheme, SourceKind, UnifiedId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// First id handed out in every run.
pub const FIRST_UNIFIED_ID: UnifiedId = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCustomer {
    pub unified_id:           UnifiedId,
    pub original_id:          String,
    pub id_scheme:            IdScheme,
    pub contributing_sources: BTreeSet<SourceKind>,
    pub display_name:         Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerRoster {
    customers: Vec<CanonicalCustomer>,
    index:     HashMap<(IdScheme, String), UnifiedId>,
}

impl CustomerRoster {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalCustomer> {
        self.customers.iter()
    }

    pub fn get(&self, unified_id: UnifiedId) -> Option<&CanonicalCustomer> {
        let pos = unified_id.checked_sub(FIRST_UNIFIED_ID)? as usize;
        self.customers.get(pos)
    }

    /// Resolve a raw identifier cell under a scheme.
    pub fn lookup(&self, scheme: IdScheme, raw: &Value) -> Option<UnifiedId> {
        let id = canonical_id(raw)?;
        self.index.get(&(scheme, id)).copied()
    }

    pub fn count_scheme(&self, scheme: IdScheme) -> usize {
        self.customers.iter().filter(|c| c.id_scheme == scheme).count()
    }
}

/// Canonical text form of an identifier cell: trimmed, with spreadsheet
/// float artifacts (`12345.0`) reduced to the integer. Blank → `None`.
pub fn canonical_id(value: &Value) -> Option<String> {
    let key = value.key()?;
    if let Some(int_part) = key.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Some(int_part.to_string());
        }
    }
    Some(key)
}

/// Digit strings order numerically (shorter first), everything else after,
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IdSortKey {
    non_numeric: bool,
    digits:      usize,
    text:        String,
    // Keeps "0100" and "100" apart.
    raw:         String,
}

impl IdSortKey {
    fn new(id: &str) -> Self {
        let numeric = !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit());
        let trimmed = if numeric { id.trim_start_matches('0') } else { id };
        Self {
            non_numeric: !numeric,
            digits:      if numeric { trimmed.len() } else { 0 },
            text:        if numeric { trimmed.to_string() } else { id.to_string() },
            raw:         id.to_string(),
        }
    }
}

#[derive(Default)]
struct Discovered {
    original_id: String,
    sources:     BTreeSet<SourceKind>,
    name:        Option<String>,
}

pub struct IdentityResolver<'a> {
    config: &'a PipelineConfig,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn resolve(
        &self,
        tables: &BTreeMap<SourceKind, Table>,
    ) -> (CustomerRoster, Vec<PipelineEvent>) {
        let mut events = Vec::new();
        // Ordered sets give the deterministic assignment order for free.
        let mut discovered: BTreeMap<IdScheme, BTreeMap<IdSortKey, Discovered>> = BTreeMap::new();

        for (kind, table) in tables {
            let Some(binding) = self.config.binding(*kind) else {
                continue;
            };
            let Some(id_col) = table.column_index(&binding.id_column) else {
                continue;
            };
            let name_col = binding.name_column.as_deref().and_then(|n| table.column_index(n));

            let mut unattributable = 0usize;
            let mut mismatched: BTreeSet<String> = BTreeSet::new();
            let by_key = discovered.entry(binding.scheme).or_default();

            for row in &table.rows {
                let Some(id) = canonical_id(&row[id_col]) else {
                    unattributable += 1;
                    continue;
                };
                if let Some(expected) = binding.scheme.digit_count() {
                    let all_digits = id.bytes().all(|b| b.is_ascii_digit());
                    if !all_digits || id.len() != expected {
                        mismatched.insert(id.clone());
                    }
                }
                let entry = by_key.entry(IdSortKey::new(&id)).or_insert_with(|| Discovered {
                    original_id: id.clone(),
                    ..Default::default()
                });
                entry.sources.insert(*kind);
                if entry.name.is_none() {
                    entry.name = name_col
                        .and_then(|c| row[c].as_text())
                        .map(|n| n.trim().to_string());
                }
            }

            if unattributable > 0 {
                events.push(PipelineEvent::UnattributableRows {
                    source: *kind,
                    count:  unattributable,
                });
            }
            for original_id in mismatched {
                events.push(PipelineEvent::SchemeMismatch {
                    source: *kind,
                    original_id,
                    scheme: binding.scheme,
                });
            }
        }

        let mut roster = CustomerRoster::default();
        let mut next_id = FIRST_UNIFIED_ID;
        for (scheme, by_key) in discovered {
            for (_, found) in by_key {
                roster.index.insert((scheme, found.original_id.clone()), next_id);
                roster.customers.push(CanonicalCustomer {
                    unified_id:           next_id,
                    original_id:          found.original_id,
                    id_scheme:            scheme,
                    contributing_sources: found.sources,
                    display_name:         found.name,
                });
                next_id += 1;
            }
        }

        events.push(PipelineEvent::RosterResolved {
            customers:  roster.len(),
            five_digit: roster.count_scheme(IdScheme::FiveDigit),
            nine_digit: roster.count_scheme(IdScheme::NineDigit),
            unresolved: roster.count_scheme(IdScheme::Unresolved),
        });
        log::info!("identity: resolved {} canonical customers", roster.len());
        (roster, events)
    }
}

// ── Cross-scheme linking ─────────────────────────────────────────────────────

/// A proposed (never applied) link between a five-digit and a nine-digit
/// customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossLinkCandidate {
    pub five_digit: UnifiedId,
    pub nine_digit: UnifiedId,
    pub score:      f64,
    pub method:     String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossLinkReport {
    pub candidates: Vec<CrossLinkCandidate>,
    /// Customers with no cross-scheme candidate at all.
    pub unlinked:   Vec<UnifiedId>,
}

impl CrossLinkReport {
    pub fn build(roster: &CustomerRoster, matcher: &dyn CrossSchemeMatcher) -> Self {
        let candidates = matcher.candidates(roster);
        let linked: BTreeSet<UnifiedId> = candidates
            .iter()
            .flat_map(|c| [c.five_digit, c.nine_digit])
            .collect();
        let unlinked = roster
            .iter()
            .map(|c| c.unified_id)
            .filter(|id| !linked.contains(id))
            .collect();
        Self { candidates, unlinked }
    }
}

/// Best-effort proposer of cross-scheme identity links.
/// Implementations must not claim correctness; callers treat output as hints.
pub trait CrossSchemeMatcher {
    fn name(&self) -> &'static str;
    fn candidates(&self, roster: &CustomerRoster) -> Vec<CrossLinkCandidate>;
}

/// Matches nothing. Every customer ends up flagged as unlinked.
pub struct NoCrossLinking;

impl CrossSchemeMatcher for NoCrossLinking {
    fn name(&self) -> &'static str { "none" }

    fn candidates(&self, _roster: &CustomerRoster) -> Vec<CrossLinkCandidate> {
        Vec::new()
    }
}

/// Jaccard similarity over normalized customer-name tokens.
pub struct NameTokenMatcher {
    pub threshold: f64,
}

const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "llc", "ltd", "corp", "corporation", "co", "company", "gmbh", "plc", "sa", "ag", "the",
    "limited", "incorporated",
];

pub fn name_tokens(name: &str) -> BTreeSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !LEGAL_SUFFIXES.contains(&t.as_str()))
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

impl CrossSchemeMatcher for NameTokenMatcher {
    fn name(&self) -> &'static str { "name_tokens" }

    fn candidates(&self, roster: &CustomerRoster) -> Vec<CrossLinkCandidate> {
        let tokens_of = |scheme: IdScheme| -> Vec<(UnifiedId, BTreeSet<String>)> {
            roster
                .iter()
                .filter(|c| c.id_scheme == scheme)
                .filter_map(|c| {
                    let tokens = name_tokens(c.display_name.as_deref()?);
                    (!tokens.is_empty()).then_some((c.unified_id, tokens))
                })
                .collect()
        };
        let five = tokens_of(IdScheme::FiveDigit);
        let nine = tokens_of(IdScheme::NineDigit);

        let mut inverted: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, (_, tokens)) in nine.iter().enumerate() {
            for t in tokens {
                inverted.entry(t.as_str()).or_default().push(i);
            }
        }

        let mut out = Vec::new();
        for (five_id, tokens) in &five {
            let shared: BTreeSet<usize> = tokens
                .iter()
                .filter_map(|t| inverted.get(t.as_str()))
                .flatten()
                .copied()
                .collect();
            for i in shared {
                let (nine_id, nine_tokens) = &nine[i];
                let score = jaccard(tokens, nine_tokens);
                if score >= self.threshold {
                    out.push(CrossLinkCandidate {
                        five_digit: *five_id,
                        nine_digit: *nine_id,
                        score,
                        method: self.name().to_string(),
                    });
                }
            }
        }
        out
    }
}
