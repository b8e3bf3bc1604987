use crate::config::{MappingConfig, MappingRule, UnmappedPolicy};
use crate::error::PipelineError;
use crate::models::{CategoryId, Taxonomy};
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Outcome of mapping one raw label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMapping {
    Mapped(CategoryId),
    /// No rule matched; the value goes to the unmapped bucket
    Bucketed(CategoryId),
    /// Summary row, excluded before mapping
    Total,
    /// Listed in the dataset's exclusions
    Excluded,
    /// No rule matched and the dataset drops unknown labels
    Unmapped,
}

#[derive(Debug, Clone)]
enum Matcher {
    Contains(String),
    Pattern(Regex),
}

impl Matcher {
    fn is_match(&self, label: &str, lowered: &str) -> bool {
        match self {
            Matcher::Contains(needle) => lowered.contains(needle.as_str()),
            Matcher::Pattern(regex) => regex.is_match(label),
        }
    }
}

/// Maps free-text source labels onto a dataset's taxonomy.
///
/// Exact lookup runs first (taxonomy names always map to themselves), then
/// substring and pattern rules in declaration order; the first match wins.
/// Exact and substring matching ignore case; patterns decide for themselves.
#[derive(Debug, Clone)]
pub struct CategoryMapper {
    taxonomy: Taxonomy,
    exact: HashMap<String, CategoryId>,
    rules: Vec<(Matcher, CategoryId)>,
    unmapped: Option<CategoryId>,
    total_marker: Option<(String, bool)>,
    excluded: HashSet<String>,
}

impl CategoryMapper {
    pub fn from_config(config: &MappingConfig) -> Result<Self, PipelineError> {
        let taxonomy = Taxonomy::new(&config.categories)?;

        let (taxonomy, unmapped) = match &config.unmapped {
            UnmappedPolicy::Other { bucket } => {
                let (taxonomy, id) = taxonomy.with_bucket(bucket);
                (taxonomy, Some(id))
            }
            UnmappedPolicy::Drop => (taxonomy, None),
        };

        let lookup = |category: &str| {
            taxonomy
                .position(category.trim())
                .ok_or_else(|| PipelineError::UnknownCategory(category.to_string()))
        };

        let mut exact: HashMap<String, CategoryId> = taxonomy
            .names()
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.to_lowercase(), CategoryId(idx)))
            .collect();

        for (label, category) in &config.labels {
            exact.insert(label.trim().to_lowercase(), lookup(category)?);
        }

        let mut rules = Vec::new();
        for rule in &config.rules {
            let id = lookup(rule.category())?;
            match rule {
                MappingRule::Exact { label, .. } => {
                    exact.insert(label.trim().to_lowercase(), id);
                }
                MappingRule::Contains { needle, .. } => {
                    rules.push((Matcher::Contains(needle.trim().to_lowercase()), id));
                }
                MappingRule::Pattern { regex, .. } => {
                    let compiled = Regex::new(regex).map_err(|source| {
                        PipelineError::InvalidPattern {
                            pattern: regex.clone(),
                            source,
                        }
                    })?;
                    rules.push((Matcher::Pattern(compiled), id));
                }
            }
        }

        let total_marker = config.total_marker.as_ref().map(|marker| {
            let text = if marker.case_sensitive {
                marker.marker.clone()
            } else {
                marker.marker.to_lowercase()
            };
            (text, marker.case_sensitive)
        });

        let excluded = config
            .exclude
            .iter()
            .map(|label| label.trim().to_lowercase())
            .collect();

        Ok(Self {
            taxonomy,
            exact,
            rules,
            unmapped,
            total_marker,
            excluded,
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Does this label mark an aggregate/summary row?
    pub fn is_total(&self, label: &str) -> bool {
        match &self.total_marker {
            Some((marker, true)) => label.contains(marker.as_str()),
            Some((marker, false)) => label.to_lowercase().contains(marker.as_str()),
            None => false,
        }
    }

    pub fn is_excluded(&self, label: &str) -> bool {
        !self.excluded.is_empty() && self.excluded.contains(&label.trim().to_lowercase())
    }

    /// Matching alone, without total exclusion or the unmapped policy.
    pub fn category_for(&self, label: &str) -> Option<CategoryId> {
        let label = label.trim();
        let lowered = label.to_lowercase();
        if let Some(id) = self.exact.get(&lowered) {
            return Some(*id);
        }

        self.rules
            .iter()
            .find(|(matcher, _)| matcher.is_match(label, &lowered))
            .map(|(_, id)| *id)
    }

    pub fn map_label(&self, label: &str) -> LabelMapping {
        if self.is_total(label) {
            return LabelMapping::Total;
        }
        if self.is_excluded(label) {
            return LabelMapping::Excluded;
        }
        match (self.category_for(label), self.unmapped) {
            (Some(id), _) => LabelMapping::Mapped(id),
            (None, Some(bucket)) => LabelMapping::Bucketed(bucket),
            (None, None) => LabelMapping::Unmapped,
        }
    }
}

/// First candidate containing `needle`, ignoring case. Candidates are tried
/// in the order given, which makes ambiguous substrings deterministic.
pub fn first_containing<'a, I>(needle: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = needle.to_lowercase();
    candidates
        .into_iter()
        .find(|candidate| candidate.to_lowercase().contains(&needle))
}
