//! Pattern search over simulation records.

use crate::error::CacheError;
use crate::store::record::SimulationRecord;
use crate::types::SearchField;
use regex::Regex;

/// A search over the records of a store.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Regular expressions, matched anywhere in a field value
    pub patterns: Vec<String>,
    /// Fields the patterns are evaluated against
    pub fields: Vec<SearchField>,
    /// Fail unless exactly one record matches
    pub unique: bool,
    /// Every pattern must match (AND) instead of any pattern (OR)
    pub exclusive: bool,
}

impl SearchQuery {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            fields: SearchField::ALL.to_vec(),
            unique: false,
            exclusive: false,
        }
    }

    pub fn fields(mut self, fields: impl Into<Vec<SearchField>>) -> Self {
        self.fields = fields.into();
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn compile(&self) -> Result<CompiledQuery, CacheError> {
        let patterns = self
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledQuery {
            patterns,
            fields: self.fields.clone(),
            exclusive: self.exclusive,
        })
    }

    /// Apply the uniqueness and emptiness rules to a list of matches.
    pub fn finish(&self, matches: Vec<SimulationRecord>) -> Result<Vec<SimulationRecord>, CacheError> {
        if matches.is_empty() {
            return Err(CacheError::NoSimulationFound(self.patterns.clone()));
        }
        if self.unique && matches.len() > 1 {
            return Err(CacheError::ResultNotUnique(matches.len()));
        }
        Ok(matches)
    }
}

/// A query with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    patterns: Vec<Regex>,
    fields: Vec<SearchField>,
    exclusive: bool,
}

impl CompiledQuery {
    fn pattern_hits(&self, pattern: &Regex, record: &SimulationRecord) -> bool {
        self.fields.iter().any(|field| {
            record
                .field_values(*field)
                .iter()
                .any(|value| pattern.is_match(value))
        })
    }

    pub fn matches(&self, record: &SimulationRecord) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        if self.exclusive {
            self.patterns.iter().all(|p| self.pattern_hits(p, record))
        } else {
            self.patterns.iter().any(|p| self.pattern_hits(p, record))
        }
    }
}
