//! Typed search filters and per-request options.
//!
//! [`SearchFilters`] is a closed struct rather than an open metadata map so
//! unknown filter keys cannot be silently ignored by a backend. Every field
//! other than `organization_id` is an optional restriction; restrictions are
//! AND-combined.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::ChunkRecord;
use crate::error::{Result, SearchError};

/// Inclusive publication-date window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DateRange {
    /// Earliest accepted date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Latest accepted date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }
}

/// Scoping criteria for a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchFilters {
    /// The organization whose documents are searched. Always required.
    pub organization_id: String,
    /// Restrict to a single document. Takes precedence over `document_ids`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Restrict to a set of documents.
    #[serde(default)]
    pub document_ids: Vec<String>,
    /// Restrict to these document types.
    #[serde(default)]
    pub document_types: Vec<String>,
    /// Restrict to documents carrying any of these NAICS codes.
    #[serde(default)]
    pub naics_codes: Vec<String>,
    /// Restrict to documents carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Restrict to documents published inside this window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl SearchFilters {
    /// Filters scoped to an organization with no further restriction.
    pub fn for_organization(organization_id: impl Into<String>) -> Self {
        Self { organization_id: organization_id.into(), ..Self::default() }
    }

    /// Restrict to a single document.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Restrict to a set of documents.
    pub fn with_document_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a set of document types.
    pub fn with_document_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a set of NAICS codes.
    pub fn with_naics_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.naics_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a set of tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a publication-date window.
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Whether the search is scoped to exactly one document.
    pub fn is_document_scoped(&self) -> bool {
        self.document_id.is_some() || self.document_ids.len() == 1
    }

    /// The document restriction after applying precedence: a single
    /// `document_id` wins over `document_ids`. `None` means unrestricted.
    pub fn effective_document_ids(&self) -> Option<Vec<String>> {
        match &self.document_id {
            Some(id) => Some(vec![id.clone()]),
            None if !self.document_ids.is_empty() => Some(self.document_ids.clone()),
            None => None,
        }
    }

    /// Total number of values across all set-valued restrictions.
    pub fn value_count(&self) -> usize {
        self.document_ids.len()
            + self.document_types.len()
            + self.naics_codes.len()
            + self.tags.len()
            + usize::from(self.document_id.is_some())
    }

    /// Canonical form: sets sorted and de-duplicated so equivalent filters
    /// compare and serialize identically.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        for set in [&mut out.document_ids, &mut out.document_types, &mut out.naics_codes, &mut out.tags]
        {
            set.sort();
            set.dedup();
        }
        out
    }

    /// Check the filters for caller errors.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidRequest`] if the organization is missing,
    /// a set contains an empty value, or the date range is inverted.
    pub fn validate(&self) -> Result<()> {
        if self.organization_id.trim().is_empty() {
            return Err(SearchError::InvalidRequest("organization_id is required".to_string()));
        }
        if self.document_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(SearchError::InvalidRequest("document_id must not be empty".to_string()));
        }
        for (name, set) in [
            ("document_ids", &self.document_ids),
            ("document_types", &self.document_types),
            ("naics_codes", &self.naics_codes),
            ("tags", &self.tags),
        ] {
            if set.iter().any(|v| v.trim().is_empty()) {
                return Err(SearchError::InvalidRequest(format!(
                    "{name} must not contain empty values"
                )));
            }
        }
        if let Some(DateRange { from: Some(from), to: Some(to) }) = self.date_range {
            if from > to {
                return Err(SearchError::InvalidRequest(format!(
                    "date_range.from ({from}) is after date_range.to ({to})"
                )));
            }
        }
        Ok(())
    }

    /// Evaluate the filters against a record. Used by backends that filter
    /// in process.
    pub fn matches(&self, record: &ChunkRecord) -> bool {
        if record.organization_id != self.organization_id {
            return false;
        }
        if let Some(ids) = self.effective_document_ids() {
            if !ids.contains(&record.document_id) {
                return false;
            }
        }
        if !self.document_types.is_empty() {
            match &record.document_type {
                Some(t) if self.document_types.contains(t) => {}
                _ => return false,
            }
        }
        if !self.naics_codes.is_empty()
            && !record.naics_codes.iter().any(|c| self.naics_codes.contains(c))
        {
            return false;
        }
        if !self.tags.is_empty() && !record.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if let Some(range) = &self.date_range {
            match record.published_at {
                Some(at) if range.contains(at) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Per-request behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    /// Number of results to return.
    pub top_k: usize,
    /// Minimum vector similarity for a result to be returned.
    pub min_score: f32,
    /// Whether to carry index metadata into results.
    pub include_metadata: bool,
    /// Apply the keyword-density rerank to the candidate set.
    pub rerank: bool,
    /// Fuse vector and keyword scores; requires `keywords`.
    pub hybrid: bool,
    /// Keywords for hybrid fusion.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Weight of the vector score in hybrid fusion.
    pub vector_weight: f32,
    /// Weight of the keyword score in hybrid fusion.
    pub keyword_weight: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.3,
            include_metadata: true,
            rerank: false,
            hybrid: false,
            keywords: Vec::new(),
            vector_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

impl SearchOptions {
    /// Set the number of results to return.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the minimum similarity score.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Enable or disable the keyword-density rerank.
    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    /// Include or drop index metadata in results.
    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    /// Enable hybrid fusion with the given keywords and weights.
    pub fn with_hybrid<I, S>(mut self, keywords: I, vector_weight: f32, keyword_weight: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hybrid = true;
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self.vector_weight = vector_weight;
        self.keyword_weight = keyword_weight;
        self
    }

    /// Number of candidates to fetch from a backend before post-processing.
    pub fn candidate_count(&self) -> usize {
        if self.rerank { self.top_k.saturating_mul(3) } else { self.top_k }
    }

    /// Canonical form: keywords lower-cased, sorted and de-duplicated.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        out.keywords = out.keywords.iter().map(|k| k.trim().to_lowercase()).collect();
        out.keywords.sort();
        out.keywords.dedup();
        out
    }

    /// Check the options for caller errors.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidRequest`] on an out-of-range `top_k`,
    /// `min_score` or weight, or hybrid fusion without keywords.
    pub fn validate(&self, max_top_k: usize) -> Result<()> {
        if self.top_k == 0 || self.top_k > max_top_k {
            return Err(SearchError::InvalidRequest(format!(
                "top_k must be between 1 and {max_top_k}, got {}",
                self.top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(SearchError::InvalidRequest(format!(
                "min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        for weight in [self.vector_weight, self.keyword_weight] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::InvalidRequest(format!(
                    "weights must be finite and not negative, got {weight}"
                )));
            }
        }
        // Small tolerance so 0.7 + 0.3 does not trip on float rounding.
        if self.vector_weight + self.keyword_weight > 1.0 + 1e-6 {
            return Err(SearchError::InvalidRequest(format!(
                "vector_weight + keyword_weight must not exceed 1, got {}",
                self.vector_weight + self.keyword_weight
            )));
        }
        if self.hybrid && self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(SearchError::InvalidRequest(
                "hybrid search requires at least one keyword".to_string(),
            ));
        }
        Ok(())
    }
}
