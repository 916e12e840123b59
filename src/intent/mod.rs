//! Quantity and freshness intent resolution.
//!
//! Maps "a few papers", "a batch", "as many as possible", "latest", "last N
//! years" and "since YEAR" style requests onto a deterministic download
//! target, sort order and publication-year filter.
//!
//! Precedence, strongest first:
//!
//! 1. An explicit target count beats the quantity tier (`few` = 5,
//!    `batch` = 20, `max` = configured ceiling; `batch` when unspecified).
//! 2. An explicit from-year beats years-back; `latest` alone means the last
//!    3 years.
//! 3. Any active year filter forces newest-first sorting.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::models::SortKey;

/// Years covered by `latest` when no window is given
pub const DEFAULT_YEARS_BACK: i32 = 3;

/// Named quantity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityMode {
    /// About five papers
    Few,
    /// About twenty papers
    #[default]
    Batch,
    /// As many as possible under the configured ceiling
    Max,
}

impl QuantityMode {
    /// Default download target for this tier
    pub fn default_target(&self, max_ceiling: usize) -> usize {
        match self {
            QuantityMode::Few => 5,
            QuantityMode::Batch => 20,
            QuantityMode::Max => max_ceiling.max(1),
        }
    }

    /// Default (search cap, attempt cap) for this tier
    fn default_caps(&self) -> (usize, usize) {
        match self {
            QuantityMode::Few => (30, 20),
            QuantityMode::Batch => (120, 80),
            QuantityMode::Max => (300, 300),
        }
    }
}

impl std::fmt::Display for QuantityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuantityMode::Few => "few",
            QuantityMode::Batch => "batch",
            QuantityMode::Max => "max",
        };
        f.write_str(s)
    }
}

/// Where the download target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Explicit number from the caller
    Explicit,
    /// Default of the named tier
    Tier,
}

/// Resolved quantity policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityIntent {
    pub target: usize,
    pub mode: QuantityMode,
    pub provenance: Provenance,
}

/// Resolved freshness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessFilter {
    /// Inclusive lower publication-year bound
    pub from_year: Option<i32>,

    /// Sort key to request
    pub sort: SortKey,

    /// Whether a freshness filter is active
    pub latest: bool,
}

/// Raw intent as expressed by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Explicit download target
    pub target: Option<usize>,

    /// Named tier
    pub quantity_mode: Option<QuantityMode>,

    /// Prefer recent papers
    pub latest: bool,

    /// Relative window in years
    pub years_back: Option<u32>,

    /// Explicit inclusive lower year
    pub from_year: Option<i32>,

    /// Requested sort; ignored while a year filter is active
    pub sort: Option<SortKey>,

    /// Override for the number of search entries scanned
    pub max_search_results: Option<usize>,

    /// Override for the number of identifiers attempted
    pub max_attempts: Option<usize>,

    /// Hard cap on new downloads in one run
    pub max_success: Option<usize>,
}

/// Fully resolved, deterministic policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub quantity: QuantityIntent,
    pub freshness: FreshnessFilter,

    /// Maximum search entries to scan
    pub search_cap: usize,

    /// Maximum identifiers to attempt
    pub attempt_cap: usize,

    /// Stop once this many new files were written, whatever the stop policy
    pub success_cap: Option<usize>,
}

impl IntentRequest {
    /// Resolve against the current calendar year
    pub fn resolve_now(&self, max_ceiling: usize) -> ResolvedPolicy {
        self.resolve(chrono::Local::now().year(), max_ceiling)
    }

    /// Resolve against a given year
    pub fn resolve(&self, current_year: i32, max_ceiling: usize) -> ResolvedPolicy {
        let quantity = self.resolve_quantity(max_ceiling);
        let freshness = self.resolve_freshness(current_year);
        let (search_cap, attempt_cap) = self.resolve_caps(&quantity);

        ResolvedPolicy {
            quantity,
            freshness,
            search_cap,
            attempt_cap,
            success_cap: self.max_success.filter(|m| *m > 0),
        }
    }

    fn resolve_quantity(&self, max_ceiling: usize) -> QuantityIntent {
        let mode = self.quantity_mode.unwrap_or_default();
        match self.target.filter(|t| *t > 0) {
            Some(target) => QuantityIntent {
                target,
                mode,
                provenance: Provenance::Explicit,
            },
            None => QuantityIntent {
                target: mode.default_target(max_ceiling),
                mode,
                provenance: Provenance::Tier,
            },
        }
    }

    fn resolve_freshness(&self, current_year: i32) -> FreshnessFilter {
        let from_year = match (self.from_year.filter(|y| *y > 0), self.years_back) {
            (Some(year), _) => Some(year),
            (None, Some(back)) => {
                Some(current_year.saturating_sub(i32::try_from(back).unwrap_or(i32::MAX)))
            }
            (None, None) if self.latest => Some(current_year - DEFAULT_YEARS_BACK),
            (None, None) => None,
        };

        let sort = if from_year.is_some() {
            SortKey::Date
        } else {
            self.sort.unwrap_or_default()
        };

        FreshnessFilter {
            from_year,
            sort,
            latest: from_year.is_some(),
        }
    }

    fn resolve_caps(&self, quantity: &QuantityIntent) -> (usize, usize) {
        let (mut search_cap, mut attempt_cap) = match quantity.provenance {
            Provenance::Explicit => {
                let t = quantity.target;
                (
                    t.saturating_mul(4).clamp(30, 600),
                    t.saturating_mul(3).clamp(20, 500),
                )
            }
            Provenance::Tier => quantity.mode.default_caps(),
        };

        if let Some(max) = self.max_search_results.filter(|m| *m > 0) {
            search_cap = max;
        }
        if let Some(max) = self.max_attempts.filter(|m| *m > 0) {
            attempt_cap = max;
        }

        // a caller-supplied cap may shrink the pool below the target; the
        // orchestrator reports that as insufficient results
        if self.max_attempts.is_none() {
            attempt_cap = attempt_cap.max(quantity.target);
        }
        if self.max_search_results.is_none() {
            search_cap = search_cap.max(attempt_cap);
        }

        (search_cap.max(1), attempt_cap.max(1))
    }
}
