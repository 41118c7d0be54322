//! Field resolution for provider line items.
//!
//! Providers rename fields between API generations. Each logical attribute
//! has an ordered list of candidates: the primary field name first, then one
//! alternate (a renamed field or a value derived from other fields). The first
//! candidate that resolves wins; if none do the attribute is 0.0 and a
//! data-quality event is recorded.

use crate::domain::StatementEntry;
use crate::quality::{QualityCategory, QualityLog};

/// One way of obtaining a value from a statement entry.
#[derive(Debug, Clone, Copy)]
pub enum Candidate {
    /// Read a field by name.
    Field(&'static str),
    /// Compute from other fields. `label` describes the formula for logs.
    Derived {
        label: &'static str,
        compute: fn(&StatementEntry) -> Option<f64>,
    },
}

impl Candidate {
    fn evaluate(&self, entry: &StatementEntry) -> Option<f64> {
        match self {
            Candidate::Field(name) => entry.get(name),
            Candidate::Derived { compute, .. } => compute(entry).filter(|v| v.is_finite()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Candidate::Field(name) => *name,
            Candidate::Derived { label, .. } => *label,
        }
    }
}

/// A logical attribute and the candidates tried for it, in order.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub attribute: &'static str,
    pub candidates: &'static [Candidate],
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Primary,
    Alternate(&'static str),
    Default,
}

/// A resolved attribute value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub value: f64,
    pub source: Source,
}

impl FieldSpec {
    /// Resolve against `entry` without side effects.
    pub fn resolve(&self, entry: &StatementEntry) -> Resolved {
        for (i, candidate) in self.candidates.iter().enumerate() {
            if let Some(value) = candidate.evaluate(entry) {
                let source = if i == 0 {
                    Source::Primary
                } else {
                    Source::Alternate(candidate.label())
                };
                return Resolved { value, source };
            }
        }
        Resolved {
            value: 0.0,
            source: Source::Default,
        }
    }

    /// Resolve and record a `FieldMissing` event when the primary field was absent.
    pub fn resolve_logged(&self, ticker: &str, entry: &StatementEntry, log: &QualityLog) -> f64 {
        let resolved = self.resolve(entry);
        match resolved.source {
            Source::Primary => {}
            Source::Alternate(label) => log.record(
                ticker,
                QualityCategory::FieldMissing,
                format!(
                    "missing {} for {} ({}), used {label}",
                    self.attribute, ticker, entry.date
                ),
            ),
            Source::Default => log.record(
                ticker,
                QualityCategory::FieldMissing,
                format!(
                    "missing {} for {} ({}), defaulted to 0",
                    self.attribute, ticker, entry.date
                ),
            ),
        }
        resolved.value
    }
}

fn current_assets_from_non_current(entry: &StatementEntry) -> Option<f64> {
    Some(entry.get("totalAssets")? - entry.get("totalNonCurrentAssets")?)
}

fn intangibles_from_tangible(entry: &StatementEntry) -> Option<f64> {
    let total_liab = TOTAL_LIABILITIES.resolve(entry);
    if total_liab.source == Source::Default {
        return None;
    }
    Some(entry.get("totalAssets")? - entry.get("netTangibleAssets")? - total_liab.value)
}

pub const TOTAL_CURRENT_ASSETS: FieldSpec = FieldSpec {
    attribute: "totalCurrentAssets",
    candidates: &[
        Candidate::Field("totalCurrentAssets"),
        Candidate::Derived {
            label: "totalAssets - totalNonCurrentAssets",
            compute: current_assets_from_non_current,
        },
    ],
};

pub const TOTAL_CURRENT_LIABILITIES: FieldSpec = FieldSpec {
    attribute: "totalCurrentLiabilities",
    candidates: &[
        Candidate::Field("totalCurrentLiabilities"),
        Candidate::Field("currentLiabilities"),
    ],
};

pub const CASH: FieldSpec = FieldSpec {
    attribute: "cash",
    candidates: &[
        Candidate::Field("cash"),
        Candidate::Field("cashAndCashEquivalents"),
    ],
};

pub const ACCOUNTS_PAYABLE: FieldSpec = FieldSpec {
    attribute: "accountsPayable",
    candidates: &[Candidate::Field("accountsPayable")],
};

pub const TOTAL_ASSETS: FieldSpec = FieldSpec {
    attribute: "totalAssets",
    candidates: &[Candidate::Field("totalAssets")],
};

pub const INTANGIBLE_ASSETS: FieldSpec = FieldSpec {
    attribute: "intangibleAssets",
    candidates: &[
        Candidate::Field("intangibleAssets"),
        Candidate::Derived {
            label: "totalAssets - netTangibleAssets - totalLiab",
            compute: intangibles_from_tangible,
        },
    ],
};

pub const LONG_TERM_DEBT: FieldSpec = FieldSpec {
    attribute: "longTermDebt",
    candidates: &[Candidate::Field("longTermDebt")],
};

pub const TOTAL_LIABILITIES: FieldSpec = FieldSpec {
    attribute: "totalLiab",
    candidates: &[
        Candidate::Field("totalLiab"),
        Candidate::Field("totalLiabilitiesNetMinorityInterest"),
    ],
};

pub const EBIT: FieldSpec = FieldSpec {
    attribute: "ebit",
    candidates: &[Candidate::Field("ebit")],
};
