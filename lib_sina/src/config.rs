//! Shared, immutable configuration threaded into every stage constructor.
//!
//! Mirrors the "process-global option struct becomes an explicit value
//! constructed once at startup" design note: nothing here is process-global,
//! it is built once by the caller (typically the CLI) and cloned or borrowed
//! into each stage.

#[cfg(feature = "config-toml")]
pub mod io;

use crate::base::IupacRule;

/// How duplicate-column entries produced by backtrack are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum InsertionPolicy {
    /// Spread duplicates into neighboring free columns after backtrack.
    Shift,
    /// Bound successive insertions during the DP itself via a per-cell counter.
    Forbid,
    /// Drop duplicate entries after backtrack.
    Remove,
}

/// How query bases that fall outside the alignable reference region are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum OverhangPolicy {
    /// Place overhanging bases at the nearest reference column.
    Attach,
    /// Drop overhanging bases entirely.
    Remove,
    /// Place overhanging bases outside the reference region (columns < 0 or >= W).
    Edge,
}

/// Which bases get marked lowercase in the projected alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum LowercasePolicy {
    /// Never change case.
    None,
    /// Preserve whatever case the input had.
    Original,
    /// Lowercase bases that ended up unaligned (overhang or shifted duplicates).
    Unaligned,
}

/// Orientation check performed before family selection / search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum TurnPolicy {
    None,
    RevComp,
    All,
}

/// Distance-correction applied to raw identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum DistType {
    None,
    JukesCantor,
}

/// What an identity/distance score is computed relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum CoverType {
    Absolute,
    Query,
    Target,
    Overlap,
    All,
    Average,
    Min,
    Max,
    NoGap,
}

/// Which reference-search engine backs family selection and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum SearchEngine {
    KmerIndex,
    ArbPt,
}

/// Scoring constants and DP/backtrack policy selection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct AlignmentConfig {
    pub insertion_policy: InsertionPolicy,
    pub overhang: OverhangPolicy,
    pub lowercase: LowercasePolicy,
    pub match_score: f32,
    pub mismatch_score: f32,
    pub gap_open: f32,
    pub gap_extend: f32,
    pub family_weight: f32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            insertion_policy: InsertionPolicy::Shift,
            overhang: OverhangPolicy::Attach,
            lowercase: LowercasePolicy::Unaligned,
            match_score: 1.0,
            mismatch_score: -1.0,
            gap_open: 5.0,
            gap_extend: 2.0,
            family_weight: 1.0,
        }
    }
}

/// Knobs controlling family enlargement (C5, §4.4).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct FamilySelectorConfig {
    pub min: usize,
    pub max: usize,
    pub min_len: u32,
    pub max_score: f32,
    pub max_score_max: f32,
    pub required_full_length: usize,
    pub full_length_slack: u32,
    pub required_gaps: u32,
    pub leave_query_out: bool,
    pub no_id: bool,
    pub cover_gene: bool,
    pub k: u32,
    pub turn: TurnPolicy,
}

impl Default for FamilySelectorConfig {
    fn default() -> Self {
        FamilySelectorConfig {
            min: 10,
            max: 40,
            min_len: 0,
            max_score: 1.0,
            max_score_max: 1.0,
            required_full_length: 0,
            full_length_slack: 0,
            required_gaps: 0,
            leave_query_out: false,
            no_id: false,
            cover_gene: false,
            k: 10,
            turn: TurnPolicy::None,
        }
    }
}

/// Knobs controlling search/classify (C10, §4.9).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct SearchConfig {
    pub engine: SearchEngine,
    pub num_results: usize,
    pub iupac_rule: IupacRule,
    pub dist: DistType,
    pub cover: CoverType,
    pub lca_quorum: f32,
    pub lca_fields: Vec<String>,
    pub copy_fields: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            engine: SearchEngine::KmerIndex,
            num_results: 10,
            iupac_rule: IupacRule::Optimistic,
            dist: DistType::None,
            cover: CoverType::Overlap,
            lca_quorum: 0.7,
            lca_fields: Vec::new(),
            copy_fields: Vec::new(),
        }
    }
}
