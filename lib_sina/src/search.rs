//! Search and classify (C10, §4.9): ranks references against an aligned
//! query, derives an identity score, a nearest-relatives list, and an LCA
//! taxonomy classification.

use std::collections::HashMap;

use deterministic_default_hasher::DeterministicDefaultHasher;

use crate::base::IupacRule;
use crate::config::{CoverType, DistType, SearchConfig};
use crate::cseq::{Attribute, CSeq};
use crate::kmer::index::KmerIndex;
use crate::store::ReferenceStore;

/// One ranked hit against the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub name: String,
    pub accession: String,
    pub version: u32,
    pub start: u32,
    pub stop: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub nearest_relatives: String,
    pub classification: HashMap<String, String>,
    pub copied_fields: HashMap<String, Attribute>,
}

/// Ranks `store`'s sequences against `query` using `cfg`'s comparator,
/// shortlisting via `index` when present (falls back to an exhaustive scan
/// of the store otherwise).
pub fn search(query: &CSeq, store: &ReferenceStore, index: Option<&KmerIndex>, cfg: &SearchConfig) -> SearchResult {
    let query_bases: Vec<_> = query.entries().iter().map(|e| e.base).collect();
    let candidate_names: Vec<String> = match index {
        Some(index) => {
            let want = (cfg.num_results * 10).max(cfg.num_results);
            index
                .find(&query_bases, want, false)
                .into_iter()
                .filter_map(|(id, _)| index.names().get(id).cloned())
                .collect()
        }
        None => store.names(),
    };

    let mut scored: Vec<(String, CSeq, f32)> = Vec::new();
    for name in candidate_names {
        let Some(candidate) = store.get(&name) else {
            continue;
        };
        let score = identity(query, &candidate, cfg.iupac_rule, cfg.dist, cfg.cover);
        scored.push((name, candidate, score));
    }
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then_with(|| a.0.cmp(&b.0)));
    scored.truncate(cfg.num_results);

    let hits: Vec<SearchHit> = scored
        .iter()
        .map(|(name, cseq, score)| {
            let accession = match cseq.attribute("acc") {
                Some(Attribute::Str(s)) => s.clone(),
                _ => name.clone(),
            };
            let start = cseq.entries().first().map(|e| e.column).unwrap_or(0);
            let stop = cseq.entries().last().map(|e| e.column).unwrap_or(0);
            SearchHit {
                name: name.clone(),
                accession,
                version: 1,
                start,
                stop,
                score: *score,
            }
        })
        .collect();

    let nearest_relatives = hits
        .iter()
        .map(|h| format!("{}.{}.{}.{}~{:.4}", h.accession, h.version, h.start, h.stop, h.score))
        .collect::<Vec<_>>()
        .join(" ");

    let mut classification = HashMap::new();
    for field in &cfg.lca_fields {
        let paths: Vec<Vec<String>> = scored
            .iter()
            .filter_map(|(name, cseq, _)| {
                let _ = name;
                match cseq.attribute(field) {
                    Some(Attribute::Str(s)) => Some(s.split(';').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()),
                    _ => None,
                }
            })
            .collect();
        classification.insert(field.clone(), lca_classify(&paths, cfg.lca_quorum));
    }

    let mut copied_fields = HashMap::new();
    for field in &cfg.copy_fields {
        for (_, cseq, _) in &scored {
            if let Some(value) = cseq.attribute(field) {
                copied_fields.insert(field.clone(), value.clone());
                break;
            }
        }
    }

    SearchResult {
        hits,
        nearest_relatives,
        classification,
        copied_fields,
    }
}

/// Consensus taxonomy path: at each depth, keep the name shared by at least
/// `(1 - quorum)` of the paths that reach that depth; stop (and report
/// `Unclassified;`) at the first level without consensus.
fn lca_classify(paths: &[Vec<String>], quorum: f32) -> String {
    if paths.is_empty() {
        return "Unclassified;".to_string();
    }
    let n = paths.len() as f32;
    let threshold = ((1.0 - quorum) * n).ceil().max(1.0) as usize;
    let max_depth = paths.iter().map(|p| p.len()).max().unwrap_or(0);

    let mut result = String::new();
    for depth in 0..max_depth {
        let mut counts: HashMap<&str, usize, DeterministicDefaultHasher> = HashMap::default();
        for path in paths {
            if let Some(name) = path.get(depth) {
                *counts.entry(name.as_str()).or_insert(0) += 1;
            }
        }
        let winner = counts.into_iter().filter(|&(_, c)| c >= threshold).max_by_key(|&(_, c)| c);
        match winner {
            Some((name, _)) => {
                result.push_str(name);
                result.push(';');
            }
            None => {
                if result.is_empty() {
                    return "Unclassified;".to_string();
                }
                return result;
            }
        }
    }
    result
}

/// Sequence identity between two aligned sequences over shared occupied
/// columns, under `rule`, `dist` correction and `cover` normalization.
fn identity(query: &CSeq, target: &CSeq, rule: IupacRule, dist: DistType, cover: CoverType) -> f32 {
    let query_cols: HashMap<u32, _> = query.entries().iter().map(|e| (e.column, e.base)).collect();
    let target_cols: HashMap<u32, _> = target.entries().iter().map(|e| (e.column, e.base)).collect();

    let mut matches = 0u32;
    let mut overlap = 0u32;
    for (&column, &base) in &query_cols {
        if let Some(&other) = target_cols.get(&column) {
            overlap += 1;
            if base.matches(other, rule) {
                matches += 1;
            }
        }
    }

    let denominator = match cover {
        CoverType::Absolute => query.width().max(1),
        CoverType::Query => query.len().max(1) as u32,
        CoverType::Target => target.len().max(1) as u32,
        CoverType::Overlap => overlap.max(1),
        CoverType::All => (query.len() + target.len()).max(1) as u32,
        CoverType::Average => ((query.len() + target.len()) / 2).max(1) as u32,
        CoverType::Min => query.len().min(target.len()).max(1) as u32,
        CoverType::Max => query.len().max(target.len()).max(1) as u32,
        CoverType::NoGap => overlap.max(1),
    };

    let raw = matches as f32 / denominator as f32;
    match dist {
        DistType::None => raw,
        DistType::JukesCantor => {
            let p = (1.0 - raw).clamp(0.0, 0.74);
            1.0 + 0.75 * (1.0 - (4.0 / 3.0) * p).max(1e-6).ln() / (4.0 / 3.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_from(name: &str, s: &[u8]) -> CSeq {
        let mut c = CSeq::new(name);
        c.append_str(s).unwrap();
        c
    }

    #[test]
    fn identical_sequences_score_one_under_overlap_cover() {
        let a = seq_from("a", b"AGCT");
        let b = seq_from("b", b"AGCT");
        let score = identity(&a, &b, IupacRule::Optimistic, DistType::None, CoverType::Overlap);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lca_classify_finds_shared_prefix_with_one_outlier() {
        let paths = vec![
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec!["A".to_string(), "B".to_string(), "D".to_string()],
            vec!["A".to_string(), "B".to_string(), "D".to_string()],
            vec!["A".to_string(), "E".to_string(), "F".to_string()],
        ];
        let classification = lca_classify(&paths, 0.7);
        assert_eq!(classification, "A;B;");
    }

    #[test]
    fn lca_classify_empty_is_unclassified() {
        assert_eq!(lca_classify(&[], 0.7), "Unclassified;");
    }

    #[test]
    fn nearest_relatives_formats_as_accession_version_bounds_score() {
        let dir = std::env::temp_dir().join(format!("sina-search-test-{}", std::process::id()));
        let store = ReferenceStore::open(dir.join("db.bin")).unwrap();
        store.put(seq_from("ref1", b"AGCT"));
        let query = seq_from("query", b"AGCT");
        let cfg = SearchConfig {
            num_results: 1,
            ..Default::default()
        };
        let result = search(&query, &store, None, &cfg);
        assert_eq!(result.hits.len(), 1);
        assert!(result.nearest_relatives.contains('~'));
    }
}
