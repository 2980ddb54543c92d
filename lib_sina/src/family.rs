//! Family selector (C5, §4.4): turns a query into a scored candidate set
//! suitable for building a reference graph, enlarging the k-mer search
//! window until the family composition constraints are satisfied.

use crate::base::{Base, IupacRule};
use crate::config::{FamilySelectorConfig, TurnPolicy};
use crate::cseq::CSeq;
use crate::kmer::index::{KmerIndex, Orientation};
use crate::store::ReferenceStore;

/// One accepted family member, alongside the k-mer score that justified it.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyMember {
    pub cseq: CSeq,
    pub score: f32,
}

/// Why a candidate was dropped, for the per-sequence log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort,
    SameName,
    Superstring,
    TooSimilar,
    InsufficientGaps,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RejectReason::TooShort => "too-short",
            RejectReason::SameName => "same-name",
            RejectReason::Superstring => "superstring",
            RejectReason::TooSimilar => "too-similar",
            RejectReason::InsufficientGaps => "insufficient-gaps",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct FamilyResult {
    pub members: Vec<FamilyMember>,
    pub orientation: Orientation,
    pub log: Vec<String>,
}

/// Builds the family for `query_name`/`query_bases` against `index`, pulling
/// full sequences from `store`. Enlarges the candidate window
/// (`2*max`, then `*10` each round) until the composition constraints are
/// satisfied or the index is exhausted.
pub fn select_family(
    query_name: &str,
    query_bases: &[Base],
    index: &KmerIndex,
    store: &ReferenceStore,
    cfg: &FamilySelectorConfig,
) -> FamilyResult {
    let (orientation, _) = match cfg.turn {
        TurnPolicy::None => (Orientation::Original, Vec::new()),
        TurnPolicy::All => index.turn_check(query_bases, cfg.max.max(1), false),
        TurnPolicy::RevComp => {
            let fwd = index.find(query_bases, cfg.max.max(1), false);
            let fwd_top = fwd.first().map(|(_, s)| *s).unwrap_or(f32::MIN);
            let rc: Vec<Base> = query_bases.iter().rev().map(|b| b.complement()).collect();
            let rc_hits = index.find(&rc, cfg.max.max(1), false);
            let rc_top = rc_hits.first().map(|(_, s)| *s).unwrap_or(f32::MIN);
            if rc_top > fwd_top {
                (Orientation::ReverseComplemented, rc_hits)
            } else {
                (Orientation::Original, fwd)
            }
        }
    };
    let oriented_query: Vec<Base> = match orientation {
        Orientation::Original => query_bases.to_vec(),
        Orientation::Reversed => query_bases.iter().rev().copied().collect(),
        Orientation::Complemented => query_bases.iter().map(|b| b.complement()).collect(),
        Orientation::ReverseComplemented => {
            query_bases.iter().rev().map(|b| b.complement()).collect()
        }
    };

    let mut log = Vec::new();
    let mut want = (2 * cfg.max.max(1)).max(cfg.min * 2);
    let mut full_length_found = 0usize;
    let mut members: Vec<FamilyMember> = Vec::new();

    loop {
        members.clear();
        full_length_found = 0;
        log.clear();
        let candidates = index.find(&oriented_query, want, false);

        for (id, score) in &candidates {
            if members.len() >= cfg.max {
                break;
            }
            let Some(name) = index.names().get(*id) else {
                continue;
            };
            let Some(candidate) = store.get(name) else {
                continue;
            };

            if let Some(reason) = reject_reason(&candidate, query_name, &oriented_query, &members, cfg) {
                log.push(format!("{name}: rejected ({reason})"));
                continue;
            }

            let is_full_length = is_full_length_relative(&candidate, store.width());
            let need_more = members.len() < cfg.min;
            let need_full_length = is_full_length && full_length_found < cfg.required_full_length;
            let need_coverage = cfg.required_gaps > 0 && covers_ends(&candidate, store.width(), cfg.full_length_slack);
            let improves_floor = members.len() < cfg.max;

            if need_more || need_full_length || need_coverage || improves_floor {
                if is_full_length {
                    full_length_found += 1;
                }
                members.push(FamilyMember { cseq: candidate, score: *score });
            }
        }

        let exhausted = want >= index.size();
        if members.len() >= cfg.min || exhausted {
            break;
        }
        want = (want * 10).min(index.size());
    }

    let _ = full_length_found;
    FamilyResult {
        members,
        orientation,
        log,
    }
}

fn reject_reason(
    candidate: &CSeq,
    query_name: &str,
    query_bases: &[Base],
    accepted: &[FamilyMember],
    cfg: &FamilySelectorConfig,
) -> Option<RejectReason> {
    if candidate.len() < cfg.min_len as usize {
        return Some(RejectReason::TooShort);
    }
    if cfg.leave_query_out && candidate.name() == query_name {
        return Some(RejectReason::SameName);
    }
    if cfg.no_id {
        let ungapped: Vec<Base> = candidate.entries().iter().map(|e| e.base).collect();
        if contains_subsequence(&ungapped, query_bases) {
            return Some(RejectReason::Superstring);
        }
    }
    for member in accepted {
        if fractional_identity(candidate, &member.cseq) > cfg.max_score {
            return Some(RejectReason::TooSimilar);
        }
    }
    if let Some(last) = candidate.entries().last() {
        let tail_gap = (last.column + 1).saturating_sub(candidate.len() as u32);
        if tail_gap < cfg.required_gaps {
            return Some(RejectReason::InsufficientGaps);
        }
    }
    None
}

fn contains_subsequence(haystack: &[Base], needle: &[Base]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return needle.is_empty();
    }
    haystack.windows(needle.len()).any(|w| {
        w.iter().zip(needle.iter()).all(|(a, b)| a.matches(*b, IupacRule::Optimistic))
    })
}

/// Column-wise identity between two same-width aligned sequences, over
/// positions both occupy.
fn fractional_identity(a: &CSeq, b: &CSeq) -> f32 {
    use std::collections::HashMap;
    let at: HashMap<u32, Base> = b.entries().iter().map(|e| (e.column, e.base)).collect();
    let mut matches = 0u32;
    let mut total = 0u32;
    for e in a.entries() {
        if let Some(&other) = at.get(&e.column) {
            total += 1;
            if e.base.matches(other, IupacRule::Optimistic) {
                matches += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        matches as f32 / total as f32
    }
}

fn is_full_length_relative(cseq: &CSeq, width: u32) -> bool {
    if width == 0 {
        return false;
    }
    let Some(first) = cseq.entries().first() else {
        return false;
    };
    let Some(last) = cseq.entries().last() else {
        return false;
    };
    first.column <= width / 20 && last.column + 1 >= width - width / 20
}

fn covers_ends(cseq: &CSeq, width: u32, slack: u32) -> bool {
    if width == 0 {
        return false;
    }
    let Some(first) = cseq.entries().first() else {
        return false;
    };
    let Some(last) = cseq.entries().last() else {
        return false;
    };
    first.column <= slack && last.column + slack + 1 >= width
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bases(s: &[u8]) -> Vec<Base> {
        s.iter().map(|&b| Base::from_byte(b, 0).unwrap().unwrap()).collect()
    }

    fn seq_from(name: &str, s: &[u8]) -> CSeq {
        let mut c = CSeq::new(name);
        c.append_str(s).unwrap();
        c
    }

    #[test]
    fn too_short_is_rejected() {
        let candidate = seq_from("r", b"AG");
        let cfg = FamilySelectorConfig {
            min_len: 4,
            ..Default::default()
        };
        let reason = reject_reason(&candidate, "q", &bases(b"AGCT"), &[], &cfg);
        assert_eq!(reason, Some(RejectReason::TooShort));
    }

    #[test]
    fn same_name_rejected_when_leave_query_out() {
        let candidate = seq_from("q", b"AGCT");
        let cfg = FamilySelectorConfig {
            leave_query_out: true,
            ..Default::default()
        };
        let reason = reject_reason(&candidate, "q", &bases(b"AGCT"), &[], &cfg);
        assert_eq!(reason, Some(RejectReason::SameName));
    }

    #[test]
    fn superstring_rejected_when_no_id() {
        let candidate = seq_from("r", b"TTAGCTTT");
        let cfg = FamilySelectorConfig {
            no_id: true,
            ..Default::default()
        };
        let reason = reject_reason(&candidate, "q", &bases(b"AGCT"), &[], &cfg);
        assert_eq!(reason, Some(RejectReason::Superstring));
    }

    #[test]
    fn too_similar_rejected_against_accepted_member() {
        let a = seq_from("a", b"AGCT");
        let b = seq_from("b", b"AGCT");
        let cfg = FamilySelectorConfig {
            max_score: 0.5,
            ..Default::default()
        };
        let accepted = vec![FamilyMember { cseq: a, score: 1.0 }];
        let reason = reject_reason(&b, "q", &bases(b"AGCT"), &accepted, &cfg);
        assert_eq!(reason, Some(RejectReason::TooSimilar));
    }
}
