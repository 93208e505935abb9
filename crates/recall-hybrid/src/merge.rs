//! Collapse per-backend answers into one ranked list.
//!
//! Results sharing a content key keep only their best scoring copy, but the
//! names of every backend that surfaced the content are retained. Scores are
//! compared as-is: each backend's scale is its own and no calibration is
//! attempted. Ties order by position within the backend's own list, then by
//! backend name.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use recall_core::types::SearchResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub surfaced_by: Vec<String>,
}

struct Candidate<'a> {
    result: &'a SearchResult,
    rank: usize,
}

impl Candidate<'_> {
    fn order(&self, other: &Self) -> Ordering {
        self.result
            .score
            .total_cmp(&other.result.score)
            .then(self.rank.cmp(&other.rank))
            .then_with(|| self.result.backend.cmp(&other.result.backend))
    }
}

pub fn merge<'a, I>(per_backend: I, limit: usize) -> Vec<RankedResult>
where
    I: IntoIterator<Item = &'a [SearchResult]>,
{
    let mut groups: HashMap<&str, (Candidate<'a>, BTreeSet<&str>)> = HashMap::new();
    for results in per_backend {
        for (rank, result) in results.iter().enumerate() {
            let candidate = Candidate { result, rank };
            match groups.get_mut(result.content_key.as_str()) {
                Some((best, seen)) => {
                    seen.insert(result.backend.as_str());
                    if candidate.order(best) == Ordering::Less {
                        *best = candidate;
                    }
                }
                None => {
                    let seen = BTreeSet::from([result.backend.as_str()]);
                    groups.insert(result.content_key.as_str(), (candidate, seen));
                }
            }
        }
    }

    let mut ranked: Vec<(Candidate<'a>, BTreeSet<&str>)> = groups.into_values().collect();
    ranked.sort_by(|a, b| a.0.order(&b.0));
    ranked
        .into_iter()
        .take(limit)
        .map(|(best, seen)| RankedResult {
            result: best.result.clone(),
            surfaced_by: seen.into_iter().map(str::to_string).collect(),
        })
        .collect()
}
