//! Keyword filter, relevance scoring and deterministic top-N selection.
//!
//! score = match_weight * |matched keywords| + recency_weight * recency(published_at)
//!
//! Ordering: score desc, published_at desc, source_id asc, fingerprint asc.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::model::{Paper, ScoredPaper};

/// How the recency bonus falls off with age. Both shapes give 1.0 for today's papers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RecencyDecay {
    /// Reaches 0 at `lookback_days` and stays there.
    Linear { lookback_days: u32 },
    /// Halves every `half_life_days`.
    Exponential { half_life_days: f64 },
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self::Linear { lookback_days: 7 }
    }
}

impl RecencyDecay {
    pub fn bonus(&self, published_at: NaiveDate, today: NaiveDate) -> f64 {
        // Future-dated records count as fresh.
        let age = (today - published_at).num_days().max(0) as f64;
        match *self {
            Self::Linear { lookback_days } => {
                let span = f64::from(lookback_days.max(1));
                (1.0 - age / span).max(0.0)
            }
            Self::Exponential { half_life_days } => {
                0.5f64.powf(age / half_life_days.max(f64::EPSILON))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterRank {
    include: Vec<String>,
    exclude: Vec<String>,
    /// Empty = no category restriction.
    categories: BTreeSet<String>,
    pub max_n: usize,
    pub match_weight: f64,
    pub recency_weight: f64,
    pub decay: RecencyDecay,
}

fn clean_keywords(list: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = list
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    set.into_iter().collect()
}

impl FilterRank {
    pub fn new(include: &[String], exclude: &[String], max_n: usize) -> Self {
        Self {
            include: clean_keywords(include),
            exclude: clean_keywords(exclude),
            categories: BTreeSet::new(),
            max_n,
            match_weight: 1.0,
            recency_weight: 0.5,
            decay: RecencyDecay::default(),
        }
    }

    pub fn with_weights(mut self, match_weight: f64, recency_weight: f64) -> Self {
        self.match_weight = match_weight.max(0.0);
        self.recency_weight = recency_weight.max(0.0);
        self
    }

    pub fn with_decay(mut self, decay: RecencyDecay) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_categories(mut self, categories: &[String]) -> Self {
        self.categories = clean_keywords(categories).into_iter().collect();
        self
    }

    fn category_allowed(&self, paper: &Paper) -> bool {
        self.categories.is_empty()
            || paper.categories.is_empty()
            || paper.categories.iter().any(|c| self.categories.contains(c))
    }

    /// `None` when the paper is filtered out; otherwise the matched include keywords.
    fn matches(&self, paper: &Paper) -> Option<BTreeSet<String>> {
        let text = paper.search_text();
        if self.exclude.iter().any(|k| text.contains(k.as_str())) {
            return None;
        }
        let matched: BTreeSet<String> = self
            .include
            .iter()
            .filter(|k| text.contains(k.as_str()))
            .cloned()
            .collect();
        if matched.is_empty() && !self.include.is_empty() {
            return None;
        }
        Some(matched)
    }

    pub fn score(&self, matched: usize, published_at: NaiveDate, today: NaiveDate) -> f64 {
        self.match_weight * matched as f64 + self.recency_weight * self.decay.bonus(published_at, today)
    }

    /// Filter, score, sort and truncate. Same input and `today` always give the same output.
    pub fn select(&self, papers: Vec<Paper>, today: NaiveDate) -> Vec<ScoredPaper> {
        let total = papers.len();
        let mut excluded = 0usize;
        let mut scored: Vec<ScoredPaper> = papers
            .into_iter()
            .filter_map(|paper| {
                if !self.category_allowed(&paper) {
                    excluded += 1;
                    return None;
                }
                let Some(matched_keywords) = self.matches(&paper) else {
                    excluded += 1;
                    return None;
                };
                let score = self.score(matched_keywords.len(), paper.published_at, today);
                Some(ScoredPaper {
                    paper,
                    score,
                    matched_keywords,
                })
            })
            .collect();

        scored.sort_by(compare);
        scored.truncate(self.max_n);

        counter!("digest_selected_total").increment(scored.len() as u64);
        tracing::info!(
            target: "rank",
            candidates = total,
            filtered = excluded,
            selected = scored.len(),
            "selection finished"
        );
        scored
    }
}

/// Total order used for selection.
pub fn compare(a: &ScoredPaper, b: &ScoredPaper) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.paper.published_at.cmp(&a.paper.published_at))
        .then_with(|| a.paper.source_id.cmp(&b.paper.source_id))
        .then_with(|| a.paper.fingerprint.cmp(&b.paper.fingerprint))
}

/// Select with default weights and decay.
pub fn select(
    papers: Vec<Paper>,
    keywords_include: &[String],
    keywords_exclude: &[String],
    max_n: usize,
    today: NaiveDate,
) -> Vec<ScoredPaper> {
    FilterRank::new(keywords_include, keywords_exclude, max_n).select(papers, today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fingerprint, SourceName};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn paper(id: &str, title: &str, published_at: NaiveDate) -> Paper {
        Paper {
            source_id: id.into(),
            source_name: SourceName::Arxiv,
            title: title.into(),
            abstract_text: String::new(),
            authors: vec![],
            published_at,
            url: String::new(),
            categories: BTreeSet::new(),
            doi: None,
            fingerprint: Fingerprint(format!("fp-{id}")),
        }
    }

    fn kw(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recency_bonus_decreases_with_age() {
        let today = d(2024, 5, 10);
        for decay in [
            RecencyDecay::Linear { lookback_days: 7 },
            RecencyDecay::Exponential { half_life_days: 2.0 },
        ] {
            let fresh = decay.bonus(today, today);
            let older = decay.bonus(d(2024, 5, 8), today);
            let oldest = decay.bonus(d(2024, 5, 1), today);
            assert_eq!(fresh, 1.0);
            assert!(fresh > older && older > oldest, "{decay:?}");
        }
        assert_eq!(RecencyDecay::default().bonus(d(2024, 5, 11), today), 1.0);
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let today = d(2024, 5, 10);
        let out = select(
            vec![
                paper("1", "Diffusion Models for X", today),
                paper("2", "A Survey of Diffusion Models", today),
            ],
            &kw(&["diffusion"]),
            &kw(&["survey"]),
            5,
            today,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].paper.source_id, "1");
        assert!(out[0].matched_keywords.contains("diffusion"));
    }

    #[test]
    fn empty_include_list_disables_keyword_filter() {
        let today = d(2024, 5, 10);
        let out = select(vec![paper("1", "Anything", today)], &[], &[], 5, today);
        assert_eq!(out.len(), 1);
        assert!(out[0].matched_keywords.is_empty());
    }

    #[test]
    fn category_allow_list_lets_uncategorized_papers_through() {
        let today = d(2024, 5, 10);
        let mut tagged = paper("1", "t", today);
        tagged.categories.insert("q-bio.gn".into());
        let mut wanted = paper("2", "t", today);
        wanted.categories.insert("cs.lg".into());
        let bare = paper("3", "t", today);

        let out = FilterRank::new(&[], &[], 5)
            .with_categories(&kw(&["CS.LG"]))
            .select(vec![tagged, wanted, bare], today);
        let ids: Vec<_> = out.iter().map(|s| s.paper.source_id.as_str()).collect();
        assert_eq!(ids, ["2", "3"]);
    }

    #[test]
    fn ties_break_by_date_then_source_id() {
        let today = d(2024, 5, 10);
        let rank = FilterRank::new(&[], &[], 10).with_weights(1.0, 0.0);
        let out = rank.select(
            vec![
                paper("b", "t", d(2024, 5, 1)),
                paper("a", "t", d(2024, 5, 1)),
                paper("c", "t", d(2024, 5, 2)),
            ],
            today,
        );
        let ids: Vec<_> = out.iter().map(|s| s.paper.source_id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn top_score_first_then_newer_of_the_tied_pair() {
        // Scores 5, 3, 3 with D1 > D2 > D3; max_n = 2.
        let today = d(2024, 5, 10);
        let include = kw(&["alpha", "beta", "gamma", "delta", "epsilon"]);
        let rank = FilterRank::new(&include, &[], 2).with_weights(1.0, 0.0);
        let out = rank.select(
            vec![
                paper("p3", "alpha beta gamma", d(2024, 5, 7)),
                paper("p1", "alpha beta gamma delta epsilon", d(2024, 5, 9)),
                paper("p2", "alpha beta gamma", d(2024, 5, 8)),
            ],
            today,
        );
        let picked: Vec<_> = out.iter().map(|s| (s.paper.source_id.as_str(), s.score)).collect();
        assert_eq!(picked, [("p1", 5.0), ("p2", 3.0)]);
    }

    #[test]
    fn selection_is_repeatable() {
        let today = d(2024, 5, 10);
        let mut input = Vec::new();
        for (i, day) in [3u32, 9, 9, 5, 1, 9].into_iter().enumerate() {
            let mut p = paper(&format!("{i}"), "diffusion llm", d(2024, 5, day));
            p.fingerprint = Fingerprint(format!("fp-{}", 5 - i));
            input.push(p);
        }
        let rank = FilterRank::new(&kw(&["diffusion", "llm"]), &[], 4);
        let first = rank.select(input.clone(), today);
        let second = rank.select(input, today);
        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|s| s.paper.source_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "5", "3"]);
    }
}
