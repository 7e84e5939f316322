//! Aggregation of word occurrences into corpus statistics.
//!
//! [`FrequencyEngine::aggregate`] is the one-shot form; [`FrequencyAccumulator`]
//! lets callers feed occurrences in batches (or merge partial results built in
//! parallel) and produces exactly the same output.

use crate::config::{FrequencyConfig, TierThresholds};
use crate::models::{ArticleId, DifficultyTier, WordOccurrence, WordStat};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FrequencyEngine {
    min_total_frequency: u64,
    tiers: TierThresholds,
}

impl Default for FrequencyEngine {
    fn default() -> Self {
        Self::new(&FrequencyConfig::default())
    }
}

impl FrequencyEngine {
    /// Engine with the configured tiers and minimum total frequency.
    pub fn new(config: &FrequencyConfig) -> Self {
        Self {
            min_total_frequency: config.min_total_frequency,
            tiers: config.tiers.clone(),
        }
    }

    /// Difficulty tier for a word seen `total_frequency` times.
    ///
    /// Thresholds are inclusive lower bounds, checked from most to least common.
    pub fn tier_for(&self, total_frequency: u64) -> DifficultyTier {
        let t = &self.tiers;
        match total_frequency {
            n if n >= t.very_common => DifficultyTier::VeryCommon,
            n if n >= t.common => DifficultyTier::Common,
            n if n >= t.moderate => DifficultyTier::Moderate,
            n if n >= t.uncommon => DifficultyTier::Uncommon,
            _ => DifficultyTier::Rare,
        }
    }

    /// Statistics for every word seen at least `min_total_frequency` times,
    /// most frequent first, ties broken alphabetically.
    pub fn aggregate(&self, occurrences: &[WordOccurrence]) -> Vec<WordStat> {
        let mut acc = FrequencyAccumulator::new();
        acc.add_batch(occurrences);
        self.finish(&acc)
    }

    /// Turn accumulated tallies into sorted statistics.
    ///
    /// # Returns
    ///
    /// The same result [`aggregate`](Self::aggregate) would give on all the
    /// occurrences fed into `acc`.
    pub fn finish(&self, acc: &FrequencyAccumulator) -> Vec<WordStat> {
        let stats = acc
            .tallies
            .iter()
            .filter(|(_, tally)| tally.total >= self.min_total_frequency)
            .map(|(word, tally)| {
                let document_frequency = tally.articles.len() as u64;
                WordStat {
                    word: word.clone(),
                    total_frequency: tally.total,
                    document_frequency,
                    first_seen: tally.first_seen,
                    last_seen: tally.last_seen,
                    diversity_score: document_frequency as f64 / tally.total as f64,
                    difficulty_tier: self.tier_for(tally.total),
                }
            })
            .sorted_by_key(|s| (Reverse(s.total_frequency), s.word.clone()))
            .collect::<Vec<_>>();

        debug!(
            words = acc.tallies.len(),
            kept = stats.len(),
            min_total = self.min_total_frequency,
            "Aggregated word statistics"
        );
        stats
    }
}

#[derive(Debug, Clone)]
struct WordTally {
    total: u64,
    articles: HashSet<ArticleId>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl WordTally {
    fn from_occurrence(occurrence: &WordOccurrence) -> Self {
        Self {
            total: 1,
            articles: HashSet::from([occurrence.article_id]),
            first_seen: occurrence.observed_at,
            last_seen: occurrence.observed_at,
        }
    }

    fn absorb(&mut self, other: &WordTally) {
        self.total += other.total;
        self.articles.extend(other.articles.iter().copied());
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
    }
}

/// Incremental word tallies. Adding batches in any split, or merging
/// accumulators, is equivalent to aggregating the concatenated input.
#[derive(Debug, Clone, Default)]
pub struct FrequencyAccumulator {
    tallies: HashMap<String, WordTally>,
}

impl FrequencyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of occurrences into the tallies.
    pub fn add_batch(&mut self, occurrences: &[WordOccurrence]) {
        for occurrence in occurrences {
            match self.tallies.get_mut(&occurrence.word) {
                Some(tally) => tally.absorb(&WordTally::from_occurrence(occurrence)),
                None => {
                    self.tallies
                        .insert(occurrence.word.clone(), WordTally::from_occurrence(occurrence));
                }
            }
        }
    }

    /// Absorb another accumulator, e.g. one built over a different slice of
    /// the corpus. Totals add up, article sets are unioned and the seen-range widens.
    pub fn merge(&mut self, other: FrequencyAccumulator) {
        for (word, tally) in other.tallies {
            match self.tallies.get_mut(&word) {
                Some(existing) => existing.absorb(&tally),
                None => {
                    self.tallies.insert(word, tally);
                }
            }
        }
    }

    /// Total occurrences ingested so far.
    pub fn occurrence_count(&self) -> u64 {
        self.tallies.values().map(|t| t.total).sum()
    }

    /// Number of distinct words tallied.
    pub fn distinct_words(&self) -> usize {
        self.tallies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap()
    }

    fn occ(word: &str, article_id: ArticleId, minutes: i64) -> WordOccurrence {
        WordOccurrence {
            word: word.to_string(),
            article_id,
            sentence_index: 0,
            position_in_article: 0,
            observed_at: t0() + Duration::minutes(minutes),
        }
    }

    /// `count` copies of `word` spread round-robin over `articles`.
    fn repeated(word: &str, count: usize, articles: &[ArticleId]) -> Vec<WordOccurrence> {
        (0..count)
            .map(|i| occ(word, articles[i % articles.len()], i as i64))
            .collect()
    }

    fn engine(min_total_frequency: u64) -> FrequencyEngine {
        FrequencyEngine::new(&FrequencyConfig {
            min_total_frequency,
            ..FrequencyConfig::default()
        })
    }

    #[test]
    fn test_tier_thresholds() {
        let engine = FrequencyEngine::default();
        assert_eq!(engine.tier_for(50), DifficultyTier::VeryCommon);
        assert_eq!(engine.tier_for(49), DifficultyTier::Common);
        assert_eq!(engine.tier_for(20), DifficultyTier::Common);
        assert_eq!(engine.tier_for(10), DifficultyTier::Moderate);
        assert_eq!(engine.tier_for(5), DifficultyTier::Uncommon);
        assert_eq!(engine.tier_for(4), DifficultyTier::Rare);
    }

    #[test]
    fn test_aggregate_counts_and_dates() {
        let a = ArticleId::new();
        let b = ArticleId::new();
        let occurrences = vec![
            occ("casa", a, 10),
            occ("casa", a, 5),
            occ("casa", b, 30),
            occ("perro", b, 0),
        ];
        let stats = engine(1).aggregate(&occurrences);
        assert_eq!(stats.len(), 2);

        let casa = &stats[0];
        assert_eq!(casa.word, "casa");
        assert_eq!(casa.total_frequency, 3);
        assert_eq!(casa.document_frequency, 2);
        assert!((casa.diversity_score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(casa.first_seen, t0() + Duration::minutes(5));
        assert_eq!(casa.last_seen, t0() + Duration::minutes(30));
        assert_eq!(casa.difficulty_tier, DifficultyTier::Rare);
    }

    #[test]
    fn test_words_below_minimum_are_excluded() {
        let a = ArticleId::new();
        let mut occurrences = repeated("rare", 2, &[a]);
        occurrences.extend(repeated("kept", 3, &[a]));
        let stats = FrequencyEngine::default().aggregate(&occurrences);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].word, "kept");
    }

    #[test]
    fn test_ordering_total_desc_then_word() {
        let a = ArticleId::new();
        let mut occurrences = repeated("zeta", 4, &[a]);
        occurrences.extend(repeated("alpha", 4, &[a]));
        occurrences.extend(repeated("beta", 9, &[a]));
        let words: Vec<_> = engine(1)
            .aggregate(&occurrences)
            .into_iter()
            .map(|s| s.word)
            .collect();
        assert_eq!(words, vec!["beta", "alpha", "zeta"]);
    }

    #[test]
    fn test_diversity_bounds_and_sum_consistency() {
        let articles: Vec<_> = (0..7).map(|_| ArticleId::new()).collect();
        let mut occurrences = Vec::new();
        for (i, word) in ["el", "la", "de", "que", "en"].iter().enumerate() {
            occurrences.extend(repeated(word, 3 + i * 11, &articles[..1 + i]));
        }
        let stats = engine(1).aggregate(&occurrences);

        let total: u64 = stats.iter().map(|s| s.total_frequency).sum();
        assert_eq!(total, occurrences.len() as u64);
        for stat in &stats {
            assert!(stat.document_frequency <= stat.total_frequency);
            assert!(stat.diversity_score > 0.0 && stat.diversity_score <= 1.0);
            assert_eq!(stat.difficulty_tier, engine(1).tier_for(stat.total_frequency));
        }
    }

    #[test]
    fn test_batches_and_merge_match_single_pass() {
        let articles: Vec<_> = (0..4).map(|_| ArticleId::new()).collect();
        let mut occurrences = repeated("sol", 25, &articles);
        occurrences.extend(repeated("luna", 12, &articles[1..]));
        occurrences.extend(repeated("mar", 6, &articles[..2]));
        let engine = engine(3);
        let expected = engine.aggregate(&occurrences);

        let (left, right) = occurrences.split_at(17);
        let mut batched = FrequencyAccumulator::new();
        batched.add_batch(left);
        batched.add_batch(right);
        assert_eq!(engine.finish(&batched), expected);

        let mut first = FrequencyAccumulator::new();
        first.add_batch(right);
        let mut second = FrequencyAccumulator::new();
        second.add_batch(left);
        first.merge(second);
        assert_eq!(engine.finish(&first), expected);
        assert_eq!(first.occurrence_count(), occurrences.len() as u64);
        assert_eq!(first.distinct_words(), 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(FrequencyEngine::default().aggregate(&[]).is_empty());
    }
}
