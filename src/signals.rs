//! Topic signal providers.
//!
//! The topic scorer needs two inputs per (query, city): the competing
//! sources retrieved for the query, and an AI-visibility sample for the
//! brand. Real connectors (rank trackers, answer-engine samplers) sit
//! behind the [`TopicSignals`] trait; the built-in provider synthesizes
//! deterministic signals from the query text so exploration works out of
//! the box and tests are reproducible.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{AiVisibility, TopicSource};

#[async_trait]
pub trait TopicSignals: Send + Sync {
    /// Sources competing for the query, rank positions 1..N.
    async fn sources(&self, query: &str, city: &str) -> Result<Vec<TopicSource>>;

    /// Sampled AI-visibility figures for the brand on this query.
    async fn ai_visibility(&self, query: &str, city: &str) -> Result<AiVisibility>;
}

/// Deterministic synthetic provider: every figure is derived from a hash
/// of the query and city, so repeated explorations of the same topic
/// produce identical scores. Visibility samples are flagged `synthetic`
/// and treated as neutral by the scorer.
pub struct SyntheticSignals;

/// splitmix64, seeded from the input bytes. Stable across platforms and
/// compiler versions, unlike the std hasher.
struct Rng(u64);

impl Rng {
    fn from_key(key: &str) -> Self {
        let mut seed = 0xcbf2_9ce4_8422_2325u64;
        for b in key.as_bytes() {
            seed ^= u64::from(*b);
            seed = seed.wrapping_mul(0x0100_0000_01b3);
        }
        Self(seed)
    }

    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in [0, 1).
    fn unit(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.unit() * (hi - lo)
    }
}

/// Lowercase, hyphen-separated form of a query, used in synthetic URLs
/// and as the query half of a topic id.
pub fn slug(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl TopicSignals for SyntheticSignals {
    async fn sources(&self, query: &str, city: &str) -> Result<Vec<TopicSource>> {
        let mut rng = Rng::from_key(&format!("sources:{}:{}", query, city));
        let count = 6 + (rng.next() % 5) as u32; // 6..=10
        let path = slug(query);

        let mut sources = Vec::with_capacity(count as usize);
        for rank in 1..=count {
            // Traffic decays with rank; authority and depth vary freely.
            let decay = 1.0 / rank as f64;
            sources.push(TopicSource {
                url: format!("https://competitor-{}.example/{}", rank, path),
                rank_position: rank,
                est_traffic: (rng.range(2_000.0, 12_000.0) * decay).round(),
                est_authority: rng.range(800.0, 55_000.0).round(),
                content_length: rng.range(200.0, 3_200.0).round(),
                has_structured_data: rng.unit() < 0.4,
            });
        }
        Ok(sources)
    }

    async fn ai_visibility(&self, query: &str, city: &str) -> Result<AiVisibility> {
        let mut rng = Rng::from_key(&format!("visibility:{}:{}", query, city));
        Ok(AiVisibility {
            mention_rate: rng.range(0.05, 0.6),
            first_mention_share: rng.range(0.05, 0.5),
            synthetic: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signals_are_deterministic() {
        let a = SyntheticSignals
            .sources("used cars under 5 lakh", "Hyderabad")
            .await
            .unwrap();
        let b = SyntheticSignals
            .sources("used cars under 5 lakh", "Hyderabad")
            .await
            .unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.url, y.url);
            assert_eq!(x.est_traffic, y.est_traffic);
            assert_eq!(x.est_authority, y.est_authority);
        }
    }

    #[tokio::test]
    async fn different_queries_differ() {
        let a = SyntheticSignals
            .sources("used cars under 5 lakh", "Hyderabad")
            .await
            .unwrap();
        let b = SyntheticSignals
            .sources("second hand suv", "Hyderabad")
            .await
            .unwrap();
        assert!(a.iter().zip(&b).any(|(x, y)| x.est_traffic != y.est_traffic));
    }

    #[tokio::test]
    async fn ranks_are_contiguous_from_one() {
        let sources = SyntheticSignals
            .sources("maruti swift resale", "Pune")
            .await
            .unwrap();
        assert!(sources.len() >= 6 && sources.len() <= 10);
        for (i, s) in sources.iter().enumerate() {
            assert_eq!(s.rank_position as usize, i + 1);
        }
    }

    #[tokio::test]
    async fn visibility_is_flagged_synthetic() {
        let vis = SyntheticSignals
            .ai_visibility("used cars", "Hyderabad")
            .await
            .unwrap();
        assert!(vis.synthetic);
        assert!(vis.mention_rate >= 0.0 && vis.mention_rate <= 1.0);
    }

    #[test]
    fn slug_strips_punctuation() {
        assert_eq!(slug("Used Cars, Under ₹5 Lakh!"), "used-cars-under-5-lakh");
    }
}
