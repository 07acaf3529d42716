use anyhow::Result;
use fantoccini::elements::Element;
use rand::rngs::OsRng;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Default)]
/// Produces human-like delays and typing behavior to reduce automation signals.
pub struct BehavioralEngine {}

impl BehavioralEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// Sleep for a random duration between `min` and `max` milliseconds.
    pub async fn random_delay(&self, min: u64, max: u64) {
        sleep(Self::pick(min, max)).await;
    }

    /// Pick a random duration in `[min, max]` milliseconds; bounds may be given
    /// in either order.
    pub fn pick(min: u64, max: u64) -> Duration {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let ms = OsRng.gen_range(lo..=hi);
        Duration::from_millis(ms)
    }

    /// Type the provided text with small random delays between characters.
    pub async fn type_text_human_like(&self, element: &Element, text: &str) -> Result<()> {
        for ch in text.chars() {
            element.send_keys(&ch.to_string()).await?;
            self.random_delay(30, 150).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_stays_in_bounds() {
        for _ in 0..100 {
            let d = BehavioralEngine::pick(20, 40);
            assert!(d >= Duration::from_millis(20) && d <= Duration::from_millis(40));
        }
    }

    #[test]
    fn pick_accepts_reversed_bounds() {
        let d = BehavioralEngine::pick(40, 20);
        assert!(d >= Duration::from_millis(20) && d <= Duration::from_millis(40));
        assert_eq!(BehavioralEngine::pick(7, 7), Duration::from_millis(7));
    }
}
