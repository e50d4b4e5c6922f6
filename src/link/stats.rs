//! Per-link traffic counters

use serde::Serialize;

/// Traffic category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCategory {
    Voice = 0,
    Text = 1,
    Key = 2,
    Unkey = 3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCount {
    pub rx: u64,
    pub tx: u64,
}

/// Counters indexed by [`StatCategory`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChanStats {
    counts: [TrafficCount; 4],
    /// Control frames dropped as malformed
    pub malformed: u64,
}

impl ChanStats {
    pub fn count_rx(&mut self, category: StatCategory) {
        self.counts[category as usize].rx += 1;
    }

    pub fn count_tx(&mut self, category: StatCategory) {
        self.counts[category as usize].tx += 1;
    }

    pub fn get(&self, category: StatCategory) -> TrafficCount {
        self.counts[category as usize]
    }

    pub fn total(&self) -> TrafficCount {
        self.counts.iter().fold(TrafficCount::default(), |acc, c| TrafficCount {
            rx: acc.rx + c.rx,
            tx: acc.tx + c.tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut stats = ChanStats::default();
        stats.count_rx(StatCategory::Voice);
        stats.count_rx(StatCategory::Voice);
        stats.count_tx(StatCategory::Key);
        assert_eq!(stats.get(StatCategory::Voice).rx, 2);
        assert_eq!(stats.get(StatCategory::Key).tx, 1);
        assert_eq!(stats.total(), TrafficCount { rx: 2, tx: 1 });
    }
}
