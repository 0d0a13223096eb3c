use std::collections::HashMap;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// CategoryScale – ordered labels → ranks 1..=n
// ---------------------------------------------------------------------------

/// Immutable ordered mapping from category labels to consecutive ranks.
///
/// Lookups ignore case and whitespace, so `"< 1 mm"`, `"<1mm"` and `"f-"`
/// resolve against the declared `"< 1 mm"` and `"F-"`.
#[derive(Debug, Clone)]
pub struct CategoryScale {
    labels: Vec<&'static str>,
    ranks: HashMap<String, u32>,
}

fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

impl CategoryScale {
    /// Build a scale from labels in ascending order.
    pub fn from_labels(labels: &[&'static str]) -> Self {
        let ranks = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (normalize(l), i as u32 + 1))
            .collect();
        Self {
            labels: labels.to_vec(),
            ranks,
        }
    }

    pub fn rank(&self, label: &str) -> Option<u32> {
        self.ranks.get(&normalize(label)).copied()
    }

    /// Declared label for a rank.
    pub fn label(&self, rank: u32) -> Option<&'static str> {
        rank.checked_sub(1)
            .and_then(|i| self.labels.get(i as usize))
            .copied()
    }

    pub fn labels(&self) -> &[&'static str] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Built-in scales
// ---------------------------------------------------------------------------

const HAND_HARDNESS: &[&str] = &[
    "F-", "F", "F+", "4F-", "4F", "4F+", "1F-", "1F", "1F+", "P-", "P", "P+", "K-", "K", "K+",
    "I",
];

const GRAIN_SIZE: &[&str] = &["< 1 mm", "1-2 mm", "2-4 mm", "4-6 mm", "> 6 mm"];

/// Hand hardness, fist (`F-`) to ice (`I`).
pub fn hand_hardness() -> &'static CategoryScale {
    static SCALE: OnceLock<CategoryScale> = OnceLock::new();
    SCALE.get_or_init(|| CategoryScale::from_labels(HAND_HARDNESS))
}

/// Grain size bins, finest first.
pub fn grain_size() -> &'static CategoryScale {
    static SCALE: OnceLock<CategoryScale> = OnceLock::new();
    SCALE.get_or_init(|| CategoryScale::from_labels(GRAIN_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn hand_hardness_ranks() {
        let scale = hand_hardness();
        assert_eq!(scale.rank("F-"), Some(1));
        assert_eq!(scale.rank("F"), Some(2));
        assert_eq!(scale.rank("F+"), Some(3));
        assert_eq!(scale.rank("4F-"), Some(4));
        assert_eq!(scale.rank("P"), Some(11));
        assert_eq!(scale.rank("I"), Some(16));
        assert_eq!(scale.rank(" p "), Some(11));
        assert_eq!(scale.rank("X"), None);
    }

    #[test]
    fn scales_are_injective_and_increasing() {
        for scale in [hand_hardness(), grain_size()] {
            let ranks: Vec<u32> = scale
                .labels()
                .iter()
                .map(|l| scale.rank(l).unwrap())
                .collect();
            let unique: HashSet<u32> = ranks.iter().copied().collect();
            assert_eq!(unique.len(), scale.len());
            assert!(ranks.windows(2).all(|w| w[1] == w[0] + 1));
            assert_eq!(ranks[0], 1);
        }
    }

    #[test]
    fn grain_size_lookup_ignores_spacing() {
        let scale = grain_size();
        assert_eq!(scale.rank("<1 mm"), Some(1));
        assert_eq!(scale.rank(">6MM"), Some(5));
        assert_eq!(scale.label(3), Some("2-4 mm"));
        assert_eq!(scale.label(0), None);
    }

    #[test]
    fn scale_is_memoized() {
        assert!(std::ptr::eq(hand_hardness(), hand_hardness()));
    }
}
