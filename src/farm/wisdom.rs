//! Wisdom tree upkeep: neglect decay and the two chores that heal it.

use chrono::{DateTime, Utc};
use rand::Rng;

use super::types::WisdomTree;
use crate::config::WisdomTreePolicy;

/// What one decay check did to a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeDecay {
    /// Chores found overdue; their timers restart at `now`.
    pub neglected_chores: usize,
    pub health_lost: u32,
}

impl TreeDecay {
    pub fn changed(&self) -> bool {
        self.neglected_chores > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChore {
    Weed,
    PestControl,
}

impl TreeChore {
    pub fn from_operation(operation: &str) -> Option<Self> {
        match operation {
            "kill_grass" => Some(TreeChore::Weed),
            "kill_bug" => Some(TreeChore::PestControl),
            _ => None,
        }
    }
}

/// Drain health for every chore left undone for `neglect_days` or more: each
/// whole day overdue costs a draw from `decay_per_day_min..=decay_per_day_max`.
/// An overdue chore's timer restarts at `now` so the same days are not charged twice.
pub fn decay_wisdom_tree<R: Rng + ?Sized>(
    tree: &mut WisdomTree,
    policy: &WisdomTreePolicy,
    now: DateTime<Utc>,
    rng: &mut R,
) -> TreeDecay {
    let low = policy.decay_per_day_min.min(policy.decay_per_day_max);
    let high = policy.decay_per_day_min.max(policy.decay_per_day_max);
    let mut decay = TreeDecay::default();
    for last in [&mut tree.last_weeded_at, &mut tree.last_pest_control_at] {
        let days = now.signed_duration_since(*last).num_days();
        if days < policy.neglect_days {
            continue;
        }
        for _ in 0..days {
            let loss = rng.gen_range(low..=high);
            decay.health_lost = decay.health_lost.saturating_add(loss);
        }
        *last = now;
        decay.neglected_chores += 1;
    }
    tree.health = tree.health.saturating_sub(decay.health_lost);
    decay
}

/// Do one chore on a living tree; returns the health it regained.
pub fn tend_wisdom_tree(
    tree: &mut WisdomTree,
    chore: TreeChore,
    policy: &WisdomTreePolicy,
    now: DateTime<Utc>,
) -> Result<u32, String> {
    if tree.is_dead() {
        return Err("the wisdom tree is dead".into());
    }
    let heal = match chore {
        TreeChore::Weed => {
            tree.last_weeded_at = now;
            policy.weed_heal
        }
        TreeChore::PestControl => {
            tree.last_pest_control_at = now;
            policy.pest_control_heal
        }
    };
    let before = tree.health;
    tree.health = tree.health.saturating_add(heal).min(tree.max_health);
    Ok(tree.health - before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn recent_care_means_no_decay() {
        let now = Utc::now();
        let mut tree = WisdomTree::new(100, now - Duration::days(2));
        let decay = decay_wisdom_tree(&mut tree, &WisdomTreePolicy::default(), now, &mut StdRng::seed_from_u64(1));
        assert!(!decay.changed());
        assert_eq!(tree.health, 100);
    }

    #[test]
    fn neglect_costs_one_to_three_per_day_per_chore() {
        let now = Utc::now();
        let mut tree = WisdomTree::new(100, now);
        tree.last_weeded_at = now - Duration::days(4);
        let decay = decay_wisdom_tree(&mut tree, &WisdomTreePolicy::default(), now, &mut StdRng::seed_from_u64(2));
        assert_eq!(decay.neglected_chores, 1);
        assert!((4..=12).contains(&decay.health_lost), "{decay:?}");
        assert_eq!(tree.health, 100 - decay.health_lost);
        assert_eq!(tree.last_weeded_at, now);

        // the same days are never charged twice
        let again = decay_wisdom_tree(&mut tree, &WisdomTreePolicy::default(), now, &mut StdRng::seed_from_u64(3));
        assert_eq!(again, TreeDecay::default());
    }

    #[test]
    fn health_bottoms_out_at_zero() {
        let now = Utc::now();
        let mut tree = WisdomTree::new(5, now - Duration::days(30));
        decay_wisdom_tree(&mut tree, &WisdomTreePolicy::default(), now, &mut StdRng::seed_from_u64(4));
        assert!(tree.is_dead());
    }

    #[test]
    fn chores_heal_up_to_max_and_not_when_dead() {
        let now = Utc::now();
        let policy = WisdomTreePolicy::default();
        let mut tree = WisdomTree::new(100, now - Duration::days(1));
        tree.health = 95;
        assert_eq!(tend_wisdom_tree(&mut tree, TreeChore::PestControl, &policy, now), Ok(5));
        assert_eq!(tree.health, 100);
        assert_eq!(tree.last_pest_control_at, now);

        tree.health = 0;
        assert!(tend_wisdom_tree(&mut tree, TreeChore::Weed, &policy, now).is_err());
        assert_eq!(TreeChore::from_operation("kill_grass"), Some(TreeChore::Weed));
        assert_eq!(TreeChore::from_operation("water"), None);
    }
}
