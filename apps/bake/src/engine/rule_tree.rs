//! Rule accumulation tree.
//!
//! Tier-0 buffers rules as items produce them. When it holds `group_size`
//! rules they are merged into one Tier-1 rule and pushed onto the merge queue.
//! The merge queue is folded front-first (first `group_size` entries merged,
//! result prepended) until it is shorter than `group_size`. Finalization
//! flushes Tier-0 and folds the queue down to a single rule.
//!
//! Each merge is a node whose children are the rules it consumed, so the final
//! rule is the root of a tree of fan-in at most `group_size`.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeTier {
    #[serde(rename = "Tier-1")]
    Tier1,
    #[serde(rename = "Recursive/Tier-N")]
    Recursive,
    #[serde(rename = "Cleanup Tier-0")]
    CleanupTier0,
    #[serde(rename = "Convergence")]
    Convergence,
}

impl MergeTier {
    /// Heading used in the human-readable rules log.
    pub fn title(&self) -> &'static str {
        match self {
            MergeTier::Tier1 => "Tier-1 Merge",
            MergeTier::Recursive => "Recursive Merge",
            MergeTier::CleanupTier0 => "Cleanup Tier-0",
            MergeTier::Convergence => "Convergence Merge",
        }
    }
}

/// One merge the tree performed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeStep {
    pub tier: MergeTier,
    pub rule: String,
}

/// Merges a group of rules into one. Must not fail: implementations degrade.
#[async_trait]
pub trait RuleCombiner: Send + Sync {
    async fn combine(&self, rules: &[String]) -> String;
}

#[derive(Debug, Clone)]
pub struct RuleTree {
    group_size: usize,
    tier0: Vec<String>,
    merge_queue: Vec<String>,
}

impl RuleTree {
    /// `group_size` below 2 is raised to 2; a group of one would never shrink the queue.
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(2),
            tier0: Vec::new(),
            merge_queue: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn tier0(&self) -> &[String] {
        &self.tier0
    }

    #[cfg(test)]
    pub fn merge_queue(&self) -> &[String] {
        &self.merge_queue
    }

    /// Buffers `rule`; promotes the whole buffer to Tier-1 once it is full.
    /// Returns the Tier-1 merge if one happened.
    pub async fn accumulate(
        &mut self,
        rule: String,
        combiner: &dyn RuleCombiner,
    ) -> Option<MergeStep> {
        self.tier0.push(rule);
        if self.tier0.len() < self.group_size {
            return None;
        }

        let merged = combiner.combine(&self.tier0).await;
        self.tier0.clear();
        self.merge_queue.push(merged.clone());
        Some(MergeStep {
            tier: MergeTier::Tier1,
            rule: merged,
        })
    }

    /// Folds the merge queue until it holds fewer than `group_size` rules.
    pub async fn reduce(&mut self, combiner: &dyn RuleCombiner) -> Vec<MergeStep> {
        let mut steps = Vec::new();
        while self.merge_queue.len() >= self.group_size {
            steps.push(self.fold_front(combiner, MergeTier::Recursive).await);
        }
        steps
    }

    /// Flushes Tier-0 and folds everything into one rule.
    /// Returns the empty string if no rule was ever accumulated.
    pub async fn finalize(&mut self, combiner: &dyn RuleCombiner) -> (String, Vec<MergeStep>) {
        let mut steps = Vec::new();

        if !self.tier0.is_empty() {
            let tail = combiner.combine(&self.tier0).await;
            self.tier0.clear();
            self.merge_queue.push(tail.clone());
            steps.push(MergeStep {
                tier: MergeTier::CleanupTier0,
                rule: tail,
            });
        }

        while self.merge_queue.len() > 1 {
            steps.push(self.fold_front(combiner, MergeTier::Convergence).await);
        }

        let final_rule = self.merge_queue.first().cloned().unwrap_or_default();
        (final_rule, steps)
    }

    async fn fold_front(&mut self, combiner: &dyn RuleCombiner, tier: MergeTier) -> MergeStep {
        let take = self.group_size.min(self.merge_queue.len());
        let chunk: Vec<String> = self.merge_queue.drain(..take).collect();
        let merged = combiner.combine(&chunk).await;
        self.merge_queue.insert(0, merged.clone());
        MergeStep { tier, rule: merged }
    }
}
