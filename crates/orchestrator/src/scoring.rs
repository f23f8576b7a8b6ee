//! 有效分计算与排序
//!
//! 基础分来自外部的病毒性评分，这里只做重复话题/作者的固定惩罚，
//! 让同一目的地的排期尽量分散。惩罚常数固定、可预测。

use std::collections::BTreeMap;

use publisher_domain::{ScoredTask, SelectionState};

pub const PENALTY_TOPIC_LAST: f64 = 0.15; // 与最近一条发布同话题
pub const PENALTY_AUTHOR_LAST: f64 = 0.10; // 与最近一条发布同作者
pub const PENALTY_TOPIC_RECENT: f64 = 0.05; // 话题出现在近 N 条中
pub const PENALTY_AUTHOR_RECENT: f64 = 0.03; // 作者出现在近 N 条中

/// 参与排序的任务条目
#[derive(Debug, Clone)]
pub struct ScoreEntry {
    pub task_id: i64,
    pub base_score: f64,
    pub priority: i32,
    pub topic_signature: String,
    pub author_key: String,
}

/// 计算有效分与惩罚明细，下限为 0
pub fn compute_effective_score(
    base_score: f64,
    topic_sig: &str,
    author_key: &str,
    state: &SelectionState,
) -> (f64, BTreeMap<String, f64>) {
    let mut penalties = BTreeMap::new();
    let mut total = 0.0;

    if !topic_sig.is_empty() && topic_sig == state.last_topic_signature {
        penalties.insert("topic_last".to_string(), PENALTY_TOPIC_LAST);
        total += PENALTY_TOPIC_LAST;
    } else if !topic_sig.is_empty() && state.recent_topic_signatures.contains(topic_sig) {
        penalties.insert("topic_recent".to_string(), PENALTY_TOPIC_RECENT);
        total += PENALTY_TOPIC_RECENT;
    }

    if !author_key.is_empty() && author_key == state.last_author_key {
        penalties.insert("author_last".to_string(), PENALTY_AUTHOR_LAST);
        total += PENALTY_AUTHOR_LAST;
    } else if !author_key.is_empty() && state.recent_author_keys.contains(author_key) {
        penalties.insert("author_recent".to_string(), PENALTY_AUTHOR_RECENT);
        total += PENALTY_AUTHOR_RECENT;
    }

    ((base_score - total).max(0.0), penalties)
}

/// 排序：有效分降序 -> 任务优先级降序 -> 任务 ID 升序
///
/// 对固定快照是确定性的，规划器的可复现性依赖这里。
pub fn rank(entries: &[ScoreEntry], state: &SelectionState) -> Vec<ScoredTask> {
    let mut scored: Vec<(ScoredTask, i32)> = entries
        .iter()
        .map(|e| {
            let (effective, penalties) =
                compute_effective_score(e.base_score, &e.topic_signature, &e.author_key, state);
            (
                ScoredTask {
                    task_id: e.task_id,
                    base_score: e.base_score,
                    effective_score: effective,
                    penalties,
                },
                e.priority,
            )
        })
        .collect();

    scored.sort_by(|(a, ap), (b, bp)| {
        b.effective_score
            .partial_cmp(&a.effective_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| bp.cmp(ap))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });

    scored.into_iter().map(|(s, _)| s).collect()
}
