//! Per-variant statistics over scored sessions.
//!
//! Every statistic is computed from non-null samples only and carries its
//! sample size, so an empty variant reports `mean: null, n: 0` rather than 0.

pub mod report;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checks;
use crate::scorer::DetailedScore;

pub use report::render_markdown;

/// Mean/min/max over the non-null samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub n: usize,
}

impl Stat {
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let samples: Vec<f64> = values.into_iter().flatten().filter(|v| v.is_finite()).collect();
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len();
        let sum: f64 = samples.iter().sum();
        Self {
            mean: Some(sum / n as f64),
            min: samples.iter().copied().reduce(f64::min),
            max: samples.iter().copied().reduce(f64::max),
            n,
        }
    }
}

/// `passed / total` for one check name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PassRate {
    pub passed: usize,
    pub total: usize,
}

impl PassRate {
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }
}

/// Signed difference from the baseline mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub absolute: f64,
    /// `None` when the baseline mean is zero.
    pub percent: Option<f64>,
}

impl Delta {
    pub fn between(value: f64, baseline: f64) -> Self {
        let absolute = value - baseline;
        Self {
            absolute,
            percent: (baseline != 0.0).then(|| absolute / baseline.abs() * 100.0),
        }
    }
}

/// Aggregated statistics for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAggregate {
    pub variant_id: String,
    /// Number of sessions, scored or not.
    pub sessions: usize,
    pub overall: Stat,
    pub by_rubric: BTreeMap<String, Stat>,
    /// Keyed by `<rubric>.<dimension>`.
    pub by_dimension: BTreeMap<String, Stat>,
    pub input_tokens: Stat,
    pub output_tokens: Stat,
    pub duration_secs: Stat,
    pub checks: BTreeMap<String, PassRate>,
    /// Per-session weighted check pass rate, sessions without checks excluded.
    #[serde(default)]
    pub check_score: Stat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

/// One row of the improvement ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub variant_id: String,
    pub delta: Delta,
}

/// Comparison across variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    pub variants: Vec<VariantAggregate>,
    /// Non-baseline variants ordered by delta, descending.
    pub ranking: Vec<RankEntry>,
}

impl Report {
    pub fn variant(&self, id: &str) -> Option<&VariantAggregate> {
        self.variants.iter().find(|v| v.variant_id == id)
    }
}

fn aggregate_variant(variant_id: &str, scores: &[DetailedScore]) -> VariantAggregate {
    let mut rubric_samples: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    let mut dimension_samples: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    let mut checks: BTreeMap<String, PassRate> = BTreeMap::new();

    for score in scores {
        for (rubric, rs) in &score.by_rubric {
            rubric_samples.entry(rubric.clone()).or_default().push(rs.score);
            for (dim, value) in &rs.dimensions {
                dimension_samples
                    .entry(format!("{}.{}", rubric, dim))
                    .or_default()
                    .push(Some(*value));
            }
        }
        for check in &score.checks {
            let entry = checks.entry(check.name.clone()).or_default();
            entry.total += 1;
            if check.passed {
                entry.passed += 1;
            }
        }
    }

    let stats = |samples: BTreeMap<String, Vec<Option<f64>>>| {
        samples
            .into_iter()
            .map(|(k, v)| (k, Stat::from_values(v)))
            .collect::<BTreeMap<_, _>>()
    };

    VariantAggregate {
        variant_id: variant_id.to_string(),
        sessions: scores.len(),
        overall: Stat::from_values(scores.iter().map(|s| s.overall_score)),
        by_rubric: stats(rubric_samples),
        by_dimension: stats(dimension_samples),
        input_tokens: Stat::from_values(
            scores
                .iter()
                .map(|s| s.token_usage.map(|u| u.input_tokens as f64)),
        ),
        output_tokens: Stat::from_values(
            scores
                .iter()
                .map(|s| s.token_usage.map(|u| u.output_tokens as f64)),
        ),
        duration_secs: Stat::from_values(scores.iter().map(|s| s.timing.session_secs)),
        checks,
        check_score: Stat::from_values(
            scores
                .iter()
                .map(|s| checks::weighted_pass_rate(&s.checks)),
        ),
        delta: None,
    }
}

/// Builds the cross-variant report.
///
/// Variants appear in the order of `order` (unknown ids last, sorted), so
/// the report follows spec declaration order when one is supplied.
pub fn aggregate(
    scores_by_variant: &BTreeMap<String, Vec<DetailedScore>>,
    order: &[String],
    baseline: Option<&str>,
) -> Report {
    let mut ids: Vec<&String> = order
        .iter()
        .filter(|id| scores_by_variant.contains_key(*id))
        .collect();
    for id in scores_by_variant.keys() {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let mut variants: Vec<VariantAggregate> = ids
        .into_iter()
        .map(|id| aggregate_variant(id, &scores_by_variant[id]))
        .collect();

    let baseline_mean = baseline
        .and_then(|b| variants.iter().find(|v| v.variant_id == b))
        .and_then(|v| v.overall.mean);

    let mut ranking = Vec::new();
    if let (Some(base_id), Some(base_mean)) = (baseline, baseline_mean) {
        for variant in variants.iter_mut().filter(|v| v.variant_id != base_id) {
            if let Some(mean) = variant.overall.mean {
                let delta = Delta::between(mean, base_mean);
                variant.delta = Some(delta);
                ranking.push(RankEntry {
                    variant_id: variant.variant_id.clone(),
                    delta,
                });
            }
        }
        ranking.sort_by(|a, b| b.delta.absolute.total_cmp(&a.delta.absolute));
    }

    Report {
        name: None,
        baseline: baseline
            .filter(|b| scores_by_variant.contains_key(*b))
            .map(String::from),
        variants,
        ranking,
    }
}

/// Groups scores by their variant id; scores without one are dropped.
pub fn group_by_variant(scores: Vec<DetailedScore>) -> BTreeMap<String, Vec<DetailedScore>> {
    let mut grouped: BTreeMap<String, Vec<DetailedScore>> = BTreeMap::new();
    for score in scores {
        if let Some(variant) = score.variant_id.clone() {
            grouped.entry(variant).or_default().push(score);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckResult;
    use crate::runner::TokenUsage;
    use crate::scorer::{RubricScore, Timing};

    fn score(variant: &str, overall: Option<f64>, check_passed: bool) -> DetailedScore {
        let mut by_rubric = BTreeMap::new();
        by_rubric.insert(
            "code-quality".to_string(),
            RubricScore {
                score: overall,
                dimensions: overall
                    .map(|o| BTreeMap::from([("naming".to_string(), o - 1.0)]))
                    .unwrap_or_default(),
                strengths: Vec::new(),
                weaknesses: Vec::new(),
                attempts: 1,
                error: None,
            },
        );
        DetailedScore {
            session_id: format!("{}-{:?}", variant, overall),
            variant_id: Some(variant.to_string()),
            overall_score: overall,
            by_rubric,
            token_usage: Some(TokenUsage::new(100, 50)),
            judge_usage: TokenUsage::default(),
            timing: Timing {
                session_secs: Some(30.0),
                scoring_secs: 1.0,
            },
            checks: vec![CheckResult {
                name: "builds".into(),
                weight: 1.0,
                passed: check_passed,
                exit_code: Some(if check_passed { 0 } else { 1 }),
                error: None,
            }],
        }
    }

    #[test]
    fn test_zero_non_null_scores_gives_null_mean() {
        let stat = Stat::from_values(vec![None, None]);
        assert_eq!(stat.mean, None);
        assert_eq!(stat.n, 0);

        let grouped = group_by_variant(vec![score("a", None, false)]);
        let report = aggregate(&grouped, &[], None);
        let a = report.variant("a").unwrap();
        assert_eq!(a.overall.mean, None);
        assert_eq!(a.overall.n, 0);
        assert_eq!(a.sessions, 1);
    }

    #[test]
    fn test_stats_ignore_nulls() {
        let grouped = group_by_variant(vec![
            score("a", Some(6.0), true),
            score("a", None, false),
            score("a", Some(8.0), true),
        ]);
        let report = aggregate(&grouped, &[], None);
        let a = report.variant("a").unwrap();
        assert_eq!(a.overall, Stat { mean: Some(7.0), min: Some(6.0), max: Some(8.0), n: 2 });
        assert_eq!(a.by_rubric["code-quality"].n, 2);
        assert_eq!(a.by_dimension["code-quality.naming"].mean, Some(6.0));
        assert_eq!(a.checks["builds"], PassRate { passed: 2, total: 3 });
        assert_eq!(a.input_tokens.mean, Some(100.0));
        assert_eq!(a.duration_secs.n, 3);
    }

    #[test]
    fn test_baseline_delta_and_ranking() {
        let grouped = group_by_variant(vec![
            score("base", Some(5.0), true),
            score("better", Some(7.5), true),
            score("worse", Some(4.0), true),
            score("unscored", None, true),
        ]);
        let order = vec!["base".to_string(), "worse".to_string(), "better".to_string()];
        let report = aggregate(&grouped, &order, Some("base"));

        let ids: Vec<_> = report.variants.iter().map(|v| v.variant_id.as_str()).collect();
        assert_eq!(ids, vec!["base", "worse", "better", "unscored"]);

        let better = report.variant("better").unwrap().delta.unwrap();
        assert_eq!(better.absolute, 2.5);
        assert_eq!(better.percent, Some(50.0));
        assert!(report.variant("base").unwrap().delta.is_none());
        assert!(report.variant("unscored").unwrap().delta.is_none());

        let ranked: Vec<_> = report.ranking.iter().map(|r| r.variant_id.as_str()).collect();
        assert_eq!(ranked, vec!["better", "worse"]);
    }

    #[test]
    fn test_check_score_uses_weights() {
        let mut heavy = score("a", Some(5.0), true);
        heavy.checks.push(CheckResult {
            name: "lints".into(),
            weight: 1.0,
            passed: false,
            exit_code: Some(1),
            error: None,
        });
        heavy.checks[0].weight = 3.0;
        let mut unchecked = score("a", Some(5.0), true);
        unchecked.checks.clear();
        let grouped = group_by_variant(vec![heavy, score("a", Some(5.0), true), unchecked]);

        let a = aggregate(&grouped, &[], None).variant("a").unwrap().clone();
        assert_eq!(a.check_score.n, 2);
        assert_eq!(a.check_score.min, Some(0.75));
        assert_eq!(a.check_score.max, Some(1.0));
        assert_eq!(a.check_score.mean, Some(0.875));
    }

    #[test]
    fn test_zero_baseline_has_no_percent() {
        assert_eq!(Delta::between(3.0, 0.0).percent, None);
        assert_eq!(Delta::between(3.0, 0.0).absolute, 3.0);
    }

    #[test]
    fn test_missing_baseline_is_ignored() {
        let grouped = group_by_variant(vec![score("a", Some(5.0), true)]);
        let report = aggregate(&grouped, &[], Some("ghost"));
        assert!(report.baseline.is_none());
        assert!(report.ranking.is_empty());
    }
}
