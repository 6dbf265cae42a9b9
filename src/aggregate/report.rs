//! Markdown rendering of a [`Report`].

use std::collections::BTreeSet;

use super::{Report, Stat};

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

fn fmt_stat(stat: &Stat) -> String {
    match stat.mean {
        Some(mean) => format!("{:.2} (n={})", mean, stat.n),
        None => format!("- (n={})", stat.n),
    }
}

fn fmt_signed(value: f64) -> String {
    format!("{:+.2}", value)
}

/// Renders the report as Markdown.
pub fn render_markdown(report: &Report) -> String {
    let title = report.name.as_deref().unwrap_or("Evaluation");
    let mut md = format!("# {} report\n", title);
    if let Some(baseline) = &report.baseline {
        md.push_str(&format!("\nBaseline: `{}`\n", baseline));
    }

    md.push_str("\n## Overall scores\n\n");
    md.push_str("| Variant | Sessions | Mean | Min | Max | n | Δ vs baseline | Check score | Tokens in | Tokens out | Duration (s) |\n");
    md.push_str("|---|---|---|---|---|---|---|---|---|---|---|\n");
    for v in &report.variants {
        let delta = match v.delta {
            Some(d) => match d.percent {
                Some(p) => format!("{} ({:+.1}%)", fmt_signed(d.absolute), p),
                None => fmt_signed(d.absolute),
            },
            None => "-".to_string(),
        };
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            v.variant_id,
            v.sessions,
            fmt_opt(v.overall.mean, 2),
            fmt_opt(v.overall.min, 2),
            fmt_opt(v.overall.max, 2),
            v.overall.n,
            delta,
            fmt_stat(&v.check_score),
            fmt_stat(&v.input_tokens),
            fmt_stat(&v.output_tokens),
            fmt_stat(&v.duration_secs),
        ));
    }

    let rubrics: BTreeSet<&String> = report
        .variants
        .iter()
        .flat_map(|v| v.by_rubric.keys())
        .collect();
    if !rubrics.is_empty() {
        md.push_str("\n## Rubrics\n\n| Variant |");
        for r in &rubrics {
            md.push_str(&format!(" {} |", r));
        }
        md.push_str("\n|---|");
        md.push_str(&"---|".repeat(rubrics.len()));
        md.push('\n');
        for v in &report.variants {
            md.push_str(&format!("| {} |", v.variant_id));
            for r in &rubrics {
                let cell = v.by_rubric.get(*r).map(fmt_stat).unwrap_or_else(|| "-".into());
                md.push_str(&format!(" {} |", cell));
            }
            md.push('\n');
        }
    }

    let dimensions: BTreeSet<&String> = report
        .variants
        .iter()
        .flat_map(|v| v.by_dimension.keys())
        .collect();
    if !dimensions.is_empty() {
        md.push_str("\n## Dimensions\n\n");
        for v in &report.variants {
            if v.by_dimension.is_empty() {
                continue;
            }
            md.push_str(&format!("- **{}**: ", v.variant_id));
            let parts: Vec<String> = v
                .by_dimension
                .iter()
                .map(|(k, s)| format!("{} {}", k, fmt_stat(s)))
                .collect();
            md.push_str(&parts.join(", "));
            md.push('\n');
        }
    }

    let checks: BTreeSet<&String> = report
        .variants
        .iter()
        .flat_map(|v| v.checks.keys())
        .collect();
    if !checks.is_empty() {
        md.push_str("\n## Binary checks\n\n| Variant |");
        for c in &checks {
            md.push_str(&format!(" {} |", c));
        }
        md.push_str("\n|---|");
        md.push_str(&"---|".repeat(checks.len()));
        md.push('\n');
        for v in &report.variants {
            md.push_str(&format!("| {} |", v.variant_id));
            for c in &checks {
                let cell = v
                    .checks
                    .get(*c)
                    .map(|p| format!("{}/{}", p.passed, p.total))
                    .unwrap_or_else(|| "-".into());
                md.push_str(&format!(" {} |", cell));
            }
            md.push('\n');
        }
    }

    if !report.ranking.is_empty() {
        md.push_str("\n## Improvement over baseline\n\n");
        for (i, entry) in report.ranking.iter().enumerate() {
            md.push_str(&format!(
                "{}. `{}` {}",
                i + 1,
                entry.variant_id,
                fmt_signed(entry.delta.absolute)
            ));
            if let Some(p) = entry.delta.percent {
                md.push_str(&format!(" ({:+.1}%)", p));
            }
            md.push('\n');
        }
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Delta, PassRate, RankEntry, VariantAggregate};
    use std::collections::BTreeMap;

    fn variant(id: &str, mean: Option<f64>, delta: Option<Delta>) -> VariantAggregate {
        VariantAggregate {
            variant_id: id.into(),
            sessions: 2,
            overall: Stat {
                mean,
                min: mean,
                max: mean,
                n: if mean.is_some() { 2 } else { 0 },
            },
            by_rubric: BTreeMap::from([(
                "code-quality".to_string(),
                Stat {
                    mean,
                    min: mean,
                    max: mean,
                    n: 2,
                },
            )]),
            by_dimension: BTreeMap::new(),
            input_tokens: Stat::from_values([Some(100.0), None]),
            output_tokens: Stat::from_values([Some(40.0), None]),
            duration_secs: Stat::default(),
            checks: BTreeMap::from([("builds".to_string(), PassRate { passed: 1, total: 2 })]),
            check_score: Stat::from_values([Some(1.0), Some(0.0)]),
            delta,
        }
    }

    #[test]
    fn test_render_with_baseline() {
        let delta = Delta::between(7.0, 5.0);
        let report = Report {
            name: Some("wordle".into()),
            baseline: Some("base".into()),
            variants: vec![variant("base", Some(5.0), None), variant("tdd", Some(7.0), Some(delta))],
            ranking: vec![RankEntry {
                variant_id: "tdd".into(),
                delta,
            }],
        };
        let md = render_markdown(&report);
        assert!(md.starts_with("# wordle report"));
        assert!(md.contains("Baseline: `base`"));
        assert!(md.contains("| tdd | 2 | 7.00 |"));
        assert!(md.contains(
            "| 0.50 (n=2) | 100.00 (n=1) | 40.00 (n=1) | - (n=0) |"
        ));
        assert!(md.contains("+2.00 (+40.0%)"));
        assert!(md.contains("| builds |"));
        assert!(md.contains("1/2"));
        assert!(md.contains("1. `tdd` +2.00"));
    }

    #[test]
    fn test_render_null_mean() {
        let report = Report {
            name: None,
            baseline: None,
            variants: vec![variant("a", None, None)],
            ranking: Vec::new(),
        };
        let md = render_markdown(&report);
        assert!(md.contains("| a | 2 | - | - | - | 0 | - |"));
        assert!(!md.contains("Improvement over baseline"));
    }
}
