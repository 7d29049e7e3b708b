//! Turning raw analysis rows into risk-annotated clauses, the red-flag
//! subset, the chat summary and scatter-chart points.

use std::cmp::Ordering;

use tracing::warn;

use crate::types::{
    Analysis, AnalysisSummary, ChartPoint, ClauseSummary, ResultRow, RiskClause, RiskLevel,
};

/// Longest clause excerpt shown in the chat summary, in characters.
pub const EXCERPT_CHARS: usize = 200;

/// Convert service rows into clauses, in service order.
///
/// `final_risk` is a 0..1 fraction; scores are stored as percentages clamped
/// to [0, 100]. Unrecognised risk levels are treated as `Low`.
pub fn derive_clauses(rows: &[ResultRow]) -> Vec<RiskClause> {
    rows.iter()
        .map(|row| {
            let risk_level = RiskLevel::parse(&row.risk_level).unwrap_or_else(|| {
                warn!(level = %row.risk_level, "unknown risk level, treating as Low");
                RiskLevel::Low
            });
            let score = if row.final_risk.is_finite() {
                (row.final_risk * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };
            RiskClause {
                clause_text: row.clause_text.clone(),
                predicted_label: row.predicted_label.clone(),
                risk_score: score,
                coordinate_x: row.x_coordinate,
                coordinate_y: row.y_coordinate,
                risk_level,
            }
        })
        .collect()
}

/// Medium and High clauses; High first, then descending score.
/// Equal keys keep their original order.
pub fn red_flags(clauses: &[RiskClause]) -> Vec<RiskClause> {
    let mut flagged: Vec<RiskClause> = clauses
        .iter()
        .filter(|c| c.risk_level.is_red_flag())
        .cloned()
        .collect();
    flagged.sort_by(|a, b| {
        b.risk_level
            .cmp(&a.risk_level)
            .then_with(|| b.risk_score.partial_cmp(&a.risk_score).unwrap_or(Ordering::Equal))
    });
    flagged
}

pub fn analyze(rows: &[ResultRow]) -> Analysis {
    let clauses = derive_clauses(rows);
    let red_flags = red_flags(&clauses);
    Analysis { clauses, red_flags }
}

/// Texts sent to the highlight service.
pub fn highlight_texts(analysis: &Analysis) -> Vec<String> {
    analysis
        .red_flags
        .iter()
        .map(|c| c.clause_text.clone())
        .collect()
}

pub fn format_percent(score: f64) -> String {
    format!("{score:.1}%")
}

/// Truncate on a char boundary, appending an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

pub fn summarize(document: &str, analysis: &Analysis) -> AnalysisSummary {
    AnalysisSummary {
        document: document.to_string(),
        red_flags: analysis
            .red_flags
            .iter()
            .map(|c| ClauseSummary {
                label: c.predicted_label.clone(),
                excerpt: excerpt(&c.clause_text, EXCERPT_CHARS),
                risk_level: c.risk_level,
                risk_percent: format_percent(c.risk_score),
            })
            .collect(),
    }
}

pub fn chart_points(analysis: &Analysis) -> Vec<ChartPoint> {
    analysis
        .red_flags
        .iter()
        .map(|c| ChartPoint {
            x: c.coordinate_x,
            y: c.coordinate_y,
            clause: c.clause_text.clone(),
            label: c.predicted_label.clone(),
            risk_score: c.risk_score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(text: &str, level: &str, risk: f64) -> ResultRow {
        ResultRow {
            clause_text: text.into(),
            predicted_label: format!("{text}-label"),
            final_risk: risk,
            x_coordinate: risk,
            y_coordinate: 1.0 - risk,
            risk_level: level.into(),
        }
    }

    #[test]
    fn filters_low_and_orders_high_first() {
        let rows = vec![
            row("a", "Medium", 0.95),
            row("b", "Low", 0.99),
            row("c", "High", 0.70),
            row("d", "High", 0.90),
            row("e", "Medium", 0.40),
        ];
        let analysis = analyze(&rows);
        let order: Vec<&str> = analysis
            .red_flags
            .iter()
            .map(|c| c.clause_text.as_str())
            .collect();
        assert_eq!(order, ["d", "c", "a", "e"]);
        assert_eq!(analysis.clauses.len(), 5);
    }

    #[test]
    fn red_flags_are_subset_with_sorted_invariants() {
        let rows: Vec<ResultRow> = (0..30)
            .map(|i| {
                let level = ["Low", "Medium", "High"][i % 3];
                row(&format!("c{i}"), level, ((i * 37) % 100) as f64 / 100.0)
            })
            .collect();
        let analysis = analyze(&rows);
        let flags = &analysis.red_flags;

        assert!(flags.len() < analysis.clauses.len());
        assert!(flags.iter().all(|f| analysis.clauses.contains(f)));
        assert!(flags.iter().all(|f| f.risk_level != RiskLevel::Low));

        let first_medium = flags
            .iter()
            .position(|f| f.risk_level == RiskLevel::Medium)
            .unwrap_or(flags.len());
        assert!(flags[..first_medium].iter().all(|f| f.risk_level == RiskLevel::High));
        assert!(flags[first_medium..].iter().all(|f| f.risk_level == RiskLevel::Medium));
        for pair in flags.windows(2) {
            if pair[0].risk_level == pair[1].risk_level {
                assert!(pair[0].risk_score >= pair[1].risk_score);
            }
        }
    }

    #[test]
    fn scores_become_clamped_percentages() {
        let clauses = derive_clauses(&[
            row("a", "high", 0.9),
            row("b", "HIGH", 1.7),
            row("c", "Medium", -0.2),
            row("d", "Medium", f64::NAN),
        ]);
        assert!((clauses[0].risk_score - 90.0).abs() < 1e-9);
        assert_eq!(clauses[1].risk_score, 100.0);
        assert_eq!(clauses[2].risk_score, 0.0);
        assert_eq!(clauses[3].risk_score, 0.0);
        assert_eq!(clauses[0].risk_level, RiskLevel::High);
    }

    #[test]
    fn unknown_level_is_not_a_red_flag() {
        let analysis = analyze(&[row("a", "Severe", 0.99)]);
        assert_eq!(analysis.clauses[0].risk_level, RiskLevel::Low);
        assert!(analysis.red_flags.is_empty());
    }

    #[test]
    fn excerpt_cuts_on_char_boundary() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("ééééé", 3), "ééé…");
        assert_eq!(excerpt("  padded  ", 10), "padded");
    }

    #[test]
    fn summary_formats_percentages() {
        let analysis = analyze(&[row("Tenant waives all rights", "High", 0.9)]);
        let summary = summarize("lease.pdf", &analysis);
        assert_eq!(summary.document, "lease.pdf");
        assert_eq!(summary.red_flags[0].risk_percent, "90.0%");
        assert_eq!(summary.red_flags[0].label, "Tenant waives all rights-label");
    }

    #[test]
    fn chart_points_follow_red_flags() {
        let analysis = analyze(&[row("a", "Low", 0.1), row("b", "High", 0.8)]);
        let points = chart_points(&analysis);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].clause, "b");
        assert!((points[0].x - 0.8).abs() < 1e-9);
        assert_eq!(highlight_texts(&analysis), vec!["b".to_string()]);
    }
}
