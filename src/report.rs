use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::health::{MAX_FRESHNESS, MAX_ISSUES, MAX_MAINTENANCE};
use crate::models::{BuildingScore, HealthGrade, HealthStatus, InspectionReport};

pub fn grade_distribution(scores: &[BuildingScore]) -> Vec<(HealthGrade, usize)> {
    HealthGrade::ALL
        .iter()
        .map(|grade| {
            let count = scores
                .iter()
                .filter(|score| score.health.health_grade == *grade)
                .count();
            (*grade, count)
        })
        .collect()
}

fn inspection_label(days: Option<i64>) -> String {
    match days {
        Some(days) => format!("last inspection {days} days ago"),
        None => "never inspected".to_string(),
    }
}

pub fn build_report(
    scope: Option<&str>,
    today: NaiveDate,
    scores: &[BuildingScore],
    reports: &[InspectionReport],
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all buildings");

    let _ = writeln!(output, "# Building Health Report");
    let _ = writeln!(output, "Generated for {} as of {}", scope_label, today);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");

    if scores.is_empty() {
        let _ = writeln!(output, "No buildings with inspection reports.");
    } else {
        for (grade, count) in grade_distribution(scores) {
            let _ = writeln!(output, "- {}: {} buildings", grade, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    let attention: Vec<&BuildingScore> = scores
        .iter()
        .filter(|score| score.health.status != HealthStatus::Good)
        .collect();
    if scores.is_empty() {
        let _ = writeln!(output, "No buildings to check.");
    } else if attention.is_empty() {
        let _ = writeln!(output, "Every building was inspected within the last 180 days.");
    } else {
        for score in attention {
            let _ = writeln!(
                output,
                "- {} is {} ({}, score {})",
                score.building_id,
                score.health.status,
                inspection_label(score.health.days_since_inspection),
                score.health.health_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Portfolio");

    if !scores.is_empty() {
        let _ = writeln!(
            output,
            "| Building | Score | Grade | Status | Freshness /{} | Issues /{} | Maintenance /{} |",
            MAX_FRESHNESS, MAX_ISSUES, MAX_MAINTENANCE
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for score in scores {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                score.building_id,
                score.health.health_score,
                score.health.health_grade,
                score.health.status,
                score.health.freshness_score,
                score.health.issues_score,
                score.health.maintenance_score
            );
        }
    } else {
        let _ = writeln!(output, "No buildings to list.");
    }

    let mut recent: Vec<&InspectionReport> = reports.iter().collect();
    recent.sort_by(|a, b| b.inspection_date.cmp(&a.inspection_date));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Inspections");

    if recent.is_empty() {
        let _ = writeln!(output, "No inspections recorded.");
    } else {
        for report in recent.iter().take(5) {
            let severe = report
                .issues_found
                .iter()
                .filter(|issue| issue.severity.is_severe())
                .count();
            let _ = writeln!(
                output,
                "- {} on {}: {} issues ({} high or critical)",
                report.building_id,
                report.inspection_date,
                report.issues_found.len(),
                severe
            );
        }
    }

    output
}

const SCORE_COLUMNS: [&str; 10] = [
    "building_id",
    "report_count",
    "last_inspection",
    "days_since_inspection",
    "freshness_score",
    "issues_score",
    "maintenance_score",
    "health_score",
    "health_grade",
    "status",
];

#[derive(Debug, Serialize)]
struct ScoreRow<'a> {
    building_id: &'a str,
    report_count: usize,
    last_inspection: Option<NaiveDate>,
    days_since_inspection: Option<i64>,
    freshness_score: u8,
    issues_score: u8,
    maintenance_score: u8,
    health_score: u8,
    health_grade: HealthGrade,
    status: HealthStatus,
}

/// The header is always written, so an empty portfolio still yields a valid file.
pub fn write_scores_csv<W: std::io::Write>(
    writer: W,
    scores: &[BuildingScore],
) -> anyhow::Result<()> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(SCORE_COLUMNS)?;
    for score in scores {
        csv_writer.serialize(ScoreRow {
            building_id: &score.building_id,
            report_count: score.report_count,
            last_inspection: score.last_inspection,
            days_since_inspection: score.health.days_since_inspection,
            freshness_score: score.health.freshness_score,
            issues_score: score.health.issues_score,
            maintenance_score: score.health.maintenance_score,
            health_score: score.health.health_score,
            health_grade: score.health.health_grade,
            status: score.health.status,
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{score_buildings, score_portfolio};
    use crate::models::{Issue, Severity};
    use chrono::Duration;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn sample_reports() -> Vec<InspectionReport> {
        vec![
            InspectionReport {
                building_id: "harbor-lofts".to_string(),
                inspection_date: as_of() - Duration::days(12),
                issues_found: vec![Issue {
                    severity: Severity::High,
                    note: "ponding near drain".to_string(),
                }],
            },
            InspectionReport {
                building_id: "mill-street".to_string(),
                inspection_date: as_of() - Duration::days(420),
                issues_found: vec![],
            },
        ]
    }

    #[test]
    fn report_flags_overdue_buildings() {
        let reports = sample_reports();
        let scores = score_portfolio(&reports, as_of());
        let report = build_report(None, as_of(), &scores, &reports);

        assert!(report.contains("Generated for all buildings as of 2026-03-01"));
        assert!(report.contains("- mill-street is urgent (last inspection 420 days ago, score 40)"));
        assert!(!report.contains("- harbor-lofts is"));
        assert!(report.contains("| harbor-lofts | 80 | B | good | 40 | 30 | 10 |"));
        assert!(report.contains("- harbor-lofts on 2026-02-17: 1 issues (1 high or critical)"));
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report(Some("harbor-lofts"), as_of(), &[], &[]);
        assert!(report.contains("No buildings with inspection reports."));
        assert!(report.contains("No buildings to check."));
        assert!(!report.contains("Every building was inspected"));
        assert!(report.contains("No inspections recorded."));
    }

    #[test]
    fn never_inspected_building_is_flagged() {
        let reports = sample_reports();
        let ids = vec!["harbor-lofts".to_string(), "quarry-annex".to_string()];
        let scores = score_buildings(&ids, &reports, as_of());
        let report = build_report(None, as_of(), &scores, &reports);

        assert!(report.contains("- quarry-annex is urgent (never inspected, score 0)"));
        assert!(report.contains("| quarry-annex | 0 | F | urgent | 0 | 0 | 0 |"));
        assert!(!report.contains("never inspected ago"));
    }

    #[test]
    fn csv_export_of_empty_portfolio_keeps_header() {
        let mut buffer = Vec::new();
        write_scores_csv(&mut buffer, &[]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "building_id,report_count,last_inspection,days_since_inspection,freshness_score,issues_score,maintenance_score,health_score,health_grade,status\n"
        );
    }

    #[test]
    fn grade_distribution_covers_every_grade() {
        let reports = sample_reports();
        let scores = score_portfolio(&reports, as_of());
        let distribution = grade_distribution(&scores);
        assert_eq!(distribution.len(), 5);
        assert_eq!(distribution[1], (HealthGrade::B, 1));
        assert_eq!(distribution[4], (HealthGrade::F, 1));
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let scores = score_portfolio(&sample_reports(), as_of());
        let mut buffer = Vec::new();
        write_scores_csv(&mut buffer, &scores).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("building_id,report_count,last_inspection,days_since_inspection,freshness_score,issues_score,maintenance_score,health_score,health_grade,status")
        );
        assert_eq!(lines.next(), Some("mill-street,1,2025-01-05,420,0,30,10,40,F,urgent"));
        assert_eq!(lines.next(), Some("harbor-lofts,1,2026-02-17,12,40,30,10,80,B,good"));
    }
}
