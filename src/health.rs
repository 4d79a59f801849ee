use std::collections::HashMap;

use chrono::{NaiveDate, Utc};

use crate::models::{BuildingHealth, BuildingScore, HealthGrade, HealthStatus, InspectionReport};

pub const MAX_FRESHNESS: u8 = 40;
pub const MAX_ISSUES: u8 = 30;
pub const MAX_MAINTENANCE: u8 = 30;

/// Scores one building's inspection history as of `today`.
///
/// The most recent report drives freshness and the issues score; the total
/// number of reports drives the maintenance score. With no reports at all the
/// building is treated as the worst case.
pub fn score_building(reports: &[InspectionReport], today: NaiveDate) -> BuildingHealth {
    let mut ordered: Vec<&InspectionReport> = reports.iter().collect();
    ordered.sort_by(|a, b| b.inspection_date.cmp(&a.inspection_date));

    let Some(last_report) = ordered.first() else {
        return BuildingHealth {
            days_since_inspection: None,
            freshness_score: 0,
            issues_score: 0,
            maintenance_score: 0,
            health_score: 0,
            health_grade: HealthGrade::F,
            status: HealthStatus::Urgent,
        };
    };

    // Negative for future-dated inspections; those still land in the top tiers.
    let days = (today - last_report.inspection_date).num_days();
    let severe = last_report
        .issues_found
        .iter()
        .filter(|issue| issue.severity.is_severe())
        .count();

    let freshness = freshness_score(days);
    let issues = issues_score(severe);
    let maintenance = maintenance_score(reports.len());
    let total = freshness + issues + maintenance;

    BuildingHealth {
        days_since_inspection: Some(days),
        freshness_score: freshness,
        issues_score: issues,
        maintenance_score: maintenance,
        health_score: total,
        health_grade: grade_for(total),
        status: status_for(days),
    }
}

pub fn freshness_score(days_since_inspection: i64) -> u8 {
    match days_since_inspection {
        i64::MIN..=90 => 40,
        91..=180 => 30,
        181..=365 => 20,
        _ => 0,
    }
}

/// Cut points are checked from the top: more than 5, more than 3, more than 1.
pub fn issues_score(severe_issues: usize) -> u8 {
    if severe_issues > 5 {
        0
    } else if severe_issues > 3 {
        10
    } else if severe_issues > 1 {
        20
    } else {
        30
    }
}

pub fn maintenance_score(report_count: usize) -> u8 {
    match report_count {
        0 => 0,
        1 => 10,
        2 => 20,
        _ => 30,
    }
}

pub fn grade_for(health_score: u8) -> HealthGrade {
    match health_score {
        90..=u8::MAX => HealthGrade::A,
        80..=89 => HealthGrade::B,
        70..=79 => HealthGrade::C,
        60..=69 => HealthGrade::D,
        _ => HealthGrade::F,
    }
}

pub fn status_for(days_since_inspection: i64) -> HealthStatus {
    match days_since_inspection {
        i64::MIN..=180 => HealthStatus::Good,
        181..=365 => HealthStatus::CheckSoon,
        _ => HealthStatus::Urgent,
    }
}

/// Groups reports by building and scores each one, worst building first.
pub fn score_portfolio(reports: &[InspectionReport], today: NaiveDate) -> Vec<BuildingScore> {
    score_buildings(&[], reports, today)
}

/// Like [`score_portfolio`], but every id in `building_ids` gets a score even
/// when it has no reports, in which case it takes the worst-case result.
pub fn score_buildings(
    building_ids: &[String],
    reports: &[InspectionReport],
    today: NaiveDate,
) -> Vec<BuildingScore> {
    let mut by_building: HashMap<&str, Vec<InspectionReport>> = building_ids
        .iter()
        .map(|id| (id.as_str(), Vec::new()))
        .collect();
    for report in reports {
        by_building
            .entry(report.building_id.as_str())
            .or_default()
            .push(report.clone());
    }

    let mut scores: Vec<BuildingScore> = by_building
        .into_iter()
        .map(|(building_id, history)| BuildingScore {
            building_id: building_id.to_string(),
            report_count: history.len(),
            last_inspection: history.iter().map(|r| r.inspection_date).max(),
            health: score_building(&history, today),
        })
        .collect();

    scores.sort_by(|a, b| {
        a.health
            .health_score
            .cmp(&b.health.health_score)
            .then_with(|| a.building_id.cmp(&b.building_id))
    });
    scores
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
