use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical issues are the ones that pull the issues score down.
    pub fn is_severe(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity `{0}` (expected low, medium, high or critical)")]
pub struct SeverityParseError(pub String);

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(SeverityParseError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionReport {
    pub building_id: String,
    pub inspection_date: NaiveDate,
    pub issues_found: Vec<Issue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HealthGrade {
    A,
    B,
    C,
    D,
    F,
}

impl HealthGrade {
    pub const ALL: [HealthGrade; 5] = [
        HealthGrade::A,
        HealthGrade::B,
        HealthGrade::C,
        HealthGrade::D,
        HealthGrade::F,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthGrade::A => "A",
            HealthGrade::B => "B",
            HealthGrade::C => "C",
            HealthGrade::D => "D",
            HealthGrade::F => "F",
        }
    }
}

impl fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Good,
    CheckSoon,
    Urgent,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Good => "good",
            HealthStatus::CheckSoon => "check-soon",
            HealthStatus::Urgent => "urgent",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived view of a building's inspection history. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildingHealth {
    pub days_since_inspection: Option<i64>,
    pub freshness_score: u8,
    pub issues_score: u8,
    pub maintenance_score: u8,
    pub health_score: u8,
    pub health_grade: HealthGrade,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildingScore {
    pub building_id: String,
    pub report_count: usize,
    pub last_inspection: Option<NaiveDate>,
    #[serde(flatten)]
    pub health: BuildingHealth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert_eq!(" critical ".parse::<Severity>(), Ok(Severity::Critical));
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn only_high_and_critical_are_severe() {
        assert!(!Severity::Low.is_severe());
        assert!(!Severity::Medium.is_severe());
        assert!(Severity::High.is_severe());
        assert!(Severity::Critical.is_severe());
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&HealthStatus::CheckSoon).unwrap();
        assert_eq!(json, "\"check-soon\"");
    }
}
