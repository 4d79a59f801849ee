use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::{InspectionReport, Issue, Severity};

/// One CSV row is one issue. An empty severity records a clean inspection.
#[derive(Debug, Deserialize)]
struct CsvRow {
    building_id: String,
    inspection_date: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    report_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KeyedReport {
    pub source_key: String,
    pub report: InspectionReport,
}

pub fn read_reports_from_path(path: &Path) -> anyhow::Result<Vec<KeyedReport>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    read_reports(file).with_context(|| format!("failed to read reports from {}", path.display()))
}

pub fn read_reports<R: Read>(input: R) -> anyhow::Result<Vec<KeyedReport>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut reports: Vec<KeyedReport> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let record = index + 1;
        let row = result.with_context(|| format!("record {record}: malformed row"))?;

        if row.building_id.is_empty() {
            anyhow::bail!("record {record}: building_id is empty");
        }
        let inspection_date = NaiveDate::parse_from_str(&row.inspection_date, "%Y-%m-%d")
            .with_context(|| {
                format!("record {record}: invalid inspection_date `{}`", row.inspection_date)
            })?;

        let source_key = row
            .report_key
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("{}:{}", row.building_id, inspection_date));

        let position = match positions.get(&source_key) {
            Some(position) => *position,
            None => {
                positions.insert(source_key.clone(), reports.len());
                reports.push(KeyedReport {
                    source_key: source_key.clone(),
                    report: InspectionReport {
                        building_id: row.building_id.clone(),
                        inspection_date,
                        issues_found: Vec::new(),
                    },
                });
                reports.len() - 1
            }
        };

        let existing = &reports[position].report;
        if existing.building_id != row.building_id || existing.inspection_date != inspection_date
        {
            anyhow::bail!(
                "record {record}: report key `{source_key}` already used for {} on {}",
                existing.building_id,
                existing.inspection_date
            );
        }

        if let Some(severity) = row.severity.filter(|value| !value.is_empty()) {
            let severity: Severity = severity
                .parse()
                .with_context(|| format!("record {record}: invalid severity"))?;
            reports[position].report.issues_found.push(Issue {
                severity,
                note: row.note.unwrap_or_default(),
            });
        }
    }

    tracing::debug!(reports = reports.len(), "parsed inspection reports");
    Ok(reports)
}

pub fn into_reports(keyed: Vec<KeyedReport>) -> Vec<InspectionReport> {
    keyed.into_iter().map(|keyed| keyed.report).collect()
}
