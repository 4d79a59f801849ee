use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::ingest;
use crate::models::{InspectionReport, Issue, Severity};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let buildings = vec![
        ("harbor-lofts", "Harbor Lofts", "14 Quay Road"),
        ("mill-street-depot", "Mill Street Depot", "220 Mill Street"),
        ("north-clinic", "North Clinic", "8 Alder Avenue"),
        ("quarry-annex", "Quarry Annex", "3 Quarry Lane"),
    ];

    for (id, name, address) in buildings {
        upsert_building(pool, id, name, address).await?;
    }

    let reports = vec![
        (
            "seed-001",
            "harbor-lofts",
            NaiveDate::from_ymd_opt(2025, 3, 12).context("invalid date")?,
            vec![],
        ),
        (
            "seed-002",
            "harbor-lofts",
            NaiveDate::from_ymd_opt(2025, 9, 18).context("invalid date")?,
            vec![(Severity::Medium, "Sealant cracking at skylight curb")],
        ),
        (
            "seed-003",
            "harbor-lofts",
            NaiveDate::from_ymd_opt(2026, 2, 4).context("invalid date")?,
            vec![
                (Severity::High, "Ponding water near east drain"),
                (Severity::Low, "Debris in gutters"),
            ],
        ),
        (
            "seed-004",
            "mill-street-depot",
            NaiveDate::from_ymd_opt(2024, 11, 2).context("invalid date")?,
            vec![
                (Severity::Critical, "Membrane split along ridge"),
                (Severity::High, "Rusted fasteners on panel seams"),
                (Severity::High, "Flashing detached at parapet"),
                (Severity::High, "Saturated insulation under walkway"),
            ],
        ),
        (
            "seed-005",
            "north-clinic",
            NaiveDate::from_ymd_opt(2025, 7, 21).context("invalid date")?,
            vec![(Severity::Low, "Loose downpipe bracket")],
        ),
        (
            "seed-006",
            "north-clinic",
            NaiveDate::from_ymd_opt(2026, 1, 15).context("invalid date")?,
            vec![],
        ),
    ];

    for (source_key, building_id, inspection_date, issues) in reports {
        let issues: Vec<Issue> = issues
            .into_iter()
            .map(|(severity, note)| Issue {
                severity,
                note: note.to_string(),
            })
            .collect();
        store_report(pool, source_key, building_id, inspection_date, &issues).await?;
    }

    Ok(())
}

/// Every known building, including ones that have never been inspected.
pub async fn fetch_building_ids(
    pool: &PgPool,
    building: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let mut query = String::from("SELECT id FROM building_health.buildings");
    if building.is_some() {
        query.push_str(" WHERE id = $1");
    }
    query.push_str(" ORDER BY id");

    let mut rows = sqlx::query(&query);
    if let Some(value) = building {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    Ok(records.into_iter().map(|row| row.get("id")).collect())
}

pub async fn fetch_reports(
    pool: &PgPool,
    building: Option<&str>,
) -> anyhow::Result<Vec<InspectionReport>> {
    let mut query = String::from(
        "SELECT r.id AS report_id, r.building_id, r.inspection_date, i.severity, i.note \
         FROM building_health.inspection_reports r \
         LEFT JOIN building_health.report_issues i ON i.report_id = r.id",
    );

    if building.is_some() {
        query.push_str(" WHERE r.building_id = $1");
    }
    query.push_str(" ORDER BY r.inspection_date DESC, r.id");

    let mut rows = sqlx::query(&query);
    if let Some(value) = building {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut reports: Vec<InspectionReport> = Vec::new();
    let mut positions: HashMap<Uuid, usize> = HashMap::new();

    for row in records {
        let report_id: Uuid = row.get("report_id");
        let position = *positions.entry(report_id).or_insert_with(|| {
            reports.push(InspectionReport {
                building_id: row.get("building_id"),
                inspection_date: row.get("inspection_date"),
                issues_found: Vec::new(),
            });
            reports.len() - 1
        });

        let severity: Option<String> = row.get("severity");
        if let Some(severity) = severity {
            let severity: Severity = severity
                .parse()
                .with_context(|| format!("report {report_id} has a corrupt issue row"))?;
            let note: Option<String> = row.get("note");
            reports[position].issues_found.push(Issue {
                severity,
                note: note.unwrap_or_default(),
            });
        }
    }

    tracing::debug!(reports = reports.len(), "fetched inspection reports");
    Ok(reports)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let keyed = ingest::read_reports_from_path(csv_path)?;
    let mut inserted = 0usize;

    for entry in keyed {
        let report = &entry.report;
        sqlx::query(
            r#"
            INSERT INTO building_health.buildings (id, name)
            VALUES ($1, $1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&report.building_id)
        .execute(pool)
        .await?;

        let stored = store_report(
            pool,
            &entry.source_key,
            &report.building_id,
            report.inspection_date,
            &report.issues_found,
        )
        .await?;
        if stored.is_none() {
            tracing::info!(source_key = %entry.source_key, "report already imported, skipping");
            continue;
        }
        inserted += 1;
    }

    Ok(inserted)
}

async fn upsert_building(pool: &PgPool, id: &str, name: &str, address: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO building_health.buildings (id, name, address)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name, address = EXCLUDED.address
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(address)
    .execute(pool)
    .await?;
    Ok(())
}

/// Writes a report and its issues in one transaction. Returns the new report
/// id, or `None` when the source key was already present.
pub async fn store_report(
    pool: &PgPool,
    source_key: &str,
    building_id: &str,
    inspection_date: NaiveDate,
    issues: &[Issue],
) -> anyhow::Result<Option<Uuid>> {
    let mut tx = pool.begin().await?;
    let Some(report_id) = insert_report(&mut *tx, source_key, building_id, inspection_date).await?
    else {
        return Ok(None);
    };
    for issue in issues {
        insert_issue(&mut *tx, report_id, issue.severity, &issue.note)
            .await
            .with_context(|| format!("failed to store issue for report {source_key}"))?;
    }
    tx.commit().await?;
    Ok(Some(report_id))
}

async fn insert_report(
    conn: &mut PgConnection,
    source_key: &str,
    building_id: &str,
    inspection_date: NaiveDate,
) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query(
        r#"
        INSERT INTO building_health.inspection_reports
        (id, building_id, inspection_date, source_key)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (source_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(building_id)
    .bind(inspection_date)
    .bind(source_key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| row.get("id")))
}

async fn insert_issue(
    conn: &mut PgConnection,
    report_id: Uuid,
    severity: Severity,
    note: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO building_health.report_issues (id, report_id, severity, note)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(report_id)
    .bind(severity.as_str())
    .bind(note)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// These run against a throwaway database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn issue_count(pool: &PgPool, source_key: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(i.id) AS n FROM building_health.inspection_reports r \
             LEFT JOIN building_health.report_issues i ON i.report_id = r.id \
             WHERE r.source_key = $1",
        )
        .bind(source_key)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("n")
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn failed_issue_insert_leaves_no_partial_report(pool: PgPool) {
        upsert_building(&pool, "harbor-lofts", "Harbor Lofts", "").await.unwrap();
        let issues = vec![
            Issue {
                severity: Severity::High,
                note: "ponding near drain".to_string(),
            },
            Issue {
                severity: Severity::Critical,
                note: "nul byte \0 is rejected by postgres".to_string(),
            },
        ];
        let first = store_report(&pool, "r-1", "harbor-lofts", date(2026, 1, 10), &issues).await;
        assert!(first.is_err());

        let report_rows: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM building_health.inspection_reports WHERE source_key = 'r-1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");
        assert_eq!(report_rows, 0);

        let retry_issues = vec![
            issues[0].clone(),
            Issue {
                severity: Severity::Critical,
                note: "membrane split".to_string(),
            },
        ];
        let retried = store_report(&pool, "r-1", "harbor-lofts", date(2026, 1, 10), &retry_issues)
            .await
            .unwrap();
        assert!(retried.is_some());
        assert_eq!(issue_count(&pool, "r-1").await, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn seeded_building_without_reports_is_listed(pool: PgPool) {
        seed(&pool).await.unwrap();
        let ids = fetch_building_ids(&pool, None).await.unwrap();
        assert!(ids.contains(&"quarry-annex".to_string()));

        let reports = fetch_reports(&pool, None).await.unwrap();
        assert!(reports.iter().all(|r| r.building_id != "quarry-annex"));

        let scores = crate::health::score_buildings(&ids, &reports, date(2026, 3, 1));
        assert_eq!(scores[0].building_id, "quarry-annex");
        assert_eq!(scores[0].health.health_grade, crate::models::HealthGrade::F);
    }
}
