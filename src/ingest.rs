// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use tracing::{debug, error, info, warn};

use crate::api::PriceSource;
use crate::db::PriceStore;
use crate::models::{PriceRecord, PriceRow};
use crate::validate::is_complete;

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Start date when the table is empty.
    pub epoch: NaiveDate,
    pub max_retries: u32,
}

/// Outcome of a single day.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DayReport {
    pub fetch_failed: bool,
    pub empty: bool,
    pub inserted: usize,
    pub incomplete: usize,
    pub bad_date: usize,
    pub duplicates: usize,
    pub write_errors: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub days: usize,
    pub days_failed: usize,
    pub days_empty: usize,
    pub inserted: usize,
    pub incomplete: usize,
    pub bad_date: usize,
    pub duplicates: usize,
    pub write_errors: usize,
}

impl IngestSummary {
    fn absorb(mut self, date: NaiveDate, day: DayReport) -> Self {
        self.first_date.get_or_insert(date);
        self.last_date = Some(date);
        self.days += 1;
        self.days_failed += usize::from(day.fetch_failed);
        self.days_empty += usize::from(day.empty);
        self.inserted += day.inserted;
        self.incomplete += day.incomplete;
        self.bad_date += day.bad_date;
        self.duplicates += day.duplicates;
        self.write_errors += day.write_errors;
        self
    }
}

/// The day after the latest stored date, or `epoch` for an empty table.
pub fn resume_date(latest: Option<NaiveDateTime>, epoch: NaiveDate) -> NaiveDate {
    latest
        .and_then(|dt| dt.date().checked_add_days(Days::new(1)))
        .unwrap_or(epoch)
}

/// Ingests every day from the resume date through `today`, in order.
///
/// Only the initial max-date query can fail the run; fetch and row errors
/// are logged and skipped.
pub async fn run<S, P>(
    source: &S,
    store: &P,
    settings: IngestSettings,
    today: NaiveDate,
) -> Result<IngestSummary>
where
    S: PriceSource + ?Sized,
    P: PriceStore + ?Sized,
{
    let latest = store
        .latest_date()
        .await
        .context("Error querying latest stored date")?;
    let start = resume_date(latest, settings.epoch);

    if start > today {
        info!("Nothing to ingest, next date {start} is after {today}");
        return Ok(IngestSummary::default());
    }
    info!("Ingesting FOB prices from {start} to {today}");

    let mut summary = IngestSummary::default();
    for date in start.iter_days().take_while(|d| *d <= today) {
        let day = ingest_day(source, store, date, settings.max_retries).await;
        if day.inserted > 0 {
            info!("Inserted {} prices for {date}", day.inserted);
        }
        summary = summary.absorb(date, day);
    }

    Ok(summary)
}

pub async fn ingest_day<S, P>(source: &S, store: &P, date: NaiveDate, max_retries: u32) -> DayReport
where
    S: PriceSource + ?Sized,
    P: PriceStore + ?Sized,
{
    let mut report = DayReport::default();

    let records = match source.fetch_prices(date, max_retries).await {
        Ok(records) => records,
        Err(e) => {
            error!("Error fetching prices for {date}: {e}");
            report.fetch_failed = true;
            return report;
        }
    };
    if records.is_empty() {
        debug!("No prices published for {date}");
        report.empty = true;
        return report;
    }

    for record in records {
        store_record(store, record, &mut report).await;
    }

    report
}

async fn store_record<P>(store: &P, record: PriceRecord, report: &mut DayReport)
where
    P: PriceStore + ?Sized,
{
    if !is_complete(&record) {
        warn!(
            "Incomplete row (price or validity window NULL) for {} / {}, skipped",
            record.date, record.position
        );
        report.incomplete += 1;
        return;
    }

    let position = record.position.clone();
    let row = match PriceRow::try_from(record) {
        Ok(row) => row,
        Err(e) => {
            warn!("Skipping {position}: {e}");
            report.bad_date += 1;
            return;
        }
    };

    match store.exists(row.date, &row.position).await {
        Ok(true) => {
            debug!("{} / {} already stored", row.date, row.position);
            report.duplicates += 1;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            error!("Error checking for duplicate {} / {}: {e:#}", row.date, row.position);
            report.write_errors += 1;
            return;
        }
    }

    match store.insert(&row).await {
        Ok(()) => report.inserted += 1,
        Err(e) => {
            error!("Error inserting {} / {}: {e:#}", row.date, row.position);
            report.write_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FetchError;
    use crate::decode::decode_records;
    use anyhow::bail;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::Datelike;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies per day through the real body inspection; days
    /// without an entry return `{"posts": []}`.
    #[derive(Default)]
    struct FakeSource {
        bodies: HashMap<NaiveDate, &'static str>,
        failures: HashMap<NaiveDate, u16>,
        requested: Mutex<Vec<NaiveDate>>,
    }

    impl FakeSource {
        fn with_body(mut self, date: NaiveDate, body: &'static str) -> Self {
            self.bodies.insert(date, body);
            self
        }

        fn failing(mut self, date: NaiveDate, status: u16) -> Self {
            self.failures.insert(date, status);
            self
        }

        fn requested(&self) -> Vec<NaiveDate> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        async fn fetch_prices(
            &self,
            date: NaiveDate,
            _max_retries: u32,
        ) -> Result<Vec<PriceRecord>, FetchError> {
            self.requested.lock().unwrap().push(date);
            if let Some(status) = self.failures.get(&date) {
                return Err(FetchError::Status(*status));
            }
            let body = self.bodies.get(&date).copied().unwrap_or(r#"{"posts": []}"#);
            crate::api::inspect_body(body.as_bytes())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<PriceRow>>,
        fail_latest: bool,
        fail_insert_for: Option<&'static str>,
    }

    impl MemoryStore {
        fn rows(&self) -> Vec<PriceRow> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceStore for MemoryStore {
        async fn latest_date(&self) -> Result<Option<NaiveDateTime>> {
            if self.fail_latest {
                bail!("connection reset");
            }
            Ok(self.rows.lock().unwrap().iter().map(|r| r.date).max())
        }

        async fn exists(&self, date: NaiveDateTime, position: &str) -> Result<bool> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.date == date && r.position == position))
        }

        async fn insert(&self, row: &PriceRow) -> Result<()> {
            if self.fail_insert_for == Some(row.position.as_str()) {
                bail!("value too long for column posicion");
            }
            self.rows.lock().unwrap().push(row.clone());
            Ok(())
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            epoch: day(1993, 1, 4),
            max_retries: 3,
        }
    }

    fn stored_row(date: NaiveDate, position: &str) -> PriceRow {
        PriceRow {
            date: date.and_hms_opt(0, 0, 0).unwrap(),
            circular: "C0".to_string(),
            position: position.to_string(),
            price: 1.0,
            month_from: 1,
            year_from: date.year(),
            month_to: 12,
            year_to: date.year(),
        }
    }

    const JAN_4: &str = r#"[{"fecha":"1993-01-04 00:00:00.000","circular":"C1","posicion":"P1","precio":100.5,"mesDesde":1,"añoDesde":1993,"mesHasta":12,"añoHasta":1993}]"#;

    const MIXED: &str = r#"{"posts": [
        {"fecha":"1993-01-05 00:00:00.000","circular":"C2","posicion":"TRIGO","precio":120.0,"mesDesde":1,"añoDesde":1993,"mesHasta":3,"añoHasta":1993},
        {"fecha":"1993-01-05 00:00:00.000","circular":"C2","posicion":"MAIZ","precio":null,"mesDesde":1,"añoDesde":1993,"mesHasta":3,"añoHasta":1993},
        {"fecha":"1993-01-05 00:00:00.000","circular":"C2","posicion":"SOJA","precio":200.0,"mesDesde":1,"añoDesde":1993,"mesHasta":null,"añoHasta":1993},
        {"fecha":"05/01/1993","circular":"C2","posicion":"GIRASOL","precio":180.0,"mesDesde":1,"añoDesde":1993,"mesHasta":3,"añoHasta":1993},
        {"fecha":"1993-01-05 00:00:00.000","circular":"C3","posicion":"TRIGO","precio":121.0,"mesDesde":1,"añoDesde":1993,"mesHasta":3,"añoHasta":1993}
    ]}"#;

    #[test]
    fn test_resume_date() {
        assert_eq!(resume_date(None, day(1993, 1, 4)), day(1993, 1, 4));

        let latest = day(2024, 2, 28).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(resume_date(Some(latest), day(1993, 1, 4)), day(2024, 2, 29));

        let late_in_day = day(2023, 12, 31).and_hms_milli_opt(23, 59, 59, 999).unwrap();
        assert_eq!(resume_date(Some(late_in_day), day(1993, 1, 4)), day(2024, 1, 1));
    }

    #[tokio::test]
    async fn test_empty_table_starts_at_epoch() -> Result<()> {
        let source = FakeSource::default();
        let store = MemoryStore::default();

        let summary = run(&source, &store, settings(), day(1993, 1, 6)).await?;

        assert_eq!(
            source.requested(),
            vec![day(1993, 1, 4), day(1993, 1, 5), day(1993, 1, 6)]
        );
        assert_eq!(summary.first_date, Some(day(1993, 1, 4)));
        assert_eq!(summary.last_date, Some(day(1993, 1, 6)));
        assert_eq!(summary.days, 3);
        assert_eq!(summary.days_empty, 3);
        assert_eq!(summary.inserted, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_resumes_after_latest_stored_date() -> Result<()> {
        let source = FakeSource::default();
        let store = MemoryStore::default();
        store.rows.lock().unwrap().push(stored_row(day(2024, 3, 10), "P1"));

        run(&source, &store, settings(), day(2024, 3, 12)).await?;

        assert_eq!(source.requested(), vec![day(2024, 3, 11), day(2024, 3, 12)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_up_to_date_table_fetches_nothing() -> Result<()> {
        let source = FakeSource::default();
        let store = MemoryStore::default();
        store.rows.lock().unwrap().push(stored_row(day(2024, 3, 12), "P1"));

        let summary = run(&source, &store, settings(), day(2024, 3, 12)).await?;

        assert!(source.requested().is_empty());
        assert_eq!(summary, IngestSummary::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_first_day_inserted_and_cursor_advances() -> Result<()> {
        let source = FakeSource::default().with_body(day(1993, 1, 4), JAN_4);
        let store = MemoryStore::default();

        let summary = run(&source, &store, settings(), day(1993, 1, 4)).await?;

        assert_eq!(summary.inserted, 1);
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position, "P1");
        assert_eq!(rows[0].circular, "C1");
        assert_relative_eq!(rows[0].price, 100.5);
        assert_eq!((rows[0].month_to, rows[0].year_to), (12, 1993));

        let latest = store.latest_date().await?;
        assert_eq!(resume_date(latest, settings().epoch), day(1993, 1, 5));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped() -> Result<()> {
        let source = FakeSource::default().with_body(day(1993, 1, 5), MIXED);
        let store = MemoryStore::default();
        store.rows.lock().unwrap().push(stored_row(day(1993, 1, 4), "P1"));

        let summary = run(&source, &store, settings(), day(1993, 1, 5)).await?;

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.incomplete, 2);
        assert_eq!(summary.bad_date, 1);
        // same date and position under another circular
        assert_eq!(summary.duplicates, 1);

        let positions: Vec<String> = store.rows().into_iter().map(|r| r.position).collect();
        assert_eq!(positions, vec!["P1", "TRIGO"]);
        assert_eq!(store.rows()[1].circular, "C2");
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_inserts_nothing() -> Result<()> {
        let source = FakeSource::default()
            .with_body(day(1993, 1, 4), JAN_4)
            .with_body(day(1993, 1, 5), MIXED);
        let store = MemoryStore::default();

        let first = run(&source, &store, settings(), day(1993, 1, 5)).await?;
        assert_eq!(first.inserted, 2);

        // replay the same range regardless of the cursor
        let mut second = IngestSummary::default();
        for date in [day(1993, 1, 4), day(1993, 1, 5)] {
            second = second.absorb(date, ingest_day(&source, &store, date, 3).await);
        }

        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(store.rows().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_day_does_not_stop_the_run() -> Result<()> {
        let source = FakeSource::default()
            .failing(day(1993, 1, 4), 503)
            .with_body(day(1993, 1, 5), MIXED);
        let store = MemoryStore::default();

        let summary = run(&source, &store, settings(), day(1993, 1, 6)).await?;

        assert_eq!(source.requested().len(), 3);
        assert_eq!(summary.days_failed, 1);
        assert_eq!(summary.days_empty, 1);
        assert_eq!(summary.inserted, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_html_day_is_skipped() -> Result<()> {
        let source = FakeSource::default()
            .with_body(day(1993, 1, 4), "<html><body>503</body></html>")
            .with_body(day(1993, 1, 5), MIXED);
        let store = MemoryStore::default();

        let summary = run(&source, &store, settings(), day(1993, 1, 5)).await?;

        assert_eq!(summary.days_failed, 1);
        assert_eq!(summary.inserted, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_posts_is_not_a_failure() -> Result<()> {
        let source = FakeSource::default().with_body(day(1993, 1, 4), r#"{"posts": []}"#);
        let store = MemoryStore::default();

        let report = ingest_day(&source, &store, day(1993, 1, 4), 3).await;

        assert_eq!(
            report,
            DayReport {
                empty: true,
                ..DayReport::default()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_error_skips_only_that_row() -> Result<()> {
        let source = FakeSource::default().with_body(
            day(1993, 1, 4),
            r#"[
                {"fecha":"1993-01-04 00:00:00.000","circular":"C1","posicion":"BAD","precio":1,"mesDesde":1,"añoDesde":1993,"mesHasta":2,"añoHasta":1993},
                {"fecha":"1993-01-04 00:00:00.000","circular":"C1","posicion":"OK","precio":2,"mesDesde":1,"añoDesde":1993,"mesHasta":2,"añoHasta":1993}
            ]"#,
        );
        let store = MemoryStore {
            fail_insert_for: Some("BAD"),
            ..MemoryStore::default()
        };

        let report = ingest_day(&source, &store, day(1993, 1, 4), 3).await;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.write_errors, 1);
        assert_eq!(store.rows()[0].position, "OK");
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_date_failure_is_fatal() {
        let source = FakeSource::default();
        let store = MemoryStore {
            fail_latest: true,
            ..MemoryStore::default()
        };

        let err = run(&source, &store, settings(), day(1993, 1, 4))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("latest stored date"));
        assert!(source.requested().is_empty());
    }

    #[test]
    fn test_decoded_fixture_shapes() {
        assert_eq!(decode_records(JAN_4.as_bytes()).unwrap().records.len(), 1);
        assert_eq!(decode_records(MIXED.as_bytes()).unwrap().records.len(), 5);
    }
}
