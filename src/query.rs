//! Dashboard aggregation over the Jobs collection.
//!
//! Jobs are projected from Sled JSON into an Arrow `RecordBatch` and
//! registered with DataFusion as table `jobs`; the dashboard figures are then
//! plain grouping SQL. The projection is rebuilt for every request, so
//! status changes show up in the next computation.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use datafusion::execution::context::SessionContext;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{AppError, AppResult};
use crate::models::{Job, JobStatus};
use crate::storage::Storage;

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Length of the revenue trend, current month included.
pub const REVENUE_MONTHS: u32 = 6;

/// Optional `createdAt` window for the job counts and sums.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MetricsWindow {
    /// Inclusive lower bound (RFC 3339)
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound (RFC 3339)
    pub to: Option<DateTime<Utc>>,
}

impl MetricsWindow {
    fn predicate(&self) -> String {
        let mut clauses = Vec::new();
        if let Some(from) = self.from {
            clauses.push(format!("created_at >= {}", from.timestamp_millis()));
        }
        if let Some(to) = self.to {
            clauses.push(format!("created_at < {}", to.timestamp_millis()));
        }
        if clauses.is_empty() {
            "TRUE".to_string()
        } else {
            clauses.join(" AND ")
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRevenue {
    /// Three-letter month label
    pub month: String,
    pub year: i32,
    pub revenue: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevenueResponse {
    pub monthly_data: Vec<MonthlyRevenue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_jobs: u64,
    pub active_jobs: u64,
    pub completed_jobs: u64,
    pub total_revenue: f64,
    pub pipeline_value: f64,
    pub status_breakdown: Vec<StatusCount>,
    pub monthly_revenue: Vec<MonthlyRevenue>,
}

/// Arrow view of the jobs collection.
pub fn project_jobs(jobs: &[Job]) -> Result<RecordBatch, arrow::error::ArrowError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new("created_at", DataType::Int64, false),
        Field::new("completed_at", DataType::Int64, true),
        Field::new("completed_year", DataType::Int32, true),
        Field::new("completed_month", DataType::Int32, true),
        Field::new("current_step", DataType::Utf8, true),
    ]));

    let ids: Vec<String> = jobs.iter().map(|j| j.id.to_string()).collect();
    let statuses: Vec<&str> = jobs.iter().map(|j| j.status.as_str()).collect();
    let values: Vec<f64> = jobs
        .iter()
        .map(|j| if j.value.is_finite() { j.value } else { 0.0 })
        .collect();
    let created: Vec<i64> = jobs.iter().map(|j| j.created_at.timestamp_millis()).collect();
    let completed: Vec<Option<i64>> = jobs
        .iter()
        .map(|j| j.completed_at.map(|t| t.timestamp_millis()))
        .collect();
    let completed_year: Vec<Option<i32>> = jobs
        .iter()
        .map(|j| j.completed_at.map(|t| t.year()))
        .collect();
    let completed_month: Vec<Option<i32>> = jobs
        .iter()
        .map(|j| j.completed_at.map(|t| t.month() as i32))
        .collect();
    let steps: Vec<Option<&str>> = jobs.iter().map(|j| j.current_step.as_deref()).collect();

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)) as ArrayRef,
            Arc::new(StringArray::from(statuses)) as ArrayRef,
            Arc::new(Float64Array::from(values)) as ArrayRef,
            Arc::new(Int64Array::from(created)) as ArrayRef,
            Arc::new(Int64Array::from(completed)) as ArrayRef,
            Arc::new(Int32Array::from(completed_year)) as ArrayRef,
            Arc::new(Int32Array::from(completed_month)) as ArrayRef,
            Arc::new(StringArray::from(steps)) as ArrayRef,
        ],
    )
}

/// QueryEngine wraps a DataFusion SessionContext holding the `jobs` table.
pub struct QueryEngine {
    ctx: SessionContext,
}

impl QueryEngine {
    /// Snapshot the jobs collection into a fresh session.
    pub async fn new(storage: &Storage) -> AppResult<Self> {
        let jobs: Vec<Job> = storage.all()?;
        Self::from_jobs(&jobs)
    }

    pub fn from_jobs(jobs: &[Job]) -> AppResult<Self> {
        let ctx = SessionContext::new();
        ctx.register_batch("jobs", project_jobs(jobs)?)?;
        Ok(Self { ctx })
    }

    pub async fn execute_sql(&self, sql: &str) -> AppResult<Vec<RecordBatch>> {
        tracing::trace!(sql, "running aggregation");
        let df = self.ctx.sql(sql).await?;
        Ok(df.collect().await?)
    }

    /// Counts and sums of the metrics card, plus the status breakdown and the
    /// trailing revenue trend ending with the month of `now`.
    pub async fn dashboard_metrics(
        &self,
        window: MetricsWindow,
        now: DateTime<Utc>,
    ) -> AppResult<DashboardMetrics> {
        let sql = format!(
            "SELECT \
                COUNT(*) AS total_jobs, \
                SUM(CASE WHEN status IN ('Planning', 'In Progress', 'Active') THEN 1 ELSE 0 END) AS active_jobs, \
                SUM(CASE WHEN status = 'Completed' THEN 1 ELSE 0 END) AS completed_jobs, \
                SUM(CASE WHEN status = 'Completed' THEN value ELSE 0.0 END) AS total_revenue, \
                SUM(CASE WHEN status <> 'Completed' THEN value ELSE 0.0 END) AS pipeline_value \
             FROM jobs WHERE {}",
            window.predicate()
        );
        let batches = self.execute_sql(&sql).await?;

        let mut metrics = DashboardMetrics {
            total_jobs: 0,
            active_jobs: 0,
            completed_jobs: 0,
            total_revenue: 0.0,
            pipeline_value: 0.0,
            status_breakdown: self.status_breakdown(window).await?,
            monthly_revenue: self.monthly_revenue(now).await?,
        };

        if let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) {
            metrics.total_jobs = int_at(batch, 0, 0)?.max(0) as u64;
            metrics.active_jobs = int_at(batch, 1, 0)?.max(0) as u64;
            metrics.completed_jobs = int_at(batch, 2, 0)?.max(0) as u64;
            metrics.total_revenue = float_at(batch, 3, 0)?;
            metrics.pipeline_value = float_at(batch, 4, 0)?;
        }

        Ok(metrics)
    }

    /// Job count per status, in canonical status order, zero counts included.
    pub async fn status_breakdown(&self, window: MetricsWindow) -> AppResult<Vec<StatusCount>> {
        let sql = format!(
            "SELECT status, COUNT(*) AS jobs FROM jobs WHERE {} GROUP BY status",
            window.predicate()
        );
        let mut counts: Vec<StatusCount> = JobStatus::ALL
            .into_iter()
            .map(|status| StatusCount { status, count: 0 })
            .collect();

        for batch in self.execute_sql(&sql).await? {
            let labels = cast(batch.column(0), &DataType::Utf8)?;
            let labels = labels
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| AppError::Internal("status column is not text".to_string()))?;
            for row in 0..batch.num_rows() {
                let status = labels
                    .value(row)
                    .parse::<JobStatus>()
                    .map_err(AppError::Internal)?;
                let count = int_at(&batch, 1, row)?.max(0) as u64;
                if let Some(entry) = counts.iter_mut().find(|c| c.status == status) {
                    entry.count += count;
                }
            }
        }

        Ok(counts)
    }

    /// Revenue of completed jobs per calendar month for the
    /// [`REVENUE_MONTHS`] months ending with the month of `now`, oldest first.
    /// Buckets are keyed by (year, month) and empty months are zero-filled.
    pub async fn monthly_revenue(&self, now: DateTime<Utc>) -> AppResult<Vec<MonthlyRevenue>> {
        let months = trailing_months(now, REVENUE_MONTHS);
        let (first_year, first_month) = months[0];
        let start = month_start(first_year, first_month)?;
        let end = month_start_after(now.year(), now.month())?;

        let sql = format!(
            "SELECT completed_year, completed_month, SUM(value) AS revenue \
             FROM jobs \
             WHERE status = 'Completed' AND completed_at >= {} AND completed_at < {} \
             GROUP BY completed_year, completed_month",
            start.timestamp_millis(),
            end.timestamp_millis()
        );

        let mut buckets: Vec<MonthlyRevenue> = months
            .iter()
            .map(|&(year, month)| MonthlyRevenue {
                month: MONTH_LABELS[(month - 1) as usize].to_string(),
                year,
                revenue: 0.0,
            })
            .collect();

        for batch in self.execute_sql(&sql).await? {
            for row in 0..batch.num_rows() {
                let year = int_at(&batch, 0, row)? as i32;
                let month = int_at(&batch, 1, row)? as u32;
                let revenue = float_at(&batch, 2, row)?;
                if let Some(index) = months.iter().position(|&m| m == (year, month)) {
                    buckets[index].revenue += revenue;
                }
            }
        }

        Ok(buckets)
    }
}

/// `(year, month)` pairs for the `count` months ending with `now`'s month.
pub fn trailing_months(now: DateTime<Utc>, count: u32) -> Vec<(i32, u32)> {
    let current = now.year() * 12 + now.month0() as i32;
    (0..count as i32)
        .rev()
        .map(|back| {
            let index = current - back;
            (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
        })
        .collect()
}

fn month_start(year: i32, month: u32) -> AppResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::Internal(format!("invalid month {}-{}", year, month)))
}

fn month_start_after(year: i32, month: u32) -> AppResult<DateTime<Utc>> {
    if month == 12 {
        month_start(year + 1, 1)
    } else {
        month_start(year, month + 1)
    }
}

/// Integer cell; NULL (an empty SUM) reads as 0.
fn int_at(batch: &RecordBatch, column: usize, row: usize) -> AppResult<i64> {
    let values = cast(batch.column(column), &DataType::Int64)?;
    let values = values
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| AppError::Internal(format!("column {} is not an integer", column)))?;
    Ok(if values.is_null(row) { 0 } else { values.value(row) })
}

/// Float cell; NULL (an empty SUM) reads as 0.
fn float_at(batch: &RecordBatch, column: usize, row: usize) -> AppResult<f64> {
    let values = cast(batch.column(column), &DataType::Float64)?;
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| AppError::Internal(format!("column {} is not numeric", column)))?;
    Ok(if values.is_null(row) { 0.0 } else { values.value(row) })
}
