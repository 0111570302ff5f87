//! Views the dashboard derives from a raw job list.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Job, JobStatus};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusShare {
    pub status: JobStatus,
    pub count: usize,
    /// Percentage of all jobs, 0 when there are none.
    pub share: f64,
}

/// Count and percentage per status, every status listed in canonical order.
pub fn status_distribution(jobs: &[Job]) -> Vec<StatusShare> {
    let total = jobs.len();
    JobStatus::ALL
        .into_iter()
        .map(|status| {
            let count = jobs.iter().filter(|j| j.status == status).count();
            let share = if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            };
            StatusShare {
                status,
                count,
                share,
            }
        })
        .collect()
}

/// Open jobs due between `now` and `now + horizon`, soonest first. Overdue
/// jobs are not included.
pub fn upcoming_deadlines(jobs: &[Job], now: DateTime<Utc>, horizon: Duration, limit: usize) -> Vec<Job> {
    let until = now + horizon;
    let mut due: Vec<Job> = jobs
        .iter()
        .filter(|job| job.status.is_open())
        .filter(|job| matches!(job.due_date, Some(date) if date >= now && date <= until))
        .cloned()
        .collect();
    due.sort_by_key(|job| job.due_date);
    due.truncate(limit);
    due
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job(status: JobStatus, due_in_days: Option<i64>, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            title: format!("{:?}", due_in_days),
            customer: None,
            pipeline: None,
            current_step: None,
            status,
            value: 0.0,
            due_date: due_in_days.map(|d| now + Duration::days(d)),
            completed_at: None,
            progress: 0,
            comments: None,
            address: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_distribution_covers_every_status() {
        let now = Utc::now();
        let jobs = vec![
            job(JobStatus::Planning, None, now),
            job(JobStatus::Planning, None, now),
            job(JobStatus::Completed, None, now),
            job(JobStatus::OnHold, None, now),
        ];
        let dist = status_distribution(&jobs);
        assert_eq!(dist.len(), JobStatus::ALL.len());
        assert_eq!(dist[0].status, JobStatus::Planning);
        assert_eq!(dist[0].count, 2);
        assert_eq!(dist[0].share, 50.0);
        let total: usize = dist.iter().map(|s| s.count).sum();
        assert_eq!(total, 4);

        assert!(status_distribution(&[]).iter().all(|s| s.share == 0.0));
    }

    #[test]
    fn test_upcoming_deadlines_order_and_filters() {
        let now = Utc::now();
        let jobs = vec![
            job(JobStatus::InProgress, Some(5), now),
            job(JobStatus::Planning, Some(1), now),
            job(JobStatus::Completed, Some(2), now),
            job(JobStatus::Cancelled, Some(2), now),
            job(JobStatus::OnHold, Some(-3), now),
            job(JobStatus::Planning, Some(30), now),
            job(JobStatus::Planning, None, now),
        ];
        let due = upcoming_deadlines(&jobs, now, Duration::days(7), 10);
        let titles: Vec<&str> = due.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["Some(1)", "Some(5)"]);

        assert_eq!(upcoming_deadlines(&jobs, now, Duration::days(7), 1).len(), 1);
    }
}
