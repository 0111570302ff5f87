//! Kanban view of one pipeline: a column per step, jobs placed by their
//! current step, and moves applied optimistically until the server answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Job, Pipeline};

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("job {0} is not on this board")]
    UnknownJob(Uuid),

    #[error("'{0}' is not a step of this pipeline")]
    UnknownStep(String),

    #[error("job {0} already has a move in flight")]
    MoveInFlight(Uuid),

    #[error("no pending move for job {0}")]
    NoPendingMove(Uuid),

    #[error("move rejected: {0}")]
    Rejected(Box<dyn std::error::Error + Send + Sync>),
}

/// Persists a step change; implemented by the HTTP client.
#[async_trait]
pub trait JobMover: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// `pipeline` is the board's pipeline; a job without one joins it.
    async fn move_job(
        &self,
        pipeline: Uuid,
        job_id: Uuid,
        from_step: Option<&str>,
        to_step: &str,
    ) -> Result<Job, Self::Error>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub step: String,
    pub jobs: Vec<Job>,
}

/// Where a job sits on the board.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Column(usize),
    Unplaced,
}

/// Snapshot taken before an optimistic move, enough to put the job back
/// exactly where it was.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
    pub job_id: Uuid,
    pub from_step: Option<String>,
    pub to_step: String,
    original: Job,
    slot: Slot,
    position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// The server accepted the move; this is its copy of the job.
    Moved(Job),
    /// The job already was on the target step.
    Unchanged,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBoard {
    pub pipeline: Pipeline,
    pub columns: Vec<BoardColumn>,
    /// Jobs of this pipeline, or stepped jobs without a pipeline, whose step
    /// is not one of its steps.
    pub unplaced: Vec<Job>,
    #[serde(skip)]
    pending: Vec<PendingMove>,
}

impl PipelineBoard {
    /// Group `jobs` under `pipeline`. Jobs of other pipelines are ignored.
    /// Jobs without a pipeline are shown by step name, or as unplaced; a move
    /// assigns them to this pipeline.
    pub fn from_pipeline(pipeline: Pipeline, jobs: impl IntoIterator<Item = Job>) -> Self {
        let mut columns: Vec<BoardColumn> = pipeline
            .steps
            .iter()
            .map(|step| BoardColumn {
                step: step.clone(),
                jobs: Vec::new(),
            })
            .collect();
        let mut unplaced = Vec::new();

        for job in jobs {
            match job.pipeline {
                Some(id) if id != pipeline.id => continue,
                _ => {}
            }
            let column = job
                .current_step
                .as_deref()
                .and_then(|step| columns.iter().position(|c| c.step == step));
            match column {
                Some(index) => columns[index].jobs.push(job),
                None if job.pipeline.is_some() || job.current_step.is_some() => {
                    unplaced.push(job)
                }
                None => {}
            }
        }

        Self {
            pipeline,
            columns,
            unplaced,
            pending: Vec::new(),
        }
    }

    /// Board of the first pipeline, the one the dashboard opens on.
    pub fn active(pipelines: &[Pipeline], jobs: impl IntoIterator<Item = Job>) -> Option<Self> {
        pipelines
            .first()
            .map(|pipeline| Self::from_pipeline(pipeline.clone(), jobs))
    }

    pub fn column(&self, step: &str) -> Option<&BoardColumn> {
        self.columns.iter().find(|c| c.step == step)
    }

    /// Step the board currently shows the job on; `None` when unplaced or
    /// not on the board.
    pub fn step_of(&self, job_id: Uuid) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.jobs.iter().any(|j| j.id == job_id))
            .map(|c| c.step.as_str())
    }

    pub fn job(&self, job_id: Uuid) -> Option<&Job> {
        self.columns
            .iter()
            .flat_map(|c| c.jobs.iter())
            .chain(self.unplaced.iter())
            .find(|j| j.id == job_id)
    }

    pub fn job_count(&self) -> usize {
        self.columns.iter().map(|c| c.jobs.len()).sum::<usize>() + self.unplaced.len()
    }

    pub fn is_pending(&self, job_id: Uuid) -> bool {
        self.pending.iter().any(|p| p.job_id == job_id)
    }

    fn locate(&self, job_id: Uuid) -> Option<(Slot, usize)> {
        for (index, column) in self.columns.iter().enumerate() {
            if let Some(position) = column.jobs.iter().position(|j| j.id == job_id) {
                return Some((Slot::Column(index), position));
            }
        }
        self.unplaced
            .iter()
            .position(|j| j.id == job_id)
            .map(|position| (Slot::Unplaced, position))
    }

    fn take(&mut self, slot: &Slot, position: usize) -> Job {
        match slot {
            Slot::Column(index) => self.columns[*index].jobs.remove(position),
            Slot::Unplaced => self.unplaced.remove(position),
        }
    }

    fn step_index(&self, step: &str) -> Result<usize, BoardError> {
        self.columns
            .iter()
            .position(|c| c.step == step)
            .ok_or_else(|| BoardError::UnknownStep(step.to_string()))
    }

    /// Apply a move locally and remember how to undo it. Returns `None` when
    /// the job already is on `to_step`.
    pub fn begin_move(
        &mut self,
        job_id: Uuid,
        to_step: &str,
    ) -> Result<Option<PendingMove>, BoardError> {
        let target = self.step_index(to_step)?;
        if self.is_pending(job_id) {
            return Err(BoardError::MoveInFlight(job_id));
        }
        let (slot, position) = self.locate(job_id).ok_or(BoardError::UnknownJob(job_id))?;
        if slot == Slot::Column(target) {
            return Ok(None);
        }

        let original = self.take(&slot, position);
        let pending = PendingMove {
            job_id,
            from_step: original.current_step.clone(),
            to_step: to_step.to_string(),
            original: original.clone(),
            slot,
            position,
        };

        let mut moved = original;
        moved.current_step = Some(to_step.to_string());
        self.columns[target].jobs.push(moved);
        self.pending.push(pending.clone());
        Ok(Some(pending))
    }

    fn finish(&mut self, job_id: Uuid) -> Result<PendingMove, BoardError> {
        let index = self
            .pending
            .iter()
            .position(|p| p.job_id == job_id)
            .ok_or(BoardError::NoPendingMove(job_id))?;
        Ok(self.pending.remove(index))
    }

    /// Replace the optimistic copy with the job as persisted.
    pub fn confirm(&mut self, job: Job) -> Result<(), BoardError> {
        self.finish(job.id)?;
        if let Some((slot, position)) = self.locate(job.id) {
            self.take(&slot, position);
        }
        let column = job
            .current_step
            .as_deref()
            .and_then(|step| self.columns.iter().position(|c| c.step == step));
        match column {
            Some(index) => self.columns[index].jobs.push(job),
            None => self.unplaced.push(job),
        }
        Ok(())
    }

    /// Put the job back where it was before `begin_move`.
    pub fn rollback(&mut self, job_id: Uuid) -> Result<(), BoardError> {
        let pending = self.finish(job_id)?;
        if let Some((slot, position)) = self.locate(job_id) {
            self.take(&slot, position);
        }
        let restored = pending.original;
        match pending.slot {
            Slot::Column(index) => {
                let jobs = &mut self.columns[index].jobs;
                jobs.insert(pending.position.min(jobs.len()), restored);
            }
            Slot::Unplaced => {
                let position = pending.position.min(self.unplaced.len());
                self.unplaced.insert(position, restored);
            }
        }
        Ok(())
    }
}

/// Drag-and-drop: move optimistically, persist through `mover`, then confirm
/// or roll back. On failure the board is left exactly as before the call.
pub async fn move_on_board<M>(
    board: &mut PipelineBoard,
    mover: &M,
    job_id: Uuid,
    to_step: &str,
) -> Result<MoveOutcome, BoardError>
where
    M: JobMover + ?Sized,
{
    let Some(pending) = board.begin_move(job_id, to_step)? else {
        return Ok(MoveOutcome::Unchanged);
    };

    match mover
        .move_job(
            board.pipeline.id,
            job_id,
            pending.from_step.as_deref(),
            &pending.to_step,
        )
        .await
    {
        Ok(job) => {
            board.confirm(job.clone())?;
            tracing::debug!(%job_id, to = %pending.to_step, "move confirmed");
            Ok(MoveOutcome::Moved(job))
        }
        Err(err) => {
            board.rollback(job_id)?;
            tracing::warn!(%job_id, error = %err, "move failed, board reverted");
            Err(BoardError::Rejected(Box::new(err)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    fn pipeline() -> Pipeline {
        Pipeline {
            id: Uuid::new_v4(),
            name: "Sales".into(),
            steps: vec!["Lead".into(), "Proposal".into(), "Won".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn job(title: &str, pipeline: Option<Uuid>, step: Option<&str>) -> Job {
        Job {
            id: Uuid::new_v4(),
            title: title.into(),
            customer: None,
            pipeline,
            current_step: step.map(str::to_string),
            status: Default::default(),
            value: 0.0,
            due_date: None,
            completed_at: None,
            progress: 0,
            comments: None,
            address: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Debug, Error)]
    #[error("server said no")]
    struct Refused;

    /// Accepts or refuses every move and records the calls.
    struct FakeMover {
        accept: bool,
        calls: Mutex<Vec<(Uuid, Option<String>, String)>>,
    }

    impl FakeMover {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobMover for FakeMover {
        type Error = Refused;

        async fn move_job(
            &self,
            _pipeline: Uuid,
            job_id: Uuid,
            from_step: Option<&str>,
            to_step: &str,
        ) -> Result<Job, Refused> {
            self.calls.lock().unwrap().push((
                job_id,
                from_step.map(str::to_string),
                to_step.to_string(),
            ));
            if !self.accept {
                return Err(Refused);
            }
            let mut persisted = job("persisted", None, Some(to_step));
            persisted.id = job_id;
            persisted.progress = 42;
            Ok(persisted)
        }
    }

    #[test]
    fn test_grouping_follows_step_order() {
        let p = pipeline();
        let other = Uuid::new_v4();
        let jobs = vec![
            job("won", Some(p.id), Some("Won")),
            job("lead", Some(p.id), Some("Lead")),
            job("stray", Some(p.id), Some("Archived")),
            job("foreign", Some(other), Some("Lead")),
            job("legacy", None, Some("Proposal")),
            job("legacy stray", None, Some("Archived")),
        ];
        let board = PipelineBoard::from_pipeline(p, jobs);

        let steps: Vec<&str> = board.columns.iter().map(|c| c.step.as_str()).collect();
        assert_eq!(steps, vec!["Lead", "Proposal", "Won"]);
        assert_eq!(board.column("Lead").unwrap().jobs.len(), 1);
        assert_eq!(board.column("Proposal").unwrap().jobs[0].title, "legacy");
        let unplaced: Vec<&str> = board.unplaced.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(unplaced, vec!["stray", "legacy stray"]);
        assert_eq!(board.job_count(), 5);
    }

    #[test]
    fn test_active_uses_first_pipeline() {
        assert!(PipelineBoard::active(&[], Vec::new()).is_none());
        let first = pipeline();
        let board = PipelineBoard::active(&[first.clone(), pipeline()], Vec::new()).unwrap();
        assert_eq!(board.pipeline.id, first.id);
    }

    #[tokio::test]
    async fn test_successful_move_is_confirmed() {
        let p = pipeline();
        let j = job("site", Some(p.id), Some("Lead"));
        let id = j.id;
        let mut board = PipelineBoard::from_pipeline(p, vec![j]);
        let mover = FakeMover::new(true);

        let outcome = move_on_board(&mut board, &mover, id, "Proposal").await.unwrap();
        let MoveOutcome::Moved(persisted) = outcome else {
            panic!("expected a move");
        };
        assert_eq!(persisted.current_step.as_deref(), Some("Proposal"));
        assert_eq!(board.step_of(id), Some("Proposal"));
        // The server copy replaced the optimistic one
        assert_eq!(board.job(id).unwrap().progress, 42);
        assert!(!board.is_pending(id));

        let calls = mover.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (id, Some("Lead".to_string()), "Proposal".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_move_rolls_back() {
        let p = pipeline();
        let first = job("first", Some(p.id), Some("Lead"));
        let second = job("second", Some(p.id), Some("Lead"));
        let id = first.id;
        let mut board = PipelineBoard::from_pipeline(p, vec![first, second]);
        let before = board.clone();

        let err = move_on_board(&mut board, &FakeMover::new(false), id, "Won")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Rejected(_)));
        assert_eq!(board, before);
        assert_eq!(board.column("Lead").unwrap().jobs[0].id, id);
    }

    #[tokio::test]
    async fn test_noop_and_invalid_moves() {
        let p = pipeline();
        let j = job("site", Some(p.id), Some("Lead"));
        let id = j.id;
        let mut board = PipelineBoard::from_pipeline(p, vec![j]);
        let mover = FakeMover::new(true);

        let outcome = move_on_board(&mut board, &mover, id, "Lead").await.unwrap();
        assert_eq!(outcome, MoveOutcome::Unchanged);

        let err = move_on_board(&mut board, &mover, id, "Lost").await.unwrap_err();
        assert!(matches!(err, BoardError::UnknownStep(_)));

        let err = move_on_board(&mut board, &mover, Uuid::new_v4(), "Won")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::UnknownJob(_)));
        assert!(mover.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_second_move_while_pending_is_refused() {
        let p = pipeline();
        let j = job("site", Some(p.id), Some("Lead"));
        let id = j.id;
        let mut board = PipelineBoard::from_pipeline(p, vec![j]);

        board.begin_move(id, "Proposal").unwrap().unwrap();
        assert!(matches!(
            board.begin_move(id, "Won").unwrap_err(),
            BoardError::MoveInFlight(_)
        ));
        board.rollback(id).unwrap();
        assert_eq!(board.step_of(id), Some("Lead"));
        assert!(matches!(
            board.rollback(id).unwrap_err(),
            BoardError::NoPendingMove(_)
        ));
    }

    #[test]
    fn test_unplaced_job_can_be_dragged_onto_a_step() {
        let p = pipeline();
        let j = job("stray", Some(p.id), Some("Archived"));
        let id = j.id;
        let mut board = PipelineBoard::from_pipeline(p, vec![j]);

        let pending = board.begin_move(id, "Lead").unwrap().unwrap();
        assert_eq!(pending.from_step.as_deref(), Some("Archived"));
        assert!(board.unplaced.is_empty());
        board.rollback(id).unwrap();
        assert_eq!(board.unplaced.len(), 1);
        assert_eq!(board.unplaced[0].current_step.as_deref(), Some("Archived"));
    }
}
