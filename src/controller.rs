//! Write paths for the four collections.
//!
//! Reads go straight to [`Storage::list`] / [`Storage::fetch`]; everything
//! that creates or changes a document passes through here so validation,
//! timestamps, referential checks and password hashing live in one place.
//! Cross-collection checks are made before the per-document transaction and
//! are not isolated from concurrent writers.

use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, TokenKeys};
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthPayload, Customer, CustomerPatch, Job, JobPatch, JobStatus, LoginRequest, LoginResponse,
    MoveJobRequest, NewCustomer, NewJob, NewPipeline, NewUser, Pipeline, PipelinePatch, Role,
    User, UserPatch, UserProfile,
};
use crate::storage::{Record, Storage};

/// Parse a path id, mapping garbage to `400 Invalid <kind> ID`.
pub fn parse_id<T: Record>(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::invalid_id(T::KIND))
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if !EmailAddress::is_valid(&email) {
        return Err(AppError::Validation(format!(
            "'{}' is not a valid email address",
            raw.trim()
        )));
    }
    Ok(email)
}

/// Blank optional strings are stored as absent.
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// --- Customers ---

pub fn create_customer(storage: &Storage, input: NewCustomer) -> AppResult<Customer> {
    let now = Utc::now();
    let customer = Customer {
        id: Uuid::new_v4(),
        first_name: required("firstName", &input.first_name)?,
        last_name: required("lastName", &input.last_name)?,
        email: normalize_email(&input.email)?,
        phone: optional(input.phone),
        address: optional(input.address),
        notes: optional(input.notes),
        status: input.status.unwrap_or_default(),
        opt_in_email: input.opt_in_email.unwrap_or(true),
        opt_in_whats_app: input.opt_in_whats_app.unwrap_or(false),
        preferred_contact_method: input.preferred_contact_method.unwrap_or_default(),
        lead_source: optional(input.lead_source),
        last_activity_at: Some(now),
        created_at: now,
        updated_at: now,
    };
    storage.insert(&customer)?;
    tracing::info!(id = %customer.id, "customer created");
    Ok(customer)
}

pub fn update_customer(storage: &Storage, id: Uuid, patch: CustomerPatch) -> AppResult<Customer> {
    if patch.is_empty() {
        return Err(AppError::empty_payload());
    }
    let first_name = patch.first_name.as_deref().map(|v| required("firstName", v)).transpose()?;
    let last_name = patch.last_name.as_deref().map(|v| required("lastName", v)).transpose()?;
    let email = patch.email.as_deref().map(normalize_email).transpose()?;

    storage.update::<Customer, _>(id, |customer| {
        if let Some(first_name) = &first_name {
            customer.first_name = first_name.clone();
        }
        if let Some(last_name) = &last_name {
            customer.last_name = last_name.clone();
        }
        if let Some(email) = &email {
            customer.email = email.clone();
        }
        if patch.phone.is_some() {
            customer.phone = optional(patch.phone.clone());
        }
        if patch.address.is_some() {
            customer.address = optional(patch.address.clone());
        }
        if patch.notes.is_some() {
            customer.notes = optional(patch.notes.clone());
        }
        if let Some(status) = patch.status {
            customer.status = status;
        }
        if let Some(opt_in) = patch.opt_in_email {
            customer.opt_in_email = opt_in;
        }
        if let Some(opt_in) = patch.opt_in_whats_app {
            customer.opt_in_whats_app = opt_in;
        }
        if let Some(method) = patch.preferred_contact_method {
            customer.preferred_contact_method = method;
        }
        if patch.lead_source.is_some() {
            customer.lead_source = optional(patch.lead_source.clone());
        }
        Ok(())
    })
}

/// Refused while any job still points at the customer.
pub fn delete_customer(storage: &Storage, id: Uuid) -> AppResult<Customer> {
    let referencing = storage
        .all::<Job>()?
        .iter()
        .filter(|job| job.customer == Some(id))
        .count();
    if referencing > 0 {
        // Report NotFound first for an id that does not exist at all
        storage.fetch::<Customer>(id)?;
        return Err(AppError::Conflict(format!(
            "Customer is referenced by {} job(s)",
            referencing
        )));
    }
    let removed = storage.delete::<Customer>(id)?;
    tracing::info!(%id, "customer deleted");
    Ok(removed)
}

// --- Pipelines ---

fn validate_steps(steps: &[String]) -> AppResult<Vec<String>> {
    let mut cleaned: Vec<String> = Vec::with_capacity(steps.len());
    for step in steps {
        let step = step.trim();
        if step.is_empty() {
            return Err(AppError::Validation("Pipeline steps must not be blank".to_string()));
        }
        if cleaned.iter().any(|s| s == step) {
            return Err(AppError::Validation(format!("Duplicate pipeline step '{}'", step)));
        }
        cleaned.push(step.to_string());
    }
    if cleaned.is_empty() {
        return Err(AppError::Validation(
            "A pipeline needs at least one step".to_string(),
        ));
    }
    Ok(cleaned)
}

pub fn create_pipeline(storage: &Storage, input: NewPipeline) -> AppResult<Pipeline> {
    let now = Utc::now();
    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        name: required("name", &input.name)?,
        steps: validate_steps(&input.steps)?,
        created_at: now,
        updated_at: now,
    };
    storage.insert(&pipeline)?;
    tracing::info!(id = %pipeline.id, steps = pipeline.steps.len(), "pipeline created");
    Ok(pipeline)
}

pub fn update_pipeline(storage: &Storage, id: Uuid, patch: PipelinePatch) -> AppResult<Pipeline> {
    if patch.is_empty() {
        return Err(AppError::empty_payload());
    }
    let name = patch.name.as_deref().map(|v| required("name", v)).transpose()?;
    let steps = patch.steps.as_deref().map(validate_steps).transpose()?;

    if let Some(steps) = &steps {
        let orphaned: Vec<String> = storage
            .all::<Job>()?
            .into_iter()
            .filter(|job| job.pipeline == Some(id))
            .filter_map(|job| job.current_step)
            .filter(|step| !steps.contains(step))
            .collect();
        if let Some(step) = orphaned.first() {
            return Err(AppError::Conflict(format!(
                "Step '{}' is still used by {} job(s)",
                step,
                orphaned.iter().filter(|s| *s == step).count()
            )));
        }
    }

    storage.update::<Pipeline, _>(id, |pipeline| {
        if let Some(name) = &name {
            pipeline.name = name.clone();
        }
        if let Some(steps) = &steps {
            pipeline.steps = steps.clone();
        }
        Ok(())
    })
}

/// Refused while any job is on the pipeline.
pub fn delete_pipeline(storage: &Storage, id: Uuid) -> AppResult<Pipeline> {
    let referencing = storage
        .all::<Job>()?
        .iter()
        .filter(|job| job.pipeline == Some(id))
        .count();
    if referencing > 0 {
        storage.fetch::<Pipeline>(id)?;
        return Err(AppError::Conflict(format!(
            "Pipeline is referenced by {} job(s)",
            referencing
        )));
    }
    let removed = storage.delete::<Pipeline>(id)?;
    tracing::info!(%id, "pipeline deleted");
    Ok(removed)
}

// --- Jobs ---

fn validate_value(value: f64) -> AppResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::Validation(
            "value must be a non-negative amount".to_string(),
        ));
    }
    Ok(value)
}

fn validate_progress(progress: u8) -> AppResult<u8> {
    if progress > 100 {
        return Err(AppError::Validation(
            "progress must be between 0 and 100".to_string(),
        ));
    }
    Ok(progress)
}

fn existing_customer(storage: &Storage, id: Option<Uuid>) -> AppResult<()> {
    if let Some(id) = id {
        if storage.get::<Customer>(id)?.is_none() {
            return Err(AppError::Validation(format!("Customer {} does not exist", id)));
        }
    }
    Ok(())
}

fn existing_pipeline(storage: &Storage, id: Option<Uuid>) -> AppResult<Option<Pipeline>> {
    match id {
        Some(id) => storage
            .get::<Pipeline>(id)?
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Pipeline {} does not exist", id))),
        None => Ok(None),
    }
}

/// Step a job ends up on. `fallback` is used when no step was requested:
/// it is kept if the pipeline still has it, otherwise the first step wins.
fn resolve_step(
    pipeline: Option<&Pipeline>,
    requested: Option<&str>,
    fallback: Option<&str>,
) -> AppResult<Option<String>> {
    match (pipeline, requested) {
        (None, Some(_)) => Err(AppError::Validation(
            "currentStep requires a pipeline".to_string(),
        )),
        (None, None) => Ok(None),
        (Some(pipeline), Some(step)) => {
            let step = step.trim();
            if pipeline.has_step(step) {
                Ok(Some(step.to_string()))
            } else {
                Err(AppError::Validation(format!(
                    "'{}' is not a step of pipeline '{}'",
                    step, pipeline.name
                )))
            }
        }
        (Some(pipeline), None) => Ok(fallback
            .filter(|step| pipeline.has_step(step))
            .or_else(|| pipeline.first_step())
            .map(str::to_string)),
    }
}

/// `completedAt` follows the status: set when entering Completed, cleared
/// when leaving it.
fn completion_time(
    previous: Option<JobStatus>,
    status: JobStatus,
    current: Option<DateTime<Utc>>,
    supplied: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status != JobStatus::Completed {
        return None;
    }
    if supplied.is_some() {
        return supplied;
    }
    match previous {
        Some(JobStatus::Completed) => current.or(Some(now)),
        _ => Some(now),
    }
}

pub fn create_job(storage: &Storage, input: NewJob) -> AppResult<Job> {
    let title = required("title", &input.title)?;
    existing_customer(storage, input.customer)?;
    let pipeline = existing_pipeline(storage, input.pipeline)?;
    let current_step = resolve_step(pipeline.as_ref(), input.current_step.as_deref(), None)?;

    let now = Utc::now();
    let status = input.status.unwrap_or_default();
    let job = Job {
        id: Uuid::new_v4(),
        title,
        customer: input.customer,
        pipeline: input.pipeline,
        current_step,
        status,
        value: validate_value(input.value.unwrap_or(0.0))?,
        due_date: input.due_date,
        completed_at: completion_time(None, status, None, input.completed_at, now),
        progress: validate_progress(input.progress.unwrap_or(0))?,
        comments: optional(input.comments),
        address: optional(input.address),
        created_at: now,
        updated_at: now,
    };
    storage.insert(&job)?;
    tracing::info!(id = %job.id, status = %job.status, "job created");
    Ok(job)
}

pub fn update_job(storage: &Storage, id: Uuid, patch: JobPatch) -> AppResult<Job> {
    if patch.is_empty() {
        return Err(AppError::empty_payload());
    }
    let title = patch.title.as_deref().map(|v| required("title", v)).transpose()?;
    let value = patch.value.map(validate_value).transpose()?;
    let progress = patch.progress.map(validate_progress).transpose()?;
    if let Some(customer) = patch.customer {
        existing_customer(storage, customer)?;
    }

    // The pipeline the job will belong to, loaded outside the transaction
    let current: Job = storage.fetch(id)?;
    let target_pipeline = patch.pipeline.unwrap_or(current.pipeline);
    let pipeline = existing_pipeline(storage, target_pipeline)?;
    let placement_changed = patch.pipeline.is_some() || patch.current_step.is_some();

    let now = Utc::now();
    let updated = storage.update::<Job, _>(id, |job| {
        if placement_changed && patch.pipeline.unwrap_or(job.pipeline) != target_pipeline {
            return Err(AppError::Conflict(
                "Job was moved to another pipeline concurrently".to_string(),
            ));
        }
        if let Some(title) = &title {
            job.title = title.clone();
        }
        if let Some(customer) = patch.customer {
            job.customer = customer;
        }
        if placement_changed {
            job.pipeline = target_pipeline;
            job.current_step = resolve_step(
                pipeline.as_ref(),
                patch.current_step.as_deref(),
                job.current_step.as_deref(),
            )?;
        }
        if let Some(value) = value {
            job.value = value;
        }
        if let Some(due_date) = patch.due_date {
            job.due_date = due_date;
        }
        if let Some(progress) = progress {
            job.progress = progress;
        }
        if patch.comments.is_some() {
            job.comments = optional(patch.comments.clone());
        }
        if patch.address.is_some() {
            job.address = optional(patch.address.clone());
        }
        if patch.status.is_some() || patch.completed_at.is_some() {
            let previous = job.status;
            let status = patch.status.unwrap_or(previous);
            job.completed_at =
                completion_time(Some(previous), status, job.completed_at, patch.completed_at, now);
            job.status = status;
        }
        Ok(())
    })?;

    if current.status != updated.status {
        tracing::info!(%id, from = %current.status, to = %updated.status, "job status changed");
    }
    Ok(updated)
}

/// Move a job to another step of its pipeline. A `fromStep` that no longer
/// matches the stored step means the caller acted on a stale board.
pub fn move_job(storage: &Storage, id: Uuid, request: MoveJobRequest) -> AppResult<Job> {
    let current: Job = storage.fetch(id)?;
    let pipeline_id = match (current.pipeline, request.pipeline) {
        (Some(own), Some(board)) if own != board => {
            return Err(AppError::Conflict(
                "Job belongs to another pipeline".to_string(),
            ));
        }
        (Some(own), _) => Some(own),
        (None, board) => board,
    };
    let pipeline = existing_pipeline(storage, pipeline_id)?.ok_or_else(|| {
        AppError::Validation("Job is not assigned to a pipeline".to_string())
    })?;
    let to_step = resolve_step(Some(&pipeline), Some(&request.to_step), None)?;

    let moved = storage.update::<Job, _>(id, |job| {
        if job.pipeline != current.pipeline {
            return Err(AppError::Conflict(
                "Job was moved to another pipeline concurrently".to_string(),
            ));
        }
        if let Some(from) = &request.from_step {
            if job.current_step.as_deref() != Some(from.trim()) {
                return Err(AppError::Conflict(format!(
                    "Job is no longer on step '{}'",
                    from.trim()
                )));
            }
        }
        job.pipeline = Some(pipeline.id);
        job.current_step = to_step.clone();
        Ok(())
    })?;

    tracing::info!(
        %id,
        pipeline = %pipeline.id,
        from = ?current.current_step,
        to = ?moved.current_step,
        "job moved"
    );
    Ok(moved)
}

pub fn delete_job(storage: &Storage, id: Uuid) -> AppResult<Job> {
    let removed = storage.delete::<Job>(id)?;
    tracing::info!(%id, "job deleted");
    Ok(removed)
}

// --- Users ---

fn validate_password(password: &str) -> AppResult<&str> {
    if password.len() < 6 {
        return Err(AppError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }
    Ok(password)
}

pub fn create_user(storage: &Storage, input: NewUser) -> AppResult<UserProfile> {
    let name = required("name", &input.name)?;
    let email = normalize_email(&input.email)?;
    let password_hash = hash_password(validate_password(&input.password)?)?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name,
        email,
        password_hash,
        role: input.role.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    storage.insert(&user)?;
    tracing::info!(id = %user.id, role = ?user.role, "user created");
    Ok(UserProfile::from(&user))
}

/// Admins may change anyone; other users only their own name, email and
/// password.
pub fn update_user(
    storage: &Storage,
    caller: &AuthPayload,
    id: Uuid,
    patch: UserPatch,
) -> AppResult<UserProfile> {
    if patch.is_empty() {
        return Err(AppError::empty_payload());
    }
    if !caller.is_admin() {
        if caller.user_id() != Some(id) {
            return Err(AppError::Forbidden(
                "You may only update your own profile".to_string(),
            ));
        }
        if patch.role.is_some() {
            return Err(AppError::Forbidden("Admin role required".to_string()));
        }
    }

    let name = patch.name.as_deref().map(|v| required("name", v)).transpose()?;
    let email = patch.email.as_deref().map(normalize_email).transpose()?;
    // Hash once, outside the transaction closure
    let password_hash = patch
        .password
        .as_deref()
        .map(|p| validate_password(p).and_then(|p| Ok(hash_password(p)?)))
        .transpose()?;

    let user = storage.update::<User, _>(id, |user| {
        if let Some(name) = &name {
            user.name = name.clone();
        }
        if let Some(email) = &email {
            user.email = email.clone();
        }
        if let Some(hash) = &password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        Ok(())
    })?;
    Ok(UserProfile::from(&user))
}

pub fn delete_user(storage: &Storage, caller: &AuthPayload, id: Uuid) -> AppResult<UserProfile> {
    if caller.user_id() == Some(id) {
        return Err(AppError::Conflict("You cannot delete your own account".to_string()));
    }
    let removed = storage.delete::<User>(id)?;
    tracing::info!(%id, "user deleted");
    Ok(UserProfile::from(&removed))
}

pub fn login(storage: &Storage, keys: &TokenKeys, request: LoginRequest) -> AppResult<LoginResponse> {
    let email = request.email.trim().to_lowercase();
    let user = storage
        .find_unique::<User>(&email)?
        .ok_or_else(AppError::invalid_credentials)?;

    if !verify_password(&request.password, &user.password_hash)? {
        tracing::debug!(%email, "password mismatch");
        return Err(AppError::invalid_credentials());
    }

    let token = keys.create_jwt(&user)?;
    tracing::info!(id = %user.id, "user logged in");
    Ok(LoginResponse {
        token,
        user: UserProfile::from(&user),
    })
}

/// Create the first admin when the users collection is empty.
pub fn bootstrap_admin(storage: &Storage, email: &str, password: &str) -> AppResult<Option<UserProfile>> {
    if storage.count::<User>()? > 0 {
        return Ok(None);
    }
    let admin = create_user(
        storage,
        NewUser {
            name: "Administrator".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Some(Role::Admin),
        },
    )?;
    tracing::warn!(email = %admin.email, "bootstrap admin account created");
    Ok(Some(admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ListQuery;

    fn new_customer(first: &str, email: &str) -> NewCustomer {
        NewCustomer {
            first_name: first.to_string(),
            last_name: "Example".to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    fn sales_pipeline(storage: &Storage) -> Pipeline {
        create_pipeline(
            storage,
            NewPipeline {
                name: "Sales".to_string(),
                steps: vec!["Lead".into(), "Proposal".into(), "Won".into()],
            },
        )
        .unwrap()
    }

    fn new_job(title: &str) -> NewJob {
        NewJob {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn admin_claims() -> AuthPayload {
        AuthPayload {
            sub: Uuid::new_v4().to_string(),
            role: Role::Admin,
            iat: 0,
            exp: usize::MAX,
        }
    }

    #[test]
    fn test_customer_count_after_three_inserts() {
        let storage = Storage::temporary().unwrap();
        for (name, email) in [
            ("Ann", "ann@example.com"),
            ("Ben", "ben@example.com"),
            ("Cid", "cid@example.com"),
        ] {
            create_customer(&storage, new_customer(name, email)).unwrap();
        }
        assert_eq!(storage.count::<Customer>().unwrap(), 3);
    }

    #[test]
    fn test_customer_email_normalized_and_unique() {
        let storage = Storage::temporary().unwrap();
        let created =
            create_customer(&storage, new_customer("Ann", "  Ann@Example.COM ")).unwrap();
        assert_eq!(created.email, "ann@example.com");
        assert!(created.opt_in_email);
        assert!(created.last_activity_at.is_some());

        let err = create_customer(&storage, new_customer("Other", "ANN@example.com")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = create_customer(&storage, new_customer("Bad", "not-an-email")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = create_customer(&storage, new_customer("  ", "x@example.com")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_partial_update_preserves_other_fields() {
        let storage = Storage::temporary().unwrap();
        let mut input = new_customer("Ann", "ann@example.com");
        input.phone = Some("555-0100".to_string());
        let created = create_customer(&storage, input).unwrap();

        let updated = update_customer(
            &storage,
            created.id,
            CustomerPatch {
                notes: Some("Prefers mornings".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.phone.as_deref(), Some("555-0100"));
        assert_eq!(updated.first_name, "Ann");
        assert_eq!(updated.notes.as_deref(), Some("Prefers mornings"));
        assert!(updated.updated_at >= created.updated_at);

        let err = update_customer(&storage, created.id, CustomerPatch::default()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = update_customer(
            &storage,
            Uuid::new_v4(),
            CustomerPatch {
                notes: Some("x".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_job_create_get_delete() {
        let storage = Storage::temporary().unwrap();
        let created = create_job(&storage, new_job("Paint fence")).unwrap();
        assert_eq!(created.status, JobStatus::Planning);
        assert_eq!(created.value, 0.0);

        let fetched: Job = storage.fetch(created.id).unwrap();
        assert_eq!(fetched, created);

        delete_job(&storage, created.id).unwrap();
        assert!(matches!(
            delete_job(&storage, created.id).unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn test_job_references_are_validated() {
        let storage = Storage::temporary().unwrap();
        let pipeline = sales_pipeline(&storage);

        let mut input = new_job("Ghost customer");
        input.customer = Some(Uuid::new_v4());
        assert!(matches!(
            create_job(&storage, input).unwrap_err(),
            AppError::Validation(_)
        ));

        let mut input = new_job("Wrong step");
        input.pipeline = Some(pipeline.id);
        input.current_step = Some("Negotiation".into());
        assert!(matches!(
            create_job(&storage, input).unwrap_err(),
            AppError::Validation(_)
        ));

        let mut input = new_job("Step without pipeline");
        input.current_step = Some("Lead".into());
        assert!(matches!(
            create_job(&storage, input).unwrap_err(),
            AppError::Validation(_)
        ));

        let mut input = new_job("Defaults to first step");
        input.pipeline = Some(pipeline.id);
        let job = create_job(&storage, input).unwrap();
        assert_eq!(job.current_step.as_deref(), Some("Lead"));
    }

    #[test]
    fn test_completed_at_follows_status() {
        let storage = Storage::temporary().unwrap();
        let mut input = new_job("Deck");
        input.value = Some(1200.0);
        let job = create_job(&storage, input).unwrap();
        assert!(job.completed_at.is_none());

        let done = update_job(
            &storage,
            job.id,
            JobPatch {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(done.completed_at.is_some());

        let reopened = update_job(
            &storage,
            job.id,
            JobPatch {
                status: Some(JobStatus::OnHold),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(reopened.completed_at.is_none());
        assert_eq!(reopened.value, 1200.0);
    }

    #[test]
    fn test_sales_pipeline_move_scenario() {
        let storage = Storage::temporary().unwrap();
        let pipeline = sales_pipeline(&storage);
        let mut input = new_job("Website redesign");
        input.pipeline = Some(pipeline.id);
        input.current_step = Some("Lead".into());
        let job = create_job(&storage, input).unwrap();

        let moved = move_job(
            &storage,
            job.id,
            MoveJobRequest {
                from_step: Some("Lead".into()),
                to_step: "Proposal".into(),
                pipeline: None,
            },
        )
        .unwrap();
        assert_eq!(moved.current_step.as_deref(), Some("Proposal"));

        let query = ListQuery {
            pipeline: Some(pipeline.id),
            step: Some("Proposal".into()),
            ..Default::default()
        };
        let on_proposal: Vec<Job> = storage.list(&query).unwrap();
        assert_eq!(on_proposal.len(), 1);

        // Stale origin
        let err = move_job(
            &storage,
            job.id,
            MoveJobRequest {
                from_step: Some("Lead".into()),
                to_step: "Won".into(),
                pipeline: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Unknown destination
        let err = move_job(
            &storage,
            job.id,
            MoveJobRequest {
                from_step: None,
                to_step: "Lost".into(),
                pipeline: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let unchanged: Job = storage.fetch(job.id).unwrap();
        assert_eq!(unchanged.current_step.as_deref(), Some("Proposal"));
    }

    #[test]
    fn test_move_places_job_without_pipeline_on_the_board_pipeline() {
        let storage = Storage::temporary().unwrap();
        let pipeline = sales_pipeline(&storage);
        let other = create_pipeline(
            &storage,
            NewPipeline {
                name: "Installs".to_string(),
                steps: vec!["Survey".into()],
            },
        )
        .unwrap();
        let legacy = create_job(&storage, new_job("Legacy card")).unwrap();
        storage
            .update::<Job, _>(legacy.id, |job| {
                job.current_step = Some("Lead".into());
                Ok(())
            })
            .unwrap();

        let err = move_job(
            &storage,
            legacy.id,
            MoveJobRequest {
                from_step: Some("Lead".into()),
                to_step: "Proposal".into(),
                pipeline: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let moved = move_job(
            &storage,
            legacy.id,
            MoveJobRequest {
                from_step: Some("Lead".into()),
                to_step: "Proposal".into(),
                pipeline: Some(pipeline.id),
            },
        )
        .unwrap();
        assert_eq!(moved.pipeline, Some(pipeline.id));
        assert_eq!(moved.current_step.as_deref(), Some("Proposal"));

        let err = move_job(
            &storage,
            legacy.id,
            MoveJobRequest {
                from_step: None,
                to_step: "Survey".into(),
                pipeline: Some(other.id),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_restrict_delete_and_step_removal() {
        let storage = Storage::temporary().unwrap();
        let pipeline = sales_pipeline(&storage);
        let customer = create_customer(&storage, new_customer("Ann", "ann@example.com")).unwrap();
        let mut input = new_job("Fence");
        input.pipeline = Some(pipeline.id);
        input.customer = Some(customer.id);
        input.current_step = Some("Proposal".into());
        let job = create_job(&storage, input).unwrap();

        assert!(matches!(
            delete_customer(&storage, customer.id).unwrap_err(),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            delete_pipeline(&storage, pipeline.id).unwrap_err(),
            AppError::Conflict(_)
        ));
        let err = update_pipeline(
            &storage,
            pipeline.id,
            PipelinePatch {
                steps: Some(vec!["Lead".into(), "Won".into()]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        delete_job(&storage, job.id).unwrap();
        delete_customer(&storage, customer.id).unwrap();
        delete_pipeline(&storage, pipeline.id).unwrap();
        assert!(matches!(
            delete_pipeline(&storage, pipeline.id).unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn test_pipeline_steps_validated() {
        let storage = Storage::temporary().unwrap();
        for steps in [vec![], vec!["A".to_string(), " A ".to_string()], vec![" ".to_string()]] {
            let err = create_pipeline(
                &storage,
                NewPipeline {
                    name: "P".into(),
                    steps,
                },
            )
            .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[test]
    fn test_users_login_and_permissions() {
        let storage = Storage::temporary().unwrap();
        let keys = TokenKeys::new(b"secret", 60);
        let admin = bootstrap_admin(&storage, "root@example.com", "changeme")
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(bootstrap_admin(&storage, "other@example.com", "changeme")
            .unwrap()
            .is_none());

        let user = create_user(
            &storage,
            NewUser {
                name: "Sam".into(),
                email: "Sam@Example.com".into(),
                password: "password1".into(),
                role: None,
            },
        )
        .unwrap();
        assert_eq!(user.role, Role::User);

        let session = login(
            &storage,
            &keys,
            LoginRequest {
                email: "sam@example.com".into(),
                password: "password1".into(),
            },
        )
        .unwrap();
        assert_eq!(session.user.id, user.id);
        let claims = keys.validate_jwt(&session.token).unwrap();

        let err = login(
            &storage,
            &keys,
            LoginRequest {
                email: "sam@example.com".into(),
                password: "wrong".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        // A user can rename themselves but not promote themselves
        let renamed = update_user(
            &storage,
            &claims,
            user.id,
            UserPatch {
                name: Some("Samantha".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(renamed.name, "Samantha");
        let err = update_user(
            &storage,
            &claims,
            user.id,
            UserPatch {
                role: Some(Role::Admin),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = update_user(
            &storage,
            &claims,
            admin.id,
            UserPatch {
                name: Some("Hijacked".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        delete_user(&storage, &admin_claims(), user.id).unwrap();
        assert_eq!(storage.count::<User>().unwrap(), 1);
    }

    #[test]
    fn test_parse_id() {
        assert!(matches!(
            parse_id::<Job>("not-a-uuid").unwrap_err(),
            AppError::BadRequest(_)
        ));
        let id = Uuid::new_v4();
        assert_eq!(parse_id::<Job>(&id.to_string()).unwrap(), id);
    }
}
