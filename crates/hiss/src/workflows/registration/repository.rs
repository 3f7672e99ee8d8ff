use std::future::Future;

use chrono::{DateTime, Utc};

use super::domain::{
    Application, ApplicationForm, ApplicationId, ApplicationStatus, User, UserId, Wave, WaveId,
};

/// Storage abstraction so the service module can be exercised in isolation.
///
/// `update_applications` is the batch write used by the admin bulk actions: either every change
/// is stored or none is.
pub trait RegistrationRepository: Send + Sync {
    fn upsert_user(&self, user: User) -> impl Future<Output = Result<User, RepositoryError>> + Send;

    fn fetch_user(
        &self,
        id: &UserId,
    ) -> impl Future<Output = Result<Option<User>, RepositoryError>> + Send;

    fn insert_wave(&self, wave: Wave) -> impl Future<Output = Result<Wave, RepositoryError>> + Send;

    fn fetch_wave(
        &self,
        id: &WaveId,
    ) -> impl Future<Output = Result<Option<Wave>, RepositoryError>> + Send;

    /// The wave open at `now`; the most recently started one wins when windows overlap.
    fn active_wave(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Wave>, RepositoryError>> + Send;

    fn insert_application(
        &self,
        application: Application,
    ) -> impl Future<Output = Result<Application, RepositoryError>> + Send;

    fn update_application(
        &self,
        change: &ApplicationChange,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn update_applications(
        &self,
        changes: &[ApplicationChange],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> impl Future<Output = Result<Option<Application>, RepositoryError>> + Send;

    /// Records in the order of `ids`; unknown ids are skipped.
    fn fetch_applications(
        &self,
        ids: &[ApplicationId],
    ) -> impl Future<Output = Result<Vec<Application>, RepositoryError>> + Send;

    fn application_for_user(
        &self,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Option<Application>, RepositoryError>> + Send;

    fn application_for_discord_id(
        &self,
        discord_id: &str,
    ) -> impl Future<Output = Result<Option<Application>, RepositoryError>> + Send;
}

/// Column-scoped write to one stored application.
///
/// Status and check-in writes carry the status the change was computed from; the store refuses
/// them with [`RepositoryError::Stale`] once the record has moved on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationChange {
    Status {
        id: ApplicationId,
        from: ApplicationStatus,
        to: ApplicationStatus,
        confirmation_deadline: Option<DateTime<Utc>>,
    },
    CheckIn {
        id: ApplicationId,
        status: ApplicationStatus,
        discord_id: String,
    },
    Form {
        id: ApplicationId,
        form: ApplicationForm,
    },
}

impl ApplicationChange {
    /// Status write for `application` after a transition that started at `from`.
    pub fn status(from: ApplicationStatus, application: &Application) -> Self {
        ApplicationChange::Status {
            id: application.id.clone(),
            from,
            to: application.status,
            confirmation_deadline: application.confirmation_deadline,
        }
    }

    pub fn check_in(application: &Application, discord_id: &str) -> Self {
        ApplicationChange::CheckIn {
            id: application.id.clone(),
            status: application.status,
            discord_id: discord_id.to_string(),
        }
    }

    pub fn form(application: &Application) -> Self {
        ApplicationChange::Form {
            id: application.id.clone(),
            form: application.form.clone(),
        }
    }

    pub fn id(&self) -> &ApplicationId {
        match self {
            ApplicationChange::Status { id, .. }
            | ApplicationChange::CheckIn { id, .. }
            | ApplicationChange::Form { id, .. } => id,
        }
    }

    /// Status the stored record must still have for the change to apply.
    pub fn expected_status(&self) -> Option<ApplicationStatus> {
        match self {
            ApplicationChange::Status { from, .. } => Some(*from),
            ApplicationChange::CheckIn { status, .. } => Some(*status),
            ApplicationChange::Form { .. } => None,
        }
    }

    /// Apply the changed columns to an in-memory copy.
    pub fn apply_to(&self, application: &mut Application) {
        match self {
            ApplicationChange::Status {
                to,
                confirmation_deadline,
                ..
            } => {
                application.status = *to;
                application.confirmation_deadline = *confirmation_deadline;
            }
            ApplicationChange::CheckIn { discord_id, .. } => {
                application.discord_id = Some(discord_id.clone());
                application.checked_in = true;
            }
            ApplicationChange::Form { form, .. } => application.form = form.clone(),
        }
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("{0} changed since it was read; reload and try again")]
    Stale(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
