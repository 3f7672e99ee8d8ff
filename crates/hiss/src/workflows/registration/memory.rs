use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{Application, ApplicationId, User, UserId, Wave, WaveId};
use super::repository::{ApplicationChange, RegistrationRepository, RepositoryError};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    waves: HashMap<WaveId, Wave>,
    applications: HashMap<ApplicationId, Application>,
}

/// Enforce the unique `user_id` and `discord_id` columns against every other record.
fn check_unique(
    applications: &HashMap<ApplicationId, Application>,
    application: &Application,
) -> Result<(), RepositoryError> {
    let clash = applications.values().find(|existing| {
        existing.id != application.id
            && (existing.user_id == application.user_id
                || (application.discord_id.is_some()
                    && existing.discord_id == application.discord_id))
    });
    match clash {
        Some(existing) if existing.user_id == application.user_id => Err(
            RepositoryError::Conflict(format!("application for user {}", application.user_id.0)),
        ),
        Some(_) => Err(RepositoryError::Conflict(format!(
            "discord id {}",
            application.discord_id.as_deref().unwrap_or_default()
        ))),
        None => Ok(()),
    }
}

/// Process-local repository used by the demo command and tests.
#[derive(Default, Clone)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("repository mutex poisoned".to_string()))
    }

    pub fn applications(&self) -> Vec<Application> {
        self.lock()
            .map(|tables| tables.applications.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl RegistrationRepository for InMemoryRepository {
    async fn upsert_user(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.lock()?;
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn fetch_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn insert_wave(&self, wave: Wave) -> Result<Wave, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.waves.contains_key(&wave.id) {
            return Err(RepositoryError::Conflict(format!("wave {}", wave.id.0)));
        }
        tables.waves.insert(wave.id.clone(), wave.clone());
        Ok(wave)
    }

    async fn fetch_wave(&self, id: &WaveId) -> Result<Option<Wave>, RepositoryError> {
        Ok(self.lock()?.waves.get(id).cloned())
    }

    async fn active_wave(&self, now: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError> {
        Ok(self
            .lock()?
            .waves
            .values()
            .filter(|wave| wave.is_active_at(now))
            .max_by_key(|wave| wave.start)
            .cloned())
    }

    async fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.applications.contains_key(&application.id) {
            return Err(RepositoryError::Conflict(format!(
                "application {}",
                application.id.0
            )));
        }
        check_unique(&tables.applications, &application)?;
        tables
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn update_application(&self, change: &ApplicationChange) -> Result<(), RepositoryError> {
        self.update_applications(std::slice::from_ref(change)).await
    }

    async fn update_applications(&self, changes: &[ApplicationChange]) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let mut staged = tables.applications.clone();
        for change in changes {
            let id = change.id();
            let application = staged
                .get_mut(id)
                .ok_or_else(|| RepositoryError::NotFound(format!("application {}", id.0)))?;
            if matches!(change.expected_status(), Some(expected) if expected != application.status) {
                return Err(RepositoryError::Stale(format!("application {}", id.0)));
            }
            change.apply_to(application);
        }
        for change in changes {
            if let Some(application) = staged.get(change.id()) {
                check_unique(&staged, application)?;
            }
        }
        tables.applications = staged;
        Ok(())
    }

    async fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(id).cloned())
    }

    async fn fetch_applications(
        &self,
        ids: &[ApplicationId],
    ) -> Result<Vec<Application>, RepositoryError> {
        let tables = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.applications.get(id).cloned())
            .collect())
    }

    async fn application_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self
            .lock()?
            .applications
            .values()
            .find(|application| &application.user_id == user_id)
            .cloned())
    }

    async fn application_for_discord_id(
        &self,
        discord_id: &str,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self
            .lock()?
            .applications
            .values()
            .find(|application| application.discord_id.as_deref() == Some(discord_id))
            .cloned())
    }
}
