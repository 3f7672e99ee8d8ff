//! SQLite storage for users, waves and applications.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::info;

use super::domain::{
    Application, ApplicationForm, ApplicationId, ApplicationStatus, LevelOfStudy, ShirtSize, User,
    UserId, Wave, WaveId,
};
use super::repository::{ApplicationChange, RegistrationRepository, RepositoryError};

const APPLICATION_COLUMNS: &str = "id, user_id, wave_id, status, submitted_at, \
    confirmation_deadline, discord_id, checked_in, first_name, last_name, phone_number, school, \
    major, level_of_study, graduation_year, shirt_size, notes";

#[derive(Clone)]
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(unavailable)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        info!(%url, "registration database opened");

        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    /// Private database living as long as the single pooled connection.
    pub async fn open_in_memory() -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(unavailable)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(unavailable)?;
        info!("registration database migrations complete");
        Ok(())
    }
}

fn unavailable(err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Unavailable(err.to_string())
}

/// Translate constraint failures on insert into domain conflicts.
fn insert_error(err: sqlx::Error, application: &Application) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return if db.message().contains("discord_id") {
                RepositoryError::Conflict(format!(
                    "discord id {}",
                    application.discord_id.as_deref().unwrap_or_default()
                ))
            } else if db.message().contains("user_id") {
                RepositoryError::Conflict(format!(
                    "application for user {}",
                    application.user_id.0
                ))
            } else {
                RepositoryError::Conflict(format!("application {}", application.id.0))
            };
        }
        if db.is_foreign_key_violation() {
            return RepositoryError::NotFound(format!(
                "user {} or wave {}",
                application.user_id.0, application.wave_id.0
            ));
        }
    }
    unavailable(err)
}

fn to_timestamp(value: DateTime<Utc>) -> i64 {
    value.timestamp()
}

fn from_timestamp(value: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp(value, 0)
        .ok_or_else(|| RepositoryError::Corrupt(format!("timestamp {value} out of range")))
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    team_name: Option<String>,
    is_staff: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            email: row.email,
            team_name: row.team_name,
            is_staff: row.is_staff,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WaveRow {
    id: String,
    name: String,
    starts_at: i64,
    ends_at: i64,
    num_days_to_rsvp: i64,
    is_walk_in_wave: bool,
}

impl TryFrom<WaveRow> for Wave {
    type Error = RepositoryError;

    fn try_from(row: WaveRow) -> Result<Self, Self::Error> {
        let num_days_to_rsvp = u32::try_from(row.num_days_to_rsvp).map_err(|_| {
            RepositoryError::Corrupt(format!("wave {} rsvp window {}", row.id, row.num_days_to_rsvp))
        })?;
        Ok(Wave {
            start: from_timestamp(row.starts_at)?,
            end: from_timestamp(row.ends_at)?,
            id: WaveId(row.id),
            name: row.name,
            num_days_to_rsvp,
            is_walk_in_wave: row.is_walk_in_wave,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: String,
    user_id: String,
    wave_id: String,
    status: String,
    submitted_at: i64,
    confirmation_deadline: Option<i64>,
    discord_id: Option<String>,
    checked_in: bool,
    first_name: String,
    last_name: String,
    phone_number: String,
    school: String,
    major: String,
    level_of_study: String,
    graduation_year: i64,
    shirt_size: String,
    notes: Option<String>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = RepositoryError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, value: &str| {
            RepositoryError::Corrupt(format!("application {} {field} '{value}'", row.id))
        };
        let status =
            ApplicationStatus::from_label(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        let level_of_study = LevelOfStudy::from_code(&row.level_of_study)
            .ok_or_else(|| corrupt("level of study", &row.level_of_study))?;
        let shirt_size =
            ShirtSize::from_code(&row.shirt_size).ok_or_else(|| corrupt("shirt size", &row.shirt_size))?;
        let graduation_year = u16::try_from(row.graduation_year)
            .map_err(|_| corrupt("graduation year", &row.graduation_year.to_string()))?;
        let confirmation_deadline = row
            .confirmation_deadline
            .map(from_timestamp)
            .transpose()?;

        Ok(Application {
            submitted_at: from_timestamp(row.submitted_at)?,
            id: ApplicationId(row.id),
            user_id: UserId(row.user_id),
            wave_id: WaveId(row.wave_id),
            status,
            confirmation_deadline,
            discord_id: row.discord_id,
            checked_in: row.checked_in,
            form: ApplicationForm {
                first_name: row.first_name,
                last_name: row.last_name,
                phone_number: row.phone_number,
                school: row.school,
                major: row.major,
                level_of_study,
                graduation_year,
                shirt_size,
                notes: row.notes,
            },
        })
    }
}

/// Run one column-scoped UPDATE; zero affected rows means the guard or the id did not match.
async fn write_change(
    conn: &mut SqliteConnection,
    change: &ApplicationChange,
) -> Result<u64, sqlx::Error> {
    let result = match change {
        ApplicationChange::Status {
            id,
            from,
            to,
            confirmation_deadline,
        } => {
            sqlx::query(
                "UPDATE applications SET status = ?, confirmation_deadline = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(to.label())
            .bind(confirmation_deadline.map(to_timestamp))
            .bind(&id.0)
            .bind(from.label())
            .execute(&mut *conn)
            .await?
        }
        ApplicationChange::CheckIn {
            id,
            status,
            discord_id,
        } => {
            sqlx::query(
                "UPDATE applications SET discord_id = ?, checked_in = 1 \
                 WHERE id = ? AND status = ?",
            )
            .bind(discord_id)
            .bind(&id.0)
            .bind(status.label())
            .execute(&mut *conn)
            .await?
        }
        ApplicationChange::Form { id, form } => {
            sqlx::query(
                "UPDATE applications SET first_name = ?, last_name = ?, phone_number = ?, \
                 school = ?, major = ?, level_of_study = ?, graduation_year = ?, shirt_size = ?, \
                 notes = ? WHERE id = ?",
            )
            .bind(&form.first_name)
            .bind(&form.last_name)
            .bind(&form.phone_number)
            .bind(&form.school)
            .bind(&form.major)
            .bind(form.level_of_study.code())
            .bind(i64::from(form.graduation_year))
            .bind(form.shirt_size.code())
            .bind(&form.notes)
            .bind(&id.0)
            .execute(&mut *conn)
            .await?
        }
    };
    Ok(result.rows_affected())
}

/// Apply `change`, telling a missing record apart from one whose status moved on.
async fn apply_change(
    conn: &mut SqliteConnection,
    change: &ApplicationChange,
) -> Result<(), RepositoryError> {
    let affected = write_change(conn, change).await.map_err(|err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => match change {
            ApplicationChange::CheckIn { discord_id, .. } => {
                RepositoryError::Conflict(format!("discord id {discord_id}"))
            }
            _ => RepositoryError::Conflict(format!("application {}", change.id().0)),
        },
        _ => unavailable(err),
    })?;
    if affected > 0 {
        return Ok(());
    }

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM applications WHERE id = ?")
        .bind(&change.id().0)
        .fetch_one(&mut *conn)
        .await
        .map_err(unavailable)?;
    let label = format!("application {}", change.id().0);
    if exists == 0 {
        Err(RepositoryError::NotFound(label))
    } else {
        Err(RepositoryError::Stale(label))
    }
}

impl RegistrationRepository for SqliteRepository {
    async fn upsert_user(&self, user: User) -> Result<User, RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, email, team_name, is_staff) VALUES (?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET email = excluded.email, \
             team_name = excluded.team_name, is_staff = excluded.is_staff",
        )
        .bind(&user.id.0)
        .bind(&user.email)
        .bind(&user.team_name)
        .bind(user.is_staff)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(user)
    }

    async fn fetch_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, team_name, is_staff FROM users WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(User::from))
    }

    async fn insert_wave(&self, wave: Wave) -> Result<Wave, RepositoryError> {
        sqlx::query(
            "INSERT INTO waves (id, name, starts_at, ends_at, num_days_to_rsvp, is_walk_in_wave) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&wave.id.0)
        .bind(&wave.name)
        .bind(to_timestamp(wave.start))
        .bind(to_timestamp(wave.end))
        .bind(i64::from(wave.num_days_to_rsvp))
        .bind(wave.is_walk_in_wave)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("wave {}", wave.id.0))
            }
            _ => unavailable(err),
        })?;
        Ok(wave)
    }

    async fn fetch_wave(&self, id: &WaveId) -> Result<Option<Wave>, RepositoryError> {
        sqlx::query_as::<_, WaveRow>(
            "SELECT id, name, starts_at, ends_at, num_days_to_rsvp, is_walk_in_wave \
             FROM waves WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(Wave::try_from)
        .transpose()
    }

    async fn active_wave(&self, now: DateTime<Utc>) -> Result<Option<Wave>, RepositoryError> {
        let now = to_timestamp(now);
        sqlx::query_as::<_, WaveRow>(
            "SELECT id, name, starts_at, ends_at, num_days_to_rsvp, is_walk_in_wave \
             FROM waves WHERE starts_at <= ? AND ends_at > ? \
             ORDER BY starts_at DESC LIMIT 1",
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(Wave::try_from)
        .transpose()
    }

    async fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let form = &application.form;
        sqlx::query(&format!(
            "INSERT INTO applications ({APPLICATION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&application.id.0)
        .bind(&application.user_id.0)
        .bind(&application.wave_id.0)
        .bind(application.status.label())
        .bind(to_timestamp(application.submitted_at))
        .bind(application.confirmation_deadline.map(to_timestamp))
        .bind(&application.discord_id)
        .bind(application.checked_in)
        .bind(&form.first_name)
        .bind(&form.last_name)
        .bind(&form.phone_number)
        .bind(&form.school)
        .bind(&form.major)
        .bind(form.level_of_study.code())
        .bind(i64::from(form.graduation_year))
        .bind(form.shirt_size.code())
        .bind(&form.notes)
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, &application))?;
        Ok(application)
    }

    async fn update_application(&self, change: &ApplicationChange) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        apply_change(&mut *conn, change).await
    }

    async fn update_applications(&self, changes: &[ApplicationChange]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for change in changes {
            apply_change(&mut *tx, change).await?;
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(Application::try_from)
        .transpose()
    }

    async fn fetch_applications(
        &self,
        ids: &[ApplicationId],
    ) -> Result<Vec<Application>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id IN ("
        ));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.0.clone());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<ApplicationRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        let mut found = rows
            .into_iter()
            .map(Application::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let mut ordered = Vec::with_capacity(found.len());
        for id in ids {
            if let Some(position) = found.iter().position(|application| &application.id == id) {
                ordered.push(found.swap_remove(position));
            }
        }
        Ok(ordered)
    }

    async fn application_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Application>, RepositoryError> {
        sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE user_id = ?"
        ))
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(Application::try_from)
        .transpose()
    }

    async fn application_for_discord_id(
        &self,
        discord_id: &str,
    ) -> Result<Option<Application>, RepositoryError> {
        sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE discord_id = ?"
        ))
        .bind(discord_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(Application::try_from)
        .transpose()
    }
}
