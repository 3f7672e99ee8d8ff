use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::bot::CheckInBot;
use super::domain::{Actor, ApplicationForm, ApplicationId, NewWave, UserId};
use super::lifecycle::TransitionError;
use super::mailer::Mailer;
use super::repository::{RegistrationRepository, RepositoryError};
use super::service::{IdentityCheck, ParticipantLookup, RegistrationError, RegistrationService};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const STAFF_HEADER: &str = "x-user-staff";

const STATUS_PATH: &str = "/application/status";
const DISCORD_SUCCESS_PATH: &str = "/application/discord_success";

/// Caller identity forwarded by the authenticating proxy.
#[derive(Debug, Clone)]
pub struct Identity(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| plain(StatusCode::UNAUTHORIZED, "authentication required"))?;
        let is_staff = parts
            .headers
            .get(STAFF_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

        Ok(Identity(Actor {
            user_id: UserId(user_id.to_string()),
            is_staff,
        }))
    }
}

/// An [`Identity`] that carries the staff flag.
#[derive(Debug, Clone)]
pub struct Staff(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Staff
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Identity(actor) = Identity::from_request_parts(parts, state).await?;
        if !actor.is_staff {
            return Err(plain(StatusCode::FORBIDDEN, "staff access required"));
        }
        Ok(Staff(actor))
    }
}

/// Selected records for an admin bulk action.
#[derive(Debug, Clone, Deserialize)]
pub struct Selection {
    pub application_ids: Vec<ApplicationId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscordDataQuery {
    pub discord_id: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscordSuccessQuery {
    pub bot_notified: Option<bool>,
}

/// Router builder exposing the applicant, bot and admin endpoints.
pub fn registration_router<R, M, B>(service: Arc<RegistrationService<R, M, B>>) -> Router
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    Router::new()
        .route("/application", post(submit_handler::<R, M, B>))
        .route(STATUS_PATH, get(status_handler::<R, M, B>))
        .route(DISCORD_SUCCESS_PATH, get(discord_success_handler))
        .route("/application/discord_data", get(discord_data_handler::<R, M, B>))
        .route(
            "/application/check_id/:discord_id",
            get(check_id_handler::<R, M, B>),
        )
        .route(
            "/application/link_id/:discord_id",
            get(link_id_handler::<R, M, B>),
        )
        .route("/application/:application_id", put(update_handler::<R, M, B>))
        .route(
            "/application/:application_id/confirm",
            post(confirm_handler::<R, M, B>),
        )
        .route(
            "/application/:application_id/decline",
            post(decline_handler::<R, M, B>),
        )
        .route(
            "/admin/applications/approve",
            post(approve_handler::<R, M, B>),
        )
        .route(
            "/admin/applications/reject",
            post(reject_handler::<R, M, B>),
        )
        .route(
            "/admin/applications/resend_confirmation",
            post(resend_confirmation_handler::<R, M, B>),
        )
        .route("/admin/waves", post(create_wave_handler::<R, M, B>))
        .with_state(service)
}

pub(crate) async fn submit_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
    Json(form): Json<ApplicationForm>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.submit(&actor, form).await {
        Ok(_) => Redirect::to(STATUS_PATH).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
    Path(application_id): Path<String>,
    Json(form): Json<ApplicationForm>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    let id = ApplicationId(application_id);
    match service.update(&actor, &id, form).await {
        Ok(_) => Redirect::to(STATUS_PATH).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn status_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.status(&actor).await {
        Ok(application) => (StatusCode::OK, Json(application.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn confirm_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
    Path(application_id): Path<String>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    let id = ApplicationId(application_id);
    match service.confirm(&actor, &id).await {
        Ok(_) => Redirect::to(STATUS_PATH).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn decline_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
    Path(application_id): Path<String>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    let id = ApplicationId(application_id);
    match service.decline(&actor, &id).await {
        Ok(_) => Redirect::to(STATUS_PATH).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn check_id_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
    Path(discord_id): Path<String>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.check_external_identity(&actor, &discord_id).await {
        Ok(IdentityCheck::Verified { discord_id }) => {
            Redirect::to(&format!("/application/link_id/{discord_id}")).into_response()
        }
        Ok(other) => plain(StatusCode::OK, other.message().unwrap_or_default()),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn link_id_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Identity(actor): Identity,
    Path(discord_id): Path<String>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.link_external_identity(&actor, &discord_id).await {
        Ok(outcome) if outcome.bot_notified => Redirect::to(DISCORD_SUCCESS_PATH).into_response(),
        Ok(_) => Redirect::to(&format!("{DISCORD_SUCCESS_PATH}?bot_notified=false")).into_response(),
        Err(RegistrationError::NotFound(_)) => Redirect::to(STATUS_PATH).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn discord_success_handler(Query(query): Query<DiscordSuccessQuery>) -> Response {
    let message = if query.bot_notified == Some(false) {
        "Your Discord account is linked and you are checked in. The event bot could not be reached, so an organizer will finish setting up your server roles."
    } else {
        "Your Discord account is linked and you are checked in."
    };
    plain(StatusCode::OK, message)
}

pub(crate) async fn discord_data_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Query(query): Query<DiscordDataQuery>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    let DiscordDataQuery {
        discord_id,
        user,
        pass,
    } = query;
    let lookup = service
        .participant(
            user.as_deref().unwrap_or_default(),
            pass.as_deref().unwrap_or_default(),
            discord_id.as_deref().unwrap_or_default(),
        )
        .await;
    match lookup {
        Ok(ParticipantLookup::Found(participant)) => {
            (StatusCode::OK, Json(participant)).into_response()
        }
        Ok(ParticipantLookup::NoApplication) => plain(StatusCode::OK, "no_app"),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn approve_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Staff(_staff): Staff,
    Json(selection): Json<Selection>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.approve(&selection.application_ids).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reject_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Staff(_staff): Staff,
    Json(selection): Json<Selection>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.reject(&selection.application_ids).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn resend_confirmation_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Staff(_staff): Staff,
    Json(selection): Json<Selection>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.resend_confirmation(&selection.application_ids).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_wave_handler<R, M, B>(
    State(service): State<Arc<RegistrationService<R, M, B>>>,
    Staff(_staff): Staff,
    Json(new_wave): Json<NewWave>,
) -> Response
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    match service.create_wave(new_wave).await {
        Ok(wave) => (StatusCode::CREATED, Json(wave)).into_response(),
        Err(error) => error_response(error),
    }
}

fn plain(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}

fn json_error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub(crate) fn error_response(error: RegistrationError) -> Response {
    match error {
        RegistrationError::Transition(
            err @ (TransitionError::MissingIdentity | TransitionError::MalformedIdentity(_)),
        ) => plain(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
        RegistrationError::Transition(err @ TransitionError::IdentityTaken) => {
            plain(StatusCode::CONFLICT, &err.to_string())
        }
        RegistrationError::Transition(err) => plain(StatusCode::FORBIDDEN, &err.to_string()),
        RegistrationError::InvalidCredentials => {
            plain(StatusCode::FORBIDDEN, "invalid bot credentials")
        }
        RegistrationError::Bot(err) => plain(StatusCode::BAD_GATEWAY, &err.to_string()),
        RegistrationError::Form(err) => json_error(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        RegistrationError::Wave(err) => json_error(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        RegistrationError::UnknownUser(user) => json_error(
            StatusCode::UNAUTHORIZED,
            format!("user {user} has no account"),
        ),
        err @ (RegistrationError::AlreadyApplied | RegistrationError::NoActiveWave) => {
            json_error(StatusCode::CONFLICT, err.to_string())
        }
        err @ (RegistrationError::NotFound(_)
        | RegistrationError::Repository(RepositoryError::NotFound(_))) => {
            json_error(StatusCode::NOT_FOUND, err.to_string())
        }
        err @ RegistrationError::Repository(
            RepositoryError::Conflict(_) | RepositoryError::Stale(_),
        ) => {
            json_error(StatusCode::CONFLICT, err.to_string())
        }
        err @ RegistrationError::Repository(_) => {
            tracing::error!(error = %err, "registration storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
