use super::common::*;

use chrono::Duration;

use crate::workflows::registration::domain::{
    Application, ApplicationId, ApplicationStatus, UserId, WaveId,
};
use crate::workflows::registration::memory::InMemoryRepository;
use crate::workflows::registration::repository::{
    ApplicationChange, RegistrationRepository, RepositoryError,
};
use crate::workflows::registration::sqlite::SqliteRepository;

async fn sqlite() -> SqliteRepository {
    SqliteRepository::open_in_memory()
        .await
        .expect("in-memory database opens")
}

/// Users and wave the application fixtures point at.
async fn seed<R: RegistrationRepository>(repository: &R) {
    repository.insert_wave(wave(5)).await.expect("wave stored");
    for id in ["ada", "grace"] {
        repository.upsert_user(user(id)).await.expect("user stored");
    }
}

async fn round_trips_applications<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let mut application = application("ada", &wave(5));
    application.form.notes = Some("vegetarian".to_string());
    repository
        .insert_application(application.clone())
        .await
        .expect("insert");

    let stored = repository
        .fetch_application(&application.id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(stored, application);

    let by_user = repository
        .application_for_user(&application.user_id)
        .await
        .expect("fetch by user");
    assert_eq!(by_user, Some(application));
}

async fn rejects_second_application_for_user<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let first = application("ada", &wave(5));
    let mut second = application("ada", &wave(5));
    second.id = ApplicationId("app-ada-2".to_string());
    repository.insert_application(first).await.expect("first");

    let err = repository
        .insert_application(second)
        .await
        .expect_err("duplicate user");
    assert!(matches!(err, RepositoryError::Conflict(_)));
}

/// Copy of `application` moved to ADMITTED, plus the guarded write that gets it there.
fn admit(application: &Application) -> (Application, ApplicationChange) {
    let mut admitted = application.clone();
    admitted.status = ApplicationStatus::Admitted;
    admitted.confirmation_deadline = Some(at(2024, 1, 6, 23, 59));
    let change = ApplicationChange::status(application.status, &admitted);
    (admitted, change)
}

async fn batch_update_is_all_or_nothing<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let ada = application("ada", &wave(5));
    let grace = application("grace", &wave(5));
    repository.insert_application(ada.clone()).await.expect("ada");
    repository
        .insert_application(grace.clone())
        .await
        .expect("grace");

    let (mut admitted_ada, admit_ada) = admit(&ada);
    let (admitted_grace, admit_grace) = admit(&grace);
    let link_ada = ApplicationChange::check_in(&admitted_ada, "80351110224678912");
    let link_grace = ApplicationChange::check_in(&admitted_grace, "80351110224678912");

    let err = repository
        .update_applications(&[
            admit_ada.clone(),
            admit_grace.clone(),
            link_ada.clone(),
            link_grace,
        ])
        .await
        .expect_err("discord id clash");
    assert!(matches!(err, RepositoryError::Conflict(_)));
    for id in [&ada.id, &grace.id] {
        let stored = repository
            .fetch_application(id)
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(stored.status, ApplicationStatus::Submitted);
        assert!(stored.discord_id.is_none());
    }

    repository
        .update_applications(&[admit_ada, admit_grace, link_ada.clone()])
        .await
        .expect("batch commits");
    link_ada.apply_to(&mut admitted_ada);
    let fetched = repository
        .fetch_applications(&[grace.id.clone(), ApplicationId("nope".to_string()), ada.id.clone()])
        .await
        .expect("fetch selection");
    assert_eq!(fetched, vec![admitted_grace, admitted_ada.clone()]);
    assert!(admitted_ada.checked_in);

    let found = repository
        .application_for_discord_id("80351110224678912")
        .await
        .expect("lookup");
    assert_eq!(found.map(|application| application.id), Some(ada.id));
}

async fn write_from_a_stale_status_is_refused<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let ada = application("ada", &wave(5));
    let grace = application("grace", &wave(5));
    repository.insert_application(ada.clone()).await.expect("ada");
    repository
        .insert_application(grace.clone())
        .await
        .expect("grace");

    let (_, admit_ada) = admit(&ada);
    repository
        .update_application(&admit_ada)
        .await
        .expect("first admission");

    let err = repository
        .update_application(&admit_ada)
        .await
        .expect_err("status already moved on");
    assert!(matches!(err, RepositoryError::Stale(_)), "{err:?}");

    let (_, admit_grace) = admit(&grace);
    let err = repository
        .update_applications(&[admit_grace, admit_ada])
        .await
        .expect_err("stale member fails the batch");
    assert!(matches!(err, RepositoryError::Stale(_)), "{err:?}");
    let stored_grace = repository
        .fetch_application(&grace.id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(stored_grace.status, ApplicationStatus::Submitted);

    let mut edited = ada.clone();
    edited.form.major = "Mathematics".to_string();
    repository
        .update_application(&ApplicationChange::form(&edited))
        .await
        .expect("form edit");
    let stored_ada = repository
        .fetch_application(&ada.id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(stored_ada.form.major, "Mathematics");
    assert_eq!(
        stored_ada.status,
        ApplicationStatus::Admitted,
        "form edits leave the status column alone"
    );
}

async fn update_of_missing_record_is_not_found<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let ghost = application("ada", &wave(5));
    let (_, admit_ghost) = admit(&ghost);

    for change in [ApplicationChange::form(&ghost), admit_ghost] {
        let err = repository
            .update_application(&change)
            .await
            .expect_err("missing record");
        assert!(matches!(err, RepositoryError::NotFound(_)), "{err:?}");
    }
}

async fn sub_second_submission_time_round_trips<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let application = Application::new(
        UserId("ada".to_string()),
        wave(5).id,
        form(),
        now() + Duration::milliseconds(750),
    );
    let inserted = repository
        .insert_application(application)
        .await
        .expect("insert");
    assert_eq!(inserted.submitted_at, now());

    let stored = repository
        .fetch_application(&inserted.id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(stored, inserted);
}

async fn picks_latest_started_active_wave<R: RegistrationRepository>(repository: R) {
    seed(&repository).await;
    let mut walk_in = wave(0);
    walk_in.id = WaveId("wave-walk-in".to_string());
    walk_in.start = at(2024, 1, 1, 8, 0);
    walk_in.end = at(2024, 1, 2, 8, 0);
    walk_in.is_walk_in_wave = true;
    repository.insert_wave(walk_in.clone()).await.expect("walk-in");

    let active = repository.active_wave(now()).await.expect("lookup");
    assert_eq!(active, Some(walk_in));

    let later = repository
        .active_wave(at(2024, 1, 20, 0, 0))
        .await
        .expect("lookup");
    assert_eq!(later.map(|wave| wave.id), Some(WaveId("wave-1".to_string())));

    let closed = repository
        .active_wave(at(2024, 2, 1, 0, 0))
        .await
        .expect("lookup");
    assert!(closed.is_none(), "wave end is exclusive");
}

#[tokio::test]
async fn sqlite_round_trips_applications() {
    round_trips_applications(sqlite().await).await;
}

#[tokio::test]
async fn memory_round_trips_applications() {
    round_trips_applications(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_rejects_second_application_for_user() {
    rejects_second_application_for_user(sqlite().await).await;
}

#[tokio::test]
async fn memory_rejects_second_application_for_user() {
    rejects_second_application_for_user(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_batch_update_is_all_or_nothing() {
    batch_update_is_all_or_nothing(sqlite().await).await;
}

#[tokio::test]
async fn memory_batch_update_is_all_or_nothing() {
    batch_update_is_all_or_nothing(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_update_of_missing_record_is_not_found() {
    update_of_missing_record_is_not_found(sqlite().await).await;
}

#[tokio::test]
async fn memory_update_of_missing_record_is_not_found() {
    update_of_missing_record_is_not_found(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_write_from_a_stale_status_is_refused() {
    write_from_a_stale_status_is_refused(sqlite().await).await;
}

#[tokio::test]
async fn memory_write_from_a_stale_status_is_refused() {
    write_from_a_stale_status_is_refused(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_sub_second_submission_time_round_trips() {
    sub_second_submission_time_round_trips(sqlite().await).await;
}

#[tokio::test]
async fn memory_sub_second_submission_time_round_trips() {
    sub_second_submission_time_round_trips(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_picks_latest_started_active_wave() {
    picks_latest_started_active_wave(sqlite().await).await;
}

#[tokio::test]
async fn memory_picks_latest_started_active_wave() {
    picks_latest_started_active_wave(InMemoryRepository::default()).await;
}

#[tokio::test]
async fn sqlite_upserts_users() {
    let repository = sqlite().await;
    repository.upsert_user(user("ada")).await.expect("insert");
    let mut renamed = user("ada");
    renamed.email = "ada@lovelace.dev".to_string();
    renamed.team_name = Some("Engines".to_string());
    repository.upsert_user(renamed.clone()).await.expect("update");

    let stored = repository.fetch_user(&renamed.id).await.expect("fetch");
    assert_eq!(stored, Some(renamed));
}
