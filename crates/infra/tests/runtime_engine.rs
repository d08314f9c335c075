use std::sync::Arc;
use std::time::Duration;

use journey_domain::clock::ManualClock;
use journey_domain::error::DomainError;
use journey_domain::runtime::JourneyRuntimeService;
use journey_domain::runtime::model::{
    ApplicationStatus, GroupProgress, GroupStatus, RuntimeSettings, SessionStatus,
};
use journey_domain::validation::ValidationCode;
use journey_infra::catalog::{
    CatalogConfigSource, CatalogDocument, CatalogForm, CatalogGroup, CatalogGroupForm,
};
use journey_infra::repositories::InMemoryRuntimeStore;
use serde_json::{Value, json};

const START_MS: i64 = 1_700_000_000_000;
const TTL: Duration = Duration::from_secs(30 * 60);

const CATALOG: &str = r#"{
    "journeys": [
        { "journey_code": "ONBOARD", "journey_id": "journey-onboard", "groups": [1, 2, 3] }
    ],
    "groups": [
        { "group_no": 1, "forms": [{ "form_code": "PERSONAL", "sort_order": 1 }] },
        { "group_no": 2, "forms": [{ "form_code": "CONTACT", "sort_order": 1 }] },
        { "group_no": 3, "forms": [{ "form_code": "CONSENT", "sort_order": 1 }] }
    ],
    "forms": [
        {
            "form_code": "PERSONAL",
            "fields": [
                { "field_code": "NAME", "field_type": "TEXT", "required": true, "sort_order": 1 },
                { "field_code": "AGE", "field_type": "NOMINAL", "required": true, "sort_order": 2,
                  "rules": [{ "kind": "VALUE", "min": 18, "max": 65 }] }
            ]
        },
        {
            "form_code": "CONTACT",
            "fields": [{ "field_code": "PHONE", "field_type": "TEXT", "required": true, "sort_order": 1 }]
        },
        { "form_code": "CONSENT" }
    ]
}"#;

struct Harness {
    service: JourneyRuntimeService,
    store: InMemoryRuntimeStore,
    catalog: CatalogConfigSource,
    clock: Arc<ManualClock>,
}

async fn harness_with(settings: RuntimeSettings) -> Harness {
    let document = CatalogDocument::from_json_str(CATALOG, "test").unwrap();
    let catalog = CatalogConfigSource::from_document(document).unwrap();
    let store = InMemoryRuntimeStore::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let service = JourneyRuntimeService::new(
        Arc::new(store.clone()),
        Arc::new(catalog.clone()),
        clock.clone(),
        settings,
    );
    service.refresh_configuration().await.unwrap();
    Harness {
        service,
        store,
        catalog,
        clock,
    }
}

async fn harness() -> Harness {
    harness_with(RuntimeSettings::default()).await
}

fn personal(age: &str) -> Value {
    json!({
        "submissions": [{ "formCode": "PERSONAL", "fields": { "NAME": "Ann", "AGE": age } }]
    })
}

impl Harness {
    async fn group_status(&self, application_id: &str, group_no: u32) -> Option<GroupStatus> {
        self.store
            .group_state(application_id, group_no)
            .await
            .map(|state| state.status)
    }

    async fn submit_ok(&self, session_id: &str, group: &str) {
        let outcome = self
            .service
            .submit(session_id, group, json!({ "group": group }), false)
            .await
            .unwrap();
        assert!(outcome.validate_result);
    }
}

#[tokio::test]
async fn start_returns_every_group_missing() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    assert_eq!(view.current_group_no, 0);
    assert_eq!(view.next_group_no, Some(1));
    assert_eq!(view.application_status, ApplicationStatus::InProgress);
    assert_eq!(view.session_expires_at_ms, START_MS + TTL.as_millis() as i64);
    let statuses: Vec<GroupProgress> = view.groups.iter().map(|g| g.status).collect();
    assert_eq!(statuses, [GroupProgress::Missing; 3]);
}

#[tokio::test]
async fn start_reuses_the_open_application() {
    let h = harness().await;
    let first = h.service.start("ONBOARD", "cust-1").await.unwrap();
    let second = h.service.start("ONBOARD", "cust-1").await.unwrap();

    assert_eq!(first.application_id, second.application_id);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(h.store.applications_for("cust-1", "ONBOARD").await.len(), 1);
}

#[tokio::test]
async fn unknown_journey_is_a_config_error() {
    let h = harness().await;
    let err = h.service.start("NOPE", "cust-1").await.unwrap_err();
    assert!(matches!(err, DomainError::UnknownJourney(code) if code == "NOPE"));
}

#[tokio::test]
async fn concurrent_starts_converge_on_one_application() {
    let h = harness().await;
    let (a, b, c) = tokio::join!(
        h.service.start("ONBOARD", "cust-1"),
        h.service.start("ONBOARD", "cust-1"),
        h.service.start("ONBOARD", "cust-1"),
    );
    let ids = [
        a.unwrap().application_id,
        b.unwrap().application_id,
        c.unwrap().application_id,
    ];
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(h.store.applications_for("cust-1", "ONBOARD").await.len(), 1);
}

#[tokio::test]
async fn submitting_ahead_of_the_plan_is_rejected() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    h.submit_ok(&view.session_id, "1").await;
    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.current_group_no, 1);
    assert_eq!(app.status, ApplicationStatus::InProgress);

    let err = h
        .service
        .submit(&view.session_id, "3", json!({}), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::OrderingConflict {
            group_no: 3,
            submitted_position: 3,
            current_position: 1,
        }
    ));
    assert!(h.group_status(&view.application_id, 3).await.is_none());
}

#[tokio::test]
async fn resubmitting_the_current_group_is_accepted() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    h.submit_ok(&view.session_id, "1").await;

    let outcome = h
        .service
        .submit(&view.session_id, "1", json!({ "changed": true }), false)
        .await
        .unwrap();

    assert!(outcome.validate_result);
    let state = h.store.group_state(&view.application_id, 1).await.unwrap();
    assert_eq!(state.submission_version, 2);
    assert_eq!(state.payload, json!({ "changed": true }));
    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.current_group_no, 1);
}

#[tokio::test]
async fn resubmission_leaves_other_groups_alone() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    h.submit_ok(&view.session_id, "1").await;
    h.submit_ok(&view.session_id, "2").await;

    h.submit_ok(&view.session_id, "2").await;

    assert_eq!(
        h.group_status(&view.application_id, 1).await,
        Some(GroupStatus::Validated)
    );
    assert_eq!(
        h.group_status(&view.application_id, 2).await,
        Some(GroupStatus::Validated)
    );
}

#[tokio::test]
async fn back_edit_invalidates_later_groups() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    for group in ["1", "2", "3"] {
        h.submit_ok(&view.session_id, group).await;
    }
    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.status, ApplicationStatus::ReadyForFinalisation);
    assert_eq!(app.current_group_no, 3);

    h.submit_ok(&view.session_id, "1").await;

    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.current_group_no, 1);
    assert_eq!(app.furthest_group_no, 3);
    assert_eq!(app.status, ApplicationStatus::InProgress);
    assert_eq!(
        h.group_status(&view.application_id, 1).await,
        Some(GroupStatus::Validated)
    );
    for group_no in [2, 3] {
        assert_eq!(
            h.group_status(&view.application_id, group_no).await,
            Some(GroupStatus::Invalidated)
        );
    }

    let current = h.service.get_current(&view.session_id).await.unwrap();
    assert_eq!(current.next_group_no, Some(2));
    assert_eq!(current.group(2).unwrap().validate_result, Some(false));
    assert_eq!(
        current.group(2).unwrap().payload,
        Some(json!({ "group": "2" }))
    );
}

#[tokio::test]
async fn back_edit_leaves_earlier_groups_untouched() {
    let h = harness().await;
    let mut document = h.catalog.document();
    document.groups.push(CatalogGroup {
        group_no: 4,
        forms: vec![CatalogGroupForm {
            form_code: "REVIEW".to_string(),
            sort_order: 1,
        }],
    });
    document.forms.push(CatalogForm {
        form_code: "REVIEW".to_string(),
        children: Vec::new(),
        fields: Vec::new(),
    });
    document.journeys[0].groups.push(4);
    h.catalog.replace(document).unwrap();
    h.service.refresh_configuration().await.unwrap();

    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    assert_eq!(view.groups.len(), 4);
    for group in ["1", "2", "3", "4"] {
        h.submit_ok(&view.session_id, group).await;
    }
    let before = h.store.group_state(&view.application_id, 1).await.unwrap();

    h.submit_ok(&view.session_id, "2").await;

    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.current_group_no, 2);
    assert_eq!(app.furthest_group_no, 4);
    assert_eq!(app.status, ApplicationStatus::InProgress);
    let after = h.store.group_state(&view.application_id, 1).await.unwrap();
    assert_eq!(after.status, GroupStatus::Validated);
    assert_eq!(after.submission_version, before.submission_version);
    assert_eq!(
        h.group_status(&view.application_id, 2).await,
        Some(GroupStatus::Validated)
    );
    for group_no in [3, 4] {
        assert_eq!(
            h.group_status(&view.application_id, group_no).await,
            Some(GroupStatus::Invalidated)
        );
    }
}

#[tokio::test]
async fn forced_invalid_never_moves_progress() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    h.submit_ok(&view.session_id, "1").await;
    h.submit_ok(&view.session_id, "2").await;
    let before = h.store.application(&view.application_id).await.unwrap();

    let outcome = h
        .service
        .submit(&view.session_id, "1", json!({}), true)
        .await
        .unwrap();
    assert!(!outcome.validate_result);
    let forward = h
        .service
        .submit(&view.session_id, "3", json!({}), true)
        .await
        .unwrap();
    assert!(!forward.validate_result);

    let after = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(after.current_group_no, before.current_group_no);
    assert_eq!(after.status, before.status);
    assert_eq!(after.version, before.version);
    assert_eq!(
        h.group_status(&view.application_id, 1).await,
        Some(GroupStatus::Invalidated)
    );
    assert_eq!(
        h.group_status(&view.application_id, 2).await,
        Some(GroupStatus::Validated)
    );
    assert_eq!(
        h.group_status(&view.application_id, 3).await,
        Some(GroupStatus::Invalidated)
    );
}

#[tokio::test]
async fn invalid_group_codes_are_rejected() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    for group in ["abc", "9"] {
        let err = h
            .service
            .submit(&view.session_id, group, json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)), "group {group}");
    }
}

#[tokio::test]
async fn expired_session_is_renewed_on_submit() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    h.clock.advance(TTL + Duration::from_secs(60));
    let outcome = h
        .service
        .submit(&view.session_id, "1", json!({}), false)
        .await
        .unwrap();

    assert!(outcome.session_renewed);
    assert_ne!(outcome.session_id, view.session_id);
    assert_eq!(
        outcome.session_expires_at_ms,
        h.clock_now() + TTL.as_millis() as i64
    );
    let old = h.store.session(&view.session_id).await.unwrap();
    assert_eq!(old.status, SessionStatus::Expired);
    let fresh = h.store.session(&outcome.session_id).await.unwrap();
    assert_eq!(fresh.application_id, view.application_id);

    let err = h.service.get_current(&view.session_id).await.unwrap_err();
    assert!(matches!(err, DomainError::SessionExpired));
    assert!(h.service.get_current(&outcome.session_id).await.is_ok());
}

#[tokio::test]
async fn concurrent_submits_on_a_lapsed_session_each_renew() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    h.clock.advance(TTL + Duration::from_secs(1));

    let (a, b) = tokio::join!(
        h.service.submit(&view.session_id, "1", json!({ "n": 1 }), false),
        h.service.submit(&view.session_id, "1", json!({ "n": 2 }), false),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.session_renewed && b.session_renewed);
    assert_ne!(a.session_id, b.session_id);
    for outcome in [&a, &b] {
        let fresh = h.store.session(&outcome.session_id).await.unwrap();
        assert_eq!(fresh.application_id, view.application_id);
        assert_eq!(fresh.status, SessionStatus::Active);
    }
    let state = h.store.group_state(&view.application_id, 1).await.unwrap();
    assert_eq!(state.submission_version, 2);
}

#[tokio::test]
async fn unknown_and_closed_sessions_are_not_renewed() {
    let h = harness().await;
    let err = h
        .service
        .submit("missing", "1", json!({}), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SessionExpired));

    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    h.service.close_session(&view.session_id).await.unwrap();
    let err = h
        .service
        .submit(&view.session_id, "1", json!({}), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SessionExpired));
}

#[tokio::test]
async fn get_current_slides_the_expiry() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    h.clock.advance(Duration::from_secs(10 * 60));
    let current = h.service.get_current(&view.session_id).await.unwrap();

    let expected = h.clock_now() + TTL.as_millis() as i64;
    assert_eq!(current.session_expires_at_ms, expected);
    assert_eq!(
        h.store.session(&view.session_id).await.unwrap().expires_at_ms,
        expected
    );
}

#[tokio::test]
async fn restart_supersedes_the_open_application() {
    let h = harness().await;
    let first = h.service.start("ONBOARD", "cust-1").await.unwrap();
    h.submit_ok(&first.session_id, "1").await;

    let restarted = h.service.restart("ONBOARD", "cust-1").await.unwrap();

    assert_ne!(restarted.application_id, first.application_id);
    assert_eq!(restarted.current_group_no, 0);
    assert!(
        restarted
            .groups
            .iter()
            .all(|group| group.status == GroupProgress::Missing)
    );
    let old = h.store.application(&first.application_id).await.unwrap();
    assert_eq!(old.status, ApplicationStatus::Superseded);
    for session in h.store.sessions_for(&first.application_id).await {
        assert_eq!(session.status, SessionStatus::Expired);
    }

    let err = h
        .service
        .submit(&first.session_id, "2", json!({}), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ApplicationClosed { .. }));
}

#[tokio::test]
async fn concurrent_submits_serialize_on_the_application() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    let (a, b) = tokio::join!(
        h.service.submit(&view.session_id, "1", json!({ "n": 1 }), false),
        h.service.submit(&view.session_id, "1", json!({ "n": 2 }), false),
    );
    assert!(a.unwrap().validate_result);
    assert!(b.unwrap().validate_result);

    let state = h.store.group_state(&view.application_id, 1).await.unwrap();
    assert_eq!(state.submission_version, 2);
    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.version, 2);
}

#[tokio::test]
async fn payload_validation_on_submit_stores_invalid_groups() {
    let h = harness_with(RuntimeSettings {
        validate_payload_on_submit: true,
        ..RuntimeSettings::default()
    })
    .await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    let outcome = h
        .service
        .submit(&view.session_id, "1", personal("17"), false)
        .await
        .unwrap();
    assert!(!outcome.validate_result);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].rule, ValidationCode::Value);
    let app = h.store.application(&view.application_id).await.unwrap();
    assert_eq!(app.current_group_no, 0);
    assert_eq!(
        h.group_status(&view.application_id, 1).await,
        Some(GroupStatus::Invalidated)
    );

    let garbled = h
        .service
        .submit(&view.session_id, "1", json!({ "submissions": "x" }), false)
        .await
        .unwrap();
    assert_eq!(garbled.errors[0].rule, ValidationCode::Payload);

    let outcome = h
        .service
        .submit(&view.session_id, "1", personal("30"), false)
        .await
        .unwrap();
    assert!(outcome.validate_result);
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn refresh_picks_up_catalog_changes() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();
    assert_eq!(view.groups.len(), 3);

    let mut document = h.catalog.document();
    document.journeys[0].groups = vec![1, 2];
    h.catalog.replace(document).unwrap();
    let snapshot = h.service.refresh_configuration().await.unwrap();

    assert_eq!(snapshot.journey_groups["ONBOARD"], [1, 2]);
    let current = h.service.get_current(&view.session_id).await.unwrap();
    assert_eq!(current.groups.len(), 2);
}

#[tokio::test]
async fn sweeper_expires_lapsed_sessions() {
    let h = harness().await;
    let view = h.service.start("ONBOARD", "cust-1").await.unwrap();

    assert_eq!(h.service.expire_lapsed_sessions().await.unwrap(), 0);
    h.clock.advance(TTL);
    assert_eq!(h.service.expire_lapsed_sessions().await.unwrap(), 1);
    assert_eq!(
        h.store.session(&view.session_id).await.unwrap().status,
        SessionStatus::Expired
    );
}

impl Harness {
    fn clock_now(&self) -> i64 {
        use journey_domain::clock::Clock;
        self.clock.now_ms()
    }
}
