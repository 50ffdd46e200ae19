use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

mod common;

fn branching_tree() -> serde_json::Value {
    json!([
        {
            "_id": "q0",
            "question_type": "branching_choice",
            "text": "Do you use the product?",
            "options": ["Yes", "No"],
            "order": 0,
            "cost": 15,
            "children": {
                "Yes": [
                    {
                        "_id": "c1",
                        "question_type": "multiple_choice",
                        "text": "How often?",
                        "options": ["Daily", "Weekly"],
                        "order": 0,
                        "cost": 7
                    }
                ]
            },
            "branch_end_types": { "Yes": "continue" }
        },
        {
            "_id": "q1",
            "question_type": "short_answer",
            "text": "Anything else?",
            "options": [],
            "order": 1,
            "cost": 10
        }
    ])
}

#[tokio::test]
async fn full_take_flow_with_branch_taken() {
    let app = common::create_test_app().await;
    let (_, key, code) = common::seed_open_survey(&app, "free", branching_tree()).await;
    let session = Uuid::new_v4().to_string();

    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["step"], "privacy_consent");

    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/consent", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["step"], "question");
    assert_eq!(step["question"]["id"], "q0");
    assert_eq!(step["position"]["current"], 1);
    assert_eq!(step["position"]["total"], 3);

    // choosing "Yes" routes into the branch question
    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/answers", key),
        json!({ "session_id": session, "question_id": "q0", "answer": "Yes" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["question"]["id"], "c1");

    let (_, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/answers", key),
        json!({ "session_id": session, "question_id": "c1", "answer": "Daily" }),
    )
    .await;
    assert_eq!(step["question"]["id"], "q1");

    let (_, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/answers", key),
        json!({ "session_id": session, "question_id": "q1", "answer": "all good" }),
    )
    .await;
    assert_eq!(step["step"], "ready_to_submit");

    let (status, done) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/finalize", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["secret_code"], code.as_str());

    // a second finalize returns the same code, not an error
    let (status, again) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/finalize", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["secret_code"], code.as_str());

    // reload short-circuits straight to the completion screen
    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["step"], "already_completed");
    assert_eq!(step["secret_code"], code.as_str());
}

#[tokio::test]
async fn untaken_branch_questions_are_skipped() {
    let app = common::create_test_app().await;
    let (_, key, _) = common::seed_open_survey(&app, "free", branching_tree()).await;
    let session = Uuid::new_v4().to_string();

    common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    common::post_json(
        &app,
        &format!("/api/v1/take/{}/consent", key),
        json!({ "session_id": session }),
    )
    .await;

    // choosing "No" must bypass the "Yes" branch question entirely
    let (_, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/answers", key),
        json!({ "session_id": session, "question_id": "q0", "answer": "No" }),
    )
    .await;
    assert_eq!(step["question"]["id"], "q1");
}

#[tokio::test]
async fn back_navigation_returns_recorded_answer() {
    let app = common::create_test_app().await;
    let (_, key, _) = common::seed_open_survey(&app, "free", branching_tree()).await;
    let session = Uuid::new_v4().to_string();

    common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    common::post_json(
        &app,
        &format!("/api/v1/take/{}/consent", key),
        json!({ "session_id": session }),
    )
    .await;
    common::post_json(
        &app,
        &format!("/api/v1/take/{}/answers", key),
        json!({ "session_id": session, "question_id": "q0", "answer": "Yes" }),
    )
    .await;

    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/back", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["question"]["id"], "q0");
    assert_eq!(step["recorded_answer"], "Yes");
}

#[tokio::test]
async fn abandoned_session_restarts_fresh() {
    let app = common::create_test_app().await;
    let (_, key, _) = common::seed_open_survey(&app, "free", branching_tree()).await;
    let session = Uuid::new_v4().to_string();

    common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    common::post_json(
        &app,
        &format!("/api/v1/take/{}/consent", key),
        json!({ "session_id": session }),
    )
    .await;
    common::post_json(
        &app,
        &format!("/api/v1/take/{}/answers", key),
        json!({ "session_id": session, "question_id": "q0", "answer": "Yes" }),
    )
    .await;

    let (status, _) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/abandon", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["step"], "privacy_consent");
}

#[tokio::test]
async fn unknown_survey_key_is_not_found() {
    let app = common::create_test_app().await;

    let (status, _) = common::post_json(
        &app,
        "/api/v1/take/no-such-key/start",
        json!({ "session_id": "sess" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn draft_survey_rejects_respondents() {
    let app = common::create_test_app().await;

    // created but never opened
    let (_, survey) = common::post_json(
        &app,
        "/api/v1/surveys/",
        json!({
            "owner_id": "owner-1",
            "title": "Draft survey",
            "survey_type": "free",
            "target_participants": 10,
        }),
    )
    .await;
    let key = survey["secret_key"].as_str().unwrap();

    let (status, _) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": "sess" }),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn paid_survey_skips_consent() {
    let app = common::create_test_app().await;
    let (_, key, _) = common::seed_open_survey(&app, "paid", branching_tree()).await;
    let session = Uuid::new_v4().to_string();

    let (status, step) = common::post_json(
        &app,
        &format!("/api/v1/take/{}/start", key),
        json!({ "session_id": session }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(step["step"], "question");
    assert_eq!(step["question"]["id"], "q0");
}
