mod common;

use std::sync::Arc;

use heartline_api::HeartlineError;
use heartline_api::messages::NewMessage;
use heartline_api::protocol::{AnswerKind, Dismissal, PairState, REQUEST_TITLE};
use heartline_db::{Database, DocumentStore};
use heartline_types::documents::{Filter, MESSAGES};
use heartline_types::models::{MessageKind, MessageStatus, Priority};

use common::{A, B, Couple, FlakyStore};

fn grievance(title: &str) -> NewMessage {
    NewMessage {
        title: title.into(),
        description: "details".into(),
        priority: Some(Priority::Medium),
        mood: Some("sad".into()),
        kind: MessageKind::Grievance,
    }
}

#[tokio::test]
async fn request_creates_exactly_one_document_for_the_pair() {
    let couple = Couple::new();
    let a = couple.protocol(&couple.a);

    let request = a.request("need closure").await.unwrap();

    let docs = couple
        .db
        .query(
            MESSAGES,
            &[Filter::eq("type", "broken_heart_request")],
        )
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, request.id());
    assert_eq!(request.sender_email(), A);
    assert_eq!(request.receiver_email(), B);

    let body = request.as_request().unwrap();
    assert_eq!(body.title, REQUEST_TITLE);
    assert_eq!(body.description, "need closure");
    assert_eq!(body.status, MessageStatus::Pending);
    assert_eq!(body.sender_nickname, "Ari");
}

#[tokio::test]
async fn decline_scenario() {
    let couple = Couple::new();
    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);

    let request = a.request("need closure").await.unwrap();

    let draft = b.begin_respond(request.id(), AnswerKind::Decline).await.unwrap();
    b.submit_respond(draft, "not ready").await.unwrap();

    // A's dashboard shows the decline with B's nickname
    let PairState::Responded(response) = a.state().await.unwrap() else {
        panic!("expected a response for A");
    };
    let answer = response.as_partner_response().unwrap();
    assert!(!answer.accepted);
    assert_eq!(answer.reason, "not ready");
    assert_eq!(answer.partner_nickname, "Bo");
    assert_eq!(answer.request_id, request.id());

    // The request is gone for B
    assert!(couple.repo().get(request.id()).await.unwrap().is_none());
    assert_eq!(b.state().await.unwrap(), PairState::Idle);

    let responses = couple
        .db
        .query(MESSAGES, &[Filter::eq("type", "partner_response")])
        .unwrap();
    assert_eq!(responses.len(), 1);

    // Closing returns A to Idle and a new request may follow
    assert!(a.dismiss(response.id(), Dismissal::Close).await.unwrap().is_none());
    assert_eq!(a.state().await.unwrap(), PairState::Idle);
    a.request("can we talk again").await.unwrap();
}

#[tokio::test]
async fn accept_without_reason_then_clear_removes_everything() {
    let couple = Couple::new();
    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);

    let a_msgs = couple.messages(&couple.a);
    let b_msgs = couple.messages(&couple.b);
    a_msgs.submit(grievance("dishes")).await.unwrap();
    b_msgs.submit(grievance("laundry")).await.unwrap();

    let request = a.request("need closure").await.unwrap();
    let draft = b.begin_respond(request.id(), AnswerKind::Accept).await.unwrap();
    let response = b.submit_respond(draft, "").await.unwrap();
    assert!(response.as_partner_response().unwrap().accepted);
    assert!(couple.repo().get(request.id()).await.unwrap().is_none());

    let confirmation = a
        .dismiss(response.id(), Dismissal::Proceed)
        .await
        .unwrap()
        .expect("acceptance leads to a confirmation");
    let report = a.confirm(confirmation).await.unwrap();
    assert_eq!(report.deleted, 2);

    assert!(couple.all_for_pair().is_empty());
    assert_eq!(a.state().await.unwrap(), PairState::Idle);
}

#[tokio::test]
async fn clear_leaves_other_couples_and_gratitude_alone() {
    let couple = Couple::new();
    let c = common::sign_up(&couple.db, "c@x.com", "Cy", "d@x.com");
    couple.messages(&c).submit(grievance("unrelated")).await.unwrap();
    couple
        .db
        .insert(
            "gratitude",
            serde_json::json!({ "senderEmail": A, "receiverEmail": B, "message": "thanks" })
                .as_object()
                .cloned()
                .unwrap(),
        )
        .unwrap();

    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);
    couple.messages(&couple.a).submit(grievance("dishes")).await.unwrap();

    let request = a.request("need closure").await.unwrap();
    let draft = b.begin_respond(request.id(), AnswerKind::Accept).await.unwrap();
    let response = b.submit_respond(draft, "ok").await.unwrap();
    let confirmation = a.dismiss(response.id(), Dismissal::Proceed).await.unwrap().unwrap();
    a.confirm(confirmation).await.unwrap();

    assert_eq!(
        couple
            .db
            .query(MESSAGES, &[Filter::eq("senderEmail", "c@x.com")])
            .unwrap()
            .len(),
        1
    );
    assert_eq!(couple.db.query("gratitude", &[]).unwrap().len(), 1);
}

#[tokio::test]
async fn retrying_an_answer_does_not_duplicate_it() {
    let couple = Couple::new();
    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);

    let request = a.request("need closure").await.unwrap();
    let draft = b.begin_respond(request.id(), AnswerKind::Decline).await.unwrap();
    let first = b.submit_respond(draft.clone(), "not ready").await.unwrap();
    let second = b.submit_respond(draft, "not ready").await.unwrap();
    assert_eq!(first.id(), second.id());

    let responses = couple
        .db
        .query(MESSAGES, &[Filter::eq("type", "partner_response")])
        .unwrap();
    assert_eq!(responses.len(), 1);
}

#[tokio::test]
async fn answering_a_vanished_request_is_not_found() {
    let couple = Couple::new();
    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);

    let request = a.request("need closure").await.unwrap();
    couple.repo().delete(request.id()).await.unwrap();

    let err = b
        .begin_respond(request.id(), AnswerKind::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, HeartlineError::NotFound(_)));
}

#[tokio::test]
async fn partial_clear_is_reported_and_not_rolled_back() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let flaky = Arc::new(FlakyStore::new(db.clone()));
    let store: Arc<dyn DocumentStore> = flaky.clone();
    let couple = Couple::with_store(db, store);

    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);
    for title in ["one", "two", "three"] {
        couple.messages(&couple.a).submit(grievance(title)).await.unwrap();
    }

    let request = a.request("need closure").await.unwrap();
    let draft = b.begin_respond(request.id(), AnswerKind::Accept).await.unwrap();
    let response = b.submit_respond(draft, "").await.unwrap();
    let confirmation = a.dismiss(response.id(), Dismissal::Proceed).await.unwrap().unwrap();

    flaky.fail_deletes_after(2);
    let err = a.confirm(confirmation).await.unwrap_err();
    assert!(matches!(
        err,
        HeartlineError::PartialFailure { deleted: 2, failed: 1 }
    ));
    assert_eq!(couple.all_for_pair().len(), 1);
}

#[tokio::test]
async fn clear_with_every_delete_failing_is_a_write_error() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let flaky = Arc::new(FlakyStore::new(db.clone()));
    let store: Arc<dyn DocumentStore> = flaky.clone();
    let couple = Couple::with_store(db, store);

    couple.messages(&couple.a).submit(grievance("one")).await.unwrap();

    flaky.fail_deletes_after(0);
    let err = couple.repo().delete_all_for_participant(A).await.unwrap_err();
    assert!(matches!(err, HeartlineError::Write(_)));
    assert_eq!(couple.all_for_pair().len(), 1);
}

#[tokio::test]
async fn close_ignores_delete_failures() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let flaky = Arc::new(FlakyStore::new(db.clone()));
    let store: Arc<dyn DocumentStore> = flaky.clone();
    let couple = Couple::with_store(db, store);

    let a = couple.protocol(&couple.a);
    let b = couple.protocol(&couple.b);
    let request = a.request("need closure").await.unwrap();
    let draft = b.begin_respond(request.id(), AnswerKind::Decline).await.unwrap();
    let response = b.submit_respond(draft, "no").await.unwrap();

    flaky.fail_deletes_after(0);
    assert!(a.dismiss(response.id(), Dismissal::Close).await.unwrap().is_none());
}

#[tokio::test]
async fn both_partners_clearing_at_once_is_harmless() {
    let couple = Couple::new();
    for title in ["one", "two", "three"] {
        couple.messages(&couple.a).submit(grievance(title)).await.unwrap();
    }
    for title in ["four", "five"] {
        couple.messages(&couple.b).submit(grievance(title)).await.unwrap();
    }
    couple.protocol(&couple.a).request("need closure").await.unwrap();
    assert_eq!(couple.all_for_pair().len(), 6);

    let repo_a = couple.repo();
    let repo_b = couple.repo();
    let (from_a, from_b) = tokio::join!(repo_a.purge(&[A, B]), repo_b.purge(&[B, A]));

    assert_eq!(from_a.failed, 0);
    assert_eq!(from_b.failed, 0);
    assert_eq!(from_a.deleted + from_b.deleted, 6);
    assert!(from_a.into_result().is_ok());
    assert!(from_b.into_result().is_ok());
    assert!(couple.all_for_pair().is_empty());
}
