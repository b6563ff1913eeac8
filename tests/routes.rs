use actix_web::http::{header::AUTHORIZATION, StatusCode};
use actix_web::{test, web, App};
use rust_decimal::Decimal;
use serde_json::json;
use splitledger::auth::SessionKey;
use splitledger::balance::SettlementEngine;
use splitledger::config::SplitPolicyKind;
use splitledger::routes::{self, Engine};
use splitledger::schemas::{Expense, Group};
use splitledger::store::{MemoryStore, Store};
use std::collections::BTreeMap;
use std::sync::Arc;

macro_rules! app {
    ($key:expr, $policy:expr) => {{
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let engine: Engine = SettlementEngine::with_policy($policy.into_policy());
        test::init_service(
            App::new()
                .app_data(web::Data::from(store))
                .app_data(web::Data::new(engine))
                .app_data(web::Data::new($key.clone()))
                .configure(routes::configure),
        )
        .await
    }};
    ($key:expr) => {
        app!($key, SplitPolicyKind::Equal)
    };
}

fn as_member(request: test::TestRequest, key: &SessionKey, member: &str) -> test::TestRequest {
    request.insert_header((AUTHORIZATION, key.sign(member)))
}

fn balances(pairs: &[(&str, i64)]) -> BTreeMap<String, Decimal> {
    pairs
        .iter()
        .map(|(member, cents)| (member.to_string(), Decimal::new(*cents, 2)))
        .collect()
}

#[actix_web::test]
async fn group_settlement_flow() {
    let key = SessionKey::new("test-secret");
    let app = app!(key);

    for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
        let request = as_member(
            test::TestRequest::put().uri(&format!("/members/{id}")),
            &key,
            id,
        )
        .set_json(json!({ "name": name }))
        .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);
    }

    let request = as_member(test::TestRequest::post().uri("/groups"), &key, "alice")
        .set_json(json!({ "name": "Trip" }))
        .to_request();
    let group: Group = test::call_and_read_body_json(&app, request).await;
    assert!(group.is_member("alice"));

    for member in ["bob", "carol", "carol"] {
        let code = format!("  {}  ", group.join_code.to_lowercase());
        let request = as_member(test::TestRequest::post().uri("/groups/join"), &key, member)
            .set_json(json!({ "join_code": code }))
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);
    }

    let request = as_member(test::TestRequest::post().uri("/expenses"), &key, "alice")
        .set_json(json!({ "title": "Dinner", "amount": "30", "group_id": group.id }))
        .to_request();
    let dinner: Expense = test::call_and_read_body_json(&app, request).await;
    assert_eq!(dinner.group(), Some(&group.id));

    let balance_uri = format!("/groups/{}/balance", group.id);
    let request = as_member(test::TestRequest::get().uri(&balance_uri), &key, "bob").to_request();
    let current: BTreeMap<String, Decimal> = test::call_and_read_body_json(&app, request).await;
    assert_eq!(
        current,
        balances(&[("alice", 2000), ("bob", -1000), ("carol", -1000)])
    );

    for _ in 0..2 {
        let request = as_member(
            test::TestRequest::post().uri(&format!("/expenses/{}/pay", dinner.id)),
            &key,
            "bob",
        )
        .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);
    }

    let request = as_member(test::TestRequest::get().uri(&balance_uri), &key, "carol").to_request();
    let current: BTreeMap<String, Decimal> = test::call_and_read_body_json(&app, request).await;
    assert_eq!(
        current,
        balances(&[("alice", 1000), ("bob", 0), ("carol", -1000)])
    );

    let request = as_member(
        test::TestRequest::get().uri(&format!("/groups/{}/exchanges", group.id)),
        &key,
        "alice",
    )
    .to_request();
    let exchanges: serde_json::Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(
        exchanges,
        json!([{ "payer": "carol", "receiver": "alice", "amount": "10.00" }])
    );

    let request = as_member(
        test::TestRequest::get().uri(&format!("/groups/{}", group.id)),
        &key,
        "alice",
    )
    .to_request();
    let detail: serde_json::Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(detail["members"].as_array().map(Vec::len), Some(3));
    assert_eq!(detail["balances"]["carol"], "-10.00");

    let request = as_member(
        test::TestRequest::post().uri(&format!("/expenses/{}/unpay", dinner.id)),
        &key,
        "bob",
    )
    .to_request();
    assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);

    let request = as_member(test::TestRequest::get().uri(&balance_uri), &key, "bob").to_request();
    let current: BTreeMap<String, Decimal> = test::call_and_read_body_json(&app, request).await;
    assert_eq!(
        current,
        balances(&[("alice", 2000), ("bob", -1000), ("carol", -1000)])
    );
}

#[actix_web::test]
async fn only_members_and_payers_may_act() {
    let key = SessionKey::new("test-secret");
    let app = app!(key);

    let request = as_member(test::TestRequest::post().uri("/groups"), &key, "alice")
        .set_json(json!({ "name": "Flat" }))
        .to_request();
    let group: Group = test::call_and_read_body_json(&app, request).await;

    let request = as_member(test::TestRequest::post().uri("/expenses"), &key, "alice")
        .set_json(json!({ "title": "Rent", "amount": "900", "group_id": group.id }))
        .to_request();
    let rent: Expense = test::call_and_read_body_json(&app, request).await;

    let request = test::TestRequest::get().uri("/groups").to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let request = test::TestRequest::get()
        .uri("/groups")
        .insert_header((AUTHORIZATION, "alice:00"))
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let request = as_member(
        test::TestRequest::get().uri(&format!("/groups/{}/balance", group.id)),
        &key,
        "mallory",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = as_member(test::TestRequest::post().uri("/expenses"), &key, "mallory")
        .set_json(json!({ "title": "Sneaky", "amount": "1", "group_id": group.id }))
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = as_member(
        test::TestRequest::put().uri(&format!("/expenses/{}", rent.id)),
        &key,
        "mallory",
    )
    .set_json(json!({ "amount": "1" }))
    .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = as_member(
        test::TestRequest::post().uri(&format!("/expenses/{}/unpay", rent.id)),
        &key,
        "mallory",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = as_member(test::TestRequest::put().uri("/members/alice"), &key, "mallory")
        .set_json(json!({ "name": "Not Alice" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = test::TestRequest::put()
        .uri("/members/alice")
        .set_json(json!({ "name": "Not Alice" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let request = as_member(
        test::TestRequest::post().uri(&format!("/expenses/{}/pay", rent.id)),
        &key,
        "alice",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::BAD_REQUEST
    );

    let request = as_member(
        test::TestRequest::put().uri(&format!("/expenses/{}", rent.id)),
        &key,
        "alice",
    )
    .set_json(json!({ "amount": "950.50", "title": "Rent (March)" }))
    .to_request();
    let edited: Expense = test::call_and_read_body_json(&app, request).await;
    assert_eq!(edited.amount, Decimal::new(95050, 2));
    assert_eq!(edited.title, "Rent (March)");

    let request = as_member(
        test::TestRequest::delete().uri(&format!("/expenses/{}", rent.id)),
        &key,
        "alice",
    )
    .to_request();
    assert_eq!(test::call_service(&app, request).await.status(), StatusCode::OK);

    let request = as_member(
        test::TestRequest::delete().uri(&format!("/expenses/{}", rent.id)),
        &key,
        "alice",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_web::test]
async fn invalid_expenses_are_rejected() {
    let key = SessionKey::new("test-secret");
    let app = app!(key);

    for body in [
        json!({ "title": "Free lunch", "amount": "0" }),
        json!({ "title": "Refund", "amount": "-5" }),
        json!({ "title": "  ", "amount": "5" }),
    ] {
        let request = as_member(test::TestRequest::post().uri("/expenses"), &key, "alice")
            .set_json(body)
            .to_request();
        assert_eq!(
            test::call_service(&app, request).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    let request = as_member(test::TestRequest::post().uri("/groups/join"), &key, "alice")
        .set_json(json!({ "join_code": "NOPE00" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_web::test]
async fn personal_expenses_stay_out_of_groups() {
    let key = SessionKey::new("test-secret");
    let app = app!(key);

    let request = as_member(test::TestRequest::post().uri("/groups"), &key, "alice")
        .set_json(json!({ "name": "Trip" }))
        .to_request();
    let group: Group = test::call_and_read_body_json(&app, request).await;

    for body in [
        json!({ "title": "Coffee", "amount": "3.50", "category": "food" }),
        json!({ "title": "Cinema", "amount": "12", "category": "fun" }),
        json!({ "title": "Fuel", "amount": "60", "group_id": group.id }),
    ] {
        let request = as_member(test::TestRequest::post().uri("/expenses"), &key, "alice")
            .set_json(body)
            .to_request();
        assert_eq!(
            test::call_service(&app, request).await.status(),
            StatusCode::CREATED
        );
    }

    let request = as_member(test::TestRequest::get().uri("/expenses"), &key, "alice").to_request();
    let listing: serde_json::Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(listing["expenses"].as_array().map(Vec::len), Some(2));
    assert_eq!(listing["total"], "15.50");

    let request = as_member(
        test::TestRequest::get().uri("/expenses?category=food&search=COF"),
        &key,
        "alice",
    )
    .to_request();
    let listing: serde_json::Value = test::call_and_read_body_json(&app, request).await;
    assert_eq!(listing["expenses"][0]["title"], "Coffee");
    assert_eq!(listing["total"], "3.50");

    let request = as_member(
        test::TestRequest::get().uri(&format!("/groups/{}/balance", group.id)),
        &key,
        "alice",
    )
    .to_request();
    let current: BTreeMap<String, Decimal> = test::call_and_read_body_json(&app, request).await;
    assert_eq!(current, balances(&[("alice", 0)]));
}

#[actix_web::test]
async fn recorded_share_leaves_late_joiners_out() {
    let key = SessionKey::new("test-secret");
    let app = app!(key, SplitPolicyKind::Recorded);

    let request = as_member(test::TestRequest::post().uri("/groups"), &key, "alice")
        .set_json(json!({ "name": "Trip" }))
        .to_request();
    let group: Group = test::call_and_read_body_json(&app, request).await;

    let join = |member: &str| {
        as_member(test::TestRequest::post().uri("/groups/join"), &key, member)
            .set_json(json!({ "join_code": group.join_code }))
            .to_request()
    };
    test::call_service(&app, join("bob")).await;

    let request = as_member(test::TestRequest::post().uri("/expenses"), &key, "alice")
        .set_json(json!({ "title": "Hotel", "amount": "100", "group_id": group.id }))
        .to_request();
    let hotel: Expense = test::call_and_read_body_json(&app, request).await;

    test::call_service(&app, join("carol")).await;

    let request = as_member(
        test::TestRequest::post().uri(&format!("/expenses/{}/pay", hotel.id)),
        &key,
        "carol",
    )
    .to_request();
    assert_eq!(
        test::call_service(&app, request).await.status(),
        StatusCode::FORBIDDEN
    );

    let request = as_member(
        test::TestRequest::get().uri(&format!("/groups/{}/balance", group.id)),
        &key,
        "carol",
    )
    .to_request();
    let current: BTreeMap<String, Decimal> = test::call_and_read_body_json(&app, request).await;
    assert_eq!(
        current,
        balances(&[("alice", 5000), ("bob", -5000), ("carol", 0)])
    );
}
