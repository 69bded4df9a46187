use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use coach_api::middleware::{Claims, Role};
use coach_api::{app, metrics::Metrics, AppState, AuthConfig};
use coach_core::booking::{CustomerAccount, TripSchedule};
use coach_core::clock::ManualClock;
use coach_core::payment::{canonical_query, sign, PaymentConfig, VnPayGateway, SECURE_HASH};
use coach_store::app_config::BookingRules;
use coach_store::memory::{InMemoryBookingLedger, InMemorySeatLockStore};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

const JWT_SECRET: &str = "jwt-test-secret";
const VNPAY_SECRET: &str = "TESTSECRET";
const TRIP: i64 = 501;
const MEMBER: i64 = 42;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap()
}

struct Harness {
    router: Router,
    ledger: Arc<InMemoryBookingLedger>,
}

async fn harness() -> Harness {
    let ledger = Arc::new(InMemoryBookingLedger::new());
    let clock = Arc::new(ManualClock::new(start()));
    let locks = Arc::new(InMemorySeatLockStore::new(clock.clone()));
    let gateway = Arc::new(VnPayGateway::new(PaymentConfig {
        tmn_code: "TMNTEST1".into(),
        secret_key: VNPAY_SECRET.into(),
        gateway_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".into(),
        return_url: "http://localhost:5173/payment-result".into(),
        version: "2.1.0".into(),
        locale: "vn".into(),
        currency: "VND".into(),
        utc_offset_hours: 7,
    }));

    ledger
        .seed_trip(TripSchedule {
            trip_id: TRIP,
            departure_time: start() + Duration::hours(30),
            arrival_time: None,
        })
        .await;
    ledger
        .seed_customer(CustomerAccount {
            customer_id: MEMBER,
            full_name: "Lê Thị Hồng".into(),
            email: "hong@example.com".into(),
            phone: "0987654321".into(),
            bonus_points: 0,
        })
        .await;

    let state = AppState::new(
        ledger.clone(),
        locks,
        gateway,
        clock,
        BookingRules::default(),
        AuthConfig {
            secret: JWT_SECRET.into(),
        },
        Arc::new(Metrics::new().unwrap()),
    );
    Harness {
        router: app(state),
        ledger,
    }
}

fn token(role: Role, sub: i64) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        role,
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

impl Harness {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let code = resp
            .headers()
            .get("X-Error-Code")
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, code, body)
    }

    async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Option<String>, Value) {
        let mut req = Request::get(uri);
        if let Some(t) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::empty()).unwrap()).await
    }

    async fn post(
        &self,
        uri: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> (StatusCode, Option<String>, Value) {
        let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }
}

fn booking_body(session: &str, seats: &[(i64, &str)]) -> Value {
    json!({
        "customer_info": {
            "name": "Nguyen Van A",
            "email": "a@example.com",
            "phone": "0901234567"
        },
        "seats": seats
            .iter()
            .map(|(id, name)| json!({ "seat_id": id, "seat_name": name, "price": 250000 }))
            .collect::<Vec<_>>(),
        "trip_id": TRIP,
        "booking_session": session,
        "pickup_info": { "type": "office", "office_id": 1 },
        "dropoff_info": { "type": "shuttle", "point_name": "Nga tu Hang Xanh" }
    })
}

fn callback_body(booking_code: &str, amount: i64, response_code: &str) -> Value {
    let mut params: BTreeMap<String, String> = [
        ("vnp_Amount", (amount * 100).to_string()),
        ("vnp_ResponseCode", response_code.to_string()),
        ("vnp_TmnCode", "TMNTEST1".to_string()),
        ("vnp_TransactionNo", "14230001".to_string()),
        ("vnp_TxnRef", booking_code.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let signature = sign(&canonical_query(&params), VNPAY_SECRET).unwrap();
    params.insert(SECURE_HASH.into(), signature);
    json!({ "vnp_Params": params, "paymentMethod": "vnpay" })
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = harness().await;
    let (status, _, body) = h.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    h.post("/v1/bookings", booking_body("sess-m", &[(1, "A01")]), None)
        .await;
    let resp = h
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec())
        .unwrap();
    assert!(text.contains(r#"coach_bookings_total{result="created"} 1"#));
}

#[tokio::test]
async fn test_guest_booking_lifecycle_over_http() {
    let h = harness().await;

    let (status, _, receipt) = h
        .post("/v1/bookings", booking_body("sess-1", &[(1, "A01"), (2, "A02")]), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["booking_status"], "pending");
    assert_eq!(receipt["total_payment"], 500000);
    let code = receipt["booking_code"].as_str().unwrap().to_string();

    // Same session replays the same booking
    let (status, _, replay) = h
        .post("/v1/bookings", booking_body("sess-1", &[(1, "A01"), (2, "A02")]), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["booking_code"], code.as_str());
    assert_eq!(replay["replayed"], true);

    let (status, _, status_view) = h.get("/v1/bookings/session/sess-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_view["booking_code"], code.as_str());

    let (status, _, view) = h.get(&format!("/v1/bookings/{}", code), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["booking"]["booking_code"], code.as_str());
    assert_eq!(view["payable_amount"], 500000);

    let (status, _, url) = h
        .get(&format!("/v1/payments/vnpay/url?booking_code={}", code), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(url["amount"], 500000);
    assert!(url["payment_url"]
        .as_str()
        .unwrap()
        .starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));

    let (status, _, confirmation) = h
        .post("/v1/payments/vnpay/callback", callback_body(&code, 500_000, "00"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmation["booking_status"], "confirmed");
    assert_eq!(confirmation["payment_status"], "completed");

    let ticket_code = receipt["seats"][0]["ticket_code"].as_str().unwrap();
    let (status, _, ticket) = h
        .get(
            &format!("/v1/tickets/search?ticket_code={}&phone=0901234567", ticket_code),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["booking_code"], code.as_str());

    let (status, error_code, _) = h
        .get(
            &format!("/v1/tickets/search?ticket_code={}&phone=0900000000", ticket_code),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code.as_deref(), Some("TICKET_NOT_FOUND"));
}

#[tokio::test]
async fn test_taken_seat_renders_conflict_envelope() {
    let h = harness().await;
    h.post("/v1/bookings", booking_body("sess-1", &[(7, "B07")]), None)
        .await;

    let (status, error_code, body) = h
        .post("/v1/bookings", booking_body("sess-2", &[(7, "B07")]), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code.as_deref(), Some("UNAVAILABLE_SEATS"));
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "UNAVAILABLE_SEATS");
    assert_eq!(body["conflicts"][0]["seat_id"], 7);
    assert_eq!(body["conflicts"][0]["held_by"], "Nguyen Van A");
}

#[tokio::test]
async fn test_bad_input_is_rejected_with_codes() {
    let h = harness().await;

    let mut body = booking_body("sess-1", &[(1, "A01")]);
    body["customer_info"]["phone"] = json!("12345");
    let (status, error_code, payload) = h.post("/v1/bookings", body, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code.as_deref(), Some("INVALID_CUSTOMER_PHONE"));
    assert!(payload["suggestion"].is_string());

    let req = Request::post("/v1/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, error_code, _) = h.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code.as_deref(), Some("INVALID_REQUEST_BODY"));

    let (status, error_code, _) = h.get("/v1/payments/vnpay/url", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code.as_deref(), Some("MISSING_BOOKING_CODE"));

    let (status, error_code, _) = h
        .post("/v1/bookings/BOOK1/voucher", json!({}), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code.as_deref(), Some("MISSING_VOUCHER_CODE"));

    let (status, error_code, _) = h.get("/v1/bookings/BOOK404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code.as_deref(), Some("BOOKING_NOT_FOUND"));
}

#[tokio::test]
async fn test_tampered_callback_is_401() {
    let h = harness().await;
    let (_, _, receipt) = h
        .post("/v1/bookings", booking_body("sess-1", &[(1, "A01")]), None)
        .await;
    let code = receipt["booking_code"].as_str().unwrap();

    let mut forged = callback_body(code, 250_000, "00");
    forged["vnp_Params"]["vnp_Amount"] = json!("100");
    let (status, error_code, _) = h.post("/v1/payments/vnpay/callback", forged, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code.as_deref(), Some("INVALID_SIGNATURE"));

    let booking = h.ledger.booking(code).await.unwrap();
    assert!(!booking.is_paid());
}

#[tokio::test]
async fn test_declined_callback_reports_payment_failed() {
    let h = harness().await;
    let (_, _, receipt) = h
        .post("/v1/bookings", booking_body("sess-1", &[(1, "A01")]), None)
        .await;
    let code = receipt["booking_code"].as_str().unwrap();

    let (status, error_code, _) = h
        .post("/v1/payments/vnpay/callback", callback_body(code, 250_000, "24"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code.as_deref(), Some("PAYMENT_FAILED"));

    // Seat is free again
    let (status, _, _) = h
        .post("/v1/bookings", booking_body("sess-2", &[(1, "A01")]), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_customer_routes_need_customer_token() {
    let h = harness().await;
    let customer = token(Role::Customer, MEMBER);

    let mut body = booking_body("sess-m", &[(3, "A03")]);
    body["customer_info"] = json!({});
    let (status, _, receipt) = h.post("/v1/bookings", body, Some(&customer)).await;
    assert_eq!(status, StatusCode::CREATED);
    let code = receipt["booking_code"].as_str().unwrap();
    h.post("/v1/payments/vnpay/callback", callback_body(code, 250_000, "00"), None)
        .await;

    let (status, _, tickets) = h.get("/v1/customers/me/tickets", Some(&customer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tickets.as_array().unwrap().len(), 1);
    assert_eq!(tickets[0]["seat_name"], "A03");

    let (status, error_code, _) = h.get("/v1/customers/me/tickets", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code.as_deref(), Some("UNAUTHORIZED"));

    let (status, _, _) = h
        .get("/v1/customers/me/tickets", Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let staff = token(Role::Employee, 7);
    let (status, error_code, _) = h.get("/v1/customers/me/refunds", Some(&staff)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code.as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn test_refund_request_and_staff_approval() {
    let h = harness().await;
    let customer = token(Role::Customer, MEMBER);
    let staff = token(Role::Admin, 7);

    let mut body = booking_body("sess-m", &[(1, "A01")]);
    body["customer_info"] = json!({});
    let (_, _, receipt) = h.post("/v1/bookings", body, Some(&customer)).await;
    let code = receipt["booking_code"].as_str().unwrap();
    h.post("/v1/payments/vnpay/callback", callback_body(code, 250_000, "00"), None)
        .await;
    let ticket_code = receipt["seats"][0]["ticket_code"].as_str().unwrap();

    let (status, _, refund) = h
        .post(
            "/v1/refunds",
            json!({ "ticket_code": ticket_code, "phone": "0987654321" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(refund["refund_percentage"], 30);
    assert_eq!(refund["refund_amount"], 75000);
    assert_eq!(refund["is_approved"], false);
    let refund_id = refund["refund_id"].as_str().unwrap();

    let (status, error_code, _) = h
        .post(
            "/v1/refunds",
            json!({ "ticket_code": ticket_code, "phone": "0987654321" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code.as_deref(), Some("TICKET_ALREADY_REFUNDED"));

    let (status, _, mine) = h.get("/v1/customers/me/refunds", Some(&customer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine[0]["ticket_code"], ticket_code);

    let approve = format!("/v1/admin/refunds/{}/approve", refund_id);
    let (status, _, _) = h.post(&approve, json!({}), Some(&customer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, pending) = h.get("/v1/admin/refunds?filter=pending", Some(&staff)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, _, approved) = h.post(&approve, json!({}), Some(&staff)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["refund"]["is_approved"], true);
    assert_eq!(approved["refund"]["employee_id"], 7);

    let (status, error_code, _) = h.post(&approve, json!({}), Some(&staff)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code.as_deref(), Some("REFUND_ALREADY_APPROVED"));

    let (_, _, pending) = h.get("/v1/admin/refunds?filter=pending", Some(&staff)).await;
    assert!(pending.as_array().unwrap().is_empty());

    let (status, error_code, _) = h
        .post("/v1/admin/refunds/not-a-uuid/approve", json!({}), Some(&staff))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code.as_deref(), Some("INVALID_PATH"));
}

#[tokio::test]
async fn test_staff_issues_signup_voucher() {
    let h = harness().await;
    let staff = token(Role::Employee, 7);

    let (status, _, voucher) = h
        .post(
            &format!("/v1/admin/customers/{}/signup-voucher", MEMBER),
            json!({}),
            Some(&staff),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(voucher["voucher_code"]
        .as_str()
        .unwrap()
        .starts_with("01032026_LETHIHONG_"));
    assert_eq!(voucher["discount_percentage"], 15);

    let (status, error_code, _) = h
        .post("/v1/admin/customers/999/signup-voucher", json!({}), Some(&staff))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code.as_deref(), Some("CUSTOMER_NOT_FOUND"));
}
