//! 中继链路集成测试
//!
//! 在本地随机端口启动模拟的远端 RPC 接口和 Webhook 接收端，
//! 用真实的 reqwest 实现跑完整条链路（宿主库使用内存实现）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Form, Router,
    extract::{Query, State},
    http::{StatusCode, Uri},
    routing::post,
};
use badge_relay_service::{
    DispatchSettings, RelayDispatcher, RelayError, RelayEvent,
    directory::RelayDirectory,
    events::{BadgeAwardedEvent, BadgeCreatedEvent, CourseCreatedEvent, CourseCreatedOther},
    fetcher::RpcBadgeFetcher,
    models::{BadgeDefinition, Course, RelayUser},
    publisher::HttpWebhookPublisher,
};
use badge_shared::config::{DeliveryMode, RelayConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

// ==================== 内存宿主库 ====================

#[derive(Default)]
struct InMemoryDirectory {
    users: HashMap<i64, RelayUser>,
    courses: HashMap<i64, Course>,
    badges: HashMap<i64, BadgeDefinition>,
}

#[async_trait]
impl RelayDirectory for InMemoryDirectory {
    async fn find_user(&self, user_id: i64) -> badge_shared::error::Result<Option<RelayUser>> {
        Ok(self.users.get(&user_id).cloned())
    }

    async fn find_course(&self, course_id: i64) -> badge_shared::error::Result<Option<Course>> {
        Ok(self.courses.get(&course_id).cloned())
    }

    async fn find_badge(
        &self,
        badge_id: i64,
    ) -> badge_shared::error::Result<Option<BadgeDefinition>> {
        Ok(self.badges.get(&badge_id).cloned())
    }
}

fn seeded_directory() -> InMemoryDirectory {
    let mut directory = InMemoryDirectory::default();
    directory.users.insert(
        8,
        RelayUser {
            id: 8,
            username: "alice".to_string(),
        },
    );
    directory.courses.insert(
        5,
        Course {
            id: 5,
            fullname: "Intro to Testing".to_string(),
        },
    );
    directory.badges.insert(
        6,
        BadgeDefinition {
            id: 6,
            name: "Explorer".to_string(),
            courseid: Some(5),
            expiredate: None,
        },
    );
    directory
}

// ==================== 模拟远端 RPC ====================

type RpcCall = (HashMap<String, String>, HashMap<String, String>);

#[derive(Clone)]
struct RpcStub {
    status: StatusCode,
    body: String,
    delay: Duration,
    calls: Arc<Mutex<Vec<RpcCall>>>,
}

async fn rpc_handler(
    State(stub): State<RpcStub>,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    stub.calls.lock().await.push((query, form));
    tokio::time::sleep(stub.delay).await;
    (stub.status, stub.body.clone())
}

// ==================== 模拟 Webhook 接收端 ====================

#[derive(Debug, Clone)]
struct CapturedRequest {
    uri: Uri,
    body: String,
}

#[derive(Clone)]
struct WebhookStub {
    status: StatusCode,
    delay: Duration,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

async fn webhook_handler(State(stub): State<WebhookStub>, uri: Uri, body: String) -> StatusCode {
    stub.requests.lock().await.push(CapturedRequest { uri, body });
    tokio::time::sleep(stub.delay).await;
    stub.status
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

// ==================== 测试装配 ====================

struct Harness {
    dispatcher: RelayDispatcher,
    rpc_calls: Arc<Mutex<Vec<RpcCall>>>,
    webhook_requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

struct Scenario {
    rpc_status: StatusCode,
    rpc_body: String,
    rpc_delay: Duration,
    webhook_status: StatusCode,
    webhook_delay: Duration,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            rpc_status: StatusCode::OK,
            rpc_body: json!({"badges": [], "warnings": []}).to_string(),
            rpc_delay: Duration::ZERO,
            webhook_status: StatusCode::OK,
            webhook_delay: Duration::ZERO,
        }
    }
}

async fn harness(scenario: Scenario, configure: impl FnOnce(&mut RelayConfig)) -> Harness {
    let rpc_calls = Arc::new(Mutex::new(Vec::new()));
    let rpc_addr = serve(
        Router::new()
            .route("/webservice/rest/server.php", post(rpc_handler))
            .with_state(RpcStub {
                status: scenario.rpc_status,
                body: scenario.rpc_body,
                delay: scenario.rpc_delay,
                calls: rpc_calls.clone(),
            }),
    )
    .await;

    let webhook_requests = Arc::new(Mutex::new(Vec::new()));
    let webhook_addr = serve(
        Router::new()
            .route("/callMoodleHook", post(webhook_handler))
            .with_state(WebhookStub {
                status: scenario.webhook_status,
                delay: scenario.webhook_delay,
                requests: webhook_requests.clone(),
            }),
    )
    .await;

    let mut config = RelayConfig {
        target_moodle: rpc_addr,
        token: "secret-token".to_string(),
        target_post: format!("http://{webhook_addr}/callMoodleHook?pTest="),
        public_base_url: "http://moodle.example.org".to_string(),
        request_timeout_seconds: 5,
        ..Default::default()
    };
    configure(&mut config);
    config.validate().unwrap();

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .unwrap();

    let dispatcher = RelayDispatcher::new(
        Arc::new(RpcBadgeFetcher::new(client.clone(), &config)),
        Arc::new(HttpWebhookPublisher::new(client, &config)),
        Arc::new(seeded_directory()),
        DispatchSettings::from_config(&config),
    );

    Harness {
        dispatcher,
        rpc_calls,
        webhook_requests,
    }
}

fn awarded(user_id: i64) -> RelayEvent {
    RelayEvent::BadgeAwarded(BadgeAwardedEvent {
        event_id: Some("evt-it".to_string()),
        relateduserid: user_id,
        objectid: Some(1),
        courseid: Some(5),
    })
}

/// 接收端视角：取出查询参数，补回括号后解析
fn decode_param(uri: &Uri, param: &str) -> String {
    let query = uri.query().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == param)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| panic!("missing query param {param} in {uri}"))
}

fn rebracket(decoded: &str) -> Vec<Value> {
    serde_json::from_str(&format!("[{decoded}]")).unwrap()
}

// ==================== 测试用例 ====================

#[tokio::test]
async fn test_badge_awarded_end_to_end() {
    let scenario = Scenario {
        rpc_body: json!({
            "badges": [{
                "id": 1, "courseid": 5, "expiredate": 0, "name": "Gold",
                "badgeurl": "http://h/webservice/x.png",
                "description": "ignored", "issuername": "Uni"
            }],
            "warnings": []
        })
        .to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |_| {}).await;

    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    assert!(report.published);
    assert_eq!(report.status, Some(200));
    assert_eq!(report.records, 1);

    let calls = h.rpc_calls.lock().await;
    assert_eq!(calls.len(), 1);
    let (query, form) = &calls[0];
    assert_eq!(query["userid"], "8");
    assert_eq!(query["moodlewsrestformat"], "json");
    assert_eq!(form["wsfunction"], "core_badges_get_user_badges");
    assert_eq!(form["wstoken"], "secret-token");

    let requests = h.webhook_requests.lock().await;
    assert_eq!(requests.len(), 1);
    let decoded = decode_param(&requests[0].uri, "pTest");
    assert_eq!(
        decoded,
        r#"{"id":1,"courseid":5,"expiredate":0,"name":"Gold","userid":8,"username":"alice","image_url":"http://h/x.png","course":"Intro to Testing"}"#
    );
    assert!(requests[0].body.is_empty());
}

#[tokio::test]
async fn test_multiple_badges_round_trip_in_order() {
    let badges: Vec<Value> = (1..=4)
        .map(|i| {
            json!({
                "id": i,
                "courseid": if i % 2 == 0 { Value::Null } else { json!(5) },
                "expiredate": 0,
                "name": format!("Badge & Co {i}"),
                "badgeurl": format!("http://h/webservice/pluginfile.php/1/badges/badgeimage/{i}/f1")
            })
        })
        .collect();
    let scenario = Scenario {
        rpc_body: json!({"badges": badges, "warnings": []}).to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |_| {}).await;

    h.dispatcher.dispatch(awarded(8)).await.unwrap();

    let requests = h.webhook_requests.lock().await;
    let records = rebracket(&decode_param(&requests[0].uri, "pTest"));
    assert_eq!(records.len(), 4);
    for (i, record) in records.iter().enumerate() {
        let id = i as i64 + 1;
        assert_eq!(record["id"], id);
        assert_eq!(record["name"], format!("Badge & Co {id}"));
        assert!(!record["image_url"].as_str().unwrap().contains("/webservice"));
        if id % 2 == 0 {
            assert!(record["course"].is_null());
        } else {
            assert_eq!(record["course"], "Intro to Testing");
        }
    }
}

#[tokio::test]
async fn test_missing_course_uses_placeholder() {
    let scenario = Scenario {
        rpc_body: json!({
            "badges": [
                {"id": 1, "courseid": 404, "expiredate": 0, "name": "Lost", "badgeurl": "u"},
                {"id": 2, "courseid": 5, "expiredate": 0, "name": "Found", "badgeurl": "u"}
            ]
        })
        .to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |c| c.course_placeholder = "n/a".to_string()).await;

    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    assert_eq!(report.course_fallbacks, 1);

    let requests = h.webhook_requests.lock().await;
    let records = rebracket(&decode_param(&requests[0].uri, "pTest"));
    assert_eq!(records[0]["course"], "n/a");
    assert_eq!(records[1]["course"], "Intro to Testing");
}

#[tokio::test]
async fn test_empty_badge_list_still_publishes() {
    let h = harness(Scenario::default(), |_| {}).await;

    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    assert_eq!(report.records, 0);

    let requests = h.webhook_requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(decode_param(&requests[0].uri, "pTest"), "");
}

#[tokio::test]
async fn test_rpc_error_status_aborts_event() {
    let scenario = Scenario {
        rpc_status: StatusCode::INTERNAL_SERVER_ERROR,
        rpc_body: "boom".to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |_| {}).await;

    let err = h.dispatcher.dispatch(awarded(8)).await.unwrap_err();
    assert!(matches!(err, RelayError::FetchFailed { user_id: 8, .. }));
    assert!(h.webhook_requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_rpc_exception_document_aborts_event() {
    let scenario = Scenario {
        rpc_body: json!({
            "exception": "moodle_exception",
            "errorcode": "invalidtoken",
            "message": "Invalid token - token not found"
        })
        .to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |_| {}).await;

    let err = h.dispatcher.dispatch(awarded(8)).await.unwrap_err();
    assert_eq!(err.error_code(), "FETCH_FAILED");
    assert!(h.webhook_requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_rpc_invalid_json_aborts_event() {
    let scenario = Scenario {
        rpc_body: "<html>maintenance</html>".to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |_| {}).await;

    let err = h.dispatcher.dispatch(awarded(8)).await.unwrap_err();
    assert!(matches!(err, RelayError::FetchFailed { .. }));
    assert!(h.webhook_requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_rpc_aborts_event() {
    let h = harness(Scenario::default(), |c| {
        // 端口 1 上没有服务
        c.target_moodle = "127.0.0.1:1".to_string();
    })
    .await;

    let err = h.dispatcher.dispatch(awarded(8)).await.unwrap_err();
    assert!(matches!(err, RelayError::FetchFailed { .. }));
}

#[tokio::test]
async fn test_webhook_non_2xx_is_reported_once() {
    let scenario = Scenario {
        webhook_status: StatusCode::INTERNAL_SERVER_ERROR,
        ..Default::default()
    };
    let h = harness(scenario, |_| {}).await;

    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    assert!(!report.published);
    assert_eq!(report.status, Some(500));
    assert!(report.error.is_some());
    assert_eq!(h.webhook_requests.lock().await.len(), 1);
}

#[tokio::test]
async fn test_publish_retries_when_configured() {
    let scenario = Scenario {
        webhook_status: StatusCode::SERVICE_UNAVAILABLE,
        ..Default::default()
    };
    let h = harness(scenario, |c| c.publish_max_retries = 1).await;

    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    assert_eq!(report.status, Some(503));
    assert_eq!(h.webhook_requests.lock().await.len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let scenario = Scenario {
        webhook_status: StatusCode::BAD_REQUEST,
        ..Default::default()
    };
    let h = harness(scenario, |c| c.publish_max_retries = 3).await;

    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    assert_eq!(report.status, Some(400));
    assert_eq!(h.webhook_requests.lock().await.len(), 1);
}

#[tokio::test]
async fn test_query_param_delivery() {
    let h = harness(Scenario::default(), |c| {
        c.target_post = c.target_post.trim_end_matches("?pTest=").to_string();
        c.delivery = DeliveryMode::QueryParam;
    })
    .await;

    let event = RelayEvent::CourseCreated(CourseCreatedEvent {
        event_id: None,
        courseid: 12,
        other: CourseCreatedOther {
            fullname: "Algebra I".to_string(),
        },
    });
    h.dispatcher.dispatch(event).await.unwrap();

    let requests = h.webhook_requests.lock().await;
    assert_eq!(requests[0].uri.path(), "/callMoodleHook");
    let records = rebracket(&decode_param(&requests[0].uri, "pTest"));
    assert_eq!(
        records,
        vec![json!({"event": "course_created", "coursename": "Algebra I", "course_id": 12})]
    );
}

#[tokio::test]
async fn test_json_body_delivery() {
    let scenario = Scenario {
        rpc_body: json!({
            "badges": [{"id": 1, "courseid": 5, "expiredate": 0, "name": "Gold", "badgeurl": "u"}]
        })
        .to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |c| {
        c.target_post = c.target_post.trim_end_matches("?pTest=").to_string();
        c.delivery = DeliveryMode::JsonBody;
        c.attach_payload = true;
    })
    .await;

    h.dispatcher.dispatch(awarded(8)).await.unwrap();

    let requests = h.webhook_requests.lock().await;
    assert!(requests[0].uri.query().is_none());
    let body: Vec<Value> = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0]["username"], "alice");
}

#[tokio::test]
async fn test_attach_payload_sends_raw_document() {
    let document = json!({
        "badges": [{"id": 1, "courseid": 5, "expiredate": 0, "name": "Gold", "badgeurl": "u"}],
        "warnings": []
    });
    let scenario = Scenario {
        rpc_body: document.to_string(),
        ..Default::default()
    };
    let h = harness(scenario, |c| c.attach_payload = true).await;

    h.dispatcher.dispatch(awarded(8)).await.unwrap();

    let requests = h.webhook_requests.lock().await;
    let form: HashMap<String, String> = url::form_urlencoded::parse(requests[0].body.as_bytes())
        .into_owned()
        .collect();
    let attached: Value = serde_json::from_str(&form["json"]).unwrap();
    assert_eq!(attached, document);
}

#[tokio::test]
async fn test_badge_created_end_to_end() {
    let h = harness(Scenario::default(), |_| {}).await;

    let event = RelayEvent::BadgeCreated(BadgeCreatedEvent {
        event_id: Some("evt-bc".to_string()),
        objectid: 6,
        contextid: 14,
    });
    let report = h.dispatcher.dispatch(event).await.unwrap();
    assert!(report.published);

    // 不经过远端 RPC
    assert!(h.rpc_calls.lock().await.is_empty());

    let requests = h.webhook_requests.lock().await;
    let records = rebracket(&decode_param(&requests[0].uri, "pTest"));
    assert_eq!(
        records[0],
        json!({
            "event": "badge_created",
            "id": 6,
            "name": "Explorer",
            "courseid": 5,
            "expiredate": null,
            "badgeurl": "http://moodle.example.org/pluginfile.php/14/badges/badgeimage/6/f1"
        })
    );
}

#[tokio::test]
async fn test_unknown_user_never_calls_rpc() {
    let h = harness(Scenario::default(), |_| {}).await;

    let err = h.dispatcher.dispatch(awarded(404)).await.unwrap_err();
    assert!(matches!(err, RelayError::UserNotFound { user_id: 404 }));
    assert!(h.rpc_calls.lock().await.is_empty());
    assert!(h.webhook_requests.lock().await.is_empty());
}

// ==================== 外呼超时 ====================

#[tokio::test]
async fn test_slow_rpc_times_out_as_fetch_failure() {
    let scenario = Scenario {
        rpc_delay: Duration::from_secs(10),
        ..Default::default()
    };
    let h = harness(scenario, |c| c.request_timeout_seconds = 1).await;

    let started = Instant::now();
    let err = h.dispatcher.dispatch(awarded(8)).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        RelayError::FetchFailed { user_id, reason } => {
            assert_eq!(user_id, 8);
            assert!(reason.starts_with("请求超时"), "{reason}");
        }
        other => panic!("expected FetchFailed, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert!(h.webhook_requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_slow_webhook_reported_without_status() {
    let scenario = Scenario {
        webhook_delay: Duration::from_secs(10),
        ..Default::default()
    };
    let h = harness(scenario, |c| c.request_timeout_seconds = 1).await;

    let started = Instant::now();
    let report = h.dispatcher.dispatch(awarded(8)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(!report.published);
    assert_eq!(report.status, None);
    assert!(report.error.as_deref().unwrap().contains("请求超时"));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    assert_eq!(h.webhook_requests.lock().await.len(), 1);
}
