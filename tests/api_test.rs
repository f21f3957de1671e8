use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use webhook_inspector::{http_server, AppState, Config};

async fn spawn_app() -> String {
    spawn_with(Config::default()).await
}

async fn spawn_with(config: Config) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = http_server::router(AppState::from_config(&config), config.max_body_bytes);
    tokio::spawn(http_server::serve(listener, app, std::future::pending()));
    format!("http://{addr}")
}

async fn create(client: &Client, base: &str, body: Value) -> Value {
    let resp = client
        .post(format!("{base}/api/webhooks"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

async fn get_json(client: &Client, url: String) -> (StatusCode, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn capture_browse_delete_and_evict() {
    let base = spawn_app().await;
    let client = Client::new();

    let orders = create(&client, &base, json!({ "name": "orders" })).await;
    assert_eq!(orders["internalId"], json!(1));
    assert_eq!(orders["active"], json!(true));
    let public_id = orders["publicId"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/w/{public_id}"))
        .json(&json!({ "a": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["success"], json!(true));
    assert_eq!(ack["eventId"], json!(1));
    assert_eq!(ack["webhook"], json!("orders"));

    let (status, listing) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], json!(1));
    let event = &listing["events"][0];
    assert_eq!(event["method"], json!("POST"));
    assert_eq!(event["body"], json!({ "a": 1 }));
    assert_eq!(event["rawBody"], json!(r#"{"a":1}"#));
    assert_eq!(event["bodyEncoding"], json!("json"));
    assert!(event["sourceAddress"].as_str().unwrap().starts_with("127.0.0.1:"));

    let resp = client
        .delete(format!("{base}/api/webhooks/1/events/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let (_, listing) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    assert_eq!(listing["events"], json!([]));

    let billing = create(&client, &base, json!({ "name": "billing" })).await;
    assert_eq!(billing["internalId"], json!(2));
    assert_ne!(billing["publicId"], orders["publicId"]);

    let mut first_id = None;
    for i in 0..101 {
        let ack: Value = client
            .post(format!("{base}/w/{public_id}"))
            .json(&json!({ "n": i }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        first_id.get_or_insert(ack["eventId"].as_u64().unwrap());
    }

    let (_, listing) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    let events = listing["events"].as_array().unwrap();
    assert_eq!(events.len(), 100);
    assert_eq!(events[0]["body"], json!({ "n": 100 }));
    assert_eq!(events[99]["body"], json!({ "n": 1 }));
    let ids: Vec<u64> = events.iter().map(|e| e["id"].as_u64().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] > w[1]));
    assert!(!ids.contains(&first_id.unwrap()));
}

#[tokio::test]
async fn unknown_public_id_is_404_without_side_effects() {
    let base = spawn_app().await;
    let client = Client::new();
    create(&client, &base, json!({ "name": "orders" })).await;

    let resp = client
        .post(format!("{base}/w/not-a-real-id"))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_, stats) = get_json(&client, format!("{base}/api/stats")).await;
    assert_eq!(stats["totalEvents"], json!(0));
    assert_eq!(stats["totalWebhooks"], json!(1));
}

#[tokio::test]
async fn inactive_webhook_is_403_but_still_readable() {
    let base = spawn_app().await;
    let client = Client::new();
    let wh = create(&client, &base, json!({ "name": "paused" })).await;
    let public_id = wh["publicId"].as_str().unwrap();

    let resp = client
        .put(format!("{base}/api/webhooks/1"))
        .json(&json!({ "active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["active"], json!(false));
    assert_eq!(updated["name"], json!("paused"));
    assert!(updated["updatedAt"].is_string());

    let resp = client
        .post(format!("{base}/w/{public_id}"))
        .body("ignored")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let (status, listing) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], json!(0));

    let (_, stats) = get_json(&client, format!("{base}/api/stats")).await;
    assert_eq!(stats["inactiveWebhooks"], json!(1));
    assert_eq!(stats["activeWebhooks"], json!(0));
}

#[tokio::test]
async fn create_requires_a_name() {
    let base = spawn_app().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/api/webhooks"))
        .json(&json!({ "description": "no name" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("name"));

    let resp = client
        .post(format!("{base}/api/webhooks"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let (_, listing) = get_json(&client, format!("{base}/api/webhooks")).await;
    assert_eq!(listing["total"], json!(0));
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let base = spawn_app().await;
    let client = Client::new();

    let (status, _) = get_json(&client, format!("{base}/api/webhooks/9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let resp = client
        .put(format!("{base}/api/webhooks/9"))
        .json(&json!({ "name": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = client
        .delete(format!("{base}/api/webhooks/9"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    create(&client, &base, json!({ "name": "orders" })).await;
    let (status, _) = get_json(&client, format!("{base}/api/webhooks/1/events/5")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let resp = client
        .delete(format!("{base}/api/webhooks/1/events/5"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let (status, _) = get_json(&client, format!("{base}/api/webhooks/2/stream")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_webhook_discards_its_events() {
    let base = spawn_app().await;
    let client = Client::new();
    let wh = create(&client, &base, json!({ "name": "orders" })).await;
    let public_id = wh["publicId"].as_str().unwrap();

    for _ in 0..3 {
        client
            .post(format!("{base}/w/{public_id}"))
            .body("x")
            .send()
            .await
            .unwrap();
    }

    let resp = client
        .delete(format!("{base}/api/webhooks/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = get_json(&client, format!("{base}/api/webhooks/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let resp = client
        .post(format!("{base}/w/{public_id}"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_, stats) = get_json(&client, format!("{base}/api/stats")).await;
    assert_eq!(stats["totalEvents"], json!(0));
}

#[tokio::test]
async fn any_method_subpath_and_payload_is_captured() {
    let base = spawn_app().await;
    let client = Client::new();
    let wh = create(&client, &base, json!({ "name": "misc", "application": "crm" })).await;
    let public_id = wh["publicId"].as_str().unwrap();

    let resp = client
        .patch(format!("{base}/w/{public_id}/github/push?tag=a&tag=b&page=2"))
        .header("content-type", "text/plain")
        .header("x-custom", "yes")
        .body("plain words")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .post(format!("{base}/w/{public_id}"))
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .put(format!("{base}/w/{public_id}"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("a=1&b=2")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, listing) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    let events = listing["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);

    let form = &events[0];
    assert_eq!(form["method"], json!("PUT"));
    assert_eq!(form["bodyEncoding"], json!("form"));
    assert_eq!(form["body"], json!({ "a": "1", "b": "2" }));

    let broken = &events[1];
    assert_eq!(broken["bodyEncoding"], json!("text"));
    assert_eq!(broken["body"], json!("{broken"));
    assert_eq!(broken["rawBody"], json!("{broken"));

    let text = &events[2];
    assert_eq!(text["method"], json!("PATCH"));
    assert_eq!(text["path"], json!(format!("/w/{public_id}/github/push")));
    assert_eq!(text["query"], json!({ "tag": ["a", "b"], "page": "2" }));
    assert_eq!(text["headers"]["x-custom"], json!("yes"));
    assert_eq!(text["body"], json!("plain words"));
    assert_eq!(text["bodySize"], json!(11));

    let id = text["id"].as_u64().unwrap();
    let (status, single) = get_json(&client, format!("{base}/api/webhooks/1/events/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["id"], json!(id));

    let resp = client
        .delete(format!("{base}/api/webhooks/1/events"))
        .send()
        .await
        .unwrap();
    let cleared: Value = resp.json().await.unwrap();
    assert_eq!(cleared["removed"], json!(3));

    let (_, listing) = get_json(&client, format!("{base}/api/webhooks")).await;
    assert_eq!(listing["total"], json!(1));
    assert_eq!(listing["webhooks"][0]["application"], json!("crm"));
    assert_eq!(listing["webhooks"][0]["eventCount"], json!(0));
}

#[tokio::test]
async fn signed_calls_are_annotated_not_rejected() {
    let base = spawn_app().await;
    let client = Client::new();
    let wh = create(&client, &base, json!({ "name": "gh", "secret": "shh" })).await;
    assert_eq!(wh["hasSecret"], json!(true));
    assert!(wh.get("secret").is_none());
    let public_id = wh["publicId"].as_str().unwrap();

    let resp = client
        .post(format!("{base}/w/{public_id}"))
        .header("x-hub-signature-256", "sha256=00")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, listing) = get_json(&client, format!("{base}/api/webhooks/1/events")).await;
    assert_eq!(
        listing["events"][0]["signature"],
        json!({ "scheme": "github-hmac", "valid": false })
    );
}

/// Read SSE text from the response until `frames` data frames arrived.
async fn read_frames(resp: &mut reqwest::Response, frames: usize) -> Vec<Value> {
    let mut buf = String::new();
    let mut out = Vec::new();
    while out.len() < frames {
        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .expect("stream stalled")
            .unwrap()
            .expect("stream ended");
        buf.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(end) = buf.find("\n\n") {
            let frame: String = buf.drain(..end + 2).collect();
            if let Some(data) = frame.trim_end().strip_prefix("data: ") {
                out.push(serde_json::from_str(data).unwrap());
            }
        }
    }
    out
}

#[tokio::test]
async fn stream_pushes_new_events_in_order() {
    let base = spawn_app().await;
    let client = Client::new();
    let wh = create(&client, &base, json!({ "name": "live" })).await;
    let public_id = wh["publicId"].as_str().unwrap();

    // Captured before the watcher connects: never streamed.
    client
        .post(format!("{base}/w/{public_id}"))
        .body("old")
        .send()
        .await
        .unwrap();

    let mut stream = client
        .get(format!("{base}/api/webhooks/1/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(stream.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut sent = Vec::new();
    for i in 0..3 {
        let ack: Value = client
            .post(format!("{base}/w/{public_id}"))
            .body(format!("new-{i}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        sent.push(ack["eventId"].clone());
    }

    let frames = read_frames(&mut stream, 3).await;
    let ids: Vec<Value> = frames.iter().map(|f| f["id"].clone()).collect();
    assert_eq!(ids, sent);
    assert_eq!(frames[0]["body"], json!("new-0"));

    let (_, stats) = get_json(&client, format!("{base}/api/stats")).await;
    assert_eq!(stats["watchers"], json!(1));
    drop(stream);
}

#[tokio::test]
async fn idle_stream_gets_keepalive_pings() {
    let config = Config {
        keepalive: Duration::from_millis(200),
        ..Config::default()
    };
    let base = spawn_with(config).await;
    let client = Client::new();
    create(&client, &base, json!({ "name": "idle" })).await;

    let mut stream = client
        .get(format!("{base}/api/webhooks/1/stream"))
        .send()
        .await
        .unwrap();
    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
        .await
        .expect("no keepalive")
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&chunk).starts_with(": ping\n\n"));
}

#[tokio::test]
async fn disconnected_watcher_is_released() {
    let base = spawn_app().await;
    let client = Client::new();
    create(&client, &base, json!({ "name": "live" })).await;

    let stream = client
        .get(format!("{base}/api/webhooks/1/stream"))
        .send()
        .await
        .unwrap();
    let (_, stats) = get_json(&client, format!("{base}/api/stats")).await;
    assert_eq!(stats["watchers"], json!(1));
    drop(stream);

    let mut watchers = json!(1);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_, stats) = get_json(&client, format!("{base}/api/stats")).await;
        watchers = stats["watchers"].clone();
        if watchers == json!(0) {
            break;
        }
    }
    assert_eq!(watchers, json!(0));
}

#[tokio::test]
async fn health_reports_ok() {
    let base = spawn_app().await;
    let (status, body) = get_json(&Client::new(), format!("{base}/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}
