use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::fakes::{png_bytes, test_settings, DownIndex, Harness, HashingEmbedder, MemoryIndex};
use crate::{
    app::AppState,
    config::Settings,
    providers::Reranking,
    search::{ImageSearch, SearchService},
    web,
};

const BOUNDARY: &str = "shopvec-test-boundary";

fn app(harness: &Harness, image: bool, describer: bool) -> Router {
    app_with_settings(harness, image, describer, test_settings())
}

fn app_with_settings(harness: &Harness, image: bool, describer: bool, settings: Settings) -> Router {
    let image = if image {
        harness.image_search()
    } else {
        ImageSearch::Unavailable
    };
    let search = harness.search_service(image, Reranking::Enabled(harness.reranker.clone()), false);
    let describer = describer.then(|| harness.describer());

    web::router(Arc::new(AppState::new(settings, search, describer)))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// `file` (when given) plus plain text fields.
fn post_multipart(uri: &str, file: Option<&[u8]>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"probe.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn ids(body: &Value) -> Vec<String> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health() {
    let harness = Harness::new();
    let (status, body) = send(app(&harness, true, true), get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"name": "AI Product API", "env": "dev", "status": "ok"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_text_search() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/search", json!({"prompt": "ceramic coffee mug", "top_k": 2})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body).len(), 2);
    assert_eq!(ids(&body)[0], "sku-5");
    assert!(body["items"][0]["score"].is_number());
    assert_eq!(body["items"][0]["metadata"]["brand"], json!("Homely"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_text_search_non_positive_top_k_uses_default() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/search", json!({"prompt": "linen", "top_k": -3})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body).len(), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_text_search_with_filters() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness, true, true),
        post_json(
            "/api/search",
            json!({"prompt": "shirt", "top_k": 5, "filters": {"brand": {"$eq": "Acme"}}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let mut found = ids(&body);
    found.sort();
    assert_eq!(found, vec!["sku-1", "sku-2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_search_body_is_422() {
    let harness = Harness::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"prompt\": "))
        .unwrap();

    let (status, body) = send(app(&harness, true, true), request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());

    let (status, _) = send(
        app(&harness, true, true),
        post_json("/api/search", json!({"top_k": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provider_failure_is_500_with_detail() {
    let harness = Harness::new();
    let search = SearchService::new(
        Arc::new(HashingEmbedder::default()),
        Arc::new(DownIndex),
        ImageSearch::Unavailable,
        Reranking::Disabled,
        false,
    );
    let app = web::router(Arc::new(AppState::new(test_settings(), search, Some(harness.describer()))));

    let (status, body) = send(app, post_json("/api/search", json!({"prompt": "mug"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_url_search() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness, true, true),
        post_empty("/api/search/image?image_url=https://cdn.example.com/red.png&top_k=2"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let found = ids(&body);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0], "img-red");
    assert_eq!(
        *harness.fetcher.urls.lock().unwrap(),
        vec!["https://cdn.example.com/red.png".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_url_bad_input_is_422() {
    let harness = Harness::new();

    for uri in [
        "/api/search/image?image_url=https://cdn.example.com/a.png&top_k=0",
        "/api/search/image?image_url=https://cdn.example.com/a.png&top_k=101",
        "/api/search/image?image_url=ftp://cdn.example.com/a.png",
        "/api/search/image?top_k=3",
    ] {
        let (status, body) = send(app(&harness, true, true), post_empty(uri)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        assert!(body["detail"].is_string());
    }
    assert!(harness.fetcher.urls.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_upload() {
    let harness = Harness::new();
    let png = png_bytes(500, 400, [20, 200, 40]);

    let (status, body) = send(
        app(&harness, true, true),
        post_multipart("/api/search/image/upload", Some(png.as_slice()), &[("top_k", "1")]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["img-green".to_string()]);
    assert_eq!(
        *harness.image_embedder.seen_dimensions.lock().unwrap(),
        vec![(256, 205)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_upload_non_positive_top_k_uses_default() {
    let harness = Harness::new();
    let png = png_bytes(10, 10, [20, 200, 40]);

    let (status, _) = send(
        app(&harness, true, true),
        post_multipart("/api/search/image/upload", Some(png.as_slice()), &[("top_k", "-1")]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(*harness.image_index.top_ks.lock().unwrap(), vec![8]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_check() {
    let harness = Harness::new();
    let png = png_bytes(64, 64, [20, 40, 220]);

    let (status, body) = send(
        app(&harness, true, true),
        post_multipart(
            "/api/search/image/upload-check",
            Some(png.as_slice()),
            &[("top_k", "2"), ("threshold", "0.9"), ("filters", r#"{"brand": "Acme"}"#)],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found_similar"], json!(true));
    assert_eq!(body["best_match"]["id"], json!("img-blue"));
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert!(body["threshold"].as_f64().unwrap() > 0.89);
    for key in ["total", "open_resize", "embed", "pinecone_query"] {
        assert!(body["timings_ms"][key].as_f64().unwrap() >= 0.0, "{key}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_check_defaults_threshold() {
    let harness = Harness::new();
    let png = png_bytes(64, 64, [20, 40, 220]);

    let (status, body) = send(
        app(&harness, true, true),
        post_multipart("/api/search/image/upload-check", Some(png.as_slice()), &[]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["threshold"], json!(0.75));
    assert_eq!(*harness.image_index.top_ks.lock().unwrap(), vec![8]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_check_bad_input_is_422() {
    let harness = Harness::new();
    let png = png_bytes(16, 16, [20, 40, 220]);

    let cases: Vec<(Option<&[u8]>, Vec<(&str, &str)>)> = vec![
        (Some(png.as_slice()), vec![("filters", "{bad json")]),
        (Some(png.as_slice()), vec![("filters", "[\"brand\"]")]),
        (Some(png.as_slice()), vec![("threshold", "high")]),
        (Some(&b"not an image"[..]), vec![]),
        (None, vec![("top_k", "3")]),
    ];

    for (file, fields) in cases {
        let (status, body) = send(
            app(&harness, true, true),
            post_multipart("/api/search/image/upload-check", file, &fields),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{fields:?}");
        assert!(body["detail"].is_string());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_endpoints_without_image_index() {
    let harness = Harness::new();
    let png = png_bytes(16, 16, [20, 40, 220]);

    let requests = vec![
        post_empty("/api/search/image?image_url=https://cdn.example.com/a.png"),
        post_multipart("/api/search/image/upload", Some(png.as_slice()), &[]),
        post_multipart("/api/search/image/upload-check", Some(png.as_slice()), &[]),
        post_json("/api/similar/image", json!({"image_b64": STANDARD.encode(&png)})),
    ];

    for request in requests {
        let uri = request.uri().to_string();
        let (status, body) = send(app(&harness, false, true), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body, json!({"detail": "Image index not available."}), "{uri}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_similar_by_id() {
    let harness = Harness::new();
    let (status, body) = send(app(&harness, true, true), get("/api/similar/sku-1?top_k=3")).await;

    assert_eq!(status, StatusCode::OK);
    let found = ids(&body);
    assert!(found.len() <= 3);
    assert!(!found.contains(&"sku-1".to_string()));
    assert_eq!(found[0], "sku-2");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_similar_by_id_errors() {
    let harness = Harness::new();

    let cases = [
        ("/api/similar/sku-404", StatusCode::NOT_FOUND),
        ("/api/similar/sku-1?modality=image", StatusCode::BAD_REQUEST),
        ("/api/similar/sku-1?modality=audio", StatusCode::UNPROCESSABLE_ENTITY),
        ("/api/similar/sku-1?top_k=0", StatusCode::UNPROCESSABLE_ENTITY),
        ("/api/similar/sku-1?top_k=many", StatusCode::UNPROCESSABLE_ENTITY),
    ];

    for (uri, expected) in cases {
        let (status, body) = send(app(&harness, true, true), get(uri)).await;
        assert_eq!(status, expected, "{uri}");
        assert!(body["detail"].is_string(), "{uri}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_similar_image() {
    let harness = Harness::new();
    let encoded = STANDARD.encode(png_bytes(32, 32, [220, 20, 20]));

    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/similar/image?top_k=1", json!({"image_b64": encoded})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["img-red".to_string()]);

    let (status, _) = send(
        app(&harness, true, true),
        post_json("/api/similar/image", json!({"image_b64": "%%%"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gen_description() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/gen/description", json!({"uniq_id": "sku-4", "save": true})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], json!(true));
    assert!(body.get("error").is_none());
    assert_eq!(
        harness.text_index.metadata("sku-4").unwrap()["gen_description"],
        body["description"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gen_description_failed_save_is_still_200() {
    let harness = Harness::with_text_index(MemoryIndex::failing_updates());
    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/gen/description", json!({"uniq_id": "sku-4", "save": true})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], json!(false));
    assert!(!body["description"].as_str().unwrap().is_empty());
    assert!(body["error"].as_str().unwrap().contains("quota exceeded"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gen_description_errors() {
    let harness = Harness::new();

    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/gen/description", json!({"uniq_id": "sku-404"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], json!("uniq_id not found in index"));

    let (status, body) = send(
        app(&harness, true, true),
        post_json("/api/gen/description", json!({"meta": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], json!("Provide uniq_id or meta"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gen_route_absent_without_generator() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness, true, false),
        post_json("/api/gen/description", json!({"meta": {"title": "Mug"}})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"detail": "Not Found"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_api_path() {
    let harness = Harness::new();
    let (status, body) = send(app(&harness, true, true), get("/api/does-not-exist")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"detail": "Not Found"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spa_is_served_outside_api() {
    let dist = tempfile::tempdir().unwrap();
    std::fs::write(dist.path().join("index.html"), "<html>shop</html>").unwrap();
    std::fs::create_dir(dist.path().join("assets")).unwrap();
    std::fs::write(dist.path().join("assets/app.js"), "console.log('shop')").unwrap();

    let harness = Harness::new();
    let settings = Settings {
        frontend_dist: dist.path().to_path_buf(),
        ..Settings::default()
    };
    let app = app_with_settings(&harness, true, true, settings);

    let (status, body) = send(app.clone(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("<html>shop</html>"));

    let (status, body) = send(app.clone(), get("/products/42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("<html>shop</html>"));

    let (status, body) = send(app.clone(), get("/assets/app.js")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("console.log('shop')"));

    let (status, body) = send(app, get("/api/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"detail": "Not Found"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cors_preflight_allows_configured_origin() {
    let harness = Harness::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/search")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app(&harness, true, true).oneshot(request).await.unwrap();
    let headers = response.headers();

    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:5173"
    );
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "POST");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cors_rejects_unlisted_origin() {
    let harness = Harness::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/search")
        .header(header::ORIGIN, "https://evil.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app(&harness, true, true).oneshot(request).await.unwrap();
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cors_wildcard_echoes_request_origin() {
    let harness = Harness::new();
    let settings = Settings {
        backend_cors_origins: crate::config::parse_origins("*"),
        ..test_settings()
    };
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/search")
        .header(header::ORIGIN, "https://shop.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app_with_settings(&harness, true, true, settings)
        .oneshot(request)
        .await
        .unwrap();
    let headers = response.headers();

    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://shop.example.com"
    );
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
}
