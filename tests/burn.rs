//! Concurrency properties of burn-after-read delivery: the claim step must
//! pick exactly one winner, and the temporaries must never outlive a request.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use tempfile::TempDir;

use clipd::config::Config;
use clipd::handlers::AppState;
use clipd::router::Router;
use clipd::service::{CreatePaste, PasteService};
use clipd::store::FsStore;

struct TestApp {
    dir: TempDir,
    service: Arc<PasteService>,
    router: Router,
}

async fn app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsStore::open(dir.path()).await.unwrap());
    let config = Arc::new(Config::default());
    let service = Arc::new(PasteService::new(store, &config));
    let router = Router::new(AppState { service: service.clone(), config });
    TestApp { dir, service, router }
}

async fn create_burn_paste(app: &TestApp, content: &[u8]) -> String {
    app.service
        .create(CreatePaste {
            content: Bytes::copy_from_slice(content),
            filename: None,
            declared_type: None,
            custom_slug: None,
            burn_after_read: true,
            ttl: None,
        })
        .await
        .unwrap()
        .id
}

fn get(path: &str) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", "paste.test")
        .header("user-agent", "curl/8.4.0")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn fetch(app: &TestApp, path: &str) -> (StatusCode, Bytes) {
    let resp = app.router.dispatch(get(path)).await;
    let (parts, body) = resp.into_parts();
    (parts.status, body.collect().await.unwrap().to_bytes())
}

fn assert_no_leftovers(app: &TestApp, slug: &str) {
    let leftovers: Vec<_> = std::fs::read_dir(app.dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with(slug))
        .collect();
    assert!(leftovers.is_empty(), "files left for {slug}: {leftovers:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_concurrent_readers_exactly_one_wins() {
    let app = app().await;

    for round in 0..10 {
        let slug = create_burn_paste(&app, b"the secret payload").await;
        let view = format!("/{slug}");
        let raw = format!("/raw/{slug}");

        let (a, b) = tokio::join!(fetch(&app, &view), fetch(&app, &raw));

        let mut winners = 0;
        for (status, body) in [&a, &b] {
            match *status {
                StatusCode::OK => {
                    winners += 1;
                    assert_eq!(&body[..], b"the secret payload", "round {round}");
                }
                StatusCode::NOT_FOUND => {}
                other => panic!("round {round}: unexpected status {other}"),
            }
        }
        assert_eq!(winners, 1, "round {round}: {:?} / {:?}", a.0, b.0);

        assert_no_leftovers(&app, &slug);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn a_crowd_of_readers_sees_one_success() {
    let app = app().await;

    let slug = create_burn_paste(&app, b"once only").await;
    let path = format!("/{slug}");

    let results = join_all((0..8).map(|_| fetch(&app, &path))).await;

    let ok: Vec<_> = results.iter().filter(|(status, _)| *status == StatusCode::OK).collect();
    let gone = results.iter().filter(|(status, _)| *status == StatusCode::NOT_FOUND).count();

    assert_eq!(ok.len(), 1);
    assert_eq!(gone, results.len() - 1);
    assert_eq!(&ok[0].1[..], b"once only");

    assert_no_leftovers(&app, &slug);

    // and the burn is permanent
    let (status, _) = fetch(&app, &path).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn burn_delivery_and_cleanup_happen_on_the_raw_path_too() {
    let app = app().await;

    let slug = create_burn_paste(&app, b"attachment secret").await;

    let (status, body) = fetch(&app, &format!("/raw/{slug}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"attachment secret");

    let (status, _) = fetch(&app, &format!("/raw/{slug}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_no_leftovers(&app, &slug);
}
