use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pixgrab_core::bus::{BusRequest, BusResponse, Dispatch};
use pixgrab_core::naming::FilenameGenerator;
use pixgrab_core::panel::{CancelToken, PanelController, PanelPhase};
use pixgrab_core::remote::RemoteMetadataClient;
use pixgrab_core::types::{ArtworkId, FilenameFormat, PageContext};
use scraper::Html;
use serde_json::json;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone)]
struct Call {
    request: BusRequest,
    at: Instant,
}

/// Records every bus request with its dispatch instant; optionally fails all
/// downloads or cancels a token after the first dispatch.
struct RecordingDispatch {
    calls: Mutex<Vec<Call>>,
    fail_downloads: bool,
    cancel_after_first: Mutex<Option<CancelToken>>,
}

impl RecordingDispatch {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_downloads: false,
            cancel_after_first: Mutex::new(None),
        }
    }

    fn failing() -> Self {
        Self { fail_downloads: true, ..Self::new() }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn download_filenames(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call.request {
                BusRequest::DownloadImage { filename, .. } => Some(filename),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn send(&self, request: BusRequest) -> Result<BusResponse, String> {
        let is_download = matches!(request, BusRequest::DownloadImage { .. });
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call { request, at: Instant::now() });
            calls.len()
        };
        if count == 1 {
            if let Some(token) = self.cancel_after_first.lock().unwrap().take() {
                token.cancel();
            }
        }
        if is_download && self.fail_downloads {
            Err("HTTP 403".to_string())
        } else {
            Ok(BusResponse::Done)
        }
    }
}

async fn mock_pages_endpoint(server: &MockServer, id: &str, count: usize) {
    let body: Vec<_> = (0..count)
        .map(|i| {
            json!({ "urls": { "original": format!("https://i.x/img-original/{id}_p{i}.png") } })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/ajax/illust/{id}/pages")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": false, "body": body })),
        )
        .mount(server)
        .await;
}

fn detail_doc() -> Html {
    Html::parse_document(
        r#"<main><h1>ねこ</h1><a data-user-name href="/users/3">ねこすき</a></main>"#,
    )
}

fn controller(
    dispatcher: Arc<RecordingDispatch>,
    server: &MockServer,
    format: FilenameFormat,
) -> PanelController<RecordingDispatch> {
    PanelController::new(
        dispatcher,
        RemoteMetadataClient::with_base_url(server.uri()),
        FilenameGenerator::new(format),
    )
}

#[tokio::test]
async fn open_transitions_loading_to_open() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "42", 2).await;

    let dispatcher = Arc::new(RecordingDispatch::new());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::TitlePage);

    let id = ArtworkId::new("42");
    let view = panel.open(&id, &detail_doc(), PageContext::Detail).await;

    assert_eq!(view.phase, PanelPhase::Open);
    assert_eq!(view.images.len(), 2);
    let artwork = view.artwork.expect("artwork info");
    assert_eq!(artwork.title, "ねこ");
    // Default names are generated per image, one-based.
    assert_eq!(view.default_names.len(), 2);
    assert!(view.default_names[1].ends_with("_2"));
}

#[tokio::test]
async fn listing_failure_transitions_to_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ajax/illust/42/pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": true,
            "message": "rate limited"
        })))
        .mount(&server)
        .await;

    let dispatcher = Arc::new(RecordingDispatch::new());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::TitlePage);

    let id = ArtworkId::new("42");
    let view = panel.open(&id, &detail_doc(), PageContext::Detail).await;

    assert_eq!(view.phase, PanelPhase::Error("rate limited".to_string()));
    assert!(view.images.is_empty());
}

#[tokio::test]
async fn close_resets_to_closed() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "42", 1).await;

    let dispatcher = Arc::new(RecordingDispatch::new());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::TitlePage);

    let id = ArtworkId::new("42");
    panel.open(&id, &detail_doc(), PageContext::Detail).await;
    let view = panel.close();

    assert_eq!(view.phase, PanelPhase::Closed);
    assert!(view.artwork.is_none());
    assert!(view.images.is_empty());
}

#[tokio::test]
async fn bulk_download_is_sequential_and_throttled() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "12345", 3).await;

    let dispatcher = Arc::new(RecordingDispatch::new());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::IdPage);

    let id = ArtworkId::new("12345");
    panel.open(&id, &detail_doc(), PageContext::Detail).await;

    // Freeze the clock after the network round-trip so the throttle is
    // measured deterministically.
    tokio::time::pause();
    let report = panel.download_all().await;

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.failed, 0);
    assert!(!report.cancelled);

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 3);
    // Index order, folder-prefixed names, extension from the source URL.
    assert_eq!(
        dispatcher.download_filenames(),
        vec!["12345/1.png", "12345/2.png", "12345/3.png"]
    );
    for pair in calls.windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= std::time::Duration::from_millis(500), "gap was {gap:?}");
    }
}

#[tokio::test]
async fn bulk_download_continues_past_failures() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "9", 3).await;

    let dispatcher = Arc::new(RecordingDispatch::failing());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::IdPage);

    panel.open(&ArtworkId::new("9"), &detail_doc(), PageContext::Detail).await;
    tokio::time::pause();
    let report = panel.download_all().await;

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.failed, 3);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn cancellation_stops_between_iterations() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "9", 3).await;

    let dispatcher = Arc::new(RecordingDispatch::new());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::IdPage);

    panel.open(&ArtworkId::new("9"), &detail_doc(), PageContext::Detail).await;
    *dispatcher.cancel_after_first.lock().unwrap() = Some(panel.cancel_token());

    tokio::time::pause();
    let report = panel.download_all().await;

    // First image dispatched, the remainder cancelled cooperatively.
    assert_eq!(report.dispatched, 1);
    assert!(report.cancelled);
    assert_eq!(dispatcher.calls().len(), 1);
}

#[tokio::test]
async fn custom_filename_beats_the_generated_default() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "7", 1).await;

    let dispatcher = Arc::new(RecordingDispatch::new());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::IdPage);

    panel.open(&ArtworkId::new("7"), &detail_doc(), PageContext::Detail).await;

    panel.download_page(0, Some("  my:pick  ")).await.expect("download ok");
    panel.download_page(0, Some("   ")).await.expect("download ok");

    // Custom name is trimmed and sanitized; blank override falls back to the
    // generated default.
    assert_eq!(dispatcher.download_filenames(), vec!["my：pick.png", "7_1.png"]);
}

#[tokio::test]
async fn failed_single_download_raises_the_alert_hook() {
    let server = MockServer::start().await;
    mock_pages_endpoint(&server, "7", 1).await;

    let alerts: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&alerts);

    let dispatcher = Arc::new(RecordingDispatch::failing());
    let mut panel = controller(Arc::clone(&dispatcher), &server, FilenameFormat::IdPage)
        .with_alert_hook(move |message| sink.lock().unwrap().push(message.to_string()));

    panel.open(&ArtworkId::new("7"), &detail_doc(), PageContext::Detail).await;
    let result = panel.download_page(0, None).await;

    assert!(result.is_err());
    assert_eq!(alerts.lock().unwrap().as_slice(), ["HTTP 403".to_string()]);
}
