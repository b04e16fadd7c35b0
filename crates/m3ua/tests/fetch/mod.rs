use m3ua::{
    fetch::{Fetcher, HttpFetcher},
    M3uaError,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{AssertWrapper, MediaMock};

#[tokio::test]
async fn fetch_playlist() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server.mock_bytes("/playlist.m3u8", "#EXTM3U\n").await;

    let fetcher = HttpFetcher::new(reqwest::Client::new());
    let body = fetcher
        .fetch_playlist(&format!("{}/playlist.m3u8", server.uri()))
        .await?;
    assert_eq!(&body[..], b"#EXTM3U\n");
    Ok(())
}

#[tokio::test]
async fn fetch_not_found() {
    let server = MockServer::start().await;
    server.mock_status("/key.bin", 404).await;

    let fetcher = HttpFetcher::new(reqwest::Client::new());
    let result = fetcher
        .fetch_resource(&format!("{}/key.bin", server.uri()))
        .await;
    assert!(matches!(
        result,
        Err(M3uaError::Fetch { status, .. }) if status == reqwest::StatusCode::NOT_FOUND
    ));
}

#[tokio::test]
async fn fetch_retries_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    server.mock_bytes("/playlist.m3u8", "#EXTM3U\n").await;

    let url = format!("{}/playlist.m3u8", server.uri());

    let fetcher = HttpFetcher::new(reqwest::Client::new());
    fetcher.fetch_playlist(&url).await.assert_error();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    server.mock_bytes("/playlist.m3u8", "#EXTM3U\n").await;

    let url = format!("{}/playlist.m3u8", server.uri());
    let fetcher = HttpFetcher::new(reqwest::Client::new()).with_retries(1);
    let body = fetcher.fetch_playlist(&url).await.assert_success();
    assert_eq!(&body[..], b"#EXTM3U\n");
}
