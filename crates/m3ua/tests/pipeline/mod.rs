use std::{path::Path, time::Duration};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use m3ua::{
    fetch::HttpFetcher,
    tool::{ToolChoice, ToolConfig},
    M3uaError, Pipeline, PipelineConfig, PipelineState,
};
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

use crate::{init_test_tracing, playlist, AssertWrapper, MediaMock};

const KEY: [u8; 16] = u128::to_be_bytes(0x000102030405060708090a0b0c0d0e0f);
const IV: [u8; 16] = u128::to_be_bytes(0xE60C79C314E3C9B471E7E51ABAA0B24A);
const MISSING: &str = "m3ua-definitely-missing-tool";

fn pipeline(server: &MockServer, output: &Path) -> Pipeline<HttpFetcher> {
    init_test_tracing();
    let config = PipelineConfig::new(
        format!("{}/playlist.m3u8", server.uri()),
        format!("{}/video/", server.uri()),
    )
    .with_output(output)
    .with_tools(ToolConfig::builtin())
    .with_segment_retries(0);
    Pipeline::new(config, HttpFetcher::new(reqwest::Client::new()))
}

fn encrypt(plain: &[u8], iv: [u8; 16]) -> Vec<u8> {
    cbc::Encryptor::<aes::Aes128>::new(&KEY.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plain)
}

#[tokio::test]
async fn assemble_in_playlist_order() {
    let server = MockServer::start().await;
    let names: Vec<String> = (0..5).map(|i| format!("seg-{i}.ts")).collect();
    server
        .mock_bytes("/playlist.m3u8", playlist(&[], &names))
        .await;
    for (i, name) in names.iter().enumerate() {
        // earlier segments finish later
        let delay = Duration::from_millis(200 - 40 * i as u64);
        server
            .mock_delayed(&format!("/video/{name}"), format!("<{i}>"), delay)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let mut pipeline = pipeline(&server, &output);
    let result = pipeline.run().await.assert_success();

    assert_eq!(result, output);
    assert_eq!(std::fs::read(&output).unwrap(), b"<0><1><2><3><4>");
    assert_eq!(pipeline.state(), &PipelineState::Done);
    assert_eq!(pipeline.history().len(), 8);
    assert!(!dir.path().join("out_part.mp4").exists());
}

#[tokio::test]
async fn single_segment_skips_concatenation() {
    let server = MockServer::start().await;
    server
        .mock_bytes("/playlist.m3u8", playlist(&[], &["only.ts"]))
        .await
        .mock_bytes("/video/only.ts", "lonely segment")
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let mut pipeline = pipeline(&server, &output);
    pipeline.run().await.assert_success();

    assert_eq!(std::fs::read(&output).unwrap(), b"lonely segment");
    assert!(dir.path().join("000000_only.ts").exists());
    assert!(!dir.path().join("out.ts").exists());
}

#[tokio::test]
async fn missing_tool_aborts_before_download() {
    let server = MockServer::start().await;
    server
        .mock_bytes(
            "/playlist.m3u8",
            playlist(
                &[r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin""#],
                &["a.ts", "b.ts"],
            ),
        )
        .await
        .mock_untouched("/video/key.bin")
        .await
        .mock_untouched("/video/a.ts")
        .await
        .mock_untouched("/video/b.ts")
        .await;

    let dir = tempfile::tempdir().unwrap();
    let work_dir = dir.path().join("segments");
    let output = dir.path().join("out.mp4");
    let config = PipelineConfig::new(
        format!("{}/playlist.m3u8", server.uri()),
        format!("{}/video/", server.uri()),
    )
    .with_output(&output)
    .with_work_dir(Some(work_dir.clone()))
    .with_tools(ToolConfig {
        download: ToolChoice::external(MISSING),
        ..ToolConfig::builtin()
    });
    let mut pipeline = Pipeline::new(config, HttpFetcher::new(reqwest::Client::new()));

    let result = pipeline.run().await;
    assert!(
        matches!(result, Err(M3uaError::ToolUnavailable { ref name, .. }) if name == MISSING)
    );
    assert!(!work_dir.exists());
    assert!(!output.exists());
    assert!(matches!(
        pipeline.state(),
        PipelineState::Failed { from, .. } if **from == PipelineState::PlaylistParsed
    ));
}

#[tokio::test]
async fn decrypt_encrypted_stream() {
    let plain: Vec<u8> = (0..=255u8).cycle().take(16 * 20 + 7).collect();
    let encrypted = encrypt(&plain, IV);
    assert_eq!(encrypted.len() % 16, 0);

    let server = MockServer::start().await;
    let key_tag = format!(
        r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin",IV=0x{}"#,
        hex::encode(IV)
    );
    server
        .mock_bytes(
            "/playlist.m3u8",
            playlist(&[key_tag.as_str()], &["0.ts", "1.ts", "2.ts"]),
        )
        .await
        .mock_bytes("/video/key.bin", KEY)
        .await
        // the ciphertext is split on block boundaries
        .mock_bytes("/video/0.ts", &encrypted[..16 * 5])
        .await
        .mock_bytes("/video/1.ts", &encrypted[16 * 5..16 * 12])
        .await
        .mock_bytes("/video/2.ts", &encrypted[16 * 12..])
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    pipeline(&server, &output).run().await.assert_success();

    assert_eq!(std::fs::read(&output).unwrap(), plain);
    assert!(dir.path().join("out_en.ts").exists());
    assert!(dir.path().join("out.ts").exists());
}

#[tokio::test]
async fn decrypt_with_media_sequence_iv() {
    let plain = b"sequence numbered segment".repeat(3);
    let encrypted = encrypt(&plain, u128::to_be_bytes(7));

    let server = MockServer::start().await;
    server
        .mock_bytes(
            "/playlist.m3u8",
            playlist(
                &[
                    "#EXT-X-MEDIA-SEQUENCE:7",
                    r#"#EXT-X-KEY:METHOD=AES-128,URI="https://keys.invalid/key.bin""#,
                ],
                &["0.ts"],
            ),
        )
        .await
        .mock_bytes("/override/key.bin", KEY)
        .await
        .mock_bytes("/video/0.ts", encrypted)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let config = PipelineConfig::new(
        format!("{}/playlist.m3u8", server.uri()),
        format!("{}/video/", server.uri()),
    )
    .with_output(&output)
    .with_tools(ToolConfig::builtin())
    .with_key_url(Some(format!("{}/override/key.bin", server.uri())))
    .with_clean_up(true);
    Pipeline::new(config, HttpFetcher::new(reqwest::Client::new()))
        .run()
        .await
        .assert_success();

    assert_eq!(std::fs::read(&output).unwrap(), plain);
    // clean up keeps nothing but the output
    let mut entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["out.mp4"]);
}

#[tokio::test]
async fn missing_segment_aborts_without_output() {
    let server = MockServer::start().await;
    let names: Vec<String> = (0..5).map(|i| format!("seg-{i}.ts")).collect();
    server
        .mock_bytes("/playlist.m3u8", playlist(&[], &names))
        .await;
    for (i, name) in names.iter().enumerate() {
        if i == 2 {
            server.mock_status(&format!("/video/{name}"), 404).await;
        } else {
            server
                .mock_bytes(&format!("/video/{name}"), format!("<{i}>"))
                .await;
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let mut pipeline = pipeline(&server, &output);
    let result = pipeline.run().await;

    match result {
        Err(M3uaError::SegmentFailed { index, url, .. }) => {
            assert_eq!(index, 2);
            assert!(url.ends_with("/video/seg-2.ts"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!output.exists());
    assert!(!dir.path().join("out.ts").exists());
    assert!(matches!(
        pipeline.state(),
        PipelineState::Failed { from, .. } if **from == PipelineState::Downloading
    ));
}

#[tokio::test]
async fn key_fetch_failure_aborts_before_download() {
    let server = MockServer::start().await;
    server
        .mock_bytes(
            "/playlist.m3u8",
            playlist(&[r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin""#], &["a.ts"]),
        )
        .await
        .mock_status("/video/key.bin", 403)
        .await
        .mock_untouched("/video/a.ts")
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = pipeline(&server, &dir.path().join("out.mp4")).run().await;
    assert!(matches!(result, Err(M3uaError::KeyFetchFailed { .. })));
}

#[tokio::test]
async fn empty_playlist_is_rejected() {
    let server = MockServer::start().await;
    server
        .mock_bytes("/playlist.m3u8", playlist::<&str>(&[], &[]))
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = pipeline(&server, &dir.path().join("out.mp4")).run().await;
    assert!(matches!(result, Err(M3uaError::MalformedPlaylist(_))));
}

#[tokio::test]
async fn cancelled_run_leaves_no_output() {
    let server = MockServer::start().await;
    server
        .mock_bytes("/playlist.m3u8", playlist(&[], &["a.ts", "b.ts"]))
        .await
        .mock_untouched("/video/a.ts")
        .await
        .mock_untouched("/video/b.ts")
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline(&server, &output)
        .with_cancellation(cancel)
        .run()
        .await;
    assert!(matches!(result, Err(M3uaError::Cancelled)));
    assert!(!output.exists());
}

#[tokio::test]
async fn unusable_key_tag_aborts_before_key_fetch() {
    for (tag, expected_iv) in [
        (r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin",IV=0x00"#, Some(1)),
        (r#"#EXT-X-KEY:METHOD=SAMPLE-AES,URI="key.bin""#, None),
    ] {
        let server = MockServer::start().await;
        server
            .mock_bytes("/playlist.m3u8", playlist(&[tag], &["a.ts", "b.ts"]))
            .await
            .mock_untouched("/video/key.bin")
            .await
            .mock_untouched("/video/a.ts")
            .await
            .mock_untouched("/video/b.ts")
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(&server, &dir.path().join("out.mp4"));
        let result = pipeline.run().await;

        match (result, expected_iv) {
            (Err(M3uaError::InvalidIv(len)), Some(expected)) => assert_eq!(len, expected),
            (Err(M3uaError::UnsupportedMethod(method)), None) => {
                assert_eq!(method, "SAMPLE-AES")
            }
            (other, _) => panic!("unexpected result for {tag}: {other:?}"),
        }
        assert!(matches!(
            pipeline.state(),
            PipelineState::Failed { from, .. } if **from == PipelineState::PlaylistFetched
        ));
    }
}

#[tokio::test]
async fn invalid_media_sequence_is_ignored() {
    let server = MockServer::start().await;
    server
        .mock_bytes(
            "/playlist.m3u8",
            playlist(&["#EXT-X-MEDIA-SEQUENCE:"], &["a.ts", "b.ts"]),
        )
        .await
        .mock_bytes("/video/a.ts", "<a>")
        .await
        .mock_bytes("/video/b.ts", "<b>")
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    pipeline(&server, &output).run().await.assert_success();
    assert_eq!(std::fs::read(&output).unwrap(), b"<a><b>");
}
