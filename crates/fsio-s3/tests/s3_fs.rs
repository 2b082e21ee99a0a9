use std::time::Duration;

use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use fsio_core::{Context, Filesystem, Location};
use fsio_s3::S3Fs;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUCKET: &str = "bucket";
const MTIME: &str = "2021-02-03T04:05:06Z";

fn client(server: &MockServer) -> aws_sdk_s3::Client {
    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(server.uri())
        .force_path_style(true)
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("key", "secret", None, None, "test"))
        .retry_config(RetryConfig::disabled())
        .build();
    aws_sdk_s3::Client::from_conf(config)
}

fn setup(server: &MockServer) -> (S3Fs, TempDir) {
    let cache_dir = TempDir::new().unwrap();
    let fs = S3Fs::new(client(server), BUCKET, Duration::from_secs(60))
        .with_cache_dir(cache_dir.path());
    (fs, cache_dir)
}

fn loc(key: &str) -> Location {
    Location::parse(key).unwrap()
}

#[tokio::test]
async fn test_cheap_checksum_uses_metadata_mtime() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bucket/docs/report.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-amz-meta-mtime", MTIME)
                .insert_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let checksum = fs
        .checksum_cheap(&Context::new(), &loc("docs/report.txt"))
        .await
        .unwrap();
    assert!(checksum.starts_with("2021-02-03T04:05:06Z-"), "{checksum}");
}

#[tokio::test]
async fn test_content_checksum_from_stored_sha256() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bucket/abc.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-amz-meta-mtime", MTIME)
                .insert_header("content-type", "text/plain")
                .insert_header(
                    "x-amz-checksum-sha256",
                    "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=",
                ),
        )
        .mount(&server)
        .await;
    // The stored checksum is trusted, so nothing is downloaded.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let checksum = fs
        .checksum_content(&Context::new(), &loc("abc.txt"))
        .await
        .unwrap();
    assert_eq!(
        checksum,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[tokio::test]
async fn test_open_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bucket/cached/file.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let (fs, cache) = setup(&server);
    let ctx = Context::new();
    for _ in 0..2 {
        let mut reader = fs.open(&ctx, &loc("cached/file.txt")).await.unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "hello");
    }
    assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/bucket/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let err = fs
        .checksum_cheap(&Context::new(), &loc("missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[tokio::test]
async fn test_write_sends_mtime_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/dir/file.txt"))
        .and(header("x-amz-meta-mtime", MTIME))
        .and(header("x-amz-meta-custom-mtime", MTIME))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let mod_time = chrono::DateTime::parse_from_rfc3339(MTIME)
        .unwrap()
        .with_timezone(&chrono::Utc);
    let written = fs
        .write_file(
            &Context::new(),
            &loc("dir/file.txt"),
            &mut &b"hello world"[..],
            mod_time,
        )
        .await
        .unwrap();
    assert_eq!(written, loc("dir/file.txt"));
}

#[tokio::test]
async fn test_files_lists_objects_and_skips_folders() {
    let server = MockServer::start().await;
    let listing = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix></Prefix>
  <KeyCount>3</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>a/one.txt</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>"1"</ETag><Size>3</Size><StorageClass>STANDARD</StorageClass></Contents>
  <Contents><Key>b.txt</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>"2"</ETag><Size>3</Size><StorageClass>STANDARD</StorageClass></Contents>
  <Contents><Key>folder/</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>"3"</ETag><Size>0</Size><StorageClass>STANDARD</StorageClass></Contents>
</ListBucketResult>"#;
    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("list-type", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(listing),
        )
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex("^/bucket/.+"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-amz-meta-mtime", MTIME))
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let mut keys: Vec<String> = fs
        .files(&Context::new())
        .map(|entry| entry.location.key())
        .collect()
        .await;
    keys.sort();
    assert_eq!(keys, vec!["a/one.txt".to_string(), "b.txt".to_string()]);
}

fn listing_page(keys: &[&str], next_token: Option<&str>) -> String {
    let contents: String = keys
        .iter()
        .map(|key| {
            format!(
                "<Contents><Key>{key}</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>\"1\"</ETag><Size>3</Size><StorageClass>STANDARD</StorageClass></Contents>"
            )
        })
        .collect();
    let truncation = match next_token {
        Some(token) => format!(
            "<IsTruncated>true</IsTruncated><NextContinuationToken>{token}</NextContinuationToken>"
        ),
        None => "<IsTruncated>false</IsTruncated>".to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <KeyCount>{}</KeyCount>
  <MaxKeys>1000</MaxKeys>
  {truncation}
  {contents}
</ListBucketResult>"#,
        keys.len()
    )
}

fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/xml")
        .set_body_string(body)
}

#[tokio::test]
async fn test_files_keeps_entries_when_a_later_page_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("continuation-token", "tok2"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("content-type", "application/xml")
                .set_body_string(
                    "<Error><Code>AccessDenied</Code><Message>denied</Message></Error>",
                ),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("list-type", "2"))
        .respond_with(xml(listing_page(&["a.txt", "b.txt"], Some("tok2"))))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex("^/bucket/.+"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-amz-meta-mtime", MTIME))
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let mut keys: Vec<String> = fs
        .files(&Context::new())
        .map(|entry| entry.location.key())
        .collect()
        .await;
    keys.sort();
    assert_eq!(keys, vec!["a.txt".to_string(), "b.txt".to_string()]);
}

#[tokio::test]
async fn test_files_follows_continuation_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("continuation-token", "tok2"))
        .respond_with(xml(listing_page(&["c.txt"], None)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("list-type", "2"))
        .respond_with(xml(listing_page(&["a.txt", "b.txt"], Some("tok2"))))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex("^/bucket/.+"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-amz-meta-mtime", MTIME))
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let mut keys: Vec<String> = fs
        .files(&Context::new())
        .map(|entry| entry.location.key())
        .collect()
        .await;
    keys.sort();
    assert_eq!(keys, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn test_move_copies_encoded_source_then_deletes_old_key() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/archive/report.txt"))
        .and(header("x-amz-copy-source", "bucket/dir%20a/my%20report.txt"))
        .respond_with(xml(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyObjectResult><ETag>"1"</ETag><LastModified>2024-01-01T00:00:00.000Z</LastModified></CopyObjectResult>"#
                .to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/bucket/dir%20a/my%20report.txt"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (fs, _cache) = setup(&server);
    let moved = fs
        .move_file(
            &Context::new(),
            &loc("dir a/my report.txt"),
            &loc("archive/report.txt"),
        )
        .await
        .unwrap();
    assert_eq!(moved, loc("archive/report.txt"));
}

#[tokio::test]
async fn test_remove_all_deletes_key_and_nested_children() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("prefix", "folder/"))
        .respond_with(xml(listing_page(
            &["folder/x.txt", "folder/sub/y.txt"],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;
    for key in ["folder", "folder/x.txt", "folder/sub/y.txt"] {
        Mock::given(method("DELETE"))
            .and(path(format!("/bucket/{key}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (fs, _cache) = setup(&server);
    fs.remove_all(&Context::new(), &loc("folder")).await.unwrap();
}
