use std::collections::VecDeque;

use fsio_core::{mime, Context, Entry, FsError, Location};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::DriveClient;
use crate::drive::Corpus;
use crate::model::FileList;
use crate::namespace::Scope;

/// Folder pages listed concurrently during one walk.
const MAX_CONCURRENT_LISTS: usize = 8;

/// A folder page still to be listed.
struct PendingPage {
    folder_id: String,
    path: Vec<String>,
    page_token: Option<String>,
}

/// Breadth-first enumeration of every file under the corpus root.
///
/// Entries are sent to `tx` as `scope`-prefixed locations. The walk ends
/// when no folder page is queued and none is being listed. Returns
/// `Ok(false)` if the receiver went away before the walk finished.
pub(crate) async fn walk(
    ctx: &Context,
    client: &DriveClient,
    corpus: &Corpus,
    scope: &Scope,
    tx: &mpsc::Sender<Entry>,
) -> Result<bool, FsError> {
    let mut pending = VecDeque::from([PendingPage {
        folder_id: corpus.root_id().to_string(),
        path: Vec::new(),
        page_token: None,
    }]);
    let mut in_flight: JoinSet<(PendingPage, Result<FileList, FsError>)> = JoinSet::new();
    let mut emitted = 0u64;

    loop {
        while in_flight.len() < MAX_CONCURRENT_LISTS {
            let Some(page) = pending.pop_front() else {
                break;
            };
            let client = client.clone();
            let corpus = corpus.clone();
            let ctx = ctx.clone();
            in_flight.spawn(async move {
                let listed = client
                    .list_children(&ctx, &corpus, &page.folder_id, page.page_token.as_deref())
                    .await;
                (page, listed)
            });
        }

        if in_flight.is_empty() {
            debug!(?scope, emitted, "walk complete");
            return Ok(true);
        }

        let joined = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ctx.err().unwrap_or(FsError::Cancelled)),
            joined = in_flight.join_next() => joined,
        };
        let (page, listed) = match joined {
            Some(Ok(done)) => done,
            Some(Err(e)) => {
                warn!(error = %e, "folder listing task failed");
                continue;
            }
            None => continue,
        };
        let list = match listed {
            Ok(list) => list,
            Err(e) if e.is_context() => return Err(e),
            Err(e) => {
                warn!(folder = %page.folder_id, error = %e, "skipping unreadable folder");
                continue;
            }
        };

        if let Some(token) = list.next_page_token.filter(|t| !t.is_empty()) {
            pending.push_back(PendingPage {
                folder_id: page.folder_id.clone(),
                path: page.path.clone(),
                page_token: Some(token),
            });
        }

        for file in list.files {
            let mut path = page.path.clone();
            path.push(file.name.clone());

            if file.mime_type == mime::GOOGLE_FOLDER {
                pending.push_back(PendingPage {
                    folder_id: file.id,
                    path,
                    page_token: None,
                });
                continue;
            }

            let location = match Location::new(path) {
                Ok(location) => location,
                Err(e) => {
                    warn!(file_id = %file.id, error = %e, "skipping file with unusable name");
                    continue;
                }
            };
            if tx.send(Entry::new(scope.join(&location), file.mod_time())).await.is_err() {
                return Ok(false);
            }
            emitted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::StaticToken;
    use crate::client::{Endpoints, RetryPolicy};

    fn client(server: &MockServer) -> DriveClient {
        DriveClient::new(
            Arc::new(StaticToken("tok".to_string())),
            Endpoints {
                drive: server.uri(),
                directory: server.uri(),
            },
            RetryPolicy {
                max_attempts: 1,
                min_sleep: Duration::from_millis(1),
            },
        )
    }

    async fn children(server: &MockServer, parent: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", format!("trashed=false and '{parent}' in parents")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_walk_follows_folders_and_pages() {
        let server = MockServer::start().await;
        children(
            &server,
            "root",
            json!({"files": [
                {"id": "f1", "name": "docs", "mimeType": mime::GOOGLE_FOLDER},
                {"id": "a", "name": "a.txt", "mimeType": "text/plain",
                 "modifiedTime": "2024-01-01T00:00:00Z"}
            ]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": [
                {"id": "c", "name": "c.txt", "mimeType": "text/plain"}
            ]})))
            .with_priority(1)
            .mount(&server)
            .await;
        children(
            &server,
            "f1",
            json!({"nextPageToken": "next", "files": [
                {"id": "b", "name": "b.txt", "mimeType": "text/plain"},
                {"id": "f2", "name": "empty", "mimeType": mime::GOOGLE_FOLDER}
            ]}),
        )
        .await;
        children(&server, "f2", json!({"files": []})).await;

        let (tx, mut rx) = mpsc::channel(16);
        let finished = walk(
            &Context::new(),
            &client(&server),
            &Corpus::User,
            &Scope::Personal,
            &tx,
        )
        .await
        .unwrap();
        assert!(finished);
        drop(tx);

        let mut keys = Vec::new();
        while let Some(entry) = rx.recv().await {
            keys.push(entry.location.key());
        }
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "personal/files/a.txt",
                "personal/files/docs/b.txt",
                "personal/files/docs/c.txt",
            ]
        );
    }

    #[tokio::test]
    async fn test_walk_skips_failing_folder() {
        let server = MockServer::start().await;
        children(
            &server,
            "root",
            json!({"files": [
                {"id": "bad", "name": "locked", "mimeType": mime::GOOGLE_FOLDER},
                {"id": "a", "name": "a.txt", "mimeType": "text/plain"}
            ]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "trashed=false and 'bad' in parents"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::channel(16);
        assert!(walk(&Context::new(), &client(&server), &Corpus::User, &Scope::Personal, &tx)
            .await
            .unwrap());
        drop(tx);
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.location.key(), "personal/files/a.txt");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_walk_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"files": []}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let ctx = Context::new();
        let (tx, _rx) = mpsc::channel(16);
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = walk(&ctx, &client(&server), &Corpus::User, &Scope::Personal, &tx)
            .await
            .unwrap_err();
        assert!(err.is_context());
    }
}
