/// REST client for the remote board authority.
///
/// Routes (relative to the configured base URL):
/// GET/POST `board`, POST `list`, PUT/DELETE `list/:id`, POST `card`,
/// PUT/DELETE `card/:id`, POST `card/move`.
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CardMove, ListUpdate, RemoteBoard, RemoteEntity};
use crate::error::RemoteError;
use crate::mutation::{CardDraft, CardPatch};
use crate::types::{Board, BoardList, Card};

pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

/// 409 body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictBody {
    #[serde(default)]
    conflict: bool,
    server_version: RemoteEntity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewList<'a> {
    id: &'a str,
    title: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewCard<'a> {
    list_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(flatten)]
    card: &'a CardDraft,
}

#[derive(Serialize)]
struct Versioned<'a, T: Serialize> {
    #[serde(flatten)]
    body: &'a T,
    version: u64,
}

#[derive(Serialize)]
struct VersionOnly {
    version: u64,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, RemoteError> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status.as_u16(), &body))
    }

    async fn send_empty(&self, request: reqwest::RequestBuilder) -> Result<(), RemoteError> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status.as_u16(), &body))
    }
}

fn network_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Network(e.to_string())
}

/// Map a non-success response onto the error taxonomy.
pub(crate) fn classify(status: u16, body: &str) -> RemoteError {
    match status {
        409 => match serde_json::from_str::<ConflictBody>(body) {
            Ok(parsed) => {
                if !parsed.conflict {
                    log::warn!("[lexera.remote] 409 without conflict flag, treating as stale");
                }
                RemoteError::Stale {
                    server: Box::new(parsed.server_version),
                }
            }
            Err(e) => RemoteError::Decode(format!("Unreadable 409 body: {}", e)),
        },
        404 => RemoteError::NotFound(body.to_string()),
        400..=499 => RemoteError::Rejected {
            status,
            message: body.to_string(),
        },
        _ => RemoteError::Server {
            status,
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl RemoteBoard for HttpRemote {
    async fn fetch_board(&self) -> Result<Board, RemoteError> {
        self.send(self.client.get(self.url("board"))).await
    }

    async fn save_board(&self, board: &Board) -> Result<Board, RemoteError> {
        self.send(self.client.post(self.url("board")).json(board)).await
    }

    async fn create_list(&self, list_id: &str, title: &str) -> Result<BoardList, RemoteError> {
        let body = NewList { id: list_id, title };
        self.send(self.client.post(self.url("list")).json(&body)).await
    }

    async fn update_list(
        &self,
        list_id: &str,
        update: &ListUpdate,
        version: u64,
    ) -> Result<BoardList, RemoteError> {
        let body = Versioned {
            body: update,
            version,
        };
        self.send(self.client.put(self.url(&format!("list/{}", list_id))).json(&body))
            .await
    }

    async fn delete_list(&self, list_id: &str, version: u64) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.url(&format!("list/{}", list_id)))
            .json(&VersionOnly { version });
        self.send_empty(request).await
    }

    async fn create_card(
        &self,
        list_id: &str,
        card: &CardDraft,
        index: Option<usize>,
    ) -> Result<Card, RemoteError> {
        let body = NewCard {
            list_id,
            index,
            card,
        };
        self.send(self.client.post(self.url("card")).json(&body)).await
    }

    async fn update_card(
        &self,
        card_id: &str,
        patch: &CardPatch,
        version: u64,
    ) -> Result<Card, RemoteError> {
        let body = Versioned {
            body: patch,
            version,
        };
        self.send(self.client.put(self.url(&format!("card/{}", card_id))).json(&body))
            .await
    }

    async fn delete_card(&self, card_id: &str, version: u64) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.url(&format!("card/{}", card_id)))
            .json(&VersionOnly { version });
        self.send_empty(request).await
    }

    async fn move_card(&self, request: &CardMove, version: u64) -> Result<Card, RemoteError> {
        let body = Versioned {
            body: request,
            version,
        };
        self.send(self.client.post(self.url("card/move")).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        let stale = classify(
            409,
            r#"{"conflict":true,"serverVersion":{"id":"c1","title":"Server",
                "createdAt":"2024-01-01T00:00:00Z","lastModifiedAt":"2024-01-01T00:00:00Z","version":7}}"#,
        );
        match stale {
            RemoteError::Stale { server } => assert_eq!(server.version(), 7),
            other => panic!("expected stale, got {:?}", other),
        }

        assert!(matches!(classify(409, "nope"), RemoteError::Decode(_)));
        assert!(matches!(classify(404, "card c1"), RemoteError::NotFound(_)));
        assert!(matches!(
            classify(422, "empty title"),
            RemoteError::Rejected { status: 422, .. }
        ));
        assert!(matches!(
            classify(503, ""),
            RemoteError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_request_bodies() {
        let patch = CardPatch::title("New");
        let body = serde_json::to_value(Versioned {
            body: &patch,
            version: 3,
        })
        .unwrap();
        assert_eq!(body["title"], "New");
        assert_eq!(body["version"], 3);

        let draft = CardDraft::new("Task").with_id("c1");
        let body = serde_json::to_value(NewCard {
            list_id: "l1",
            index: None,
            card: &draft,
        })
        .unwrap();
        assert_eq!(body["listId"], "l1");
        assert_eq!(body["id"], "c1");
        assert!(body.get("index").is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let remote = HttpRemote::new("http://localhost:8080/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(remote.base_url(), "http://localhost:8080/api");
        assert_eq!(remote.url("card/move"), "http://localhost:8080/api/card/move");
    }
}
