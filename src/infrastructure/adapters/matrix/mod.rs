//! Matrix client-server API adapter

pub mod events;

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::application::errors::TransportError;
use crate::domain::entities::{Identity, OutgoingMessage, RoomId};
use crate::domain::traits::{EventSource, SyncBatch, Transport};
use events::SyncResponse;

/// Extra time allowed on top of a sync long-poll before the request is abandoned
const SYNC_GRACE: Duration = Duration::from_secs(30);

/// Timeout for every non-sync request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HTML_FORMAT: &str = "org.matrix.custom.html";

/// Skip room history on the first sync after login
const BACKLOG_FILTER: &str = r#"{"room":{"timeline":{"limit":0}}}"#;

#[derive(Debug, Clone)]
struct Credentials {
    password: String,
}

/// Matrix homeserver client
pub struct MatrixClient {
    homeserver: Url,
    client: Client,
    user: Identity,
    credentials: Option<Credentials>,
    access_token: RwLock<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

impl MatrixClient {
    /// Client for the polling deployment; `login` obtains the access token.
    pub fn with_password(
        homeserver: &str,
        user: Identity,
        password: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let mut client = Self::build(homeserver, user)?;
        client.credentials = Some(Credentials {
            password: password.into(),
        });
        Ok(client)
    }

    /// Client for the application-service deployment, authenticated by `as_token`.
    pub fn with_token(
        homeserver: &str,
        user: Identity,
        token: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = Self::build(homeserver, user)?;
        *client.access_token.write().map_err(|_| lock_poisoned())? = Some(token.into());
        Ok(client)
    }

    fn build(homeserver: &str, user: Identity) -> Result<Self, TransportError> {
        let homeserver = Url::parse(homeserver)
            .map_err(|e| TransportError::Connection(format!("invalid homeserver URL {}: {}", homeserver, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            homeserver,
            client,
            user,
            credentials: None,
            access_token: RwLock::new(None),
        })
    }

    pub fn user(&self) -> &Identity {
        &self.user
    }

    /// `{homeserver}/_matrix/client/v3/{segments...}`, each segment percent-encoded
    fn api_url(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Connection(format!("homeserver URL {} cannot be a base", self.homeserver)))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3"])
            .extend(segments);
        Ok(url)
    }

    fn token(&self) -> Result<String, TransportError> {
        self.access_token
            .read()
            .map_err(|_| lock_poisoned())?
            .clone()
            .ok_or_else(|| TransportError::Auth("not logged in".to_string()))
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, TransportError> {
        Ok(request.bearer_auth(self.token()?))
    }

    /// Content of an `m.room.message` for a reply
    pub fn message_content(message: &OutgoingMessage) -> Value {
        let mut content = json!({
            "msgtype": "m.text",
            "body": message.body,
        });
        if let Some(html) = &message.html {
            content["format"] = json!(HTML_FORMAT);
            content["formatted_body"] = json!(html);
        }
        content
    }

    async fn sync(&self, since: Option<&str>, filter: Option<&str>, timeout: Duration) -> Result<SyncResponse, TransportError> {
        let mut url = self.api_url(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &timeout.as_millis().to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
            if let Some(filter) = filter {
                query.append_pair("filter", filter);
            }
        }

        let request = self.authed(self.client.get(url).timeout(timeout + SYNC_GRACE))?;
        decode(request.send().await?).await
    }
}

fn lock_poisoned() -> TransportError {
    TransportError::Auth("access token lock poisoned".to_string())
}

/// Turn a homeserver response into `R` or a typed error
async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body: MatrixErrorBody = response.json().await.unwrap_or_default();
        if body.errcode == "M_UNKNOWN_TOKEN" || body.errcode == "M_MISSING_TOKEN" {
            return Err(TransportError::Auth(format!("{}: {}", body.errcode, body.error)));
        }
        return Err(TransportError::Http {
            status: status.as_u16(),
            errcode: body.errcode,
            message: body.error,
        });
    }

    response
        .json()
        .await
        .map_err(|e| TransportError::Parse(e.to_string()))
}

#[async_trait]
impl Transport for MatrixClient {
    async fn login(&self) -> Result<Identity, TransportError> {
        #[derive(Serialize)]
        struct Identifier<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            user: &'a str,
        }

        #[derive(Serialize)]
        struct LoginRequest<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            identifier: Identifier<'a>,
            password: &'a str,
            initial_device_display_name: &'a str,
        }

        #[derive(Deserialize)]
        struct LoginResponse {
            user_id: String,
            access_token: String,
        }

        let Some(credentials) = &self.credentials else {
            // token-authenticated (application service): nothing to do
            self.token()?;
            return Ok(self.user.clone());
        };

        let request = LoginRequest {
            kind: "m.login.password",
            identifier: Identifier {
                kind: "m.id.user",
                user: self.user.as_str(),
            },
            password: &credentials.password,
            initial_device_display_name: "ledger-relay",
        };

        let response = self
            .client
            .post(self.api_url(&["login"])?)
            .json(&request)
            .send()
            .await?;
        let data: LoginResponse = decode(response).await?;

        if data.user_id != self.user.as_str() {
            tracing::warn!("Logged in as {} but configured as {}", data.user_id, self.user);
        }
        *self.access_token.write().map_err(|_| lock_poisoned())? = Some(data.access_token);
        tracing::info!("Connected to {}", self.homeserver);
        Ok(Identity::new(data.user_id))
    }

    async fn joined_rooms(&self) -> Result<Vec<RoomId>, TransportError> {
        #[derive(Deserialize)]
        struct Response {
            joined_rooms: Vec<String>,
        }

        let request = self.authed(self.client.get(self.api_url(&["joined_rooms"])?))?;
        let data: Response = decode(request.send().await?).await?;
        Ok(data.joined_rooms.into_iter().map(RoomId::new).collect())
    }

    async fn join_room(&self, room: &RoomId) -> Result<RoomId, TransportError> {
        #[derive(Deserialize)]
        struct Response {
            room_id: String,
        }

        let request = self
            .authed(self.client.post(self.api_url(&["join", room.as_str()])?))?
            .json(&json!({}));
        let data: Response = decode(request.send().await?).await?;
        Ok(RoomId::new(data.room_id))
    }

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<Identity>, TransportError> {
        #[derive(Deserialize)]
        struct Response {
            joined: BTreeMap<String, Value>,
        }

        let url = self.api_url(&["rooms", room.as_str(), "joined_members"])?;
        let request = self.authed(self.client.get(url))?;
        let data: Response = decode(request.send().await?).await?;
        Ok(data.joined.into_keys().map(Identity::new).collect())
    }

    async fn send_message(&self, room: &RoomId, message: &OutgoingMessage) -> Result<String, TransportError> {
        #[derive(Deserialize)]
        struct Response {
            event_id: String,
        }

        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.api_url(&["rooms", room.as_str(), "send", "m.room.message", &txn_id])?;
        let request = self
            .authed(self.client.put(url))?
            .json(&Self::message_content(message));
        let data: Response = decode(request.send().await?).await?;
        Ok(data.event_id)
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if self.credentials.is_none() {
            // never invalidate an application-service token
            return Ok(());
        }
        let request = self
            .authed(self.client.post(self.api_url(&["logout"])?))?
            .json(&json!({}));
        let _: Value = decode(request.send().await?).await?;
        *self.access_token.write().map_err(|_| lock_poisoned())? = None;
        Ok(())
    }
}

#[async_trait]
impl EventSource for MatrixClient {
    async fn initial_token(&self) -> Result<String, TransportError> {
        let response = self.sync(None, Some(BACKLOG_FILTER), Duration::ZERO).await?;
        Ok(response.next_batch)
    }

    async fn poll(&self, since: &str, timeout: Duration) -> Result<SyncBatch, TransportError> {
        let response = self.sync(Some(since), None, timeout).await?;
        let next_batch = response.next_batch.clone();
        Ok(SyncBatch {
            next_batch,
            events: response.into_events(&self.user),
        })
    }
}
