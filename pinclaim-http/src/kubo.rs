//! A [`ContentStore`] backed by an IPFS (Kubo) node's RPC API.
//!
//! Every RPC call is a `POST` under `/api/v0/`:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | add       | `add?cid-version=N&wrap-with-directory=B&pin=true` (multipart `file`) |
//! | stat      | `files/stat?arg=/ipfs/<cid>` |
//! | remove    | `pin/rm?arg=<cid>` |

use std::time::Duration;

use async_trait::async_trait;
use pinclaim::store::{AddOptions, ContentStore, ObjectStat, StoreError};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::Instrument;
use url::Url;

use crate::error::HttpClientError;
use crate::read_body;

/// One line of the newline-delimited JSON answered by `add`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddEntry {
    #[serde(default)]
    name: String,
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatResponse {
    size: u64,
    #[serde(default)]
    cumulative_size: u64,
}

/// HTTP client for a Kubo node.
#[derive(Debug, Clone)]
pub struct KuboContentStore {
    client: Client,
    base_url: Url,
    timeout: Option<Duration>,
}

impl KuboContentStore {
    /// Creates a client for the node at `base_url` (e.g. `http://127.0.0.1:5001`).
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client: Client::new(),
            base_url,
            timeout: None,
        }
    }

    /// Parses `base_url` and creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError::UrlParse`] if the URL is malformed.
    pub fn try_new(base_url: &str) -> Result<Self, HttpClientError> {
        let url = Url::parse(base_url).map_err(|source| HttpClientError::UrlParse {
            context: "Failed to parse IPFS node URL",
            source,
        })?;
        Ok(Self::new(url))
    }

    /// Sets a timeout for every request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the node's base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(
        &self,
        rpc: &str,
        query: &[(&str, &str)],
        context: &'static str,
    ) -> Result<Url, HttpClientError> {
        let mut url = self
            .base_url
            .join(&format!("api/v0/{rpc}"))
            .map_err(|source| HttpClientError::UrlParse { context, source })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn post(
        &self,
        url: Url,
        form: Option<Form>,
        context: &'static str,
    ) -> Result<String, HttpClientError> {
        let mut req = self.client.post(url);
        if let Some(form) = form {
            req = req.multipart(form);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let response = req
            .send()
            .await
            .map_err(|source| HttpClientError::Http { context, source })?;
        read_body(response, context).await
    }

    /// Adds a file and returns the content id of the last entry the node
    /// reports, which is the wrapping directory when
    /// [`AddOptions::wrap_with_directory`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] on transport or status failure, and
    /// [`HttpClientError::Malformed`] if the node reports no entries.
    pub async fn add(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &AddOptions,
    ) -> Result<String, HttpClientError> {
        const CONTEXT: &str = "POST /api/v0/add";
        let cid_version = options.cid_version.to_string();
        let wrap = if options.wrap_with_directory { "true" } else { "false" };
        let url = self.endpoint(
            "add",
            &[
                ("cid-version", cid_version.as_str()),
                ("wrap-with-directory", wrap),
                ("pin", "true"),
            ],
            CONTEXT,
        )?;
        let part = Part::bytes(bytes).file_name(filename.to_owned());
        let body = self.post(url, Some(Form::new().part("file", part)), CONTEXT).await?;

        let mut last = None;
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            let entry: AddEntry = serde_json::from_str(line).map_err(|source| {
                HttpClientError::JsonDeserialization {
                    context: CONTEXT,
                    source,
                }
            })?;
            tracing::debug!(name = %entry.name, hash = %entry.hash, "node added entry");
            last = Some(entry.hash);
        }
        last.ok_or_else(|| HttpClientError::Malformed {
            context: CONTEXT,
            reason: "node reported no added entries".to_owned(),
        })
    }

    /// Returns the size of `content_id`.
    ///
    /// Directories report a zero `Size`; their `CumulativeSize` is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] on transport, status, or decoding failure.
    pub async fn stat_object(&self, content_id: &str) -> Result<ObjectStat, HttpClientError> {
        const CONTEXT: &str = "POST /api/v0/files/stat";
        let arg = format!("/ipfs/{content_id}");
        let url = self.endpoint("files/stat", &[("arg", arg.as_str())], CONTEXT)?;
        let body = self.post(url, None, CONTEXT).await?;
        let stat: StatResponse = serde_json::from_str(&body).map_err(|source| {
            HttpClientError::JsonDeserialization {
                context: CONTEXT,
                source,
            }
        })?;
        let size = if stat.size == 0 {
            stat.cumulative_size
        } else {
            stat.size
        };
        Ok(ObjectStat {
            content_id: content_id.to_owned(),
            size,
        })
    }

    /// Unpins `content_id` so the node's garbage collector can drop it.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] on transport or status failure.
    pub async fn unpin(&self, content_id: &str) -> Result<(), HttpClientError> {
        const CONTEXT: &str = "POST /api/v0/pin/rm";
        let url = self.endpoint("pin/rm", &[("arg", content_id)], CONTEXT)?;
        self.post(url, None, CONTEXT).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for KuboContentStore {
    async fn add_object(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &AddOptions,
    ) -> Result<String, StoreError> {
        let size = bytes.len();
        self.add(bytes, filename, options)
            .instrument(tracing::info_span!("pinclaim.kubo.add", %filename, size))
            .await
            .map_err(StoreError::from)
    }

    async fn stat(&self, content_id: &str) -> Result<ObjectStat, StoreError> {
        self.stat_object(content_id)
            .instrument(tracing::info_span!("pinclaim.kubo.stat", %content_id))
            .await
            .map_err(StoreError::from)
    }

    async fn remove(&self, content_id: &str) -> Result<(), StoreError> {
        self.unpin(content_id)
            .instrument(tracing::info_span!("pinclaim.kubo.remove", %content_id))
            .await
            .map_err(StoreError::from)
    }
}
