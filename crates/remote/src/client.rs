//! Async HTTP client using `reqwest`.
//!
//! The session token travels as the `ctxid` query parameter on RPC and
//! download requests and as a form field on uploads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use emdash_protocol::constants::{
    RPC_CODE_NOT_FOUND, RPC_PATH, RPC_REQUEST_TIMEOUT, TRANSFER_CONNECT_TIMEOUT,
};
use emdash_protocol::{
    BinaryDescriptor, ContextId, Method, Record, RecordRef, RpcRequest, RpcResponse,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::Error;

/// Characters left unescaped in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// One streamed upload.
///
/// Without `rectype` the file is attached to `target` itself; with one, a
/// new child record of that type is created under `target`.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub target: RecordRef,
    pub rectype: Option<String>,
    /// Form field name of the file part.
    pub param: String,
    pub fields: Vec<(String, String)>,
    pub path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UploadResponse {
    One(Record),
    Many(Vec<Record>),
}

/// EMDash database client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    next_id: AtomicU64,
}

impl Client {
    /// Creates a client for the database at `host` (e.g. `https://ncmidb.bcm.edu`).
    pub fn new(host: &str) -> Result<Self, Error> {
        let base_url = host.trim_end_matches('/').to_string();
        let parsed =
            reqwest::Url::parse(&base_url).map_err(|e| Error::InvalidHost(format!("{host}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidHost(host.to_string()));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(TRANSFER_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs one JSON-RPC call.
    async fn call<P, T>(
        &self,
        ctx: Option<&ContextId>,
        method: Method,
        params: &P,
    ) -> Result<Option<T>, Error>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params)?;
        let url = format!("{}{}", self.base_url, RPC_PATH);

        let mut builder = self
            .http
            .post(&url)
            .timeout(RPC_REQUEST_TIMEOUT)
            .json(&request);
        if let Some(ctx) = ctx {
            builder = builder.query(&[("ctxid", ctx.as_str())]);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        let rpc: RpcResponse = serde_json::from_slice(&body)?;
        if let Some(err) = rpc.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        debug!(%method, id, "rpc call succeeded");
        Ok(rpc.parse_result()?)
    }

    /// Logs in and returns a fresh context id.
    pub async fn login(&self, username: &str, password: &str) -> Result<ContextId, Error> {
        self.call::<_, ContextId>(None, Method::Login, &(username, password))
            .await?
            .ok_or(Error::EmptyResult("auth.login"))
    }

    /// Fetches one record.
    pub async fn get_record(&self, ctx: &ContextId, name: &RecordRef) -> Result<Record, Error> {
        self.call::<_, Record>(Some(ctx), Method::RecordGet, &(name,))
            .await?
            .ok_or_else(|| Error::Rpc {
                code: RPC_CODE_NOT_FOUND,
                message: format!("record {name} not found"),
            })
    }

    /// Lists the children of `name`, `depth` levels down.
    pub async fn children(
        &self,
        ctx: &ContextId,
        name: &RecordRef,
        depth: i32,
    ) -> Result<Vec<RecordRef>, Error> {
        Ok(self
            .call::<_, Vec<RecordRef>>(Some(ctx), Method::RelChildren, &(name, depth))
            .await?
            .unwrap_or_default())
    }

    /// Lists binaries attached to any of `records`. A `limit` of 0 means no limit.
    pub async fn find_binaries(
        &self,
        ctx: &ContextId,
        records: &[RecordRef],
        limit: u32,
    ) -> Result<Vec<BinaryDescriptor>, Error> {
        let params = serde_json::json!({ "record": records, "count": limit });
        Ok(self
            .call::<_, Vec<BinaryDescriptor>>(Some(ctx), Method::BinaryFind, &params)
            .await?
            .unwrap_or_default())
    }

    /// Streams a binary into `writer`, returning the number of bytes written.
    pub async fn download_to<W>(
        &self,
        ctx: &ContextId,
        descriptor: &BinaryDescriptor,
        writer: &mut W,
    ) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let url = format!(
            "{}/download/{}/{}",
            self.base_url,
            utf8_percent_encode(descriptor.name.as_str(), PATH_SEGMENT),
            utf8_percent_encode(&descriptor.filename, PATH_SEGMENT),
        );
        let mut resp = self
            .http
            .get(&url)
            .query(&[("ctxid", ctx.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        debug!(binary = %descriptor.name, bytes = written, "download complete");
        Ok(written)
    }

    /// Streams a local file to the database together with its fields.
    pub async fn upload(&self, ctx: &ContextId, req: &UploadRequest) -> Result<Record, Error> {
        let target = utf8_percent_encode(req.target.as_str(), PATH_SEGMENT);
        let url = match &req.rectype {
            Some(rectype) => format!(
                "{}/record/{target}/new/{}",
                self.base_url,
                utf8_percent_encode(rectype, PATH_SEGMENT)
            ),
            None => format!("{}/record/{target}/edit", self.base_url),
        };

        let file = tokio::fs::File::open(&req.path).await?;
        let len = file.metadata().await?.len();
        let file_name = req
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len).file_name(file_name);

        let mut form = Form::new()
            .text("_format", "json")
            .text("ctxid", ctx.as_str().to_string());
        for (key, value) in &req.fields {
            form = form.text(key.clone(), value.clone());
        }
        form = form.part(req.param.clone(), part);

        let resp = self.http.put(&url).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        let record = match serde_json::from_slice::<UploadResponse>(&body)? {
            UploadResponse::One(record) => record,
            UploadResponse::Many(records) => records
                .into_iter()
                .next()
                .ok_or(Error::EmptyResult("upload"))?,
        };
        debug!(parent = %req.target, record = %record.name, bytes = len, "upload complete");
        Ok(record)
    }
}
