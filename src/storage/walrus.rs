/// Walrus storage backend via the publisher and aggregator HTTP APIs.
///
/// The publisher performs reservation, registration and certification on the
/// client's behalf during a single `PUT /v1/blobs`, so `reserve` and `certify`
/// here are local bookkeeping around that one request. Reads go through the
/// aggregator's `GET /v1/blobs/<id>`.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BlobStore, ChunkId, EncodedBlob, Reservation, StoredChunk, TransferReceipt};
use crate::error::{Result, VaultError};
use crate::ledger::AccountAddress;
use crate::retry;

pub const TESTNET_PUBLISHER: &str = "https://publisher.walrus-testnet.walrus.space";
pub const TESTNET_AGGREGATOR: &str = "https://aggregator.walrus-testnet.walrus.space";

#[derive(Debug, Clone)]
pub struct WalrusConfig {
    pub publisher_url: String,
    pub aggregator_url: String,
    pub timeout: Duration,
    /// Whether stored blobs may be deleted before they expire.
    pub deletable: bool,
}

impl Default for WalrusConfig {
    fn default() -> Self {
        Self {
            publisher_url: TESTNET_PUBLISHER.into(),
            aggregator_url: TESTNET_AGGREGATOR.into(),
            timeout: Duration::from_secs(300),
            deletable: false,
        }
    }
}

pub struct WalrusStore {
    client: Client,
    config: WalrusConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreResponse {
    newly_created: Option<NewlyCreated>,
    already_certified: Option<AlreadyCertified>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewlyCreated {
    blob_object: BlobObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobObject {
    blob_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlreadyCertified {
    blob_id: String,
}

impl StoreResponse {
    fn blob_id(self) -> Option<String> {
        self.newly_created
            .map(|n| n.blob_object.blob_id)
            .or(self.already_certified.map(|a| a.blob_id))
    }
}

impl WalrusStore {
    pub fn new(config: WalrusConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VaultError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn publisher(&self) -> &str {
        self.config.publisher_url.trim_end_matches('/')
    }

    fn aggregator(&self) -> &str {
        self.config.aggregator_url.trim_end_matches('/')
    }
}

/// Map a transport failure. Timeouts and connection errors are worth retrying.
fn request_error(e: reqwest::Error) -> VaultError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        VaultError::Transient(format!("network error: {e}"))
    } else {
        VaultError::Storage(e.to_string())
    }
}

fn status_error(op: &str, status: StatusCode, body: &str) -> VaultError {
    let message = format!("{op} returned {status}: {body}");
    if retry::is_transient_status(status.as_u16()) {
        VaultError::Transient(message)
    } else {
        VaultError::Storage(message)
    }
}

#[async_trait]
impl BlobStore for WalrusStore {
    fn name(&self) -> &str {
        "Walrus"
    }

    async fn reserve(
        &self,
        blob: &EncodedBlob,
        epochs: u32,
        owner: &AccountAddress,
    ) -> Result<Reservation> {
        if epochs == 0 {
            return Err(VaultError::InvalidInput("epochs must be at least 1".into()));
        }
        debug!(identifier = %blob.identifier, size = blob.size(), epochs, "Reserving via publisher");
        Ok(Reservation {
            id: Uuid::now_v7().to_string(),
            epochs,
            owner: owner.clone(),
        })
    }

    async fn transfer(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
    ) -> Result<TransferReceipt> {
        let epochs = reservation.epochs.to_string();
        let mut query = vec![
            ("epochs", epochs.as_str()),
            ("send_object_to", reservation.owner.as_str()),
        ];
        if self.config.deletable {
            query.push(("deletable", "true"));
        }

        let resp = self
            .client
            .put(format!("{}/v1/blobs", self.publisher()))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, blob.content_type.as_str())
            .body(blob.data.clone())
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error("Walrus store", status, &body));
        }

        let parsed: StoreResponse = resp
            .json()
            .await
            .map_err(|e| VaultError::Serialization(format!("Walrus store response: {e}")))?;

        Ok(TransferReceipt {
            reservation_id: reservation.id.clone(),
            bytes: blob.size(),
            remote_id: parsed.blob_id(),
        })
    }

    async fn certify(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
        receipt: &TransferReceipt,
    ) -> Result<StoredChunk> {
        if receipt.reservation_id != reservation.id {
            return Err(VaultError::Storage(
                "transfer receipt belongs to another reservation".into(),
            ));
        }
        let id = receipt.remote_id.as_deref().ok_or_else(|| {
            VaultError::Storage(format!(
                "publisher did not certify {} (no blob id in response)",
                blob.identifier
            ))
        })?;
        Ok(StoredChunk {
            id: ChunkId::parse(id)?,
            identifier: blob.identifier.clone(),
            size: blob.size(),
        })
    }

    async fn retrieve(&self, id: &ChunkId) -> Result<Bytes> {
        let resp = self
            .client
            .get(format!("{}/v1/blobs/{}", self.aggregator(), id))
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(VaultError::Storage(format!("blob {id} not found")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(blob = %id, %status, "Aggregator read failed");
            return Err(status_error("Walrus read", status, &body));
        }

        resp.bytes().await.map_err(request_error)
    }
}
