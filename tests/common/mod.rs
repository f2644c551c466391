#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use coldcache::asset::{Asset, Listing};
use coldcache::crypto::sign::LocalWallet;
use coldcache::download::{DownloadConfig, DownloadProgress, Downloader};
use coldcache::error::{Result, VaultError};
use coldcache::ledger::memory::MemoryLedger;
use coldcache::ledger::{AccountAddress, AssetRecord, TokenLocator, TokenPage};
use coldcache::retry::RetryPolicy;
use coldcache::seal::{LocalKeyServer, PolicyId};
use coldcache::storage::{
    BlobStore, ChunkId, EncodedBlob, MemoryStore, Reservation, StoredChunk, TransferReceipt,
};
use coldcache::upload::{Publisher, UploadConfig};

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

pub fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect()
}

pub fn listing(title: &str) -> Listing {
    Listing {
        title: title.into(),
        description: "test package".into(),
        genre: "arcade".into(),
        price: 100,
    }
}

pub fn asset(title: &str, data: Vec<u8>) -> Asset {
    Asset::from_bytes(listing(title), &format!("{title}.zip"), data)
}

/// Upload config with a small bypass threshold and instant retries.
pub fn fast_config() -> UploadConfig {
    UploadConfig {
        bypass_threshold: 64 * KIB as u64,
        retry: RetryPolicy::immediate(3),
        ..Default::default()
    }
}

pub fn policy() -> PolicyId {
    PolicyId::testnet()
}

/// What a store wrapper should do on a given call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Transient failure on every transfer.
    AlwaysTransient,
    /// Transient failure on the first n transfers.
    TransientTimes(u32),
    /// Non-transient failure on every reservation.
    RejectReservation,
}

/// Delegates to a [`MemoryStore`], counting calls and injecting faults.
pub struct ProbeStore {
    pub inner: MemoryStore,
    pub fault: Mutex<Fault>,
    pub transfers: AtomicU32,
    pub reservations: AtomicU32,
    pub retrievals: AtomicU32,
}

impl ProbeStore {
    pub fn new(fault: Fault) -> Self {
        Self {
            inner: MemoryStore::new(),
            fault: Mutex::new(fault),
            transfers: AtomicU32::new(0),
            reservations: AtomicU32::new(0),
            retrievals: AtomicU32::new(0),
        }
    }

    pub fn transfers(&self) -> u32 {
        self.transfers.load(Ordering::SeqCst)
    }

    pub fn reservations(&self) -> u32 {
        self.reservations.load(Ordering::SeqCst)
    }

    pub fn retrievals(&self) -> u32 {
        self.retrievals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for ProbeStore {
    fn name(&self) -> &str {
        "probe"
    }

    async fn reserve(
        &self,
        blob: &EncodedBlob,
        epochs: u32,
        owner: &AccountAddress,
    ) -> Result<Reservation> {
        self.reservations.fetch_add(1, Ordering::SeqCst);
        let fault = *self.fault.lock().unwrap();
        if fault == Fault::RejectReservation {
            return Err(VaultError::Storage("wallet rejected the transaction".into()));
        }
        self.inner.reserve(blob, epochs, owner).await
    }

    async fn transfer(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
    ) -> Result<TransferReceipt> {
        let n = self.transfers.fetch_add(1, Ordering::SeqCst) + 1;
        let fault = *self.fault.lock().unwrap();
        match fault {
            Fault::AlwaysTransient => {
                return Err(VaultError::Transient("storage node returned 503".into()))
            }
            Fault::TransientTimes(limit) if n <= limit => {
                return Err(VaultError::Storage("400 Bad Request".into()))
            }
            _ => {}
        }
        self.inner.transfer(blob, reservation).await
    }

    async fn certify(
        &self,
        blob: &EncodedBlob,
        reservation: &Reservation,
        receipt: &TransferReceipt,
    ) -> Result<StoredChunk> {
        self.inner.certify(blob, reservation, receipt).await
    }

    async fn retrieve(&self, id: &ChunkId) -> Result<Bytes> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(id).await
    }
}

/// Token locator that claims every account holds `token_of`'s tokens.
pub struct LyingLocator {
    pub ledger: Arc<MemoryLedger>,
    pub token_of: AccountAddress,
}

#[async_trait]
impl TokenLocator for LyingLocator {
    async fn owned_tokens(
        &self,
        _owner: &AccountAddress,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TokenPage> {
        self.ledger.owned_tokens(&self.token_of, cursor, limit).await
    }
}

/// Full in-process deployment: ledger, key server, probed store.
pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<ProbeStore>,
    pub seal: Arc<LocalKeyServer>,
    pub publisher: Publisher,
    pub publisher_wallet: LocalWallet,
}

impl Harness {
    pub fn new(config: UploadConfig) -> Self {
        Self::with_fault(config, Fault::None)
    }

    pub fn with_fault(config: UploadConfig, fault: Fault) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(ProbeStore::new(fault));
        let seal = Arc::new(LocalKeyServer::generate(ledger.clone()));
        let publisher = Publisher::new(store.clone(), seal.clone(), config);
        Self {
            ledger,
            store,
            seal,
            publisher,
            publisher_wallet: LocalWallet::generate(),
        }
    }

    pub fn downloader(&self) -> Downloader {
        self.downloader_with(self.ledger.clone())
    }

    pub fn downloader_with(&self, tokens: Arc<dyn TokenLocator>) -> Downloader {
        Downloader::new(
            self.store.clone(),
            self.seal.clone(),
            tokens,
            DownloadConfig::default(),
        )
    }

    pub async fn publish(&self, asset: &Asset) -> AssetRecord {
        self.publisher
            .publish_and_record(asset, None, self.publisher_wallet.address(), self.ledger.as_ref())
            .await
            .unwrap()
    }

    /// A new wallet that has bought `record`.
    pub async fn buyer(&self, record: &AssetRecord) -> LocalWallet {
        let wallet = LocalWallet::generate();
        self.ledger
            .purchase(&record.id, wallet.address())
            .await
            .unwrap();
        wallet
    }
}

/// Records every progress event.
#[derive(Default)]
pub struct ProgressLog(pub Mutex<Vec<DownloadProgress>>);

impl ProgressLog {
    pub fn percents(&self) -> Vec<u8> {
        self.0.lock().unwrap().iter().map(|p| p.percent).collect()
    }

    pub fn last(&self) -> Option<DownloadProgress> {
        self.0.lock().unwrap().last().cloned()
    }
}

impl coldcache::download::ProgressSink for ProgressLog {
    fn report(&self, progress: DownloadProgress) {
        self.0.lock().unwrap().push(progress);
    }
}
