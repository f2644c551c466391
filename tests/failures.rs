mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use coldcache::capability::{CapabilityRequest, OwnershipCapability};
use coldcache::crypto::sign::LocalWallet;
use coldcache::download::NoProgress;
use coldcache::error::{ErrorCategory, Result, Stage, VaultError};
use coldcache::ledger::{AccountAddress, AssetRegistry, NewAssetRecord};
use coldcache::seal::{AccessApproval, EncryptionId, EncryptionService, PolicyId};
use coldcache::storage::{BlobStore, ChunkId};
use coldcache::upload::Publisher;

use common::*;

#[tokio::test]
async fn always_transient_store_makes_exactly_four_attempts() {
    let h = Harness::with_fault(fast_config(), Fault::AlwaysTransient);
    let err = h
        .publisher
        .publish(&asset("Doomed", sample(2 * MIB)), h.publisher_wallet.address())
        .await
        .unwrap_err();

    assert_eq!(h.store.transfers(), 4);
    assert_eq!(err.stage(), Some(Stage::Storing));
    assert_eq!(err.category(), ErrorCategory::Infrastructure);
    match err.root() {
        VaultError::UploadExhausted {
            chunk, attempts, ..
        } => {
            assert_eq!(chunk, "Doomed.encrypted");
            assert_eq!(*attempts, 4);
        }
        other => panic!("unexpected {other:?}"),
    }
    // every attempt leaves its reservation behind
    assert_eq!(h.store.inner.pending_reservations().await.len(), 4);
    assert!(h.store.inner.is_empty().await);
}

#[tokio::test]
async fn transient_failures_within_budget_recover() {
    let h = Harness::with_fault(fast_config(), Fault::TransientTimes(2));
    let data = sample(2 * MIB);
    let record = h.publish(&asset("Bumpy", data.clone())).await;

    // two failed + one good for the prefix, one good for the suffix
    assert_eq!(h.store.transfers(), 4);

    let buyer = h.buyer(&record).await;
    let downloaded = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());
}

#[tokio::test]
async fn non_transient_store_failure_is_not_retried() {
    let h = Harness::with_fault(fast_config(), Fault::RejectReservation);
    let err = h
        .publisher
        .publish(&asset("Rejected", sample(2 * MIB)), h.publisher_wallet.address())
        .await
        .unwrap_err();

    assert_eq!(h.store.reservations(), 1);
    assert!(matches!(err.root(), VaultError::Storage(_)));
}

struct BrokenSeal;

#[async_trait]
impl EncryptionService for BrokenSeal {
    fn name(&self) -> &str {
        "broken"
    }

    async fn encrypt(
        &self,
        _data: &[u8],
        _threshold: u8,
        _policy: &PolicyId,
        _id: &EncryptionId,
    ) -> Result<Vec<u8>> {
        Err(VaultError::Encryption("key servers unreachable".into()))
    }

    async fn request_capability(
        &self,
        account: &AccountAddress,
        policy: &PolicyId,
        ttl: Duration,
    ) -> Result<CapabilityRequest> {
        CapabilityRequest::new(account.clone(), policy.clone(), ttl)
    }

    async fn decrypt(
        &self,
        _encrypted: &[u8],
        _capability: &OwnershipCapability,
        _approval: &AccessApproval,
    ) -> Result<Vec<u8>> {
        Err(VaultError::AccessDenied("broken".into()))
    }
}

#[tokio::test]
async fn encryption_failure_aborts_before_any_upload() {
    let store = Arc::new(ProbeStore::new(Fault::None));
    let publisher = Publisher::new(store.clone(), Arc::new(BrokenSeal), fast_config());
    let err = publisher
        .publish(&asset("Locked", sample(2 * MIB)), &AccountAddress::new("0xpub"))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Encrypting));
    assert_eq!(store.reservations(), 0);
    assert_eq!(store.transfers(), 0);
}

#[tokio::test]
async fn account_without_token_is_denied_before_download() {
    let h = Harness::new(fast_config());
    let record = h.publish(&asset("Paid", sample(2 * MIB))).await;

    let stranger = LocalWallet::generate();
    let log = ProgressLog::default();
    let err = h
        .downloader()
        .download(&record, &stranger, &log)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Verifying));
    assert_eq!(err.category(), ErrorCategory::Access);
    assert_eq!(h.store.retrievals(), 0);
    assert_eq!(log.last().unwrap().stage, Stage::Error);
}

#[tokio::test]
async fn lying_token_lookup_cannot_grant_access() {
    let h = Harness::new(fast_config());
    let record = h.publish(&asset("Guarded", sample(2 * MIB))).await;
    let owner = h.buyer(&record).await;
    let thief = LocalWallet::generate();

    let liar = Arc::new(LyingLocator {
        ledger: h.ledger.clone(),
        token_of: owner.address().clone(),
    });
    let err = h
        .downloader_with(liar)
        .download(&record, &thief, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Decrypting));
    assert_eq!(err.category(), ErrorCategory::Access);
    assert!(matches!(err.root(), VaultError::AccessDenied(_)));
}

#[tokio::test]
async fn unknown_object_version_needs_republish() {
    let h = Harness::new(fast_config());
    let record = h.publish(&asset("Ancient", sample(2 * MIB))).await;
    let buyer = h.buyer(&record).await;

    let primary = record.primary_chunk().unwrap();
    let mut sealed = h.store.inner.retrieve(&primary).await.unwrap().to_vec();
    sealed[4] = 0x09;
    h.store.inner.overwrite(&primary, sealed).await;

    let err = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Compatibility);
    assert!(matches!(err.root(), VaultError::Incompatible(_)));
}

#[tokio::test]
async fn empty_plain_chunk_is_a_data_error() {
    let h = Harness::new(fast_config());
    let record = h.publish(&asset("Hollow", sample(2 * MIB))).await;
    let buyer = h.buyer(&record).await;

    let secondary = ChunkId::parse(record.secondary_chunk_ref().unwrap()).unwrap();
    h.store.inner.overwrite(&secondary, Vec::<u8>::new()).await;

    let err = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Reconstructing));
    assert_eq!(err.category(), ErrorCategory::Integrity);
}

#[tokio::test]
async fn truncated_plain_chunk_is_a_data_error() {
    let h = Harness::new(fast_config());
    let record = h.publish(&asset("Short", sample(2 * MIB))).await;
    let buyer = h.buyer(&record).await;

    let secondary = ChunkId::parse(record.secondary_chunk_ref().unwrap()).unwrap();
    let plain = h.store.inner.retrieve(&secondary).await.unwrap();
    h.store
        .inner
        .overwrite(&secondary, plain.slice(..plain.len() - 1))
        .await;

    let err = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), VaultError::Integrity(_)));
}

#[tokio::test]
async fn placeholder_chunk_id_is_rejected_before_any_request() {
    let h = Harness::new(fast_config());
    let record = h
        .ledger
        .publish_asset(NewAssetRecord {
            title: "Ghost".into(),
            description: String::new(),
            genre: String::new(),
            price: 0,
            publisher: AccountAddress::new("0xpub"),
            primary_chunk_id: "walrus_1712345678".into(),
            cover_chunk_id: String::new(),
            secondary_chunk_id: String::new(),
            encryption_id: String::new(),
            enhanced_metadata: String::new(),
        })
        .await
        .unwrap();

    let err = h
        .downloader()
        .download(&record, &LocalWallet::generate(), &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    assert_eq!(h.store.retrievals(), 0);
}

#[tokio::test]
async fn placeholder_plain_chunk_fails_instead_of_truncating() {
    let h = Harness::new(fast_config());
    let data = sample(200 * KIB);

    let id = EncryptionId::generate(&policy());
    let sealed = h
        .seal
        .encrypt(&data[..100 * KIB], 2, &policy(), &id)
        .await
        .unwrap();
    let chunk = coldcache::storage::publish_blob(
        h.store.as_ref(),
        coldcache::storage::BlobFile::new("Stub.encrypted", "application/octet-stream", sealed),
        2,
        h.publisher_wallet.address(),
    )
    .await
    .unwrap();

    let record = h
        .ledger
        .publish_asset(NewAssetRecord {
            title: "Stub".into(),
            description: String::new(),
            genre: String::new(),
            price: 1,
            publisher: h.publisher_wallet.address().clone(),
            primary_chunk_id: chunk.id.to_string(),
            cover_chunk_id: String::new(),
            secondary_chunk_id: "walrus_pending_data".into(),
            encryption_id: id.to_string(),
            enhanced_metadata: String::new(),
        })
        .await
        .unwrap();
    let buyer = h.buyer(&record).await;

    let err = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Verifying));
    assert_eq!(err.category(), ErrorCategory::Input);
    assert_eq!(h.store.retrievals(), 0);
}
