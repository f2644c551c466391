mod common;

use std::io::Write;

use coldcache::asset::Asset;
use coldcache::detect::EncryptionMode;
use coldcache::download::NoProgress;
use coldcache::error::Stage;
use coldcache::ledger::{AssetRegistry, NewAssetRecord};
use coldcache::plan::{self, GIB};
use coldcache::retry::RetryPolicy;
use coldcache::seal::{EncryptionId, EncryptionService, PolicyId};
use coldcache::storage::{self, BlobFile};
use coldcache::upload::UploadConfig;

use common::*;

#[tokio::test]
async fn forty_mib_asset_splits_six_and_thirty_four() {
    let h = Harness::new(UploadConfig {
        retry: RetryPolicy::immediate(3),
        ..Default::default()
    });
    let data = sample(40 * MIB);
    let record = h.publish(&asset("Frostbite", data.clone())).await;

    let meta = record.metadata().unwrap();
    let plan = meta.plan().unwrap();
    assert_eq!(plan.protected_length, 6 * MIB as u64);
    assert_eq!(plan.plain_length, 34 * MIB as u64);

    let buyer = h.buyer(&record).await;
    let log = ProgressLog::default();
    let downloaded = h.downloader().download(&record, &buyer, &log).await.unwrap();

    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());
    assert!(matches!(downloaded.mode, EncryptionMode::Partial { .. }));
    assert_eq!(downloaded.content_type, "application/zip");
    assert_eq!(downloaded.file_name, "Frostbite.zip");
    assert_eq!(log.percents(), vec![5, 15, 25, 45, 70, 85, 100]);
    assert_eq!(log.last().unwrap().stage, Stage::Complete);
}

#[tokio::test]
async fn small_asset_is_unencrypted_and_returned_unmodified() {
    let h = Harness::new(UploadConfig::default());
    let data = sample(500 * KIB);
    let record = h.publish(&asset("Tiny", data.clone())).await;

    assert!(record.encryption_id_ref().is_none());
    assert!(record.secondary_chunk_ref().is_none());
    assert!(record.metadata().unwrap().plan().is_none());

    // no token needed for an unencrypted asset
    let stranger = coldcache::crypto::sign::LocalWallet::generate();
    let log = ProgressLog::default();
    let downloaded = h.downloader().download(&record, &stranger, &log).await.unwrap();

    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());
    assert_eq!(downloaded.mode, EncryptionMode::Unencrypted);
    assert_eq!(h.store.retrievals(), 1);
    assert_eq!(log.percents(), vec![5, 15, 50, 100]);
}

#[tokio::test]
async fn legacy_single_chunk_asset_is_decrypted_directly() {
    let h = Harness::new(fast_config());
    let data = sample(200 * KIB);

    let id = EncryptionId::generate(&policy());
    let sealed = h.seal.encrypt(&data, 2, &policy(), &id).await.unwrap();
    let chunk = storage::publish_blob(
        h.store.as_ref(),
        BlobFile::new("Old.encrypted", "application/octet-stream", sealed),
        2,
        h.publisher_wallet.address(),
    )
    .await
    .unwrap();

    let record = h
        .ledger
        .publish_asset(NewAssetRecord {
            title: "Old".into(),
            description: String::new(),
            genre: String::new(),
            price: 1,
            publisher: h.publisher_wallet.address().clone(),
            primary_chunk_id: chunk.id.to_string(),
            cover_chunk_id: String::new(),
            secondary_chunk_id: String::new(),
            encryption_id: id.to_string(),
            enhanced_metadata: String::new(),
        })
        .await
        .unwrap();

    let buyer = h.buyer(&record).await;
    let log = ProgressLog::default();
    let downloaded = h.downloader().download(&record, &buyer, &log).await.unwrap();

    assert_eq!(downloaded.mode, EncryptionMode::LegacyFull);
    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());
    assert_eq!(downloaded.file_name, "Old");
    assert_eq!(h.store.retrievals(), 1);
    assert_eq!(log.percents(), vec![5, 15, 30, 70, 100]);
    assert!(!log
        .0
        .lock()
        .unwrap()
        .iter()
        .any(|p| p.stage == Stage::Reconstructing));
}

#[tokio::test]
async fn owner_downloads_asset_published_under_another_policy() {
    let h = Harness::new(UploadConfig {
        policy: PolicyId::parse("0xabcd").unwrap(),
        ..fast_config()
    });
    let data = sample(2 * MIB);
    let record = h.publish(&asset("Elsewhere", data.clone())).await;
    let buyer = h.buyer(&record).await;

    // the downloader keeps the default policy
    let downloaded = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());
}

#[tokio::test]
async fn publisher_copy_can_download() {
    let h = Harness::new(fast_config());
    let data = sample(2 * MIB + 17);
    let record = h.publish(&asset("Mine", data.clone())).await;

    let downloaded = h
        .downloader()
        .download(&record, &h.publisher_wallet, &NoProgress)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());
}

#[tokio::test]
async fn file_backed_asset_roundtrip() {
    let h = Harness::new(fast_config());
    let data = sample(5 * MIB + 3);
    let mut file = tempfile::Builder::new().suffix(".pak").tempfile().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let asset = Asset::from_path(listing("Disk"), file.path()).await.unwrap();
    let record = h.publish(&asset).await;
    let buyer = h.buyer(&record).await;

    let downloaded = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes.as_ref(), data.as_slice());

    let out = tempfile::tempdir().unwrap();
    let path = out.path().join("restored.pak");
    downloaded.save(&path).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn ownership_follows_token_transfer() {
    let h = Harness::new(fast_config());
    let record = h.publish(&asset("Gift", sample(MIB + 1))).await;
    let alice = h.buyer(&record).await;
    let bob = coldcache::crypto::sign::LocalWallet::generate();

    let token = find_token(&h, &alice, &record).await;
    h.ledger.transfer(&token, bob.address()).await.unwrap();

    assert!(h.downloader().download(&record, &bob, &NoProgress).await.is_ok());
    let err = h
        .downloader()
        .download(&record, &alice, &NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Verifying));
}

async fn find_token(
    h: &Harness,
    wallet: &coldcache::crypto::sign::LocalWallet,
    record: &coldcache::ledger::AssetRecord,
) -> coldcache::ledger::TokenId {
    coldcache::ledger::find_token_for_asset(h.ledger.as_ref(), wallet.address(), &record.id)
        .await
        .unwrap()
        .unwrap()
        .id
}

#[test]
fn two_gib_asset_protects_five_percent() {
    let plan = plan::select_boundary(2 * GIB);
    assert_eq!(plan.protected_length, 107_374_182);
    assert_eq!(plan.plain_length, 2 * GIB - 107_374_182);
}

/// Full 2 GiB publish and download from a temp file. Needs several GiB of RAM.
#[tokio::test]
#[ignore]
async fn two_gib_asset_roundtrip() {
    let h = Harness::new(fast_config());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let block = sample(MIB);
    for _ in 0..2048 {
        file.write_all(&block).unwrap();
    }
    file.flush().unwrap();

    let asset = Asset::from_path(listing("Huge"), file.path()).await.unwrap();
    assert_eq!(asset.len(), 2 * GIB);
    let record = h.publish(&asset).await;
    let buyer = h.buyer(&record).await;

    let downloaded = h
        .downloader()
        .download(&record, &buyer, &NoProgress)
        .await
        .unwrap();
    assert_eq!(downloaded.len() as u64, 2 * GIB);
    assert!(downloaded.bytes == asset.read_all().await.unwrap());
}
