mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use drive_config::UploadConfig;
use transfer::{ConflictChoice, TransferEvent, TransferState, UploadQueue};

fn small_block_config() -> UploadConfig {
    let mut config = UploadConfig::default();
    config.block_size = utils::ByteSize::from_bytes(8);
    config
}

fn queue_with(
    destination: Arc<FakeDestination>,
    resolver: Arc<ScriptedResolver>,
    config: UploadConfig,
) -> UploadQueue {
    UploadQueue::new(destination, Arc::new(FakeSigner), None, resolver, config)
}

async fn wait_terminal(rx: &mut tokio::sync::mpsc::UnboundedReceiver<TransferEvent>) -> Option<TransferEvent> {
    while let Some(ev) = rx.recv().await {
        match ev {
            TransferEvent::Finished | TransferEvent::Failed { .. } => return Some(ev),
            _ => {},
        }
    }
    None
}

#[tokio::test]
async fn test_upload_roundtrip_multiple_blocks() {
    let destination = FakeDestination::new();
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);
    let queue = queue_with(destination.clone(), resolver, small_block_config());

    let content: Vec<u8> = (0..37u8).collect(); // 5 blocks of 8 with a short tail
    let (engine, mut rx) = queue.enqueue("folder-1", meta("data.bin", 37), content_stream(content.clone(), 5));

    assert!(matches!(wait_terminal(&mut rx).await, Some(TransferEvent::Finished)));
    assert_eq!(engine.state(), TransferState::Done);
    assert_eq!(destination.committed_names(), vec!["data.bin".to_string()]);
    assert_eq!(destination.committed_content("data.bin").unwrap(), content);

    // The registry keeps the transfer until explicitly discarded.
    assert!(queue.get(engine.id()).is_some());
    assert!(queue.remove(engine.id()));
    assert!(queue.get(engine.id()).is_none());
}

#[tokio::test]
async fn test_zero_size_upload_finalizes_empty_manifest() {
    let destination = FakeDestination::new();
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);
    let queue = queue_with(destination.clone(), resolver, small_block_config());

    let (engine, mut rx) = queue.enqueue("folder-1", meta("empty.bin", 0), content_stream(vec![], 4));

    assert!(matches!(wait_terminal(&mut rx).await, Some(TransferEvent::Finished)));
    assert_eq!(engine.state(), TransferState::Done);
    assert_eq!(destination.committed_names(), vec!["empty.bin".to_string()]);
}

#[tokio::test]
async fn test_batched_conflict_prompt_with_apply_to_all_rename() {
    // Both uploads collide with an existing `report.pdf`; exactly one
    // prompt surfaces and its apply-to-all rename covers both.
    let destination = FakeDestination::new().with_existing("folder-1", "report.pdf");
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, true);
    let queue = queue_with(destination.clone(), resolver.clone(), small_block_config());

    let (_e1, mut rx1) = queue.enqueue("folder-1", meta("report.pdf", 4), content_stream(vec![1, 2, 3, 4], 2));
    let (_e2, mut rx2) = queue.enqueue("folder-1", meta("report.pdf", 4), content_stream(vec![5, 6, 7, 8], 2));

    assert!(matches!(wait_terminal(&mut rx1).await, Some(TransferEvent::Finished)));
    assert!(matches!(wait_terminal(&mut rx2).await, Some(TransferEvent::Finished)));

    assert_eq!(resolver.prompt_count(), 1);

    let mut names = destination.committed_names();
    names.sort();
    assert_eq!(names, vec!["report (1).pdf".to_string(), "report (2).pdf".to_string()]);
}

#[tokio::test]
async fn test_conflict_replace_takes_over_the_name() {
    let destination = FakeDestination::new().with_existing("folder-1", "notes.txt");
    let resolver = ScriptedResolver::new(ConflictChoice::Replace, false);
    let queue = queue_with(destination.clone(), resolver.clone(), small_block_config());

    let (engine, mut rx) = queue.enqueue("folder-1", meta("notes.txt", 3), content_stream(vec![9, 9, 9], 3));

    assert!(matches!(wait_terminal(&mut rx).await, Some(TransferEvent::Finished)));
    assert_eq!(engine.state(), TransferState::Done);
    assert_eq!(resolver.prompt_count(), 1);
    assert_eq!(destination.committed_names(), vec!["notes.txt".to_string()]);
}

#[tokio::test]
async fn test_conflict_skip_cancels_without_error() {
    let destination = FakeDestination::new().with_existing("folder-1", "dup.bin");
    let resolver = ScriptedResolver::new(ConflictChoice::Skip, false);
    let queue = queue_with(destination.clone(), resolver, small_block_config());

    let (engine, mut rx) = queue.enqueue("folder-1", meta("dup.bin", 2), content_stream(vec![1, 2], 2));

    let terminal = wait_terminal(&mut rx).await;
    match terminal {
        Some(TransferEvent::Failed { error }) => assert!(error.is_cancellation()),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(engine.state(), TransferState::Canceled);
    assert!(destination.committed_names().is_empty());
}

#[tokio::test]
async fn test_commit_failure_deletes_draft() {
    let destination = FakeDestination::new();
    destination.fail_commit.store(true, std::sync::atomic::Ordering::Relaxed);
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);
    let queue = queue_with(destination.clone(), resolver, small_block_config());

    let (engine, mut rx) = queue.enqueue("folder-1", meta("doomed.bin", 6), content_stream(vec![0; 6], 3));

    match wait_terminal(&mut rx).await {
        Some(TransferEvent::Failed { error }) => assert!(!error.is_cancellation()),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(engine.state(), TransferState::Error);

    // Compensating deletion: no orphaned incomplete revision stays behind.
    let state = destination.state.lock().unwrap();
    assert_eq!(state.deleted_drafts.len(), 1);
    assert!(state.drafts.is_empty());
    assert!(state.committed.is_empty());
}

#[tokio::test]
async fn test_admission_bounds_active_uploads() {
    let destination = FakeDestination::new().with_block_delay(Duration::from_millis(60));
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);

    let mut config = small_block_config();
    config.max_active_uploads = 1;
    let queue = queue_with(destination.clone(), resolver, config);

    let (first, mut rx1) = queue.enqueue("folder-1", meta("a.bin", 8), content_stream(vec![1; 8], 8));
    let (second, mut rx2) = queue.enqueue("folder-1", meta("b.bin", 8), content_stream(vec![2; 8], 8));

    tokio::time::sleep(Duration::from_millis(30)).await;
    // The single active slot is taken by the first upload; the second has
    // not moved past Pending.
    assert_ne!(first.state(), TransferState::Pending);
    assert_eq!(second.state(), TransferState::Pending);

    assert!(matches!(wait_terminal(&mut rx1).await, Some(TransferEvent::Finished)));
    assert!(matches!(wait_terminal(&mut rx2).await, Some(TransferEvent::Finished)));
    assert_eq!(destination.committed_names().len(), 2);
}

#[tokio::test]
async fn test_pause_resume_preserves_uploaded_blocks() {
    let destination = FakeDestination::new().with_block_delay(Duration::from_millis(25));
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);

    let mut config = small_block_config();
    config.max_concurrent_block_uploads = 1;
    let queue = queue_with(destination.clone(), resolver, config);

    let content: Vec<u8> = (0..32u8).collect(); // 4 blocks of 8
    let (engine, mut rx) = queue.enqueue("folder-1", meta("big.bin", 32), content_stream(content.clone(), 8));

    // Let at least one block land, then pause.
    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.pause();
    assert_eq!(engine.state(), TransferState::Paused);

    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.resume();
    // Resume restores Progress (or later), never Pending.
    assert_ne!(engine.state(), TransferState::Pending);

    assert!(matches!(wait_terminal(&mut rx).await, Some(TransferEvent::Finished)));
    assert_eq!(engine.state(), TransferState::Done);
    assert_eq!(destination.committed_content("big.bin").unwrap(), content);
}

#[tokio::test]
async fn test_network_failure_suspends_upload_until_resume() {
    let destination = FakeDestination::new().with_block_failure_once(2, FailureKind::Network);
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);
    let queue = queue_with(destination.clone(), resolver, small_block_config());

    let content: Vec<u8> = (0..24u8).collect(); // 3 blocks of 8
    let (engine, mut rx) = queue.enqueue("folder-1", meta("wobbly.bin", 24), content_stream(content.clone(), 8));

    let mut interrupted = false;
    while let Some(ev) = rx.recv().await {
        match ev {
            TransferEvent::NetworkInterrupted { .. } => {
                interrupted = true;
                engine.resume();
            },
            TransferEvent::Finished => break,
            TransferEvent::Failed { error } => panic!("upload failed: {error}"),
            _ => {},
        }
    }

    assert!(interrupted);
    assert_eq!(engine.state(), TransferState::Done);
    assert_eq!(destination.committed_content("wobbly.bin").unwrap(), content);
}

#[tokio::test]
async fn test_cancel_deletes_draft() {
    let destination = FakeDestination::new().with_block_delay(Duration::from_millis(150));
    let resolver = ScriptedResolver::new(ConflictChoice::Rename, false);
    let queue = queue_with(destination.clone(), resolver, small_block_config());

    let (engine, mut rx) = queue.enqueue("folder-1", meta("gone.bin", 16), content_stream(vec![7; 16], 8));

    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.cancel();

    match wait_terminal(&mut rx).await {
        Some(TransferEvent::Failed { error }) => assert!(error.is_cancellation()),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(engine.state(), TransferState::Canceled);

    let state = destination.state.lock().unwrap();
    assert!(state.drafts.is_empty());
    assert!(state.committed.is_empty());
}
