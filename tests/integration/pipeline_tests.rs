use tempfile::tempdir;

use super::*;

#[tokio::test]
async fn test_relevant_listing_notified_once_and_rejected_skipped() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let harness = Harness::new(FakeSource::new(vec![listing("A", 200_000), listing("B", 450_000)]));

    let pipeline = harness.pipeline(open_store(&path));
    let summary = pipeline.run().await?;

    assert_eq!(summary.notified, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(harness.notifier.sent(), ids(&["A"]));
    assert_eq!(harness.classifier_calls(), 1);

    let store = pipeline.into_store();
    assert_eq!(status_of(&store, "A").as_deref(), Some("notified"));
    assert_eq!(status_of(&store, "B").as_deref(), Some("rejected_by_filters"));
    Ok(())
}

#[tokio::test]
async fn test_second_run_sends_nothing() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let harness = Harness::new(FakeSource::new(vec![
        listing("A", 200_000),
        listing("B", 450_000),
        listing("C", 150_000),
    ]));

    harness.pipeline(open_store(&path)).run().await?;
    assert_eq!(harness.notifier.sent().len(), 2);

    let second = harness.pipeline(open_store(&path)).run().await?;

    assert_eq!(second.new, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.notified, 0);
    assert_eq!(harness.notifier.sent().len(), 2);
    assert_eq!(harness.classifier_calls(), 2);
    assert_eq!(harness.detail_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_listing_repeated_in_index_is_notified_once() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let harness = Harness::new(FakeSource::new(vec![listing("A", 200_000), listing("B", 450_000)]).repeated());

    let pipeline = harness.pipeline(open_store(&path));
    let summary = pipeline.run().await?;

    assert_eq!(summary.indexed, 4);
    assert_eq!(summary.new, 2);
    assert_eq!(summary.notified, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(harness.notifier.sent(), ids(&["A"]));
    assert_eq!(harness.detail_calls(), 2);
    assert_eq!(harness.classifier_calls(), 1);
    assert_eq!(status_of(&pipeline.into_store(), "A").as_deref(), Some("notified"));
    Ok(())
}

#[tokio::test]
async fn test_already_notified_listing_is_never_reprocessed() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    {
        let mut store = open_store(&path);
        let id = ListingId::new("A");
        store.record_seen(&id, chrono::Utc::now());
        store.advance(
            &id,
            seloger_watcher::models::ProcessingStatus::MatchedFilters,
            Some(listing("A", 200_000)),
        )?;
        store.advance_judged(
            &id,
            Judgment {
                relevant: true,
                title: None,
                summary: None,
            },
        )?;
        store.advance(&id, seloger_watcher::models::ProcessingStatus::Notified, None)?;
        store.flush()?;
    }

    let harness = Harness::new(FakeSource::new(vec![listing("A", 200_000)]));
    let summary = harness.pipeline(open_store(&path)).run().await?;

    assert_eq!(summary.skipped, 1);
    assert!(harness.notifier.sent().is_empty());
    assert_eq!(harness.classifier_calls(), 0);
    assert_eq!(harness.detail_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_detail_failure_does_not_block_other_listings() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let source = FakeSource::new(vec![listing("A", 200_000), listing("C", 210_000)]).failing("C");
    let harness = Harness::new(source);

    let pipeline = harness.pipeline(open_store(&path));
    let summary = pipeline.run().await?;

    assert_eq!(summary.details_failed, 1);
    assert_eq!(harness.notifier.sent(), ids(&["A"]));

    let store = pipeline.into_store();
    assert_eq!(status_of(&store, "C").as_deref(), Some("seen_only"));
    let record = store.get(&ListingId::new("C")).unwrap();
    assert_eq!(record.failed_attempts, 1);
    assert!(record.details.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_detail_is_retried_on_next_run() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");

    let failing = Harness::new(FakeSource::new(vec![listing("C", 210_000)]).failing("C"));
    failing.pipeline(open_store(&path)).run().await?;

    let healthy = Harness::new(FakeSource::new(vec![listing("C", 210_000)]));
    let summary = healthy.pipeline(open_store(&path)).run().await?;

    assert_eq!(summary.new, 0);
    assert_eq!(summary.notified, 1);
    assert_eq!(healthy.notifier.sent(), ids(&["C"]));
    Ok(())
}

#[tokio::test]
async fn test_declined_notification_is_retried_without_reclassifying() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");

    let mut declining = Harness::new(FakeSource::new(vec![listing("A", 200_000)]));
    declining.notifier = Arc::new(FakeNotifier {
        accept: false,
        ..Default::default()
    });
    let summary = declining.pipeline(open_store(&path)).run().await?;
    assert_eq!(summary.notify_failed, 1);
    assert_eq!(status_of(&open_store(&path), "A").as_deref(), Some("judged_relevant"));

    let retry = Harness::new(FakeSource::new(vec![listing("A", 200_000)]));
    let summary = retry.pipeline(open_store(&path)).run().await?;

    assert_eq!(summary.notified, 1);
    assert_eq!(retry.classifier_calls(), 0);
    assert_eq!(retry.detail_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_irrelevant_listing_is_terminal() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let mut harness = Harness::new(FakeSource::new(vec![listing("A", 200_000)]));
    harness.classifier = Arc::new(FakeClassifier {
        irrelevant: ["A".to_string()].into(),
        ..Default::default()
    });

    let first = harness.pipeline(open_store(&path)).run().await?;
    let second = harness.pipeline(open_store(&path)).run().await?;

    assert_eq!(first.irrelevant, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(harness.classifier_calls(), 1);
    assert!(harness.notifier.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_index_is_a_successful_run() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let harness = Harness::new(FakeSource::new(vec![]));

    let summary = harness.pipeline(open_store(&path)).run().await?;

    assert_eq!(summary, seloger_watcher::RunSummary::default());
    Ok(())
}

#[tokio::test]
async fn test_many_listings_processed_concurrently() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("processed_listings.json");
    let listings = (0..20)
        .map(|i| listing(&format!("{}", 1000 + i), 120_000 + i * 20_000))
        .collect();
    let harness = Harness::new(FakeSource::new(listings));

    let pipeline = harness.pipeline(open_store(&path));
    let summary = pipeline.run().await?;

    // 120k..=300k is in range, 320k and above is not
    assert_eq!(summary.notified, 10);
    assert_eq!(summary.rejected, 10);

    let sent = harness.notifier.sent();
    let unique: HashSet<_> = sent.iter().collect();
    assert_eq!(unique.len(), sent.len());

    let counts = counts(&pipeline.into_store());
    assert_eq!(counts.get("notified"), Some(&10));
    assert_eq!(counts.get("rejected_by_filters"), Some(&10));
    Ok(())
}
