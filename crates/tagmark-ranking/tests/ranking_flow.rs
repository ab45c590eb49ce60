//! Integration tests: ranking serialization and store wiring.

use std::sync::Arc;

use tagmark_ranking::ranking::{RankingConfig, TagRanking};
use tagmark_store::backend::MemoryBackend;
use tagmark_store::codec::MetaPatch;
use tagmark_store::store::BookmarkStore;

fn loose() -> RankingConfig {
    RankingConfig {
        min_usage_score: 0.0,
        ..Default::default()
    }
}

#[test]
fn burst_of_updates_serializes_without_loss() {
    let ranking = TagRanking::new(Arc::new(MemoryBackend::new()), loose());

    let count = 50;
    for i in 0..count {
        ranking.add_usage(&[format!("tag{i:02}")], &[]);
    }

    let log = ranking.log().unwrap();
    assert_eq!(log.len(), count);
    // Strictly in call order, no interleaved partial writes.
    for (i, entry) in log.iter().enumerate() {
        assert_eq!(entry.tag, format!("tag{i:02}"));
    }

    let recent = ranking.recently_added().unwrap();
    assert_eq!(recent.len(), count);
    assert_eq!(recent[0], format!("tag{:02}", count - 1));
    assert_eq!(recent[count - 1], "tag00");

    let most = ranking.most_used().unwrap();
    assert_eq!(most.len(), count);
}

#[test]
fn store_saves_feed_the_ranking() {
    let backend = Arc::new(MemoryBackend::new());
    let store = BookmarkStore::new(backend.clone());
    store.initialize().unwrap();

    let ranking = Arc::new(TagRanking::new(backend, loose()));
    store.set_usage_sink(ranking.clone());

    store
        .save("https://example.com", &["a".into(), "b".into()], &MetaPatch::default())
        .unwrap();
    assert_eq!(ranking.log().unwrap().len(), 2);

    // Identical save: no persisted change, no ranking update.
    store
        .save("https://example.com", &["a".into(), "b".into()], &MetaPatch::default())
        .unwrap();
    assert_eq!(ranking.log().unwrap().len(), 2);

    // Only the genuinely new tag counts.
    store
        .save(
            "https://example.com",
            &["a".into(), "b".into(), "c".into()],
            &MetaPatch::default(),
        )
        .unwrap();
    let log = ranking.log().unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log.last().unwrap().tag, "c");

    // Deletes do not inflate the ranking.
    store
        .save("https://example.com", &[], &MetaPatch::default())
        .unwrap();
    assert_eq!(ranking.log().unwrap().len(), 3);
}

#[test]
fn ranking_state_is_independent_of_the_store_blob() {
    let backend = Arc::new(MemoryBackend::new());
    let store = BookmarkStore::new(backend.clone());
    store.initialize().unwrap();

    let ranking = Arc::new(TagRanking::new(backend, loose()));
    store.set_usage_sink(ranking.clone());

    store
        .save("https://example.com", &["keep".into()], &MetaPatch::default())
        .unwrap();

    // Replacing the whole store does not reset usage history.
    let exported = store.serialize().unwrap();
    store.deserialize(&exported).unwrap();
    assert_eq!(ranking.recently_added().unwrap(), vec!["keep"]);
}
