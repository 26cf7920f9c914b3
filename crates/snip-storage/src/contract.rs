//! Behaviour every in-process backend must show, run against each of them.

use snip_core::{BatchItem, Repository, ShortId, ShortIdGenerator, StorageError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Finds two distinct URLs sharing an id under `generator`.
pub(crate) fn colliding_urls(generator: ShortIdGenerator) -> (String, String) {
    let mut seen: HashMap<ShortId, String> = HashMap::new();
    for i in 0u64.. {
        let url = format!("https://collide.example/{i}");
        if let Some(first) = seen.insert(generator.generate(&url), url.clone()) {
            return (first, url);
        }
    }
    unreachable!("id space is finite")
}

pub(crate) async fn run_all<R, F, Fut>(make: F)
where
    R: Repository,
    F: Fn(ShortIdGenerator) -> Fut,
    Fut: Future<Output = R>,
{
    let default = ShortIdGenerator::default();
    let tiny = ShortIdGenerator::new(1).unwrap();

    add_then_get(&make(default).await, default).await;
    add_is_idempotent(&make(default).await).await;
    add_keeps_the_first_owner(&make(default).await).await;
    conflict_keeps_first_writer(&make(tiny).await, tiny).await;
    concurrent_conflicting_adds_have_one_winner(Arc::new(make(tiny).await), tiny).await;
    unknown_id_is_not_found(&make(default).await).await;
    delete_tombstones(&make(default).await).await;
    delete_is_owner_scoped(&make(default).await).await;
    delete_ignores_unknown_ids(&make(default).await).await;
    empty_batches_are_rejected(&make(default).await).await;
    batch_omits_conflicts(&make(tiny).await, tiny).await;
    new_user_allocates_fresh_ids(&make(default).await).await;
    scenario(&make(default).await, default).await;
    stats_count_live_links(&make(default).await).await;
}

async fn add_then_get<R: Repository>(repo: &R, generator: ShortIdGenerator) {
    let id = repo.add("https://example.com", 1).await.unwrap();
    assert_eq!(id, generator.generate("https://example.com"));
    assert_eq!(repo.get(&id).await.unwrap(), "https://example.com");
    repo.ping().await.unwrap();
}

async fn add_is_idempotent<R: Repository>(repo: &R) {
    let first = repo.add("https://example.com", 1).await.unwrap();
    let second = repo.add("https://example.com", 1).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(repo.user_links(1).await.unwrap().len(), 1);
    assert_eq!(repo.stats().await.unwrap().urls, 1);
}

async fn add_keeps_the_first_owner<R: Repository>(repo: &R) {
    let id = repo.add("https://example.com", 1).await.unwrap();
    assert_eq!(repo.add("https://example.com", 2).await.unwrap(), id);

    assert_eq!(repo.user_links(1).await.unwrap().len(), 1);
    assert!(repo.user_links(2).await.unwrap().is_empty());
}

async fn conflict_keeps_first_writer<R: Repository>(repo: &R, generator: ShortIdGenerator) {
    let (first, second) = colliding_urls(generator);

    let id = repo.add(&first, 1).await.unwrap();
    let err = repo.add(&second, 2).await.unwrap_err();

    assert!(matches!(err, StorageError::Conflict(_)));
    assert_eq!(err.conflicting_id(), Some(&id));
    assert_eq!(repo.get(&id).await.unwrap(), first);
    assert!(repo.user_links(2).await.unwrap().is_empty());
}

async fn concurrent_conflicting_adds_have_one_winner<R: Repository>(
    repo: Arc<R>,
    generator: ShortIdGenerator,
) {
    let (first, second) = colliding_urls(generator);

    let a = tokio::spawn({
        let repo = Arc::clone(&repo);
        async move { repo.add(&first, 1).await.map(|_| first) }
    });
    let b = tokio::spawn({
        let repo = Arc::clone(&repo);
        async move { repo.add(&second, 2).await.map(|_| second) }
    });

    let results = [a.await.unwrap(), b.await.unwrap()];
    let winners: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StorageError::Conflict(_))))
        .count();
    assert_eq!((winners.len(), conflicts), (1, 1));

    let id = generator.generate(winners[0]);
    assert_eq!(&repo.get(&id).await.unwrap(), winners[0]);
}

async fn unknown_id_is_not_found<R: Repository>(repo: &R) {
    let err = repo.get(&ShortId::new("zzzz")).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

async fn delete_tombstones<R: Repository>(repo: &R) {
    let id = repo.add("https://example.com", 1).await.unwrap();
    repo.delete_batch(1, &[id.clone()]).await.unwrap();

    assert!(matches!(
        repo.get(&id).await.unwrap_err(),
        StorageError::Deleted(_)
    ));
    assert!(repo.user_links(1).await.unwrap().is_empty());

    // Re-adding the same URL neither fails nor revives the record.
    assert_eq!(repo.add("https://example.com", 1).await.unwrap(), id);
    assert!(matches!(
        repo.get(&id).await.unwrap_err(),
        StorageError::Deleted(_)
    ));
}

async fn delete_is_owner_scoped<R: Repository>(repo: &R) {
    let id = repo.add("https://example.com", 2).await.unwrap();
    repo.delete_batch(1, &[id.clone()]).await.unwrap();

    assert_eq!(repo.get(&id).await.unwrap(), "https://example.com");
    assert_eq!(repo.user_links(2).await.unwrap().len(), 1);
}

async fn delete_ignores_unknown_ids<R: Repository>(repo: &R) {
    let id = repo.add("https://example.com", 1).await.unwrap();
    repo.delete_batch(1, &[ShortId::new("zzzz"), id.clone()])
        .await
        .unwrap();

    assert!(matches!(
        repo.get(&id).await.unwrap_err(),
        StorageError::Deleted(_)
    ));
}

async fn empty_batches_are_rejected<R: Repository>(repo: &R) {
    assert!(matches!(
        repo.add_batch(&[], 1).await.unwrap_err(),
        StorageError::EmptyRequest
    ));
    assert!(matches!(
        repo.delete_batch(1, &[]).await.unwrap_err(),
        StorageError::EmptyRequest
    ));
}

async fn batch_omits_conflicts<R: Repository>(repo: &R, generator: ShortIdGenerator) {
    let (first, second) = colliding_urls(generator);
    repo.add(&first, 1).await.unwrap();

    let entries = repo
        .add_batch(
            &[
                BatchItem::new("conflicting", second.clone()),
                BatchItem::new("repeated", first.clone()),
            ],
            1,
        )
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].correlation_id, "repeated");
    assert_eq!(entries[0].short_id, generator.generate(&first));
}

async fn new_user_allocates_fresh_ids<R: Repository>(repo: &R) {
    let first = repo.new_user().await.unwrap();
    let second = repo.new_user().await.unwrap();

    assert!(first > 0);
    assert_ne!(first, second);
    assert!(repo.user_links(first).await.unwrap().is_empty());
}

async fn scenario<R: Repository>(repo: &R, generator: ShortIdGenerator) {
    let x = repo.add("https://a.com", 1).await.unwrap();
    let batch = repo
        .add_batch(&[BatchItem::new("-", "https://b.com")], 1)
        .await
        .unwrap();
    let y = generator.generate("https://b.com");

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].correlation_id, "-");
    assert_eq!(batch[0].short_id, y);

    let mut listed: Vec<ShortId> = repo
        .user_links(1)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.short_id)
        .collect();
    listed.sort();
    let mut expected = vec![x.clone(), y.clone()];
    expected.sort();
    assert_eq!(listed, expected);

    repo.delete_batch(1, &[x.clone()]).await.unwrap();
    assert!(matches!(
        repo.get(&x).await.unwrap_err(),
        StorageError::Deleted(_)
    ));
    assert_eq!(repo.get(&y).await.unwrap(), "https://b.com");
}

async fn stats_count_live_links<R: Repository>(repo: &R) {
    let user = repo.new_user().await.unwrap();
    let id = repo.add("https://a.com", user).await.unwrap();
    repo.add("https://b.com", user).await.unwrap();
    repo.delete_batch(user, &[id]).await.unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.urls, 1);
    assert_eq!(stats.users, 1);
}
