//! Query cache capacity, recency and expiry behaviour.

use std::time::Duration;

use docqa_rag::cache::QueryCache;
use docqa_rag::document::StructuredAnswer;
use proptest::prelude::*;

fn answer(text: &str) -> StructuredAnswer {
    StructuredAnswer::plain(text)
}

/// *For any* sequence of `set` calls, the cache never holds more than
/// `max_size` entries.
mod prop_cache_bound {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn size_never_exceeds_capacity(
            max_size in 1usize..16,
            queries in proptest::collection::vec("[a-zA-Z ]{1,12}", 1..64),
        ) {
            let cache = QueryCache::new(max_size, Duration::from_secs(3600)).unwrap();
            for query in &queries {
                cache.set(query, answer(query));
                prop_assert!(cache.len() <= max_size);
                prop_assert!(cache.stats().size <= max_size);
            }
        }
    }
}

#[tokio::test]
async fn eviction_follows_access_order_not_insertion_order() {
    let cache = QueryCache::new(3, Duration::from_secs(3600)).unwrap();
    cache.set("satu", answer("1"));
    cache.set("dua", answer("2"));
    cache.set("tiga", answer("3"));

    // "satu" is the oldest insertion but the most recent access.
    assert!(cache.get("satu").is_some());
    cache.set("empat", answer("4"));

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("satu"), Some(answer("1")));
    assert_eq!(cache.get("dua"), None);
    assert!(cache.get("tiga").is_some());
    assert!(cache.get("empat").is_some());
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_ttl() {
    let cache = QueryCache::new(10, Duration::from_secs(60)).unwrap();
    cache.set("syarat wisuda", answer("jawaban"));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.get("syarat wisuda").is_some());
    assert_eq!(cache.stats().size, 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("syarat wisuda"), None);
    assert_eq!(cache.stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_counts_from_the_last_write() {
    let cache = QueryCache::new(10, Duration::from_secs(60)).unwrap();
    cache.set("q", answer("lama"));
    tokio::time::advance(Duration::from_secs(45)).await;
    cache.set("q", answer("baru"));
    tokio::time::advance(Duration::from_secs(45)).await;

    assert_eq!(cache.get("q"), Some(answer("baru")));
}

#[tokio::test]
async fn normalized_queries_share_one_entry() {
    let cache = QueryCache::new(10, Duration::from_secs(3600)).unwrap();
    cache.set(" Hello ", answer("first"));
    cache.set("hello", answer("second"));

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("HELLO"), Some(answer("second")));
}

#[tokio::test]
async fn clear_empties_the_cache() {
    let cache = QueryCache::new(4, Duration::from_secs(3600)).unwrap();
    cache.set("a", answer("a"));
    cache.set("b", answer("b"));
    cache.clear();

    let stats = cache.stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.max_size, 4);
    assert_eq!(stats.ttl, Duration::from_secs(3600));
    assert!(cache.get("a").is_none());
}
