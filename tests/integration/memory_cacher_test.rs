//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 内存缓存后端集成测试

#[path = "../common/mod.rs"]
mod common;

use common::conformance;
use common::{keys, setup_logging, unique_prefix};
use oxlock::{CacheContext, CacheError, Cacher, Item, MemoryCacher};

fn cacher() -> MemoryCacher {
    setup_logging();
    MemoryCacher::new()
}

#[tokio::test]
async fn test_set_then_get() {
    conformance::set_then_get_preserves_value_and_flags(&cacher(), &unique_prefix("set")).await;
}

#[tokio::test]
async fn test_get_omits_missing() {
    conformance::get_omits_missing_keys(&cacher(), &unique_prefix("get")).await;
}

#[tokio::test]
async fn test_add_partial_failure() {
    conformance::add_reports_existing_keys_per_slot(&cacher(), &unique_prefix("add")).await;
}

#[tokio::test]
async fn test_cas_conflict() {
    conformance::cas_detects_intervening_write(&cacher(), &unique_prefix("cas")).await;
}

#[tokio::test]
async fn test_cas_missing_key() {
    conformance::cas_on_missing_key_conflicts(&cacher(), &unique_prefix("cas_missing")).await;
}

#[tokio::test]
async fn test_cas_without_token() {
    conformance::cas_without_token_is_not_stored(&cacher(), &unique_prefix("cas_token")).await;
}

#[tokio::test]
async fn test_concurrent_cas() {
    conformance::concurrent_cas_has_single_winner(&cacher(), &unique_prefix("race")).await;
}

#[tokio::test]
async fn test_delete_miss() {
    conformance::delete_reports_missing_keys(&cacher(), &unique_prefix("del")).await;
}

#[tokio::test]
async fn test_expiration() {
    conformance::expired_items_disappear(&cacher(), &unique_prefix("ttl")).await;
}

#[tokio::test]
async fn test_oversized_payload() {
    conformance::oversized_payload_is_rejected_per_slot(&cacher(), &unique_prefix("big")).await;
}

#[tokio::test]
async fn test_cancelled_context() {
    conformance::cancelled_context_fails_whole_call(&cacher(), &unique_prefix("cancel")).await;
}

#[tokio::test]
async fn test_flush_all_simulates_restart() {
    let cacher = cacher();
    let ctx = CacheContext::new();
    let k = keys(&unique_prefix("flush"), &["a", "b"]);
    cacher
        .set_multi(
            &ctx,
            &[
                Item::new(k[0].clone(), b"1".to_vec()),
                Item::new(k[1].clone(), b"2".to_vec()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(cacher.len(), 2);

    cacher.flush_all();
    assert!(cacher.is_empty());
    let err = cacher.delete_multi(&ctx, &k).await.unwrap_err();
    assert_eq!(err.as_multi().unwrap().error_count(), 2);
}

#[tokio::test]
async fn test_concurrent_tasks_share_cacher() {
    let cacher = std::sync::Arc::new(cacher());
    let prefix = unique_prefix("tasks");
    let mut handles = Vec::new();
    for task in 0..8 {
        let cacher = cacher.clone();
        let key = format!("{}:shared", prefix);
        handles.push(tokio::spawn(async move {
            cacher
                .add_multi(
                    &CacheContext::new(),
                    &[Item::new(key, vec![task as u8]).with_flags(task)],
                )
                .await
        }));
    }
    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(CacheError::Multi(me)) => assert!(matches!(me.get(0), Some(CacheError::NotStored))),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(winners, 1);
}
