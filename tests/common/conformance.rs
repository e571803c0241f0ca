//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 所有缓存后端都必须满足的批量语义场景。

#![allow(dead_code)]

use super::keys;
use oxlock::item::DEFAULT_MAX_RECORD_SIZE;
use oxlock::{CacheContext, CacheError, Cacher, Item};
use std::time::Duration;

pub async fn set_then_get_preserves_value_and_flags(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["a", "b", "empty"]);
    let items = vec![
        Item::new(k[0].clone(), b"alpha".to_vec()).with_flags(42),
        Item::new(k[1].clone(), vec![0u8, 255, 7]).with_flags(u32::MAX),
        Item::new(k[2].clone(), Vec::new()),
    ];
    cacher.set_multi(&ctx, &items).await.unwrap();

    let fetched = cacher.get_multi(&ctx, &k).await.unwrap();
    assert!(fetched.errors.is_none());
    for item in &items {
        let got = fetched.get(&item.key).unwrap();
        assert_eq!(got.value, item.value);
        assert_eq!(got.flags, item.flags);
        assert!(got.cas().is_some());
    }
}

pub async fn get_omits_missing_keys(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["present", "absent"]);
    cacher
        .set_multi(&ctx, &[Item::new(k[0].clone(), b"v".to_vec())])
        .await
        .unwrap();

    let fetched = cacher.get_multi(&ctx, &k).await.unwrap();
    assert_eq!(fetched.items.len(), 1);
    assert!(fetched.get(&k[1]).is_none());
    assert!(fetched.errors.is_none());

    let empty = cacher.get_multi(&ctx, &[]).await.unwrap();
    assert!(empty.items.is_empty());
}

pub async fn add_reports_existing_keys_per_slot(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["x", "y", "z"]);
    cacher
        .set_multi(&ctx, &[Item::new(k[1].clone(), b"old".to_vec())])
        .await
        .unwrap();

    let err = cacher
        .add_multi(
            &ctx,
            &[
                Item::new(k[0].clone(), b"1".to_vec()),
                Item::new(k[1].clone(), b"2".to_vec()),
                Item::new(k[2].clone(), b"3".to_vec()),
            ],
        )
        .await
        .unwrap_err();
    let me = err.as_multi().expect("partial failure");
    assert_eq!(me.len(), 3);
    assert!(me.get(0).is_none());
    assert!(matches!(me.get(1), Some(CacheError::NotStored)));
    assert!(me.get(2).is_none());

    let fetched = cacher.get_multi(&ctx, &k).await.unwrap();
    assert_eq!(fetched.get(&k[0]).unwrap().value, b"1");
    assert_eq!(fetched.get(&k[1]).unwrap().value, b"old");
    assert_eq!(fetched.get(&k[2]).unwrap().value, b"3");
}

pub async fn cas_detects_intervening_write(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["stale", "fresh"]);
    cacher
        .set_multi(
            &ctx,
            &[
                Item::new(k[0].clone(), b"v1".to_vec()),
                Item::new(k[1].clone(), b"v1".to_vec()),
            ],
        )
        .await
        .unwrap();
    let read = cacher.get_multi(&ctx, &k).await.unwrap();

    // 另一个写入者修改了第一个键
    cacher
        .set_multi(&ctx, &[Item::new(k[0].clone(), b"other".to_vec())])
        .await
        .unwrap();

    let swaps: Vec<Item> = k
        .iter()
        .map(|key| {
            let mut item = read.get(key).unwrap().clone();
            item.value = b"v2".to_vec();
            item
        })
        .collect();
    let err = cacher.compare_and_swap_multi(&ctx, &swaps).await.unwrap_err();
    let me = err.as_multi().expect("partial failure");
    assert!(matches!(me.get(0), Some(CacheError::CasConflict)));
    assert!(me.get(1).is_none());

    let after = cacher.get_multi(&ctx, &k).await.unwrap();
    assert_eq!(after.get(&k[0]).unwrap().value, b"other");
    assert_eq!(after.get(&k[1]).unwrap().value, b"v2");
}

pub async fn cas_on_missing_key_conflicts(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["gone"]);
    cacher
        .set_multi(&ctx, &[Item::new(k[0].clone(), b"v".to_vec())])
        .await
        .unwrap();
    let read = cacher.get_multi(&ctx, &k).await.unwrap();
    cacher.delete_multi(&ctx, &k).await.unwrap();

    let item = read.get(&k[0]).unwrap().clone();
    let err = cacher.compare_and_swap_multi(&ctx, &[item]).await.unwrap_err();
    assert!(matches!(err.as_multi().unwrap().get(0), Some(CacheError::CasConflict)));

    let after = cacher.get_multi(&ctx, &k).await.unwrap();
    assert!(after.items.is_empty());
}

pub async fn cas_without_token_is_not_stored(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["tokenless", "valid"]);
    cacher
        .set_multi(&ctx, &[Item::new(k[1].clone(), b"v1".to_vec())])
        .await
        .unwrap();
    let read = cacher.get_multi(&ctx, &k[1..]).await.unwrap();
    let mut valid = read.get(&k[1]).unwrap().clone();
    valid.value = b"v2".to_vec();

    let err = cacher
        .compare_and_swap_multi(&ctx, &[Item::new(k[0].clone(), b"x".to_vec()), valid])
        .await
        .unwrap_err();
    let me = err.as_multi().unwrap();
    assert!(matches!(me.get(0), Some(CacheError::NotStored)));
    assert!(me.get(1).is_none());
}

pub async fn concurrent_cas_has_single_winner(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["contended"]);
    cacher
        .set_multi(&ctx, &[Item::new(k[0].clone(), b"base".to_vec())])
        .await
        .unwrap();
    let read = cacher.get_multi(&ctx, &k).await.unwrap();
    let base = read.get(&k[0]).unwrap().clone();

    let mut first = base.clone();
    first.value = b"first".to_vec();
    let mut second = base;
    second.value = b"second".to_vec();

    let first_batch = [first];
    let second_batch = [second];
    let (a, b) = tokio::join!(
        cacher.compare_and_swap_multi(&ctx, &first_batch),
        cacher.compare_and_swap_multi(&ctx, &second_batch),
    );
    assert_eq!(
        a.is_ok() as usize + b.is_ok() as usize,
        1,
        "exactly one CAS must win: {:?} / {:?}",
        a,
        b
    );
    let (winner, loser): (&[u8], _) = if a.is_ok() { (&b"first"[..], b) } else { (&b"second"[..], a) };
    assert!(matches!(
        loser.unwrap_err().as_multi().unwrap().get(0),
        Some(CacheError::CasConflict)
    ));

    // 最终值必须是胜出者写入的值
    let stored = cacher.get_multi(&ctx, &k).await.unwrap();
    assert_eq!(stored.get(&k[0]).unwrap().value, winner);
}

pub async fn delete_reports_missing_keys(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["here", "nowhere"]);
    cacher
        .set_multi(&ctx, &[Item::new(k[0].clone(), b"v".to_vec())])
        .await
        .unwrap();

    let err = cacher.delete_multi(&ctx, &k).await.unwrap_err();
    let me = err.as_multi().unwrap();
    assert!(me.get(0).is_none());
    assert!(matches!(me.get(1), Some(CacheError::CacheMiss)));

    let after = cacher.get_multi(&ctx, &k).await.unwrap();
    assert!(after.items.is_empty());
}

pub async fn expired_items_disappear(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["short", "long"]);
    cacher
        .set_multi(
            &ctx,
            &[
                Item::new(k[0].clone(), b"v".to_vec()).with_expiration(Duration::from_millis(50)),
                Item::new(k[1].clone(), b"v".to_vec()).with_expiration(Duration::from_secs(60)),
            ],
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fetched = cacher.get_multi(&ctx, &k).await.unwrap();
    assert!(fetched.get(&k[0]).is_none());
    assert!(fetched.get(&k[1]).is_some());

    // 过期后的键可以重新 Add
    cacher
        .add_multi(&ctx, &[Item::new(k[0].clone(), b"again".to_vec())])
        .await
        .unwrap();
}

pub async fn oversized_payload_is_rejected_per_slot(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    let k = keys(prefix, &["huge", "tiny"]);
    let err = cacher
        .set_multi(
            &ctx,
            &[
                Item::new(k[0].clone(), vec![0u8; DEFAULT_MAX_RECORD_SIZE + 1]),
                Item::new(k[1].clone(), b"ok".to_vec()),
            ],
        )
        .await
        .unwrap_err();
    let me = err.as_multi().unwrap();
    assert!(matches!(me.get(0), Some(CacheError::PayloadTooLarge { .. })));
    assert!(me.get(1).is_none());

    let fetched = cacher.get_multi(&ctx, &k).await.unwrap();
    assert!(fetched.get(&k[0]).is_none());
    assert_eq!(fetched.get(&k[1]).unwrap().value, b"ok");
}

pub async fn cancelled_context_fails_whole_call(cacher: &dyn Cacher, prefix: &str) {
    let ctx = CacheContext::new();
    ctx.cancel();
    let k = keys(prefix, &["never"]);
    let err = cacher
        .set_multi(&ctx, &[Item::new(k[0].clone(), b"v".to_vec())])
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Cancelled));

    let fetched = cacher.get_multi(&CacheContext::new(), &k).await.unwrap();
    assert!(fetched.items.is_empty());
}
