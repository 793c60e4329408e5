use std::sync::Arc;

use blockwatch_chain::testing::{account, block, post, reply, transfer, vote, InMemoryChain};
use blockwatch_chain::{
    fetch_accounts_chunked, AccountClassifier, AccountProvider, BalanceChangedFilter,
    BlockClassifier, BlockProvider, ChainClient, CommentsProvider, Config, OperationFilter,
    OperationKind, PostByFilter, PostsProvider, VoteByFilter, VotesProvider, WatchMode, Watcher,
};
use blockwatch_engine::{
    ChannelObserver, Classifier, ClassifierRef, EngineError, FilterContainer, Notification,
    Provider,
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

fn live_watcher(chain: &Arc<InMemoryChain>) -> Watcher {
    Watcher::new(&Config::default(), chain.clone()).unwrap()
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        seen.push(notification);
    }
    seen
}

fn payloads(rx: &mut UnboundedReceiver<Notification>) -> Vec<Value> {
    drain(rx)
        .into_iter()
        .map(|n| match n {
            Notification::Next(payload) => Value::Object(payload),
            other => panic!("expected next, got {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn test_vote_by_bob_satisfies_post_or_vote_subscription() {
    let chain = Arc::new(InMemoryChain::new());
    chain.push_block(block(1, vec![vote("bob", "carol", "hello-world")]));
    let watcher = live_watcher(&chain);

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(
            FilterContainer::any(vec![
                Box::new(PostByFilter::new("alice")),
                Box::new(VoteByFilter::new("bob")),
            ]),
            vec![
                Box::new(BlockProvider),
                Box::new(PostsProvider::new("alice")),
                Box::new(VotesProvider::new("bob")),
            ],
            observer,
        )
        .unwrap();

    watcher.mediator().notify().await;

    let seen = payloads(&mut rx);
    assert_eq!(seen.len(), 1);
    let payload = &seen[0];
    assert_eq!(payload["block"]["block_num"], 1);
    assert_eq!(payload["votes"]["bob"][0]["op"]["value"]["author"], "carol");
    assert!(payload.get("posts").is_none());

    // Nothing new on the chain: the filter does not match again.
    watcher.mediator().notify().await;
    assert!(drain(&mut rx).is_empty());

    // A post by alice satisfies the other branch.
    chain.produce(vec![post("alice", "first-post")]);
    watcher.mediator().notify().await;
    let seen = payloads(&mut rx);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["block"]["block_num"], 2);
    assert_eq!(seen[0]["posts"]["alice"][0]["op"]["value"]["permlink"], "first-post");
    assert!(seen[0].get("votes").is_none());
}

#[tokio::test]
async fn test_posts_and_comments_merge_into_one_payload() {
    let chain = Arc::new(InMemoryChain::new());
    chain.push_block(block(
        1,
        vec![post("alice", "my-post"), reply("alice", "bob", "re-bob")],
    ));
    let watcher = live_watcher(&chain);

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(
            OperationFilter::touching(OperationKind::Comment, "alice"),
            vec![
                Box::new(PostsProvider::new("alice")),
                Box::new(CommentsProvider::new("alice")),
            ],
            observer,
        )
        .unwrap();

    watcher.mediator().notify().await;

    let seen = payloads(&mut rx);
    assert_eq!(seen.len(), 1);
    let posts = seen[0]["posts"]["alice"].as_array().unwrap();
    let comments = seen[0]["comments"]["alice"].as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["op"]["value"]["parent_author"], "bob");
}

#[tokio::test]
async fn test_block_collector_fetches_once_for_many_subscribers() {
    let chain = Arc::new(InMemoryChain::new());
    chain.push_block(block(1, vec![transfer("gtg", "bob", "1.000 HIVE")]));
    let watcher = live_watcher(&chain);

    let mut receivers = Vec::new();
    for _ in 0..10 {
        let (observer, rx) = ChannelObserver::new();
        watcher
            .subscribe(
                OperationFilter::touching(OperationKind::Transfer, "bob"),
                vec![Box::new(BlockProvider)],
                observer,
            )
            .unwrap();
        receivers.push(rx);
    }

    watcher.mediator().notify().await;

    assert_eq!(chain.global_properties_calls(), 1);
    assert_eq!(chain.block_calls(), 1);
    for rx in &mut receivers {
        assert_eq!(payloads(rx).len(), 1);
    }
}

#[tokio::test]
async fn test_block_collector_catches_up_without_duplicates() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(3));
    let watcher = live_watcher(&chain);

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(FilterContainer::new(), vec![Box::new(BlockProvider)], observer)
        .unwrap();

    watcher.mediator().notify().await;
    chain.produce(Vec::new());
    chain.produce(Vec::new());
    watcher.mediator().notify().await;
    watcher.mediator().notify().await;

    let blocks: Vec<Value> = payloads(&mut rx)
        .iter()
        .map(|p| p["block"]["block_num"].clone())
        .collect();
    // First tick starts at the head; the second fetches 4 and 5 and reports
    // the newest; the third has nothing new, so its payload carries no block.
    assert_eq!(blocks, vec![Value::from(3), Value::from(5), Value::Null]);
    assert_eq!(chain.block_calls(), 3);
}

#[tokio::test]
async fn test_unbounded_catch_up_window_fetches_everything_pending() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(3));
    let mut config = Config::default();
    config.chain.max_blocks_per_tick = usize::MAX;
    let watcher = Watcher::new(&config, chain.clone()).unwrap();

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(FilterContainer::new(), vec![Box::new(BlockProvider)], observer)
        .unwrap();

    watcher.mediator().notify().await;
    for _ in 0..4 {
        chain.produce(Vec::new());
    }
    watcher.mediator().notify().await;

    let blocks: Vec<Value> = payloads(&mut rx)
        .iter()
        .map(|p| p["block"]["block_num"].clone())
        .collect();
    assert_eq!(blocks, vec![Value::from(3), Value::from(7)]);
    assert_eq!(chain.block_calls(), 5);
}

#[tokio::test]
async fn test_last_unsubscribe_stops_tracking_account() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(1));
    chain.set_account(account("gtg", "10.000 HIVE"));
    let watcher = live_watcher(&chain);
    let accounts = watcher
        .mediator()
        .factory()
        .collector(AccountClassifier::id())
        .unwrap()
        .clone();

    let (first, mut first_rx) = ChannelObserver::new();
    let (second, mut second_rx) = ChannelObserver::new();
    let first = watcher
        .subscribe(
            BalanceChangedFilter::new("gtg"),
            vec![Box::new(AccountProvider::new("gtg"))],
            first,
        )
        .unwrap();
    let second = watcher
        .subscribe(
            BalanceChangedFilter::new("gtg"),
            vec![Box::new(AccountProvider::new("gtg"))],
            second,
        )
        .unwrap();
    assert_eq!(accounts.registrations().param_count("gtg"), 2);

    // First sighting is the baseline.
    watcher.mediator().notify().await;
    assert!(drain(&mut first_rx).is_empty());
    assert_eq!(chain.account_calls(), 1);

    chain.set_account(account("gtg", "12.000 HIVE"));
    watcher.mediator().notify().await;
    for rx in [&mut first_rx, &mut second_rx] {
        let seen = payloads(rx);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["accounts"]["gtg"]["balance"], "12.000 HIVE");
    }

    assert!(first.unsubscribe().unwrap());
    assert_eq!(accounts.registrations().params(), vec!["gtg".to_string()]);
    assert!(matches!(drain(&mut first_rx).as_slice(), [Notification::Complete]));

    watcher.mediator().notify().await;
    assert_eq!(chain.account_calls(), 3);

    assert!(second.unsubscribe().unwrap());
    assert!(accounts.registrations().params().is_empty());
    assert!(!accounts.has_registered());

    watcher.mediator().notify().await;
    assert_eq!(chain.account_calls(), 3, "untracked accounts are not fetched");
}

#[tokio::test]
async fn test_upstream_failure_reaches_subscriber_error() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(1));
    let watcher = live_watcher(&chain);

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(VoteByFilter::new("bob"), Vec::new(), observer)
        .unwrap();

    chain.set_unavailable(true);
    watcher.mediator().notify().await;

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        Notification::Error(EngineError::Fetch { message, .. }) => {
            assert!(message.contains("node unavailable"));
        }
        other => panic!("expected fetch error, got {other:?}"),
    }

    // Recovers on the next tick once the node is back.
    chain.set_unavailable(false);
    chain.produce(vec![vote("bob", "alice", "hello")]);
    watcher.mediator().notify().await;
    assert!(matches!(drain(&mut rx).as_slice(), [Notification::Next(_)]));
}

#[tokio::test]
async fn test_replay_walks_the_range_and_stops() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(10));
    let mut config = Config::default();
    config.replay.from = Some(3);
    config.replay.to = Some(6);
    let watcher = Watcher::new(&config, chain.clone()).unwrap();
    assert_eq!(watcher.mode(), WatchMode::Replay { from: 3, to: 6 });

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(FilterContainer::new(), vec![Box::new(BlockProvider)], observer)
        .unwrap();

    watcher.run().await;

    let blocks: Vec<Value> = payloads(&mut rx)
        .iter()
        .map(|p| p["block"]["block_num"].clone())
        .collect();
    assert_eq!(
        blocks,
        vec![Value::from(3), Value::from(4), Value::from(5), Value::from(6)]
    );
    assert_eq!(watcher.mediator().factory().tick_count(), 4);
}

#[tokio::test]
async fn test_replay_ahead_of_chain_delivers_no_blocks() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(50));
    let mut config = Config::default();
    config.replay.from = Some(100);
    config.replay.to = Some(200);
    let watcher = Watcher::new(&config, chain.clone()).unwrap();

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(FilterContainer::new(), vec![Box::new(BlockProvider)], observer)
        .unwrap();

    watcher.run().await;

    let blocks: Vec<Value> = payloads(&mut rx)
        .iter()
        .map(|p| p["block"]["block_num"].clone())
        .collect();
    // The head stays just below the range, so the loop stops as stalled.
    assert_eq!(blocks, vec![Value::Null, Value::Null]);
    assert_eq!(chain.block_calls(), 0);
}

#[tokio::test]
async fn test_replay_waits_for_the_chain_to_reach_its_start() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(5));
    let mut config = Config::default();
    config.replay.from = Some(7);
    config.replay.to = Some(9);
    let watcher = Watcher::new(&config, chain.clone()).unwrap();

    let (observer, mut rx) = ChannelObserver::new();
    watcher
        .subscribe(FilterContainer::new(), vec![Box::new(BlockProvider)], observer)
        .unwrap();

    watcher.mediator().notify().await;
    chain.produce(Vec::new());
    chain.produce(Vec::new());
    watcher.mediator().notify().await;

    let blocks: Vec<Value> = payloads(&mut rx)
        .iter()
        .map(|p| p["block"]["block_num"].clone())
        .collect();
    assert_eq!(blocks, vec![Value::Null, Value::from(7)]);
}

#[tokio::test]
async fn test_invalid_replay_range_is_rejected() {
    let chain = Arc::new(InMemoryChain::new());
    let mut config = Config::default();
    config.replay.from = Some(10);
    config.replay.to = Some(5);
    assert!(Watcher::new(&config, chain).is_err());
}

#[tokio::test]
async fn test_queries_bypass_the_tick_cache() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(2));
    chain.set_account(account("alice", "1.000 HIVE"));
    chain.set_account(account("bob", "2.000 HIVE"));
    let watcher = live_watcher(&chain);
    let factory = watcher.mediator().factory();
    factory
        .push_classifier(&ClassifierRef::of::<AccountClassifier>(), "test")
        .unwrap();
    factory
        .push_classifier(&ClassifierRef::of::<BlockClassifier>(), "test")
        .unwrap();

    let ctx = factory.collect();
    let alice = ctx
        .query::<AccountClassifier>(vec!["alice".to_string()])
        .await
        .unwrap();
    let both = ctx
        .query::<AccountClassifier>(vec!["alice".to_string(), "bob".to_string()])
        .await
        .unwrap();
    let first_block = ctx.query::<BlockClassifier>(1).await.unwrap();

    assert_eq!(alice.len(), 1);
    assert_eq!(both.len(), 2);
    assert_eq!(first_block.map(|b| b.block_num), Some(1));
    assert_eq!(chain.account_calls(), 2);
    assert_eq!(ctx.fetch_count(), 0);
}

#[tokio::test]
async fn test_account_lookups_are_chunked() {
    let chain = InMemoryChain::new();
    let names: Vec<String> = (0..2500).map(|i| format!("user{i}")).collect();
    chain.set_account(account("user7", "1.000 HIVE"));

    let found = fetch_accounts_chunked(&chain, &names, 1000).await.unwrap();
    assert_eq!(found.len(), 1);

    let mut batches = chain.account_batches();
    batches.sort_unstable();
    assert_eq!(batches, vec![500, 1000, 1000]);

    // Oversized batches are capped at the node limit.
    let found = chain.get_accounts(&names[..1]).await.unwrap();
    assert!(found.is_empty());
    fetch_accounts_chunked(&chain, &names, 5000).await.unwrap();
    assert_eq!(chain.account_calls(), 7);
}

#[tokio::test]
async fn test_unknown_account_provider_adds_nothing() {
    let chain = Arc::new(InMemoryChain::with_empty_blocks(1));
    let watcher = live_watcher(&chain);
    let provider = AccountProvider::new("nobody");
    let factory = watcher.mediator().factory();
    for reference in provider.used_contexts() {
        factory.push_classifier(&reference, "test").unwrap();
    }

    let payload = provider.provide(&factory.collect()).await.unwrap();
    assert!(payload.is_empty());
}
