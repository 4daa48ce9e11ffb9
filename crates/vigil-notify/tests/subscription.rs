//! Subscription set properties: idempotence and rollback.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use proptest::prelude::*;
use vigil_core::{NotifyError, Topic};
use vigil_notify::mock::{MockSubscriptionApi, MockTransport};
use vigil_notify::{Operation, SubscriptionManager};

use common::{config, topics};

fn manager(
    transport: &MockTransport,
    api: &MockSubscriptionApi,
) -> (
    SubscriptionManager,
    tokio::sync::mpsc::UnboundedReceiver<vigil_notify::ChannelConnection>,
) {
    SubscriptionManager::new(
        Arc::new(transport.clone()),
        Arc::new(api.clone()),
        config(3, 1),
    )
}

#[tokio::test]
async fn repeated_add_makes_no_remote_call() {
    let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
    let (manager, _channels) = manager(&transport, &api);

    manager.add(topics(&["a", "b"])).await.unwrap();
    manager.add(topics(&["a", "b"])).await.unwrap();
    manager.add(topics(&["b"])).await.unwrap();

    assert_eq!(api.requests().len(), 1);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(manager.topics().await.len(), 2);
}

#[tokio::test]
async fn add_pushes_only_new_topics() {
    let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
    let (manager, _channels) = manager(&transport, &api);

    manager.add(topics(&["a"])).await.unwrap();
    manager.add(topics(&["a", "b", "b"])).await.unwrap();

    let adds = api.requests_with(Operation::Add);
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].topics, topics(&["b"]));
}

#[tokio::test]
async fn remove_of_absent_topics_makes_no_remote_call() {
    let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
    let (manager, _channels) = manager(&transport, &api);
    manager.add(topics(&["a"])).await.unwrap();
    api.clear();

    manager.remove(topics(&["zzz"])).await.unwrap();
    manager.remove(topics(&["a"])).await.unwrap();
    manager.remove(topics(&["a"])).await.unwrap();

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].operation, Operation::Remove);
    assert!(manager.topics().await.is_empty());
}

#[tokio::test]
async fn remove_failure_is_best_effort() {
    let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
    let (manager, _channels) = manager(&transport, &api);
    manager.add(topics(&["a", "b"])).await.unwrap();

    api.fail_next(1, NotifyError::Connection("timeout".into()));
    manager.remove(topics(&["a"])).await.unwrap();
    assert_eq!(
        manager.topics().await,
        BTreeSet::from([Topic::new("b")])
    );
}

#[tokio::test]
async fn rejected_add_rolls_back_whole_call() {
    let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
    let (manager, _channels) = manager(&transport, &api);
    manager.add(topics(&["a"])).await.unwrap();
    let id = manager.connection_id().await.unwrap();

    api.refuse("bad", "invalid topic");
    let err = manager.add(topics(&["b", "bad"])).await.unwrap_err();

    assert_matches!(&err, NotifyError::Subscription { rejected } => {
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].topic, Topic::new("bad"));
        assert_eq!(rejected[0].reason, "invalid topic");
    });
    assert_eq!(manager.topics().await, BTreeSet::from([Topic::new("a")]));
    // "b" was accepted remotely and then undone
    assert_eq!(api.server_view(&id), BTreeSet::from([Topic::new("a")]));
    let removes = api.requests_with(Operation::Remove);
    assert_eq!(removes.len(), 1);
    assert_eq!(removes[0].topics, topics(&["b"]));
}

#[tokio::test]
async fn rejected_first_add_leaves_empty_set() {
    let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
    let (manager, _channels) = manager(&transport, &api);
    api.refuse("x", "quota exceeded");

    let err = manager.add(topics(&["x", "y"])).await.unwrap_err();
    assert_matches!(err, NotifyError::Subscription { .. });
    assert!(manager.topics().await.is_empty());

    let id = manager.connection_id().await.unwrap();
    assert!(api.server_view(&id).is_empty());

    // the channel stays usable
    manager.add(topics(&["y"])).await.unwrap();
    assert_eq!(api.server_view(&id), BTreeSet::from([Topic::new("y")]));
}

#[derive(Clone, Debug)]
enum Op {
    Add(Vec<u8>),
    Remove(Vec<u8>),
}

fn op() -> impl Strategy<Value = Op> {
    let ids = prop::collection::vec(0u8..6, 0..4);
    prop_oneof![ids.clone().prop_map(Op::Add), ids.prop_map(Op::Remove)]
}

fn names(ids: &[u8]) -> Vec<Topic> {
    ids.iter().map(|i| Topic::new(format!("entity.{i}.presence"))).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn set_matches_model_and_repeats_are_free(ops in prop::collection::vec(op(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
            let (manager, _channels) = manager(&transport, &api);
            let mut model: BTreeSet<Topic> = BTreeSet::new();

            for op in &ops {
                match op {
                    Op::Add(ids) => {
                        manager.add(names(ids)).await.unwrap();
                        model.extend(names(ids));
                        let before = api.requests().len();
                        manager.add(names(ids)).await.unwrap();
                        prop_assert_eq!(api.requests().len(), before);
                    }
                    Op::Remove(ids) => {
                        manager.remove(names(ids)).await.unwrap();
                        for t in names(ids) {
                            let _ = model.remove(&t);
                        }
                        let before = api.requests().len();
                        manager.remove(names(ids)).await.unwrap();
                        prop_assert_eq!(api.requests().len(), before);
                    }
                }
                prop_assert_eq!(manager.topics().await, model.clone());
            }

            prop_assert!(api.requests().iter().all(|r| !r.topics.is_empty()));
            if let Some(id) = manager.connection_id().await {
                prop_assert_eq!(api.server_view(&id), model);
            }
            Ok(())
        })?;
    }
}
