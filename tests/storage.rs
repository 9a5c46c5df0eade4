use std::time::Duration;

use overlay_dht::{messages::Message, Config, Id, Testnet};
use serde_json::{json, Value};

fn holders(testnet: &Testnet, key: &Id) -> usize {
    testnet
        .nodes
        .iter()
        .filter(|node| node.get_value(key).is_some())
        .count()
}

fn stored_json(testnet: &Testnet, index: usize, key: &Id) -> Value {
    let item = testnet.nodes[index].get_value(key).unwrap();

    serde_json::from_str(&item.value).unwrap()
}

fn store_messages(testnet: &Testnet) -> usize {
    testnet
        .sent_messages()
        .iter()
        .filter(|(_, message)| matches!(message, Message::Store(_)))
        .count()
}

#[test]
fn store_reaches_closest_nodes() {
    let mut testnet = Testnet::bootstrapped(10).unwrap();
    let key = Id::from_key(b"key");
    let publisher = testnet.nodes[2].guid();

    testnet.nodes[2]
        .iterative_store(key, "value", None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();

    assert_eq!(holders(&testnet, &key), 10);

    for node in &testnet.nodes {
        let item = node.get_value(&key).unwrap();
        assert_eq!(item.value, "value");
        assert_eq!(item.original_publisher_id, publisher);
    }
}

#[test]
fn keyword_index_merges_through_the_network() {
    let mut testnet = Testnet::bootstrapped(8).unwrap();
    let key = Id::from_key(b"keyword:shoes");
    let coordinator = testnet.nodes[0].clone();

    coordinator
        .iterative_store(key, r#"{"listings": ["A"]}"#, None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();

    coordinator
        .iterative_store(key, r#"{"keyword_index_add": "X"}"#, None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();

    for index in 0..8 {
        assert_eq!(stored_json(&testnet, index, &key), json!({"listings": ["A", "X"]}));
    }

    coordinator
        .iterative_store(key, r#"{"keyword_index_remove": "A"}"#, None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();

    for index in 0..8 {
        assert_eq!(stored_json(&testnet, index, &key), json!({"listings": ["X"]}));
    }
}

#[test]
fn removing_a_non_member_propagates_nothing() {
    let mut testnet = Testnet::bootstrapped(6).unwrap();
    let key = Id::from_key(b"notaries");
    let coordinator = testnet.nodes[1].clone();

    coordinator
        .iterative_store(key, r#"{"notary_index_add": "N"}"#, None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();
    testnet.clear_sent_messages();

    coordinator
        .iterative_store(key, r#"{"notary_index_remove": "Z"}"#, None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();

    assert_eq!(store_messages(&testnet), 0);
    for index in 0..6 {
        assert_eq!(stored_json(&testnet, index, &key), json!({"notaries": ["N"]}));
    }
}

#[test]
fn replicas_reach_nodes_that_join_later() {
    let mut testnet = Testnet::new(0).unwrap();
    for _ in 0..5 {
        testnet
            .add_node(Config {
                replicate_interval: Duration::ZERO,
                ..Default::default()
            })
            .unwrap();
    }
    testnet.bootstrap();

    let key = Id::from_key(b"replicated");
    testnet.nodes[0]
        .iterative_store(key, "value", None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();
    assert_eq!(holders(&testnet, &key), 5);

    let late = testnet.add_node(Config::default()).unwrap();
    late.start(testnet.nodes[0].local_contact());
    testnet.run_until_idle();
    assert!(late.get_value(&key).is_none());

    // A replica holder pushes the value again, keeping its publisher.
    testnet.nodes[3].republish_data();
    testnet.run_until_idle();

    let item = late.get_value(&key).unwrap();
    assert_eq!(item.value, "value");
    assert_eq!(item.original_publisher_id, testnet.nodes[0].guid());
}

#[test]
fn expired_replicas_are_dropped() {
    let mut testnet = Testnet::new(0).unwrap();
    let publisher = testnet.add_node(Config::default()).unwrap();
    let replica = testnet
        .add_node(Config {
            data_expire_timeout: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();
    testnet.bootstrap();

    let key = Id::from_key(b"expiring");
    publisher
        .iterative_store(key, "value", None, Duration::ZERO)
        .unwrap();
    testnet.run_until_idle();
    assert!(replica.get_value(&key).is_some());

    replica.republish_data();
    testnet.run_until_idle();

    assert!(replica.get_value(&key).is_none());
    assert!(publisher.get_value(&key).is_some());
}

#[test]
fn own_values_are_republished_when_expired() {
    let mut testnet = Testnet::new(0).unwrap();
    let publisher = testnet
        .add_node(Config {
            data_expire_timeout: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();
    testnet.add_node(Config::default()).unwrap();
    testnet.bootstrap();

    let key = Id::from_key(b"mine");
    publisher
        .iterative_store(key, "value", None, Duration::from_secs(3600))
        .unwrap();
    testnet.run_until_idle();

    let before = publisher.get_value(&key).unwrap().original_publish_time;
    testnet.clear_sent_messages();

    publisher.republish_data();
    testnet.run_until_idle();

    let after = publisher.get_value(&key).unwrap();
    assert!(after.original_publish_time >= before + 3600);
    assert_eq!(after.original_publisher_id, publisher.guid());
    assert_eq!(store_messages(&testnet), 1);
}
