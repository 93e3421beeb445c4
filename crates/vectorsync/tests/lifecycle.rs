//! Parked-interest satisfaction, newcomer answering, listen-only mode,
//! shutdown, registration recovery, and interest rate-limiting.

mod common;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use common::{broadcast, participant, participant_with, tick, Probe, LIFETIME};
use tokio::task::LocalSet;
use vectorsync::{ActionType, SyncConfig, SyncEngine, SyncHandlers, SyncStateMsg};
use vectorsync_core::Name;
use vectorsync_face::memory::{MemoryNetwork, TestKeyChain, TokioScheduler};
use vectorsync_face::Face;

#[tokio::test(start_paused = true)]
async fn parked_interest_is_answered_by_publish() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);
            let a = participant(&network, "/a", 1);
            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            a.engine.publish(Bytes::new());
            tick().await;
            assert_eq!(a.engine.vector_root(), "1,1;");

            // Same digest as A's root: nothing to answer with, so the
            // interest parks.
            let responses = probe.express(broadcast().append("1,1;"));
            tick().await;
            assert!(responses.borrow().is_empty());

            // The next publish diffs the parked digest against the new
            // state and sends the positive set.
            a.engine.publish(Bytes::new());
            tick().await;

            let responses = responses.borrow();
            assert_eq!(responses.len(), 1);
            let msg = SyncStateMsg::decode_from_bytes(&responses[0].content).unwrap();
            assert_eq!(msg.ss.len(), 1);
            assert_eq!(msg.ss[0].action_type(), Some(ActionType::Update));
            assert_eq!(msg.ss[0].name.as_deref(), Some("/a"));
            assert_eq!(msg.ss[0].seq(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn stale_digest_is_answered_immediately() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);
            let a = participant(&network, "/a", 1);
            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            a.engine.publish(Bytes::new());
            a.engine.publish(Bytes::new());
            a.engine.publish(Bytes::new());
            tick().await;

            // A digest one publish behind: positive diff, answered on
            // the spot rather than parked.
            let responses = probe.express(broadcast().append("1,2;"));
            tick().await;

            let responses = responses.borrow();
            assert_eq!(responses.len(), 1);
            let msg = SyncStateMsg::decode_from_bytes(&responses[0].content).unwrap();
            assert_eq!(msg.ss[0].seq(), 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn newcomer_interest_answered_only_with_state() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);
            let a = participant(&network, "/a", 1);

            // Before bootstrap the local root is still "00": silence.
            let early = probe.express(broadcast().append("00"));
            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            assert!(early.borrow().is_empty());

            a.engine.publish(Bytes::new());
            tick().await;

            let responses = probe.express(broadcast().append("00"));
            tick().await;
            let responses = responses.borrow();
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].freshness, Some(Duration::from_millis(500)));
            assert!(responses[0].signature.is_some());
            let msg = SyncStateMsg::decode_from_bytes(&responses[0].content).unwrap();
            assert_eq!(msg.ss.len(), 1);
            assert_eq!(msg.ss[0].name.as_deref(), Some("/a"));
            assert_eq!(msg.ss[0].seq(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn no_data_participant_stays_silent() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);
            let nd = participant_with(&network, "/a", 1, |config| config.no_data(true));
            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            nd.engine.publish(Bytes::new());
            tick().await;
            assert_eq!(nd.engine.vector_root(), "1,1;");

            // Newcomers get nothing.
            let newcomer = probe.express(broadcast().append("00"));
            // Equal digests are not even parked.
            let parked = probe.express(broadcast().append("1,1;"));
            tick().await;
            nd.engine.publish(Bytes::new());
            tokio::time::sleep(Duration::from_millis(100)).await;

            assert!(newcomer.borrow().is_empty());
            assert!(parked.borrow().is_empty());

            // It still expresses sync interests of its own.
            assert!(probe.seen("1,2;") >= 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_silences_the_engine() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);
            let a = participant(&network, "/a", 1);
            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            a.engine.publish(Bytes::new());
            tick().await;

            a.engine.shutdown();
            let interests_before = probe.total_seen();
            let sequence_before = a.engine.sequence_no();

            let responses = probe.express(broadcast().append("00"));
            tokio::time::sleep(LIFETIME * 3).await;

            // No answers, no re-expressions, and publish is a no-op.
            assert!(responses.borrow().is_empty());
            assert_eq!(probe.total_seen(), interests_before);
            a.engine.publish(Bytes::new());
            assert_eq!(a.engine.sequence_no(), sequence_before);
            assert_eq!(a.engine.vector_root(), "1,1;");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn failed_registration_recovers_through_re_register() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);

            let face = Rc::new(network.face());
            face.set_refuse_registrations(true);

            let failed = Rc::new(Cell::new(false));
            let failed_flag = Rc::clone(&failed);
            let engine = SyncEngine::new(
                SyncConfig::new(Name::from_uri("/a"), broadcast(), 1).sync_lifetime(LIFETIME),
                SyncHandlers::new(|_, _| {}, || {}),
                Rc::clone(&face) as Rc<dyn Face>,
                Rc::new(TestKeyChain::from_seed(Name::from_uri("/keys/a"), [1u8; 32])),
                Rc::new(TokioScheduler),
                Box::new(move |_prefix| failed_flag.set(true)),
            );
            tick().await;
            assert!(failed.get());

            face.set_refuse_registrations(false);
            engine.re_register(Box::new(|prefix| {
                panic!("re-registration failed for {prefix}")
            }));

            // Bootstrap still completes (the newcomer interest was
            // expressed regardless), and the filter is now live.
            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            engine.publish(Bytes::new());
            tick().await;

            let responses = probe.express(broadcast().append("00"));
            tick().await;
            assert_eq!(responses.borrow().len(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn update_interval_rate_limits_interests() {
    common::init_tracing();
    LocalSet::new()
        .run_until(async {
            let network = MemoryNetwork::new();
            let probe = Probe::new(&network);
            let a = participant_with(&network, "/a", 1, |config| {
                config.update_interval(Duration::from_millis(500))
            });

            tokio::time::sleep(LIFETIME + Duration::from_millis(50)).await;
            assert_eq!(a.engine.vector_root(), "1,0;");

            // Two publishes in quick succession: both suppressed while
            // the digest settles.
            a.engine.publish(Bytes::new());
            a.engine.publish(Bytes::new());
            tick().await;
            assert_eq!(probe.seen("1,1;"), 0);
            assert_eq!(probe.seen("1,2;"), 0);

            // The periodic check notices the changed root and sends
            // one interest carrying the latest digest only.
            tokio::time::sleep(Duration::from_millis(600)).await;
            assert_eq!(probe.seen("1,1;"), 0);
            assert_eq!(probe.seen("1,2;"), 1);
        })
        .await;
}
