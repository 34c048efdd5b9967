//! Integration tests for the lock-free relay stores.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use hpx_relay::{
    Envelope, Handler, TransportError,
    websocket::{HandlerRegistry, PendingRequestStore, RequestId, WsConfig},
};

fn test_config() -> Arc<WsConfig> {
    Arc::new(
        WsConfig::new("wss://test.com")
            .max_pending_requests(100)
            .request_timeout(Duration::from_secs(60)),
    )
}

fn counter() -> (Arc<AtomicUsize>, Handler) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler: Handler = {
        let count = Arc::clone(&count);
        Arc::new(move |_: &Envelope| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    (count, handler)
}

// ============================================================================
// PendingRequestStore Tests
// ============================================================================

#[test]
fn test_pending_store_concurrent_add_settle() {
    let store = Arc::new(PendingRequestStore::new(test_config()));
    let mut handles = vec![];

    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for j in 0..10 {
                let id = format!("thread{i}-req{j}");
                let mut rx = store
                    .add(RequestId::from(id.as_str()), "Ack", None)
                    .expect("capacity");

                let response = Envelope::new("ack_dto").with_request_id(id);
                assert!(store.settle(response).is_ok());
                assert!(rx.try_recv().expect("settled").is_ok());
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(store.is_empty());
}

#[test]
fn test_pending_store_settles_once_under_contention() {
    let store = Arc::new(PendingRequestStore::new(test_config()));
    let id = RequestId::from("contended");
    let mut rx = store.add(id.clone(), "Ack", None).unwrap();
    let wins = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let wins = Arc::clone(&wins);
            let id = id.clone();
            thread::spawn(move || {
                let won = if i % 2 == 0 {
                    store
                        .settle(Envelope::new("Ack").with_request_id(id.as_str()))
                        .is_ok()
                } else {
                    store.resolve(&id, Err(TransportError::connection_lost("closed")))
                };
                if won {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_ok());
    assert!(store.is_empty());
}

#[test]
fn test_pending_store_cleanup_preserves_fresh() {
    let store = PendingRequestStore::new(test_config());
    let _rx = store.add(RequestId::from("fresh"), "Ack", None).unwrap();

    store.cleanup_stale_with_notify();
    assert_eq!(store.len(), 1);
}

#[test]
fn test_pending_store_remove_is_silent() {
    let store = PendingRequestStore::new(test_config());
    let mut rx = store.add(RequestId::from("req1"), "Ack", None).unwrap();

    assert!(store.remove(&RequestId::from("req1")));
    assert!(!store.remove(&RequestId::from("req1")));
    // Sender dropped without a value.
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_pending_store_resolve_nonexistent() {
    let store = PendingRequestStore::new(test_config());

    let resolved = store.resolve(
        &RequestId::from("nonexistent"),
        Ok(Envelope::new("Ack")),
    );
    assert!(!resolved);
}

// ============================================================================
// HandlerRegistry Tests
// ============================================================================

#[test]
fn test_registry_concurrent_subscribe() {
    let registry = Arc::new(HandlerRegistry::new());
    let (count, handler) = counter();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let handler = Arc::clone(&handler);
            // Alternate spellings of the same key.
            let event_type = if i % 2 == 0 { "SharedEvent" } else { "shared_event_dto" };
            thread::spawn(move || registry.subscribe(event_type, handler))
        })
        .collect();
    let subs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.handler_count("SharedEvent"), 1);

    registry.dispatch(&Envelope::new("SHARED_EVENT"));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    drop(subs);
    assert!(registry.is_empty());
}

#[test]
fn test_registry_distinct_handlers_all_invoked() {
    let registry = Arc::new(HandlerRegistry::new());
    let counters: Vec<_> = (0..3).map(|_| counter()).collect();
    let _subs: Vec<_> = counters
        .iter()
        .map(|(_, handler)| registry.subscribe("Broadcast", Arc::clone(handler)))
        .collect();

    assert_eq!(registry.dispatch(&Envelope::new("broadcast")), 3);
    for (count, _) in &counters {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_registry_dispatch_without_subscribers() {
    let registry = HandlerRegistry::new();
    assert_eq!(registry.dispatch(&Envelope::new("nobody-listens")), 0);
}

// ============================================================================
// Stress Tests
// ============================================================================

#[test]
fn test_stress_registry_mixed_operations() {
    let registry = Arc::new(HandlerRegistry::new());
    let mut handles = vec![];

    for i in 0..20 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            for j in 0..50 {
                let event_type = format!("topic-{}", j % 5);
                match i % 2 {
                    0 => {
                        let (_, handler) = counter();
                        let sub = registry.subscribe(&event_type, handler);
                        if j % 3 == 0 {
                            sub.detach();
                        }
                    }
                    _ => {
                        registry.dispatch(&Envelope::new(event_type));
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(registry.len() <= 5);
}

#[test]
fn test_stress_pending_store_mixed_operations() {
    let store = Arc::new(PendingRequestStore::new(test_config()));
    let mut handles = vec![];

    for i in 0..20 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for j in 0..50 {
                let id = RequestId::from(format!("req-{i}-{j}"));
                match i % 4 {
                    0 => {
                        let _ = store.add(id, "Ack", None);
                    }
                    1 => {
                        store.resolve(&id, Ok(Envelope::new("Ack")));
                    }
                    2 => store.cleanup_stale_with_notify(),
                    _ => {
                        store.has_capacity();
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(store.len() <= 100);
}
