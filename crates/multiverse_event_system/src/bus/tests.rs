//! Tests for the event buses

#[cfg(test)]
mod tests {
    use crate::{EventBus, EventError, OwnerTag, PlayerId, SenderEventBus};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct Ping(u32);

    #[derive(Debug)]
    struct Pong;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = EventBus::new("test");
        let log = recorder();

        for owner in ["first", "second", "third"] {
            let log = log.clone();
            bus.register(owner, move |event: Arc<Ping>| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("{owner}:{}", event.0));
                    Ok(())
                }
            })
            .await;
        }

        assert_eq!(bus.dispatch(Ping(1)).await, 3);
        assert_eq!(bus.dispatch(Ping(2)).await, 3);

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["first:1", "second:1", "third:1", "first:2", "second:2", "third:2"]
        );
    }

    #[tokio::test]
    async fn test_only_exact_type_handlers_receive_event() {
        let bus = EventBus::new("test");
        let log = recorder();

        let ping_log = log.clone();
        bus.register("owner", move |_: Arc<Ping>| {
            let log = ping_log.clone();
            async move {
                log.lock().unwrap().push("ping".to_string());
                Ok(())
            }
        })
        .await;

        assert_eq!(bus.dispatch(Pong).await, 0);
        assert!(log.lock().unwrap().is_empty());

        let stats = bus.stats().await;
        assert_eq!(stats.unhandled_events, 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_siblings() {
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
        let bus = EventBus::with_fault_channel("test", fault_tx);
        let log = recorder();

        bus.register("broken", |_: Arc<Ping>| async move {
            Err(EventError::HandlerExecution("boom".to_string()))
        })
        .await;

        bus.register("panicky", |_: Arc<Ping>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok(())
        })
        .await;

        let healthy_log = log.clone();
        bus.register("healthy", move |_: Arc<Ping>| {
            let log = healthy_log.clone();
            async move {
                log.lock().unwrap().push("healthy".to_string());
                Ok(())
            }
        })
        .await;

        let delivered = bus.dispatch(Ping(0)).await;
        assert_eq!(delivered, 1);
        assert_eq!(log.lock().unwrap().as_slice(), ["healthy"]);

        let first = fault_rx.try_recv().expect("fault for failing handler");
        assert_eq!(first.owner, OwnerTag::new("broken"));
        assert!(matches!(first.error, EventError::HandlerExecution(_)));

        let second = fault_rx.try_recv().expect("fault for panicking handler");
        assert_eq!(second.owner, OwnerTag::new("panicky"));
        match second.error {
            EventError::HandlerPanicked(message) => assert!(message.contains("handler exploded")),
            other => panic!("unexpected error {other:?}"),
        }

        let stats = bus.stats().await;
        assert_eq!(stats.faults, 2);
        assert_eq!(stats.deliveries, 1);
    }

    #[tokio::test]
    async fn test_registration_is_idempotent_per_owner_and_type() {
        let bus = EventBus::new("test");
        let log = recorder();

        for label in ["old", "new"] {
            let log = log.clone();
            bus.register("owner", move |_: Arc<Ping>| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(label.to_string());
                    Ok(())
                }
            })
            .await;
        }

        assert_eq!(bus.handler_count::<Ping>(), 1);
        assert_eq!(bus.stats().await.total_handlers, 1);

        bus.dispatch(Ping(0)).await;
        assert_eq!(log.lock().unwrap().as_slice(), ["new"]);
    }

    #[tokio::test]
    async fn test_unregister_owner_removes_all_of_its_handlers() {
        let bus = EventBus::new("test");

        bus.register("game", |_: Arc<Ping>| async move { Ok(()) }).await;
        bus.register("game", |_: Arc<Pong>| async move { Ok(()) }).await;
        bus.register("observer", |_: Arc<Ping>| async move { Ok(()) }).await;

        let removed = bus.unregister_owner(&OwnerTag::new("game")).await;
        assert_eq!(removed, 2);
        assert_eq!(bus.handler_count::<Ping>(), 1);
        assert_eq!(bus.handler_count::<Pong>(), 0);
        assert_eq!(bus.stats().await.total_handlers, 1);
        assert_eq!(bus.dispatch(Pong).await, 0);
    }

    #[tokio::test]
    async fn test_sender_bus_passes_sender_identity() {
        let bus: SenderEventBus<PlayerId> = SenderEventBus::new("messages");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        bus.register("game", move |event: Arc<Ping>, sender: PlayerId| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().push((sender, event.0));
                Ok(())
            }
        })
        .await;

        let alice = PlayerId::new();
        let bob = PlayerId::new();
        bus.dispatch(Ping(1), alice).await;
        bus.dispatch(Ping(2), bob).await;

        assert_eq!(seen.lock().unwrap().as_slice(), [(alice, 1), (bob, 2)]);
    }

    #[tokio::test]
    async fn test_suspending_handler_keeps_per_dispatch_order() {
        let bus = Arc::new(EventBus::new("test"));
        let log = recorder();

        let slow_log = log.clone();
        bus.register("slow", move |event: Arc<Ping>| {
            let log = slow_log.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                log.lock().unwrap().push(format!("slow:{}", event.0));
                Ok(())
            }
        })
        .await;

        let fast_log = log.clone();
        bus.register("fast", move |event: Arc<Ping>| {
            let log = fast_log.clone();
            async move {
                log.lock().unwrap().push(format!("fast:{}", event.0));
                Ok(())
            }
        })
        .await;

        bus.dispatch(Ping(1)).await;
        bus.dispatch(Ping(2)).await;

        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["slow:1", "fast:1", "slow:2", "fast:2"]
        );
    }
}
