//! Exercises the public `Handle` surface end to end against an unconnected
//! monitor (no listener on any candidate address), so registration and
//! push calls are tested without depending on a running server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outrig_sdk::Builder;

#[tokio::test]
async fn registers_and_pushes_without_a_connected_monitor() {
    let handle = Builder::new()
        .app_name("handle-api-test")
        .domain_socket_path("/tmp/outrig-handle-api-test-does-not-exist.sock")
        .tcp_addr("127.0.0.1:0")
        .disable_docker_probe(true)
        .publish_interval(Duration::from_millis(50))
        .build();

    let counter = Arc::new(Mutex::new(0i64));
    handle
        .new_watch("counter")
        .as_json()
        .sync(counter.clone())
        .expect("sync watch should register once");

    assert!(matches!(
        handle.new_watch("counter").as_json().sync(counter.clone()),
        Err(outrig_sdk::Error::RegistrationDuplicateName(name)) if name == "counter"
    ));

    let atomic = Arc::new(AtomicU64::new(0));
    handle
        .new_watch("hits")
        .atomic(atomic.clone())
        .expect("atomic watch should register");
    atomic.fetch_add(3, Ordering::Relaxed);

    handle.new_watch("last-request").push_only().expect("push watch should register");
    handle.push("last-request", "GET /healthz").expect("push should reach a registered watch");

    handle.track_value("build-id", "abc123").expect("track_value auto-registers");
    handle.track_value("build-id", "abc123").expect("second track_value just pushes");

    handle
        .new_watch("static-field")
        .as_stringer()
        .static_value(42i64)
        .expect("static watch should register");

    handle.unregister("hits");
    handle.unregister("hits");

    handle.set_goroutine_name("test-task");

    assert_eq!(handle.app_run().app_name, "handle-api-test");

    handle.app_done();
}
