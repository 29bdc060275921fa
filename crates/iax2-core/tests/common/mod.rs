#![allow(dead_code)]

use std::time::Duration;

use rvoip_iax2_core::config::Iax2ConfigBuilder;
use rvoip_iax2_core::{Iax2Config, Iax2Endpoint, Iax2Event};
use tokio::sync::mpsc::UnboundedReceiver;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize test logging once per test binary
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Builder for an endpoint on an ephemeral loopback port
pub fn loopback_config() -> Iax2ConfigBuilder {
    Iax2Config::builder()
        .listen_addr("127.0.0.1:0".parse().unwrap())
        .status_check_interval(Duration::from_secs(30))
}

pub async fn start(builder: Iax2ConfigBuilder) -> (Iax2Endpoint, UnboundedReceiver<Iax2Event>) {
    let config = builder.build().expect("valid test config");
    Iax2Endpoint::bind(config).await.expect("endpoint binds")
}

/// Wait for the first event matching `pred`, skipping the others
pub async fn expect_event<F>(events: &mut UnboundedReceiver<Iax2Event>, mut pred: F) -> Iax2Event
where
    F: FnMut(&Iax2Event) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
