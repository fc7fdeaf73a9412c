use std::sync::Once;
use std::time::Duration;

static SETUP: Once = Once::new();

/// Install the test tracing subscriber once for the whole binary.
pub fn setup() {
    SETUP.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Poll `condition` until it holds or the timeout expires.
#[allow(dead_code)]
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
