//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::{Duration, Instant};
use uwv_dataflow::RuntimeSettings;

pub const POSE: &str = "/base/samples/RigidBodyState";
pub const SONAR: &str = "/base/samples/SonarBeam";

/// Runtime settings with short waits suited to tests
pub fn test_settings() -> RuntimeSettings {
    RuntimeSettings {
        wait_budget_ms: 2000,
        control_timeout_ms: 2000,
        backpressure_timeout_ms: 50,
        poll_interval_ms: 2,
        fail_fast: true,
    }
}

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
