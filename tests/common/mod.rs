#![allow(dead_code)]

pub use devloop_test_utils::builders;
pub use devloop_test_utils::capture::{CaptureSink, Captured};
pub use devloop_test_utils::fake_supervisor::{Call, FakeSupervisor, journal};
pub use devloop_test_utils::{eventually, init_tracing, with_timeout};
