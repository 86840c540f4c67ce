//! The load-generation engine: scenario registry, virtual users, the fluent
//! step/request/response API and the three-phase load orchestrator.
//!
//! Scenario code reads like a session script:
//!
//! ```no_run
//! use std::time::Duration;
//! use futures::future::BoxFuture;
//! use surge_core::{Method, StatusCode, VirtualUser};
//!
//! fn browse(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
//!     Box::pin(async move {
//!         let _ = user.step("open start page")
//!             .expect_success_percentage_at_least(95.0)
//!             .request(Method::GET, "http://localhost:8080/")
//!             .send_with_timeout(Duration::from_secs(3))
//!             .await
//!             .assert_status_code(StatusCode::OK)
//!             .assert_body_contains("welcome")
//!             .archive_stats();
//!     })
//! }
//! ```

mod config;
mod engine;
mod request;
mod response;
mod run;
mod scenario;
mod step;
mod user;
pub mod util;

pub use config::Settings;
pub use engine::{Engine, EngineError, RequestInterceptor};
pub use request::RequestBuilder;
pub use response::Response;
pub use scenario::{Scenario, ScenarioRunner};
pub use step::Step;
pub use user::VirtualUser;

pub use surge_trace::{Expectation, LoadConfig, RandomInterval};

// Re-exported so scenario authors don't need direct `http` / `reqwest`
// dependencies for the common cases.
pub use http::{Method, StatusCode};
pub use reqwest::Request as OutgoingRequest;
