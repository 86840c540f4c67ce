//! Demo scenarios run against the target base URL supplied on the command
//! line. They double as a template for writing project-specific scenarios.

use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;

use surge_core::{
    Engine, EngineError, LoadConfig, Method, RandomInterval, Scenario, StatusCode, VirtualUser,
};

use crate::cli::RunArgs;

static TARGET: OnceLock<String> = OnceLock::new();

fn target() -> String {
    TARGET.get().cloned().unwrap_or_default()
}

fn browse(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        user.think_time_random(Duration::from_millis(100), Duration::from_millis(500))
            .await;
        let _ = user
            .step("open landing page")
            .expect_success_percentage_at_least(95.0)
            .expect_total_request_response_time_percentile_limit(90.0, Duration::from_secs(2))
            .request(Method::GET, &target())
            .header("Load-Test", "surge demo traffic")
            .send_with_timeout(Duration::from_secs(3))
            .await
            .assert_status_code(StatusCode::OK)
            .archive_stats();
        user.think_time_random(Duration::from_millis(200), Duration::from_millis(2_000))
            .await;
    })
}

fn probe(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let _ = user
            .step("probe latency")
            .expect_error_percentage_at_most(5.0)
            .expect_timeout_percentage_at_most(5.0)
            .expect_time_to_first_byte_percentile_limit(95.0, Duration::from_secs(1))
            .request(Method::GET, &target())
            .send_with_timeout(Duration::from_secs(5))
            .await
            .assert_body_size_at_least(1)
            .archive_stats();
        user.think_time_random(Duration::from_millis(500), Duration::from_millis(1_500))
            .await;
    })
}

pub fn register(engine: &mut Engine, args: &RunArgs) -> Result<(), EngineError> {
    let _ = TARGET.set(args.target.clone());

    let load = LoadConfig {
        looping_users: args.users,
        loop_delay: RandomInterval {
            min: Duration::from_millis(50),
            max: Duration::from_millis(200),
        },
        ramp_up: Duration::from_secs(args.ramp_up),
        plateau: Duration::from_secs(args.plateau),
        ramp_down: Duration::from_secs(args.ramp_down),
        ..LoadConfig::default()
    };

    engine.add_scenario(
        Scenario::new("view landing page", browse)
            .with_description("opens the landing page with human-ish think-times")
            .with_load(load.clone()),
    )?;
    engine.add_scenario(
        Scenario::new("probe latency", probe)
            .with_description("tight loop watching time-to-first-byte")
            .with_load(load),
    )?;

    // Tag all generated traffic so it is recognizable on the target side.
    engine.add_request_interceptor(|_user, request| {
        request.headers_mut().insert(
            "x-load-test",
            http::HeaderValue::from_static("surge"),
        );
    });

    Ok(())
}
