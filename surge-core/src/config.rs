use surge_http::ClientConfig;

/// Process-wide engine options, set before `run` and frozen during it.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Inject a `User-Loop: <userIndex>/<loopIndex>` header into every
    /// request.
    pub add_user_loop_header: bool,
    /// Inject a `Scenario-Step: <title>: <step name>` header into every
    /// request.
    pub add_scenario_step_header: bool,
    /// Accept invalid TLS certificates (test targets behind self-signed
    /// certs).
    pub skip_certificate_validation: bool,
    /// Route all traffic through this proxy URL.
    pub proxy: Option<String>,
    /// Override the User-Agent header for all per-user clients.
    pub user_agent: Option<String>,
}

impl Settings {
    pub(crate) fn client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_certificate_validation: self.skip_certificate_validation,
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}
