pub mod clock;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use service_core::error::AppError;

use crate::clock::{Clock, CoarseClock};
use crate::config::{LoginSettings, SessionConfig, SsoConfig};
use crate::services::{
    HttpSmsGateway, LoginCollaborators, LoginFlow, OtpStore, Reaper, SessionStore, SmsGateway,
};

/// Outbound SMS channel and how long the codes it carries stay valid.
#[derive(Clone)]
pub struct SmsSetup {
    pub gateway: Arc<dyn SmsGateway>,
    pub code_lifetime: Duration,
}

/// The running engine: stores, login flow and the background tasks that
/// keep the stores bounded.
pub struct SsoEngine {
    login: Arc<LoginFlow>,
    sessions: Arc<SessionStore>,
    otp: Option<Arc<OtpStore>>,
    tasks: Vec<Reaper>,
}

impl SsoEngine {
    /// Wires the engine from configuration. The SMS factor is only
    /// available when a gateway is configured.
    pub fn start(config: &SsoConfig, collaborators: LoginCollaborators) -> Result<Self, AppError> {
        let sms = match &config.mfa {
            Some(mfa) => {
                let gateway = HttpSmsGateway::new(mfa).map_err(AppError::ConfigError)?;
                Some(SmsSetup {
                    gateway: Arc::new(gateway),
                    code_lifetime: mfa.code_lifetime,
                })
            }
            None => None,
        };

        let (clock, clock_task) = CoarseClock::start(config.clock_resolution);
        let mut engine = Self::with_clock(
            clock,
            &config.session,
            sms,
            collaborators,
            config.login_settings(),
        );
        engine.tasks.push(clock_task);

        tracing::info!(
            idle_secs = config.session.idle.as_secs(),
            total_secs = config.session.total.as_secs(),
            external_mfa = engine.otp.is_some(),
            "SSO engine started"
        );

        Ok(engine)
    }

    /// Wires the engine around an existing clock. Must be called inside a
    /// tokio runtime.
    pub fn with_clock(
        clock: Arc<dyn Clock>,
        session: &SessionConfig,
        sms: Option<SmsSetup>,
        collaborators: LoginCollaborators,
        settings: LoginSettings,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&clock),
            session.idle,
            session.total,
        ));
        let otp = sms.map(|sms| {
            Arc::new(OtpStore::new(
                Arc::clone(&clock),
                sms.gateway,
                sms.code_lifetime,
            ))
        });

        let mut tasks = vec![sessions.spawn_gc()];
        if let Some(otp) = &otp {
            tasks.push(otp.spawn_gc());
        }

        let login = Arc::new(LoginFlow::new(
            clock,
            Arc::clone(&sessions),
            otp.clone(),
            collaborators,
            settings,
        ));

        Self {
            login,
            sessions,
            otp,
            tasks,
        }
    }

    pub fn login(&self) -> &Arc<LoginFlow> {
        &self.login
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn otp(&self) -> Option<&Arc<OtpStore>> {
        self.otp.as_ref()
    }

    /// Names of the background tasks still running.
    pub fn running_tasks(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|task| task.is_running())
            .map(Reaper::name)
            .collect()
    }

    /// Stops every background task and waits for them to exit.
    pub async fn shutdown(self) {
        for task in self.tasks {
            task.shutdown().await;
        }
        tracing::info!("SSO engine stopped");
    }
}
