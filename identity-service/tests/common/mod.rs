//! Shared fixtures for the HTTP integration tests.

use std::sync::{Arc, Mutex};

use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, JwtConfig, OtpSettings, RateLimitConfig,
        SecurityConfig, SwaggerConfig, SwaggerMode,
    },
    models::{OtpPurpose, Role, User},
    services::{EmailProvider, OtpEngine, SessionManager, TokenService},
    store::{IdentityStore, MemoryStore},
    AppState,
};
use service_core::axum::{async_trait, Router};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;

/// Captures outbound codes instead of delivering them.
#[derive(Default)]
pub struct CaptureMailer {
    sent: Mutex<Vec<(String, String, OtpPurpose)>>,
}

impl CaptureMailer {
    pub fn last_code(&self) -> String {
        self.sent.lock().unwrap().last().expect("no mail sent").1.clone()
    }

    pub fn last_code_for(&self, email: &str, purpose: OtpPurpose) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _, p)| to == email && *p == purpose)
            .map(|(_, code, _)| code.clone())
    }
}

#[async_trait]
impl EmailProvider for CaptureMailer {
    async fn send_otp_email(
        &self,
        to_email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AppError> {
        self.sent
            .lock()
            .unwrap()
            .push((to_email.to_string(), code.to_string(), purpose));
        Ok(())
    }
}

pub fn test_config(access_token_expiry_minutes: i64) -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: None,
            max_connections: 1,
        },
        jwt: JwtConfig {
            access_secret: "test-access-secret".to_string(),
            refresh_secret: "test-refresh-secret".to_string(),
            access_token_expiry_minutes,
            refresh_token_expiry_days: 7,
        },
        otp: OtpSettings {
            expiry_seconds: 600,
            cooldown_seconds: 60,
            max_attempts: 5,
        },
        smtp: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            otp_send_per_minute: 1000,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<CaptureMailer>,
    pub sessions: SessionManager,
}

pub fn spawn_app() -> TestApp {
    spawn_app_with_config(test_config(60))
}

pub fn spawn_app_with_config(config: IdentityConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(CaptureMailer::default());

    let dyn_store: Arc<dyn IdentityStore> = store.clone();
    let tokens = TokenService::new(&config.jwt);
    let sessions = SessionManager::new(dyn_store.clone(), tokens);
    let otp = OtpEngine::new(dyn_store.clone(), mailer.clone(), config.otp.engine_config());

    let otp_rate_limiter = create_ip_rate_limiter(config.rate_limit.otp_send_per_minute, 60);
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let state = AppState {
        config,
        store: dyn_store,
        otp,
        sessions: sessions.clone(),
        otp_rate_limiter,
        ip_rate_limiter,
    };

    TestApp {
        app: build_router(state),
        store,
        mailer,
        sessions,
    }
}

/// Insert a user directly, bypassing the registration flow.
pub async fn seed_user(store: &MemoryStore, email: &str, password: &str, role: Role) -> User {
    let hash = identity_service::utils::hash_password(&identity_service::utils::Password::new(
        password.to_string(),
    ))
    .unwrap();
    let mut user = User::new(
        email.to_string(),
        hash.into_string(),
        "Test User".to_string(),
        role,
    );
    user.email_verified = true;
    store.insert_user(&user).await.unwrap();
    user
}
