use crate::cache::{RefreshStrategy, SystemClock};
use crate::config::Config;
use crate::state::AppState;
use crate::upstream::HolidayApi;
use crate::utils::fmt_duration;
use crate::web::create_router;
use anyhow::Context;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
}

impl App {
    /// Validate configuration and build the shared cache.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let schedule = config
            .refresh_schedule()
            .context("Invalid refresh configuration")?;

        match schedule.strategy() {
            RefreshStrategy::Ttl { ttl } => {
                info!(ttl = fmt_duration(*ttl), timezone = %schedule.timezone(), "TTL refresh policy");
            }
            RefreshStrategy::Scheduled {
                allowed_hours,
                emergency_threshold,
            } => {
                info!(
                    hours = ?allowed_hours,
                    emergency_threshold = emergency_threshold.map(fmt_duration),
                    timezone = %schedule.timezone(),
                    "Scheduled refresh policy"
                );
            }
        }

        if let Some(ttl) = config.ignored_ttl() {
            warn!(
                ttl = fmt_duration(ttl),
                "REFRESH_TTL is ignored while REFRESH_ALLOWED_HOURS is set"
            );
        }

        let holiday_api =
            HolidayApi::new(config.holiday_api()).context("Failed to create holiday API client")?;

        let app_state = AppState::new(
            &config,
            schedule,
            Arc::new(holiday_api),
            Arc::new(SystemClock),
        );

        info!(mode = ?config.refresh_mode, "holiday cache ready");

        Ok(App { config, app_state })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Serve HTTP until a shutdown signal, then drain for at most `SHUTDOWN_TIMEOUT`.
    pub async fn run(self) -> ExitCode {
        if self.config.refresh_warm_on_start && self.app_state.gateway.coalescer().trigger() {
            info!("Warming holiday cache");
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "Failed to bind web server");
                return ExitCode::FAILURE;
            }
        };
        info!(%addr, "web server listening");

        let router = create_router(self.app_state);
        let (signalled_tx, signalled_rx) = oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        });

        let shutdown_timeout = self.config.shutdown_timeout;
        let drain_deadline = async move {
            if signalled_rx.await.is_err() {
                // Server ended on its own; never fire.
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(shutdown_timeout).await;
        };

        tokio::select! {
            result = server => match result {
                Ok(()) => {
                    info!("web server stopped");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "web server failed");
                    ExitCode::FAILURE
                }
            },
            _ = drain_deadline => {
                warn!(
                    timeout = fmt_duration(shutdown_timeout),
                    "Graceful shutdown timed out, exiting"
                );
                ExitCode::FAILURE
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
