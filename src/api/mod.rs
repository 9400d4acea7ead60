//! HTTP API for the task manager.
//!
//! ## Endpoints
//!
//! - `GET /` - Service descriptor and endpoint index
//! - `GET /health` - Health check
//! - `GET /stats` - Task and request statistics
//! - `GET /tasks` - List all tasks
//! - `POST /tasks` - Create a task
//! - `GET /tasks/{id}` - Get a task
//! - `PUT /tasks/{id}` - Update a task
//! - `DELETE /tasks/{id}` - Delete a task

mod error;
mod routes;
pub mod types;

pub use error::ApiError;
pub use routes::{router, AppState, REQUEST_TIMEOUT};

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use crate::container::{parse_integer, Config, Flag, Hook, Module, Provider, Shutdowner};
use crate::logger::Logger;
use crate::metrics::Metrics;
use crate::tasks::TaskManager;

/// How long in-flight requests get to finish once shutdown begins.
pub const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

impl Config for ApiConfig {
    fn flags(&self) -> Vec<Flag> {
        vec![
            Flag::string("api-host", &self.host, "API server host"),
            Flag::integer("api-port", self.port, "API server port"),
        ]
    }

    fn set_flag(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "api-host" => self.host = value.to_string(),
            "api-port" => self.port = parse_integer(value)?,
            other => return Err(format!("unknown flag {other}")),
        }
        Ok(())
    }
}

/// The HTTP listener. Binds in its start hook and drains in its stop hook.
pub struct ApiServer {
    config: ApiConfig,
    router: Router,
    shutdown: CancellationToken,
    serving: Mutex<Option<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
    shutdowner: Shutdowner,
    log: Logger,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState, shutdowner: Shutdowner) -> Self {
        let log = state.log.clone();
        Self {
            config,
            router: router(state),
            shutdown: CancellationToken::new(),
            serving: Mutex::new(None),
            local_addr: OnceLock::new(),
            shutdowner,
            log,
        }
    }

    /// Address actually bound, once started. Differs from the configured
    /// one when the port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    async fn start(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let bound = listener.local_addr()?;
        let _ = self.local_addr.set(bound);
        info!(address = %bound, "API server listening");

        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.clone();
        let shutdowner = self.shutdowner.clone();
        let handle = tokio::spawn(
            async move {
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await;
                if let Err(err) = served {
                    error!(error = %err, "API server failed");
                    shutdowner.shutdown(Some(anyhow::Error::new(err).context("API server failed")));
                }
            }
            .instrument(self.log.span().clone()),
        );
        *self.serving.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("shutting down API server");
        self.shutdown.cancel();
        let Some(mut handle) = self.serving.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(GRACEFUL_SHUTDOWN, &mut handle).await {
            Ok(Ok(())) => {
                info!("API server stopped");
                Ok(())
            }
            Ok(Err(join)) => Err(anyhow::Error::new(join).context("API server task failed")),
            Err(_) => {
                handle.abort();
                anyhow::bail!("API server did not drain within {GRACEFUL_SHUTDOWN:?}")
            }
        }
    }
}

pub fn module() -> Module {
    Module::new("api", "HTTP API Server")
        .config(ApiConfig::default())
        .provide(Provider::new(
            "new_api_server",
            |lc,
             (log, config, tasks, metrics, shutdowner): (
                Logger,
                ApiConfig,
                Arc<TaskManager>,
                Arc<Metrics>,
                Shutdowner,
            )| {
                let log = log.with_component("api");
                let state = AppState {
                    tasks,
                    metrics,
                    log: log.clone(),
                };
                let server = Arc::new(ApiServer::new(config, state, shutdowner));
                let (starting, stopping) = (Arc::clone(&server), Arc::clone(&server));
                lc.append(
                    Hook::new("http listener")
                        .instrument(log.span())
                        .on_start(move |_ctx| async move { starting.start().await })
                        .on_stop(move |_ctx| async move { stopping.stop().await }),
                );
                Ok(server)
            },
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use crate::tasks::Task;

    fn server(port: u16) -> ApiServer {
        let metrics = Arc::new(Metrics::new());
        let storage: Arc<dyn Storage<Task>> = Arc::new(MemoryStorage::new(Logger::root()));
        let state = AppState {
            tasks: Arc::new(TaskManager::new(storage, Arc::clone(&metrics), Logger::root())),
            metrics,
            log: Logger::root(),
        };
        let config = ApiConfig {
            host: "127.0.0.1".to_string(),
            port,
        };
        ApiServer::new(config, state, Shutdowner::new())
    }

    #[test]
    fn port_flag_is_range_checked() {
        let mut config = ApiConfig::default();
        assert_eq!(config.flags()[1].value, "8080");
        config.set_flag("api-port", "9090").unwrap();
        assert_eq!(config.port, 9090);
        assert!(config.set_flag("api-port", "70000").is_err());
        assert!(config.set_flag("api-port", "-1").is_err());
        config.set_flag("api-host", "0.0.0.0").unwrap();
        assert_eq!(config.host, "0.0.0.0");
    }

    #[tokio::test]
    async fn serves_until_stopped_then_refuses_connections() {
        let server = server(0);
        assert_eq!(server.local_addr(), None);
        server.start().await.unwrap();
        let addr = server.local_addr().expect("bound address");

        let health: types::HealthResponse = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.status, "healthy");

        server.stop().await.unwrap();
        assert!(reqwest::get(format!("http://{addr}/health")).await.is_err());
    }

    #[tokio::test]
    async fn stop_lets_an_in_flight_request_finish() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let server = Arc::new(server(0));
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        // Headers now, body only after shutdown has begun.
        let body = r#"{"title":"late"}"#;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let head = format!(
            "POST /tasks HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stopping = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!stopping.is_finished());

        stream.write_all(body.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        tokio::time::timeout(GRACEFUL_SHUTDOWN, stream.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 201"), "{response}");
        assert!(response.contains(r#""title":"late""#), "{response}");

        stopping.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn bind_failures_surface_from_start() {
        let first = server(0);
        first.start().await.unwrap();
        let taken = first.local_addr().unwrap().port();

        let second = server(taken);
        let err = second.start().await.unwrap_err();
        assert!(err.to_string().contains("failed to bind"));

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stopping_an_unstarted_server_is_a_no_op() {
        server(0).stop().await.unwrap();
    }
}
