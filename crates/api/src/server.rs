//! HTTP server lifecycle.
//!
//! On SIGINT/SIGTERM the listener stops accepting, in-flight requests get
//! `grace` to finish, and then every tracked background task is awaited
//! before [`serve`] returns. Requests still running when `grace` elapses are
//! cancelled and answered with 503, so none of them can start tracked work
//! after the final drain.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{Next, from_fn_with_state},
    response::Response,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

use crate::app::errors::json_error;
use crate::background::BackgroundTracker;

/// Message sent to requests cancelled at the end of the grace period.
pub const SHUTTING_DOWN_MESSAGE: &str = "the server is shutting down, please retry";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(String),

    /// In-flight requests were still running when the grace period ended.
    #[error("graceful shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Serve `router` until SIGINT/SIGTERM, then shut down gracefully.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    grace: Duration,
    tracker: BackgroundTracker,
) -> Result<(), ServerError> {
    serve_with_shutdown(listener, router, grace, tracker, shutdown_signal()).await
}

/// [`serve`] with a caller-supplied shutdown trigger.
pub async fn serve_with_shutdown<S>(
    listener: TcpListener,
    router: Router,
    grace: Duration,
    tracker: BackgroundTracker,
    signal: S,
) -> Result<(), ServerError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let gate = RequestGate::new();
    let router = router.layer(from_fn_with_state(gate.clone(), track_request));

    let shutdown = async move {
        signal.await;
        let _ = signalled_tx.send(());
    };

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown);

    tracing::info!(%addr, "starting server");
    let mut running = tokio::spawn(async move { server.await });

    // Err means the server stopped on its own and dropped the sender.
    let _ = signalled_rx.await;
    tracing::info!(%addr, grace_ms = grace.as_millis() as u64, "shutting down server");

    let outcome = match tokio::time::timeout(grace, &mut running).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(ServerError::Io(err)),
        Ok(Err(join)) => Err(ServerError::Task(join.to_string())),
        Err(_) => {
            tracing::warn!(
                in_flight = gate.in_flight.outstanding(),
                "grace period elapsed with requests in flight; cancelling them"
            );
            gate.cancel();
            gate.in_flight.wait().await;
            running.abort();
            Err(ServerError::ShutdownTimeout(grace))
        }
    };

    tracing::info!(
        outstanding = tracker.outstanding(),
        "completing background tasks"
    );
    tracker.wait().await;

    tracing::info!(%addr, "stopped server");
    outcome
}

/// Counts requests inside the router and cancels them on demand.
#[derive(Clone)]
struct RequestGate {
    in_flight: BackgroundTracker,
    cancelled: Arc<watch::Sender<bool>>,
}

impl RequestGate {
    fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            in_flight: BackgroundTracker::new(),
            cancelled: Arc::new(cancelled),
        }
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
    }
}

/// Outermost layer: holds an in-flight registration for the whole request and
/// drops the handler future once the gate is cancelled.
async fn track_request(State(gate): State<RequestGate>, req: Request, next: Next) -> Response {
    let _in_flight = gate.in_flight.register();
    let mut cancelled = gate.cancelled.subscribe();

    let cancellation = async move {
        // The sender lives in the gate, so it outlives every request.
        let closed = cancelled.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    };

    // Cancellation is polled first so a request arriving after the cutoff
    // never reaches its handler.
    tokio::select! {
        biased;
        () = cancellation => {
            let mut response = json_error(StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN_MESSAGE);
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            response
        }
        response = next.run(req) => response,
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "caught signal"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "caught signal"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        (listener, base_url)
    }

    fn trigger() -> (oneshot::Sender<()>, impl Future<Output = ()> + Send + 'static) {
        let (tx, rx) = oneshot::channel::<()>();
        (tx, async move {
            let _ = rx.await;
        })
    }

    #[tokio::test]
    async fn shutdown_waits_for_background_work() {
        let (listener, base_url) = bind().await;
        let tracker = BackgroundTracker::new();
        let router = Router::new().route("/health", get(|| async { "ok" }));
        let (stop, signal) = trigger();

        let server = tokio::spawn(serve_with_shutdown(
            listener,
            router,
            Duration::from_secs(5),
            tracker.clone(),
            signal,
        ));

        let res = reqwest::get(format!("{base_url}/health")).await.unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);

        let (release, released) = oneshot::channel::<()>();
        tracker.spawn("slow-unit", async move {
            let _ = released.await;
        });

        stop.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            !server.is_finished(),
            "shutdown must not complete while a background unit is registered"
        );

        release.send(()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("shutdown should finish once the unit deregisters")
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn grace_period_elapsing_reports_timeout() {
        let (listener, base_url) = bind().await;
        let tracker = BackgroundTracker::new();
        let router = Router::new().route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let (stop, signal) = trigger();

        let server = tokio::spawn(serve_with_shutdown(
            listener,
            router,
            Duration::from_millis(200),
            tracker,
            signal,
        ));

        let client = tokio::spawn(async move { reqwest::get(format!("{base_url}/hang")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        stop.send(()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("lifecycle should give up after the grace period")
            .unwrap();

        assert!(matches!(outcome, Err(ServerError::ShutdownTimeout(_))));
        client.abort();
    }

    #[tokio::test]
    async fn requests_cut_off_by_the_grace_period_cannot_start_late_work() {
        let (listener, base_url) = bind().await;
        let tracker = BackgroundTracker::new();
        let late_unit_ran = Arc::new(AtomicBool::new(false));

        let router = {
            let tracker = tracker.clone();
            let late_unit_ran = Arc::clone(&late_unit_ran);
            Router::new().route(
                "/slow-write",
                get(move || {
                    let tracker = tracker.clone();
                    let late_unit_ran = Arc::clone(&late_unit_ran);
                    async move {
                        tokio::time::sleep(Duration::from_millis(600)).await;
                        tracker.spawn("late-unit", async move {
                            late_unit_ran.store(true, Ordering::SeqCst);
                        });
                        "stored"
                    }
                }),
            )
        };
        let (stop, signal) = trigger();

        let server = tokio::spawn(serve_with_shutdown(
            listener,
            router,
            Duration::from_millis(100),
            tracker.clone(),
            signal,
        ));

        let client =
            tokio::spawn(async move { reqwest::get(format!("{base_url}/slow-write")).await });
        tokio::time::sleep(Duration::from_millis(150)).await;

        stop.send(()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("lifecycle should give up after the grace period")
            .unwrap();
        assert!(matches!(outcome, Err(ServerError::ShutdownTimeout(_))));
        assert_eq!(tracker.outstanding(), 0);

        // Past the point where the handler would have spawned its unit.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(tracker.outstanding(), 0);
        assert!(!late_unit_ran.load(Ordering::SeqCst));

        match client.await.unwrap() {
            Ok(response) => assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE),
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn cancelled_gate_answers_503_and_deregisters() {
        let gate = RequestGate::new();
        let app = Router::new()
            .route(
                "/hang",
                get(|| async {
                    std::future::pending::<()>().await;
                    "never"
                }),
            )
            .layer(from_fn_with_state(gate.clone(), track_request));

        let request = tokio::spawn(
            app.oneshot(
                Request::builder()
                    .uri("/hang")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            ),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gate.in_flight.outstanding(), 1);

        gate.cancel();
        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert_eq!(gate.in_flight.outstanding(), 0);
    }
}
