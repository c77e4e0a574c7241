//! HTTP endpoint for the latest chart.
//!
//! | Path      | Response                                              |
//! |-----------|-------------------------------------------------------|
//! | `/`       | HTML page embedding `/plot`                           |
//! | `/plot`   | the chart as `image/png`, or 404 if none rendered yet |
//! | `/health` | `OK`                                                  |
//!
//! The chart is read from disk on every request. The renderer replaces it
//! by rename, so each read returns one complete file.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const INDEX_HTML: &str = "<!DOCTYPE html>\n\
<html>\n\
<head><title>Trend Graph</title></head>\n\
<body>\n\
<h1>Trend Graph</h1>\n\
<img src=\"/plot\" />\n\
</body>\n\
</html>\n";

/// Serves the chart artifact over HTTP/1.
#[derive(Debug)]
pub struct ImageServer {
    listener: TcpListener,
    chart_path: Arc<PathBuf>,
}

impl ImageServer {
    /// Bind to `addr`. Failing to bind is a startup error.
    pub async fn bind(addr: SocketAddr, chart_path: impl Into<PathBuf>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            chart_path: Arc::new(chart_path.into()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` becomes true or its sender is
    /// dropped. Connections already accepted finish on their own tasks.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.local_addr() {
            info!(component = "serve", %addr, chart = %self.chart_path.display(), "listening");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let (stream, peer) = tokio::select! {
                conn = accept_retrying(|| self.listener.accept()) => conn,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let chart_path = self.chart_path.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let chart_path = chart_path.clone();
                    let method = req.method().clone();
                    let path = req.uri().path().to_owned();
                    async move { Ok::<_, Infallible>(handle_request(&method, &path, &chart_path).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(component = "serve", %peer, error = %e, "connection error");
                }
            });
        }

        info!(component = "serve", "server stopped");
    }
}

/// Await `accept` until it yields a connection, pausing after each error so
/// a persistent failure (e.g. out of file descriptors) does not spin.
async fn accept_retrying<A, F, T>(mut accept: A) -> T
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(component = "serve", error = %e, "accept failed, backing off");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_request(method: &Method, path: &str, chart_path: &Path) -> Response<Full<Bytes>> {
    debug!(component = "serve", %method, path, "request");

    if *method != Method::GET {
        return text(StatusCode::NOT_FOUND, "Not Found");
    }

    match path {
        "/" => response(StatusCode::OK, "text/html; charset=utf-8", INDEX_HTML),
        "/plot" => match tokio::fs::read(chart_path).await {
            Ok(bytes) => response(StatusCode::OK, "image/png", bytes),
            Err(e) => {
                debug!(component = "serve", error = %e, "chart not available");
                text(StatusCode::NOT_FOUND, "Plot not yet generated")
            }
        },
        "/health" => text(StatusCode::OK, "OK"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    response(status, "text/plain; charset=utf-8", body)
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
