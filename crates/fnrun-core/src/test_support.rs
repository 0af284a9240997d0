//! In-process function server for unit tests.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Serve every request on a fresh loopback port with `handler`, which gets
/// the raw request body.
pub(crate) async fn spawn_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    let handler = Arc::new(handler);
    let make = make_service_fn(move |_conn| {
        let handler = Arc::clone(&handler);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let handler = Arc::clone(&handler);
                async move {
                    let body = hyper::body::to_bytes(req.into_body()).await?;
                    Ok::<_, hyper::Error>(handler(body.to_vec()).await)
                }
            }))
        }
    });

    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let server = Server::bind(&addr).serve(make);
    let local = server.local_addr();
    tokio::spawn(server);
    local
}
