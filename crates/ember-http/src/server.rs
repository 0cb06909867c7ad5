//! Single-threaded accept loop binding `Router`-matched requests to pooled
//! `RequestContext`s (spec §4.7 steps 1-6).

use std::io::Write;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::context::ContextPool;
use crate::error::{HttpError, HttpResult};
use crate::request::parse_request;
use crate::response::HttpResponse;
use crate::router::Router;

/// Per-connection deadlines (spec §5 "Timeouts").
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    /// Maximum time to wait for a full request once a connection is accepted.
    pub request_timeout: Duration,
    /// Maximum time an idle keep-alive connection may sit before being closed.
    ///
    /// Every response this server writes carries `Connection: close`
    /// (`HttpResponse::serialize`), so this ceiling currently only bounds
    /// the read side of a slow client; it has no effect until keep-alive
    /// connections are supported.
    pub keep_alive_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(5),
        }
    }
}

/// A single-threaded HTTP/1.1 server: one accept loop, a [`Router`], and a
/// bounded [`ContextPool`] of request contexts reused across connections.
///
/// Every connection is handled to completion (request parsed, handler run,
/// response written) before the next `accept()` — spec §4.7's "accept loop
/// is single-threaded by default". An embedder that wants concurrent
/// connections runs several `HttpServer`s, each with its own `Vm`, since
/// `ember-core`'s refcounting is not thread-safe (spec §5).
pub struct HttpServer {
    router: Router,
    contexts: ContextPool,
    limits: ServerLimits,
}

impl HttpServer {
    /// A server with no connections served yet, routing through `router`.
    pub fn new(router: Router) -> Self {
        Self { router, contexts: ContextPool::new(), limits: ServerLimits::default() }
    }

    /// Override the default request/keep-alive timeouts.
    pub fn with_limits(mut self, limits: ServerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bind and serve forever, handling one connection at a time.
    pub fn serve(&mut self, addr: impl ToSocketAddrs) -> HttpResult<()> {
        let listener = TcpListener::bind(addr)?;
        for stream in listener.incoming() {
            let stream = stream?;
            if let Err(err) = self.handle_connection(stream) {
                tracing::warn!(error = %err, "http connection failed");
            }
        }
        Ok(())
    }

    /// Handle exactly one already-accepted connection (spec §4.7 steps 1-6).
    /// Exposed separately from [`Self::serve`] so tests, and embedders that
    /// manage their own listener (e.g. behind an OS thread pool, one
    /// `HttpServer` per thread), can drive the request lifecycle directly.
    pub fn handle_connection(&mut self, stream: TcpStream) -> HttpResult<()> {
        stream.set_read_timeout(Some(self.limits.request_timeout))?;
        stream.set_write_timeout(Some(self.limits.request_timeout))?;

        // Steps 1-2: acquire a pooled context; its arena comes along with it.
        let mut handle = self.contexts.acquire();

        // Step 3: parse the request.
        let response = match parse_request(&stream) {
            Ok(request) => {
                let route = self.router.find(&request.method, &request.path);
                let ctx = self.contexts.get_mut(&mut handle);
                ctx.request = request;
                match route {
                    // Step 4: invoke the matched handler.
                    Some((handler, params)) => {
                        ctx.params = params;
                        handler.handle(ctx)
                    }
                    None => HttpResponse::text(404, format!("no route for {} {}", ctx.request.method, ctx.request.path)),
                }
            }
            Err(HttpError::Io(err)) => {
                self.contexts.release(handle);
                return Err(HttpError::Io(err));
            }
            Err(err) => {
                tracing::warn!(error = %err, "malformed request");
                HttpResponse::text(400, err.to_string())
            }
        };

        // Step 6: arena resets and the context returns to its pool.
        self.contexts.release(handle);
        // Step 5: serialise and write the response.
        write_response(stream, &response)
    }
}

fn write_response(mut stream: TcpStream, response: &HttpResponse) -> HttpResult<()> {
    stream.write_all(&response.serialize())?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use std::io::Read;
    use std::net::TcpStream as ClientStream;
    use std::thread;

    fn roundtrip(server: &mut HttpServer, request: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = thread::spawn(move || {
            let mut client = ClientStream::connect(addr).unwrap();
            client.write_all(request).unwrap();
            let mut response = String::new();
            client.read_to_string(&mut response).unwrap();
            response
        });
        let (stream, _) = listener.accept().unwrap();
        server.handle_connection(stream).unwrap();
        writer.join().unwrap()
    }

    #[test]
    fn matched_route_runs_its_handler() {
        let mut router = Router::new();
        router.route("GET", "/hello/:name", |ctx: &mut RequestContext| {
            HttpResponse::text(200, format!("hi {}", ctx.param("name").unwrap_or("?")))
        });
        let mut server = HttpServer::new(router);
        let response = roundtrip(&mut server, b"GET /hello/ada HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("hi ada"));
    }

    #[test]
    fn unmatched_route_is_404() {
        let mut server = HttpServer::new(Router::new());
        let response = roundtrip(&mut server, b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn contexts_return_to_the_pool_after_each_request() {
        let mut router = Router::new();
        router.route("GET", "/", |_ctx: &mut RequestContext| HttpResponse::ok());
        let mut server = HttpServer::new(router);
        roundtrip(&mut server, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(server.contexts.live_count(), 0);
    }
}
