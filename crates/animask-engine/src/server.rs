use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use animask_contracts::wire::PROCESS_IMAGE_PATH;
use anyhow::{anyhow, Result};
use tiny_http::{Header, Request, Response, Server, StatusCode};

use crate::endpoint::{EndpointError, EndpointResponse, ProcessingEndpoint, MAX_BODY_BYTES};

/// Blocking HTTP front for [`ProcessingEndpoint`]. Requests are served one at
/// a time on the thread that calls [`ProcessingServer::run`].
pub struct ProcessingServer {
    http: Arc<Server>,
    endpoint: ProcessingEndpoint,
}

impl ProcessingServer {
    pub fn bind(addr: &str, endpoint: ProcessingEndpoint) -> Result<Self> {
        let http = Server::http(addr).map_err(|err| anyhow!("failed to bind {addr}: {err}"))?;
        Ok(Self {
            http: Arc::new(http),
            endpoint,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.http.server_addr().to_ip()
    }

    /// Stops a running [`ProcessingServer::run`] loop from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            http: Arc::clone(&self.http),
        }
    }

    pub fn run(&self) {
        for request in self.http.incoming_requests() {
            self.serve(request);
        }
    }

    fn serve(&self, mut request: Request) {
        let path = request
            .url()
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        let method = request.method().as_str().to_string();

        let response = if path != PROCESS_IMAGE_PATH {
            self.endpoint.reject(&EndpointError::not_found(&path))
        } else {
            match read_body(&mut request) {
                Ok(body) => self.endpoint.handle(&method, &body),
                Err(err) => self
                    .endpoint
                    .reject(&EndpointError::internal(format!("body read failed: {err}"))),
            }
        };

        if let Err(err) = request.respond(json_response(&response)) {
            eprintln!("animask: failed to write response: {err}");
        }
    }
}

#[derive(Clone)]
pub struct ShutdownHandle {
    http: Arc<Server>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.http.unblock();
    }
}

/// Reads at most one byte past the limit so the endpoint can reject
/// oversized bodies without buffering them whole.
fn read_body(request: &mut Request) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut body)?;
    Ok(body)
}

fn json_response(response: &EndpointResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut http_response = Response::from_string(response.to_json_string())
        .with_status_code(StatusCode(response.status));
    if let Ok(header) = "Content-Type: application/json".parse::<Header>() {
        http_response.add_header(header);
    }
    http_response
}
