// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Manual Firefox trust flow.
//!
//! When certutil is unavailable the CA is served from a short-lived local
//! HTTP server. Opening `/certificate` in Firefox starts its built-in
//! "trust this CA" dialog; every other path redirects there.

use crate::error::{Error, Result};
use crate::ui::UserInterface;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const CERTIFICATE_PATH: &str = "/certificate";
const CA_CERT_CONTENT_TYPE: &str = "application/x-x509-ca-cert";

/// Contents served by the wizard.
#[derive(Clone)]
struct WizardContent {
    certificate: Bytes,
    prompt_page: Bytes,
}

/// Running wizard server. Dropping it stops the server.
pub struct WizardServer {
    runtime: Option<tokio::runtime::Runtime>,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WizardServer {
    /// Serve `certificate` on an ephemeral localhost port.
    pub fn start(certificate: Vec<u8>, ui: &dyn UserInterface) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| Error::Wizard(format!("Failed to start runtime: {}", e)))?;

        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .map_err(|e| Error::Wizard(format!("Failed to bind local port: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Wizard(format!("Failed to read local address: {}", e)))?;

        let content = WizardContent {
            certificate: Bytes::from(certificate),
            prompt_page: Bytes::from(
                ui.firefox_wizard_prompt_page(&certificate_url(addr.port())),
            ),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        runtime.spawn(serve(listener, content, shutdown_rx));
        tracing::debug!(%addr, "certificate wizard server is up");

        Ok(Self {
            runtime: Some(runtime),
            addr,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn host_url(&self) -> String {
        format!("http://localhost:{}", self.port())
    }
}

impl Drop for WizardServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn certificate_url(port: u16) -> String {
    format!("http://localhost:{}{}", port, CERTIFICATE_PATH)
}

async fn serve(
    listener: TcpListener,
    content: WizardContent,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            accept_result = listener.accept() => {
                let (stream, _) = match accept_result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::debug!(error = %e, "wizard accept error");
                        continue;
                    }
                };

                let content = content.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let svc = service_fn(move |req| {
                        let content = content.clone();
                        async move { handle_request(req, &content) }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        tracing::debug!(error = %e, "wizard connection error");
                    }
                });
            }
        }
    }
}

fn handle_request(
    req: Request<Incoming>,
    content: &WizardContent,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(respond(req.uri().path(), content))
}

fn respond(path: &str, content: &WizardContent) -> Response<Full<Bytes>> {
    let (content_type, body) = if path == CERTIFICATE_PATH {
        (CA_CERT_CONTENT_TYPE, content.certificate.clone())
    } else {
        ("text/html", content.prompt_page.clone())
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body))
        .unwrap_or_else(|_| {
            Response::new(Full::new(Bytes::from_static(b"Internal Server Error")))
        })
}

/// Walk the user through trusting `ca_cert` in Firefox by hand.
///
/// `firefox` is the program and leading arguments used to open a URL.
pub fn open_certificate_in_firefox(
    ui: &Arc<dyn UserInterface>,
    firefox: &[&str],
    ca_cert: &Path,
) -> Result<()> {
    tracing::debug!("adding CA to Firefox manually through the certificate wizard");
    let certificate = std::fs::read(ca_cert).map_err(|e| Error::ReadFile {
        path: ca_cert.to_path_buf(),
        source: e,
    })?;

    let server = WizardServer::start(certificate, ui.as_ref())?;
    let host = server.host_url();

    ui.start_firefox_wizard(&host)?;

    if let Some((program, args)) = firefox.split_first() {
        if let Err(e) = Command::new(program).args(args).arg(&host).spawn() {
            tracing::warn!(error = %e, "failed to launch Firefox");
        }
    }

    ui.wait_for_firefox_wizard()?;
    drop(server);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    struct PageUi;

    impl UserInterface for PageUi {
        fn password_request_notice(&self, _reason: &str) {}
        fn close_firefox_before_continuing(&self) {}
        fn start_firefox_wizard(&self, _host: &str) -> Result<()> {
            Ok(())
        }
        fn wait_for_firefox_wizard(&self) -> Result<()> {
            Ok(())
        }
        fn warn_chrome_on_linux_without_certutil(&self) {}
        fn windows_encryption_password(&self) -> Result<String> {
            Ok("secret".to_string())
        }
        fn confirm_overwrite(&self, _path: &Path) -> bool {
            false
        }
        fn log(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
    }

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("server should accept");
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        )
        .expect("request should be written");
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .expect("response should be read");
        response
    }

    #[test]
    fn test_respond_serves_certificate() {
        let content = WizardContent {
            certificate: Bytes::from_static(b"CERT"),
            prompt_page: Bytes::from_static(b"PAGE"),
        };
        let response = respond("/certificate", &content);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/x-x509-ca-cert"
        );
        let other = respond("/", &content);
        assert_eq!(other.headers()[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_server_serves_certificate_and_prompt_page() {
        let server = WizardServer::start(b"-----BEGIN CERTIFICATE-----".to_vec(), &PageUi)
            .expect("wizard server should start");

        let cert = get(server.port(), "/certificate");
        assert!(cert.starts_with("HTTP/1.1 200"));
        assert!(cert.contains("application/x-x509-ca-cert"));
        assert!(cert.ends_with("-----BEGIN CERTIFICATE-----"));

        let page = get(server.port(), "/anything");
        assert!(page.contains("text/html"));
        assert!(page.contains(&format!(
            "url=http://localhost:{}/certificate",
            server.port()
        )));
    }
}
