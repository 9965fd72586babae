//! JSON-lines decision sidecar.
//!
//! Reads one request object per line and answers with one response object per
//! line, in order. This lets a host in any language delegate governance to a
//! single long-lived process:
//!
//! ```text
//! {"kind":"admit","operation":"analyze-file","meta":{"forwarded_for":"1.2.3.4"}}
//! {"kind":"admit","decision":"allowed","client":"1.2.3.4","remaining":9}
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::guard::{GuardDecision, GuardStats, LoginGate, LoginOutcome, RequestGuard};
use crate::identity::{Identifier, RequestMetadata};

/// A request line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Admit a call to a protected operation
    Admit {
        operation: String,
        #[serde(default)]
        meta: RequestMetadata,
    },
    /// Check lockout before verifying credentials
    LoginCheck {
        account: String,
        #[serde(default)]
        meta: RequestMetadata,
    },
    /// Report the result of a credential check
    LoginResult { identifier: Identifier, success: bool },
    /// Report store sizes
    Stats,
}

/// A response line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Admit(GuardDecision),
    LoginCheck(LoginGate),
    LoginResult(LoginOutcome),
    Stats(GuardStats),
    Error { message: String },
}

/// Serves decisions from a [`RequestGuard`] over a line-oriented stream.
pub struct DecisionServer {
    guard: Arc<RequestGuard>,
}

impl DecisionServer {
    pub fn new(guard: Arc<RequestGuard>) -> Self {
        Self { guard }
    }

    /// Answer one request.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Admit { operation, meta } => Response::Admit(self.guard.admit(&operation, &meta)),
            Request::LoginCheck { account, meta } => {
                Response::LoginCheck(self.guard.login_gate(&meta, &account))
            }
            Request::LoginResult {
                identifier,
                success,
            } => Response::LoginResult(self.guard.report_login(&identifier, success)),
            Request::Stats => Response::Stats(self.guard.stats()),
        }
    }

    /// Parse and answer one line. Malformed input yields an error response
    /// rather than ending the session.
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(request = ?request, "Handling decision request");
                self.handle(request)
            }
            Err(e) => {
                warn!(error = %e, "Malformed decision request");
                Response::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Serve until `reader` reaches end of input.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = LinesStream::new(reader.lines());
        let mut handled: u64 = 0;

        while let Some(line) = lines.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&line);
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
            handled += 1;
        }

        info!(handled = handled, "Input closed, decision server stopping");
        Ok(())
    }

    /// Serve until end of input or until `signal` resolves.
    pub async fn serve_with_shutdown<R, W, F>(&self, reader: R, writer: W, signal: F) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.serve(reader, writer) => result,
            _ = signal => {
                info!("Shutdown signal received, decision server stopping");
                Ok(())
            }
        }
    }
}
