//! Shared authenticated connection with lock-guarded lazy renewal.
//!
//! One [`SessionManager`] is created per run and injected into every worker
//! as an `Arc`. Workers call [`SessionManager::acquire`] before every remote
//! interaction; while the token has more than the low-water mark of lifetime
//! left this never touches the renewal lock.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiResponse, SharedApi};
use crate::config::{Credentials, SessionPolicy};
use crate::errors::{AlphaBatchError, Result};

pub struct SessionManager {
    api: SharedApi,
    credentials: Credentials,
    policy: SessionPolicy,
    renew_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(api: SharedApi, credentials: Credentials, policy: SessionPolicy) -> Self {
        Self {
            api,
            credentials,
            policy,
            renew_lock: Mutex::new(()),
        }
    }

    /// Authenticate unconditionally; used once at start-up.
    pub async fn login(&self) -> Result<()> {
        let _guard = self.renew_lock.lock().await;
        self.authenticate_with_retry().await
    }

    /// Seconds of token lifetime left. Any failure reads as 0.
    pub async fn valid(&self) -> f64 {
        match self.api.get("/authentication").await {
            Ok(response) if response.is_success() => {
                let expiry = response
                    .body
                    .get("token")
                    .and_then(|token| token.get("expiry"))
                    .and_then(|expiry| expiry.as_f64())
                    .unwrap_or(0.0);
                debug!("Session expiry check: {}s remaining", expiry);
                expiry
            }
            Ok(response) => {
                debug!("Session expiry check returned status {}", response.status);
                0.0
            }
            Err(e) => {
                debug!("Session expiry check failed: {}", e);
                0.0
            }
        }
    }

    /// Return the shared connection, renewing it first if it is close to expiry.
    pub async fn acquire(&self) -> Result<SharedApi> {
        if self.valid().await < self.policy.low_water_secs {
            self.renew().await?;
        }
        Ok(self.api.clone())
    }

    /// Re-authenticate under the process-wide renewal lock.
    ///
    /// Callers that queued behind another renewal find a fresh token on the
    /// re-check and return without authenticating again.
    pub async fn renew(&self) -> Result<()> {
        let _guard = self.renew_lock.lock().await;
        let remaining = self.valid().await;
        if remaining >= self.policy.low_water_secs {
            debug!("Session already renewed ({}s remaining)", remaining);
            return Ok(());
        }
        info!(
            "Session has {}s remaining (< {}s), re-authenticating",
            remaining, self.policy.low_water_secs
        );
        self.authenticate_with_retry().await
    }

    async fn authenticate_with_retry(&self) -> Result<()> {
        match self.authenticate_once().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) if !e.is_recoverable() => Err(AlphaBatchError::session_exhausted(format!(
                "re-authentication failed: {}",
                e
            ))),
            Err(e) => {
                warn!(
                    "Authentication attempt failed ({}), retrying in {:?}",
                    e, self.policy.renewal_retry_delay
                );
                tokio::time::sleep(self.policy.renewal_retry_delay).await;
                self.authenticate_once().await.map_err(|retry_err| {
                    if retry_err.is_fatal() {
                        retry_err
                    } else {
                        AlphaBatchError::session_exhausted(format!(
                            "re-authentication failed twice: {}",
                            retry_err
                        ))
                    }
                })
            }
        }
    }

    async fn authenticate_once(&self) -> Result<()> {
        let response = self.api.authenticate(&self.credentials).await?;
        classify_authentication(&response)?;
        info!("Authenticated as {}", self.credentials.email);
        Ok(())
    }
}

/// Map an authentication response to success, a fatal error or a transient one.
fn classify_authentication(response: &ApiResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    match response.status {
        401 => {
            if response.www_authenticate.as_deref() == Some("persona") {
                Err(AlphaBatchError::authentication(format!(
                    "biometric verification required{}",
                    response
                        .location
                        .as_deref()
                        .map(|location| format!(" at {}", location))
                        .unwrap_or_default()
                )))
            } else {
                Err(AlphaBatchError::authentication("incorrect email or password"))
            }
        }
        429 | 500..=599 => Err(AlphaBatchError::api(
            response.status,
            "authentication endpoint unavailable",
        )),
        status => Err(AlphaBatchError::authentication(format!(
            "authentication rejected with status {}",
            status
        ))),
    }
}
