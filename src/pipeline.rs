//! Admission pipeline: rate limit, authenticate, delegate, authorize.
//!
//! Every request runs the stages in that fixed order, each stage failing
//! closed. A request only reaches the downstream once all four have
//! passed, and each decision is emitted as one structured log record.

use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Identity, TokenVerifier};
use crate::delegation::{DelegationExchanger, ExchangedToken};
use crate::policy::AuthorizationEngine;
use crate::ratelimit::{Admission, RateLimiter, bucket_key};
use crate::{Error, Result};

/// A request that has cleared every admission stage.
#[derive(Debug)]
pub struct AdmittedRequest {
    /// Correlation id, one per inbound request
    pub request_id: Uuid,
    /// The verified (or anonymous) caller
    pub identity: Identity,
    /// Downstream-scoped token, when delegation produced one
    pub delegated_token: Option<ExchangedToken>,
}

/// The four admission stages wired together.
pub struct Pipeline {
    rate_limiter: RateLimiter,
    verifier: TokenVerifier,
    delegation: Option<DelegationExchanger>,
    delegation_required: bool,
    authz: AuthorizationEngine,
}

impl Pipeline {
    /// Assemble the pipeline from its already-configured stages.
    #[must_use]
    pub fn new(
        rate_limiter: RateLimiter,
        verifier: TokenVerifier,
        delegation: Option<DelegationExchanger>,
        delegation_required: bool,
        authz: AuthorizationEngine,
    ) -> Self {
        Self {
            rate_limiter,
            verifier,
            delegation,
            delegation_required,
            authz,
        }
    }

    /// Run the full admission sequence for one request.
    ///
    /// `token` is the raw bearer credential, if any; `tool` is the
    /// operation name the caller wants to invoke.
    ///
    /// # Errors
    ///
    /// The first stage to fail rejects the request with its own error
    /// variant; later stages never run.
    pub async fn admit(&self, token: Option<&str>, tool: &str) -> Result<AdmittedRequest> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        // Stage 1: rate limit, keyed by credential digest. Runs before
        // authentication so a flood of bad tokens cannot buy signature
        // checks.
        if let Admission::Throttled { retry_after } = self.rate_limiter.admit(&bucket_key(token)) {
            let err = Error::Throttled { retry_after };
            self.log_rejection(request_id, tool, "rate_limit", &err, started);
            return Err(err);
        }
        let rate_limit_us = elapsed_us(started);

        // Stage 2: authenticate.
        let stage = Instant::now();
        let identity = match self.verifier.verify(token).await {
            Ok(identity) => identity,
            Err(err) => {
                self.log_rejection(request_id, tool, "authenticate", &err, started);
                return Err(err);
            }
        };
        let authenticate_us = elapsed_us(stage);

        // Stage 3: delegate. Optional delegation lets the request proceed
        // with the inbound token when the exchange fails.
        let stage = Instant::now();
        let delegated_token = match &self.delegation {
            Some(exchanger) => match exchanger.delegate(&identity).await {
                Ok(exchanged) => Some(exchanged),
                Err(err) if self.delegation_required => {
                    self.log_rejection(request_id, tool, "delegate", &err, started);
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        request_id = %request_id,
                        subject = %identity.subject,
                        error = %err,
                        "optional delegation failed, proceeding with inbound token"
                    );
                    None
                }
            },
            None => None,
        };
        let delegate_us = elapsed_us(stage);

        // Stage 4: authorize.
        let stage = Instant::now();
        if let Err(err) = self.authz.authorize(&identity, tool).await {
            self.log_rejection(request_id, tool, "authorize", &err, started);
            return Err(err);
        }
        let authorize_us = elapsed_us(stage);

        info!(
            request_id = %request_id,
            tool = %tool,
            subject = %identity.subject,
            delegated = delegated_token.is_some(),
            rate_limit_us,
            authenticate_us,
            delegate_us,
            authorize_us,
            elapsed_us = elapsed_us(started),
            outcome = "admitted",
            "request admitted"
        );

        Ok(AdmittedRequest {
            request_id,
            identity,
            delegated_token,
        })
    }

    /// Drop the cached delegated token for an identity and re-exchange.
    ///
    /// Used by the forwarding layer when the downstream rejects a
    /// delegated token with 401.
    ///
    /// # Errors
    ///
    /// `DelegationFailed` when delegation is not configured or the fresh
    /// exchange fails.
    pub async fn redelegate(&self, identity: &Identity) -> Result<ExchangedToken> {
        let exchanger = self.delegation.as_ref().ok_or_else(|| {
            Error::DelegationFailed("delegation is not configured".to_string())
        })?;
        exchanger.invalidate(identity);
        exchanger.delegate(identity).await
    }

    /// Bucket count for the health summary.
    #[must_use]
    pub fn rate_limit_buckets(&self) -> usize {
        self.rate_limiter.bucket_count()
    }

    fn log_rejection(
        &self,
        request_id: Uuid,
        tool: &str,
        stage: &'static str,
        err: &Error,
        started: Instant,
    ) {
        info!(
            request_id = %request_id,
            tool = %tool,
            stage = stage,
            error_code = err.error_code(),
            elapsed_us = elapsed_us(started),
            outcome = "rejected",
            "request rejected"
        );
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_us(since: Instant) -> u64 {
    since.elapsed().as_micros() as u64
}
