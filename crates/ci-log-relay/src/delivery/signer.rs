// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bearer tokens for the analysis endpoint.
//!
//! Token signing is owned by the embedding service; the relay only asks for a token per
//! delivery through [`TokenSigner`].

use serde::Serialize;

use crate::error::RelayError;
use crate::model::PipelineRun;

/// Lifetime of a delivery token.
const TOKEN_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    /// Issuer, always `ci-log-relay`.
    pub iss: String,
    /// Run the token authorizes, `<platform>:<project>:<run id>`.
    pub sub: String,
    /// Delivery endpoint.
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn for_run(run: &PipelineRun, audience: &str, now: i64) -> Self {
        Self {
            iss: "ci-log-relay".to_string(),
            sub: format!("{}:{}:{}", run.platform, run.project.path, run.run_id),
            aud: audience.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        }
    }
}

pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &Claims) -> Result<String, RelayError>;
}

/// Hands out a pre-shared token regardless of the claims.
#[derive(Clone)]
pub struct StaticTokenSigner {
    token: String,
}

impl StaticTokenSigner {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticTokenSigner")
    }
}

impl TokenSigner for StaticTokenSigner {
    fn sign(&self, _claims: &Claims) -> Result<String, RelayError> {
        if self.token.trim().is_empty() {
            return Err(RelayError::Signing("empty delivery token".to_string()));
        }
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, Project, RunStatus};

    fn run() -> PipelineRun {
        PipelineRun {
            platform: Platform::Jenkins,
            run_id: "42".to_string(),
            project: Project {
                id: "app".to_string(),
                path: "team/app".to_string(),
                web_url: None,
            },
            server_url: None,
            revision: None,
            branch: None,
            url: None,
            status: RunStatus::Failed,
            created_at: None,
            finished_at: None,
            duration_secs: None,
            triggered_by: "unknown".to_string(),
            units: Vec::new(),
        }
    }

    #[test]
    fn test_claims_for_run() {
        let claims = Claims::for_run(&run(), "https://analysis.example.com/ingest", 1_000);
        assert_eq!(claims.sub, "jenkins:team/app:42");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn test_static_signer() {
        let claims = Claims::for_run(&run(), "aud", 0);
        assert_eq!(
            StaticTokenSigner::new("t0k3n").sign(&claims).expect("signs"),
            "t0k3n"
        );
        assert!(matches!(
            StaticTokenSigner::new(" ").sign(&claims),
            Err(RelayError::Signing(_))
        ));
        assert!(!format!("{:?}", StaticTokenSigner::new("t0k3n")).contains("t0k3n"));
    }
}
