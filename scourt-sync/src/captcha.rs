//! Pluggable captcha solving
//!
//! The portal's search path is captcha-gated. Which solver runs is a runtime
//! setting; a recognized answer below the confidence threshold is treated as
//! a failed solve rather than submitted, since a wrong submission burns a
//! portal attempt.

use async_trait::async_trait;
use scourt_common::settings::CaptchaSettings;
use scourt_common::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// A solver's answer with its self-reported confidence.
#[derive(Debug, Clone)]
pub struct CaptchaGuess {
    pub text: String,
    pub confidence: f64,
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<CaptchaGuess>;
}

/// Build the configured solver.
pub fn solver_from_settings(settings: &CaptchaSettings) -> Result<Box<dyn CaptchaSolver>> {
    match settings.solver.as_str() {
        "stub" => Ok(Box::new(StubSolver)),
        "remote" => {
            let endpoint = settings.remote_endpoint.clone().ok_or_else(|| {
                Error::Config("captcha.solver = remote requires captcha.remoteEndpoint".to_string())
            })?;
            Ok(Box::new(RemoteSolver::new(endpoint)?))
        }
        "manual" => Ok(Box::new(ManualSolver)),
        other => Err(Error::Config(format!("unknown captcha solver: {other}"))),
    }
}

/// One captcha-gated exchange with the portal: fetching a challenge always
/// yields a fresh image, and submitting an answer either succeeds or burns
/// the challenge.
#[async_trait]
pub trait CaptchaExchange: Send {
    /// Fetch a fresh challenge: the image plus the portal's answer token.
    async fn fresh_challenge(&mut self) -> Result<(Vec<u8>, String)>;
    /// Submit recognized-text + token.
    async fn submit(&mut self, answer: &str) -> Result<String>;
}

/// Bounded solve-and-submit. Each attempt works on a fresh challenge; a
/// low-confidence answer and a portal-side rejection both consume one
/// attempt. Confidence below the threshold is never submitted, since a
/// wrong submission burns a portal attempt anyway.
pub async fn solve_with_retries<E: CaptchaExchange>(
    exchange: &mut E,
    solver: &dyn CaptchaSolver,
    settings: &CaptchaSettings,
) -> Result<String> {
    let max_attempts = settings.max_attempts.max(1);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let (image, token) = exchange.fresh_challenge().await?;

        let text = match solver.solve(&image).await {
            Ok(guess) if guess.confidence >= settings.min_confidence => guess.text,
            Ok(guess) => {
                tracing::debug!(
                    confidence = guess.confidence,
                    threshold = settings.min_confidence,
                    attempts,
                    "Captcha answer below confidence threshold"
                );
                if attempts >= max_attempts {
                    return Err(Error::CaptchaRejected { attempts });
                }
                continue;
            }
            Err(Error::CaptchaRejected { .. }) => {
                if attempts >= max_attempts {
                    return Err(Error::CaptchaRejected { attempts });
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        match exchange.submit(&format!("{text}{token}")).await {
            Ok(outcome) => return Ok(outcome),
            Err(Error::CaptchaRejected { .. }) => {
                tracing::debug!(attempts, "Portal rejected captcha answer");
                if attempts >= max_attempts {
                    return Err(Error::CaptchaRejected { attempts });
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Deterministic solver for tests: the answer is derived from the image
/// bytes, always fully confident.
pub struct StubSolver;

#[async_trait]
impl CaptchaSolver for StubSolver {
    async fn solve(&self, image: &[u8]) -> Result<CaptchaGuess> {
        let digest = Sha256::digest(image);
        let text: String = digest
            .iter()
            .take(3)
            .map(|b| format!("{b:02x}"))
            .collect();
        Ok(CaptchaGuess {
            text,
            confidence: 1.0,
        })
    }
}

/// Sends the image to an external recognition service and reads back
/// `{text, confidence}`.
pub struct RemoteSolver {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct RemoteAnswer {
    text: String,
    #[serde(default)]
    confidence: f64,
}

impl RemoteSolver {
    pub fn new(endpoint: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("http client build: {e}")))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl CaptchaSolver for RemoteSolver {
    async fn solve(&self, image: &[u8]) -> Result<CaptchaGuess> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::NetworkTimeout(e.to_string())
                } else {
                    Error::CaptchaRejected { attempts: 1 }
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::CaptchaRejected { attempts: 1 });
        }

        let answer: RemoteAnswer = response.json().await.map_err(|e| Error::Parse {
            path: "captcha.remote".to_string(),
            message: format!("solver response: {e}"),
        })?;

        Ok(CaptchaGuess {
            text: answer.text,
            confidence: answer.confidence,
        })
    }
}

/// Fails closed. Jobs that need a captcha go to backoff until an operator
/// supplies an answer out-of-band or switches to another solver.
pub struct ManualSolver;

#[async_trait]
impl CaptchaSolver for ManualSolver {
    async fn solve(&self, _image: &[u8]) -> Result<CaptchaGuess> {
        Err(Error::CaptchaRejected { attempts: 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(solver: &str) -> CaptchaSettings {
        CaptchaSettings {
            solver: solver.to_string(),
            min_confidence: 0.8,
            remote_endpoint: None,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn stub_solver_is_deterministic() {
        let solver = StubSolver;
        let a = solver.solve(b"image-bytes").await.unwrap();
        let b = solver.solve(b"image-bytes").await.unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.text.len(), 6);
    }

    /// Serves a numbered image per fetch and rejects the first N
    /// submissions; records everything for assertions.
    struct ScriptedExchange {
        challenges_served: u32,
        reject_first: u32,
        submissions: Vec<String>,
        images_seen: Vec<Vec<u8>>,
    }

    impl ScriptedExchange {
        fn new(reject_first: u32) -> Self {
            Self {
                challenges_served: 0,
                reject_first,
                submissions: Vec::new(),
                images_seen: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CaptchaExchange for ScriptedExchange {
        async fn fresh_challenge(&mut self) -> Result<(Vec<u8>, String)> {
            self.challenges_served += 1;
            let image = format!("image-{}", self.challenges_served).into_bytes();
            self.images_seen.push(image.clone());
            Ok((image, format!("tok{}", self.challenges_served)))
        }

        async fn submit(&mut self, answer: &str) -> Result<String> {
            self.submissions.push(answer.to_string());
            if self.submissions.len() as u32 <= self.reject_first {
                return Err(Error::CaptchaRejected { attempts: 1 });
            }
            Ok("E".repeat(64))
        }
    }

    #[tokio::test]
    async fn rejected_submission_retries_on_a_fresh_challenge() {
        let settings = settings("stub");
        let mut exchange = ScriptedExchange::new(2);

        let enc = solve_with_retries(&mut exchange, &StubSolver, &settings)
            .await
            .unwrap();
        assert_eq!(enc, "E".repeat(64));

        // three attempts, three distinct images, three distinct tokens
        assert_eq!(exchange.challenges_served, 3);
        assert_eq!(exchange.images_seen[0], b"image-1");
        assert_eq!(exchange.images_seen[2], b"image-3");
        assert!(exchange.submissions[0].ends_with("tok1"));
        assert!(exchange.submissions[2].ends_with("tok3"));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let settings = settings("stub");
        let mut exchange = ScriptedExchange::new(u32::MAX);

        let err = solve_with_retries(&mut exchange, &StubSolver, &settings)
            .await
            .err();
        assert!(matches!(err, Some(Error::CaptchaRejected { attempts: 3 })));
        assert_eq!(exchange.challenges_served, 3);
    }

    #[tokio::test]
    async fn manual_solver_fails_closed() {
        let settings = settings("manual");
        let mut exchange = ScriptedExchange::new(0);

        let err = solve_with_retries(&mut exchange, &ManualSolver, &settings)
            .await
            .err();
        assert!(matches!(err, Some(Error::CaptchaRejected { attempts: 3 })));
        // nothing was ever submitted
        assert!(exchange.submissions.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_is_not_submitted() {
        struct LowConfidence;

        #[async_trait]
        impl CaptchaSolver for LowConfidence {
            async fn solve(&self, _image: &[u8]) -> Result<CaptchaGuess> {
                Ok(CaptchaGuess {
                    text: "abc123".to_string(),
                    confidence: 0.5,
                })
            }
        }

        let settings = settings("stub");
        let mut exchange = ScriptedExchange::new(0);
        let err = solve_with_retries(&mut exchange, &LowConfidence, &settings)
            .await
            .err();
        assert!(matches!(err, Some(Error::CaptchaRejected { .. })));
        assert!(exchange.submissions.is_empty());
    }

    #[tokio::test]
    async fn confident_answer_passes_gate() {
        let settings = settings("stub");
        let mut exchange = ScriptedExchange::new(0);
        let enc = solve_with_retries(&mut exchange, &StubSolver, &settings)
            .await
            .unwrap();
        assert!(!enc.is_empty());
        assert_eq!(exchange.challenges_served, 1);
    }

    #[test]
    fn remote_without_endpoint_is_config_error() {
        let err = solver_from_settings(&settings("remote")).err();
        assert!(matches!(err, Some(Error::Config(_))));
    }

    #[test]
    fn unknown_solver_rejected() {
        assert!(solver_from_settings(&settings("vision9000")).is_err());
    }
}
