//! Console stand-in for the PIN/biometric verification prompt.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use passport_core::{UserVerification, VerificationOutcome};
use tracing::debug;

/// Asks for a yes/no confirmation on the terminal.
///
/// With `assume_yes` every prompt is approved without reading stdin.
pub struct ConsoleVerification {
    assume_yes: bool,
}

impl ConsoleVerification {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl UserVerification for ConsoleVerification {
    async fn verify(&self, username: &str, reason: &str) -> VerificationOutcome {
        if self.assume_yes {
            return VerificationOutcome::Verified;
        }

        let question = format!("{reason} for '{username}'? [y/N] ");
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{question}");
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if is_yes(&line) => VerificationOutcome::Verified,
            Ok(Ok(_)) => VerificationOutcome::Cancelled,
            Ok(Err(e)) => {
                debug!(error = %e, "Could not read confirmation");
                VerificationOutcome::Cancelled
            }
            Err(e) => {
                debug!(error = %e, "Prompt task failed");
                VerificationOutcome::Cancelled
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[tokio::test]
    async fn test_assume_yes_skips_prompt() {
        let prompt = ConsoleVerification::new(true);
        assert_eq!(
            prompt.verify("alice", "Sign in").await,
            VerificationOutcome::Verified
        );
    }
}
