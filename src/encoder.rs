//! Credential Encoder - Two Systems, One Identity
//!
//! Both access-control systems are written as a pair. A `CredentialRecord`
//! exists only when both writes succeeded; a half pair is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::directory::StudentRecord;

/// Failure reported by one encoder system
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct WriteFault(pub String);

#[async_trait]
pub trait EncoderSystem: Send + Sync {
    /// Short label used in logs and error messages
    fn system_id(&self) -> &str;

    /// Write the identity and return the system-assigned serial.
    async fn write(&self, student_id: &str) -> Result<String, WriteFault>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFailure {
    pub system: String,
    pub reason: String,
}

impl fmt::Display for SystemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.system, self.reason)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Encoding failed on {}", describe(.failures))]
pub struct EncodeError {
    pub failures: Vec<SystemFailure>,
}

fn describe(failures: &[SystemFailure]) -> String {
    failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", ")
}

/// Joint output of a successful encode; immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub student_id: String,
    pub student_name: String,
    pub system_a_serial: String,
    pub system_b_serial: String,
    pub encoded_at: DateTime<Utc>,
}

/// All-or-nothing combinator: partial successes are discarded.
pub fn both<A, B>(
    a: Result<A, SystemFailure>,
    b: Result<B, SystemFailure>,
) -> Result<(A, B), EncodeError> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (a, b) => {
            let failures = [a.err(), b.err()].into_iter().flatten().collect();
            Err(EncodeError { failures })
        }
    }
}

#[derive(Clone)]
pub struct CredentialEncoder {
    system_a: Arc<dyn EncoderSystem>,
    system_b: Arc<dyn EncoderSystem>,
    timeout: Duration,
}

impl CredentialEncoder {
    pub fn new(system_a: Arc<dyn EncoderSystem>, system_b: Arc<dyn EncoderSystem>, timeout: Duration) -> Self {
        Self { system_a, system_b, timeout }
    }

    pub fn system_ids(&self) -> (&str, &str) {
        (self.system_a.system_id(), self.system_b.system_id())
    }

    pub async fn encode_system_a(&self, student_id: &str) -> Result<String, SystemFailure> {
        write_with_timeout(self.system_a.as_ref(), student_id, self.timeout).await
    }

    pub async fn encode_system_b(&self, student_id: &str) -> Result<String, SystemFailure> {
        write_with_timeout(self.system_b.as_ref(), student_id, self.timeout).await
    }

    /// Attempts both systems concurrently; they are order-insensitive.
    pub async fn encode(&self, student: &StudentRecord) -> Result<CredentialRecord, EncodeError> {
        let (a, b) = tokio::join!(
            self.encode_system_a(&student.student_id),
            self.encode_system_b(&student.student_id),
        );

        let (system_a_serial, system_b_serial) = both(a, b).map_err(|e| {
            warn!(student_id = %student.student_id, error = %e, "credential pair rejected");
            e
        })?;

        info!(
            student_id = %student.student_id,
            serial_a = %system_a_serial,
            serial_b = %system_b_serial,
            "credential pair encoded"
        );
        Ok(CredentialRecord {
            student_id: student.student_id.clone(),
            student_name: student.name.clone(),
            system_a_serial,
            system_b_serial,
            encoded_at: Utc::now(),
        })
    }
}

async fn write_with_timeout(
    system: &dyn EncoderSystem,
    student_id: &str,
    timeout: Duration,
) -> Result<String, SystemFailure> {
    let failure = |reason: String| SystemFailure {
        system: system.system_id().to_string(),
        reason,
    };

    match tokio::time::timeout(timeout, system.write(student_id)).await {
        Ok(Ok(serial)) if serial.trim().is_empty() => Err(failure("empty serial returned".into())),
        Ok(Ok(serial)) => Ok(serial),
        Ok(Err(fault)) => Err(failure(fault.0)),
        Err(_) => Err(failure(format!("no response within {:?}", timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(system: &str) -> SystemFailure {
        SystemFailure { system: system.into(), reason: "reader offline".into() }
    }

    #[test]
    fn test_both_requires_pair() {
        assert_eq!(both::<_, String>(Ok("NFC-1"), Ok("SALTO-1".to_string())).unwrap().0, "NFC-1");

        let err = both::<String, String>(Ok("NFC-1".into()), Err(fail("SALTO"))).unwrap_err();
        assert_eq!(err.failures, vec![fail("SALTO")]);

        let err = both::<String, String>(Err(fail("NFC")), Err(fail("SALTO"))).unwrap_err();
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.to_string(), "Encoding failed on NFC (reader offline), SALTO (reader offline)");
    }

    struct Slow;

    #[async_trait]
    impl EncoderSystem for Slow {
        fn system_id(&self) -> &str { "SLOW" }

        async fn write(&self, _student_id: &str) -> Result<String, WriteFault> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".into())
        }
    }

    struct Blank;

    #[async_trait]
    impl EncoderSystem for Blank {
        fn system_id(&self) -> &str { "BLANK" }

        async fn write(&self, _student_id: &str) -> Result<String, WriteFault> {
            Ok("  ".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_system_times_out() {
        let result = write_with_timeout(&Slow, "CS22-1234", Duration::from_millis(50)).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.system, "SLOW");
        assert!(failure.reason.contains("no response"));
    }

    #[tokio::test]
    async fn test_blank_serial_is_failure() {
        let result = write_with_timeout(&Blank, "CS22-1234", Duration::from_secs(1)).await;
        assert_eq!(result.unwrap_err().reason, "empty serial returned");
    }
}
