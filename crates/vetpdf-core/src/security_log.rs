use std::fmt;

use tracing::Level;

use crate::model::Severity;

#[derive(Debug, Clone, Copy)]
pub enum SecurityDomain {
    Encryption,
    Budget,
    Config,
    Detection,
}

impl SecurityDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityDomain::Encryption => "pdf.encryption",
            SecurityDomain::Budget => "runtime.budget",
            SecurityDomain::Config => "runtime.config",
            SecurityDomain::Detection => "runtime.detection",
        }
    }
}

impl fmt::Display for SecurityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A uniform security log record. `tracing` needs the level at the call
/// site, hence one arm per level in [`SecurityEvent::emit`].
#[derive(Debug, Clone, Copy)]
pub struct SecurityEvent<'a> {
    pub level: Level,
    pub domain: SecurityDomain,
    pub severity: Severity,
    pub kind: &'a str,
    pub object_id: Option<&'a str>,
    pub message: &'a str,
}

impl<'a> SecurityEvent<'a> {
    pub fn new(level: Level, domain: SecurityDomain, kind: &'a str, message: &'a str) -> Self {
        Self { level, domain, severity: Severity::Low, kind, object_id: None, message }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn object(mut self, object_id: &'a str) -> Self {
        self.object_id = Some(object_id);
        self
    }

    pub fn emit(self) {
        match self.level {
            Level::TRACE => tracing::event!(
                Level::TRACE,
                security = true,
                domain = %self.domain,
                severity = ?self.severity,
                kind = self.kind,
                object_id = self.object_id,
                "{message}",
                message = self.message
            ),
            Level::DEBUG => tracing::event!(
                Level::DEBUG,
                security = true,
                domain = %self.domain,
                severity = ?self.severity,
                kind = self.kind,
                object_id = self.object_id,
                "{message}",
                message = self.message
            ),
            Level::INFO => tracing::event!(
                Level::INFO,
                security = true,
                domain = %self.domain,
                severity = ?self.severity,
                kind = self.kind,
                object_id = self.object_id,
                "{message}",
                message = self.message
            ),
            Level::WARN => tracing::event!(
                Level::WARN,
                security = true,
                domain = %self.domain,
                severity = ?self.severity,
                kind = self.kind,
                object_id = self.object_id,
                "{message}",
                message = self.message
            ),
            Level::ERROR => tracing::event!(
                Level::ERROR,
                security = true,
                domain = %self.domain,
                severity = ?self.severity,
                kind = self.kind,
                object_id = self.object_id,
                "{message}",
                message = self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_fill_severity_and_object() {
        let event = SecurityEvent::new(Level::ERROR, SecurityDomain::Budget, "allocation_refused", "refused")
            .severity(Severity::High)
            .object("4 0");
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.object_id, Some("4 0"));
        assert_eq!(event.domain.to_string(), "runtime.budget");
        event.emit();
    }
}
