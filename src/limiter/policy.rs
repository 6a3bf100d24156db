// src/limiter/policy.rs
// Static rate policies per (provider, service)

use serde::Serialize;

/// The AI service classes the limiter tracks independently per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Transcription,
    Vision,
    Ocr,
    Generation,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Transcription => "transcription",
            Service::Vision => "vision",
            Service::Ocr => "ocr",
            Service::Generation => "generation",
        }
    }
}

/// Declared quota for one (provider, service) pair.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RatePolicy {
    pub provider: &'static str,
    pub service: Service,
    pub per_minute: u64,
    pub per_day: u64,
    /// Spend ceiling in currency units, for paid providers.
    pub credit_limit: Option<f64>,
    pub estimated_cost_per_request: Option<f64>,
}

/// The full policy table. Numbers reflect the providers' published free-tier
/// and entry-plan quotas.
pub const POLICIES: &[RatePolicy] = &[
    RatePolicy {
        provider: "groq",
        service: Service::Transcription,
        per_minute: 20,
        per_day: 2_000,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
    RatePolicy {
        provider: "groq",
        service: Service::Vision,
        per_minute: 30,
        per_day: 14_400,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
    RatePolicy {
        provider: "groq",
        service: Service::Ocr,
        per_minute: 30,
        per_day: 14_400,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
    RatePolicy {
        provider: "groq",
        service: Service::Generation,
        per_minute: 30,
        per_day: 14_400,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
    RatePolicy {
        provider: "deepgram",
        service: Service::Transcription,
        per_minute: 100,
        per_day: 10_000,
        credit_limit: Some(200.0),
        estimated_cost_per_request: Some(0.0043),
    },
    RatePolicy {
        provider: "assemblyai",
        service: Service::Transcription,
        per_minute: 30,
        per_day: 5_000,
        credit_limit: Some(50.0),
        estimated_cost_per_request: Some(0.0062),
    },
    RatePolicy {
        provider: "gemini",
        service: Service::Vision,
        per_minute: 15,
        per_day: 1_500,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
    RatePolicy {
        provider: "gemini",
        service: Service::Ocr,
        per_minute: 15,
        per_day: 1_500,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
    RatePolicy {
        provider: "gemini",
        service: Service::Generation,
        per_minute: 15,
        per_day: 1_500,
        credit_limit: None,
        estimated_cost_per_request: None,
    },
];

/// Look up the declared policy; unknown pairs get no quota at all (denied).
pub fn policy_for(provider: &str, service: Service) -> Option<&'static RatePolicy> {
    POLICIES
        .iter()
        .find(|p| p.provider == provider && p.service == service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chain_member_has_a_policy() {
        // Providers wired into the dispatcher chains must all be declared.
        for (provider, service) in [
            ("groq", Service::Transcription),
            ("deepgram", Service::Transcription),
            ("assemblyai", Service::Transcription),
            ("groq", Service::Vision),
            ("gemini", Service::Vision),
            ("groq", Service::Ocr),
            ("gemini", Service::Ocr),
            ("groq", Service::Generation),
            ("gemini", Service::Generation),
        ] {
            assert!(
                policy_for(provider, service).is_some(),
                "missing policy for {provider}/{service:?}"
            );
        }
    }

    #[test]
    fn paid_providers_declare_cost() {
        for p in POLICIES {
            if p.credit_limit.is_some() {
                assert!(p.estimated_cost_per_request.is_some());
            }
        }
    }

    #[test]
    fn unknown_provider_has_no_policy() {
        assert!(policy_for("nonexistent", Service::Generation).is_none());
    }
}
