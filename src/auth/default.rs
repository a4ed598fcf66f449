//! `Mechanism::Default` resolution: inspects the server's
//! `saslSupportedMechs` from the handshake reply and prefers
//! SCRAM-SHA-256, falling back to SCRAM-SHA-1, matching every official
//! driver's negotiation rule.

use super::Mechanism;

pub fn resolve(sasl_supported_mechs: &[String]) -> Mechanism {
    if sasl_supported_mechs.iter().any(|m| m == "SCRAM-SHA-256") {
        Mechanism::ScramSha256
    } else {
        Mechanism::ScramSha1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_sha256_when_offered() {
        let mechs = vec!["SCRAM-SHA-1".to_string(), "SCRAM-SHA-256".to_string()];
        assert_eq!(resolve(&mechs), Mechanism::ScramSha256);
    }

    #[test]
    fn falls_back_to_sha1() {
        let mechs = vec!["SCRAM-SHA-1".to_string()];
        assert_eq!(resolve(&mechs), Mechanism::ScramSha1);
    }

    #[test]
    fn defaults_to_sha1_when_silent() {
        assert_eq!(resolve(&[]), Mechanism::ScramSha1);
    }
}
