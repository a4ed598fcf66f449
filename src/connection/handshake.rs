//! Builds the `hello` handshake command: client metadata, the compressor
//! list, and (when authenticating) either `speculativeAuthenticate` or a
//! `saslSupportedMechs` probe for `Mechanism::Default` resolution.

use bson::{doc, Document};

#[derive(Debug, Clone)]
pub struct ClientMetadata {
    pub application_name: Option<String>,
    pub driver_name: String,
    pub driver_version: String,
    pub os_type: String,
    pub os_name: String,
    pub os_architecture: String,
    pub platform: String,
}

impl Default for ClientMetadata {
    fn default() -> Self {
        Self {
            application_name: None,
            driver_name: "mongo-core".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            os_type: std::env::consts::OS.to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_architecture: std::env::consts::ARCH.to_string(),
            platform: format!("rustc/{}", std::env::consts::ARCH),
        }
    }
}

impl ClientMetadata {
    fn to_document(&self) -> Document {
        let mut client = doc! {
            "driver": { "name": &self.driver_name, "version": &self.driver_version },
            "os": {
                "type": &self.os_type,
                "name": &self.os_name,
                "architecture": &self.os_architecture,
            },
            "platform": &self.platform,
        };
        if let Some(name) = &self.application_name {
            client.insert("application", doc! { "name": name });
        }
        client
    }
}

/// Builds the `hello` command document. `speculative_auth` and
/// `requested_sasl_mechs` are mutually exclusive in practice: a
/// credentialled connection with a concrete mechanism sends
/// `speculativeAuthenticate`, one using `Mechanism::Default` instead probes
/// `saslSupportedMechs` for the named user (qualified by the credential's
/// own auth source, not a hardcoded database) so the server can advertise
/// which mechanisms it supports.
pub fn hello_command(
    metadata: &ClientMetadata,
    compressors: &[String],
    speculative_auth: Option<Document>,
    requested_sasl_mechs: Option<(&str, &str)>,
) -> Document {
    let mut command = doc! {
        "hello": 1i32,
        "helloOk": true,
        "client": metadata.to_document(),
    };
    if !compressors.is_empty() {
        command.insert("compression", compressors.to_vec());
    }
    if let Some(auth) = speculative_auth {
        command.insert("speculativeAuthenticate", auth);
    }
    if let Some((source, user)) = requested_sasl_mechs {
        command.insert("saslSupportedMechs", format!("{source}.{user}"));
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_command_includes_compressors_when_present() {
        let command = hello_command(&ClientMetadata::default(), &["zstd".to_string()], None, None);
        assert_eq!(command.get_array("compression").unwrap(), &vec![bson::Bson::String("zstd".to_string())]);
    }

    #[test]
    fn hello_command_omits_compression_key_when_empty() {
        let command = hello_command(&ClientMetadata::default(), &[], None, None);
        assert!(command.get_array("compression").is_err());
    }

    #[test]
    fn hello_command_carries_speculative_auth() {
        let auth = doc! { "mechanism": "SCRAM-SHA-256" };
        let command = hello_command(&ClientMetadata::default(), &[], Some(auth.clone()), None);
        assert_eq!(command.get_document("speculativeAuthenticate").unwrap(), &auth);
    }

    #[test]
    fn sasl_supported_mechs_probe_is_qualified_by_the_credential_source() {
        let command = hello_command(&ClientMetadata::default(), &[], None, Some(("$external", "alice")));
        assert_eq!(command.get_str("saslSupportedMechs").unwrap(), "$external.alice");
    }
}
