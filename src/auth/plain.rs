//! PLAIN (RFC 4616): a single SASL step carrying `\0user\0password`. Used
//! against LDAP-backed deployments; always run over TLS in practice, but
//! that is a deployment concern, not this mechanism's.

use bson::doc;

use super::{CommandChannel, Credential};
use crate::error::{Error, Result};

pub struct PlainAuthenticator {
    credential: Credential,
}

impl PlainAuthenticator {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    fn payload(&self) -> Vec<u8> {
        let username = self.credential.username.as_deref().unwrap_or_default();
        let password = self.credential.password.as_deref().unwrap_or_default();
        let mut bytes = Vec::with_capacity(username.len() * 2 + password.len() + 2);
        bytes.push(0u8);
        bytes.extend_from_slice(username.as_bytes());
        bytes.push(0u8);
        bytes.extend_from_slice(password.as_bytes());
        bytes
    }

    pub async fn authenticate(&mut self, channel: &mut dyn CommandChannel) -> Result<()> {
        let command = doc! {
            "saslStart": 1i32,
            "mechanism": "PLAIN",
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: self.payload() },
            "autoAuthorize": 1i32,
        };
        let reply = channel.run_command(&self.credential.source, command).await?;
        let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
        if ok != 1.0 {
            let message = reply.get_str("errmsg").unwrap_or("PLAIN authentication failed").to_string();
            return Err(Error::security(channel.address(), channel.connection_id(), message));
        }
        if !reply.get_bool("done").unwrap_or(true) {
            return Err(Error::security(channel.address(), channel.connection_id(), "PLAIN exchange did not complete in one step"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Mechanism;

    #[test]
    fn payload_is_null_delimited() {
        let credential = Credential {
            mechanism: Mechanism::Plain,
            source: "$external".to_string(),
            username: Some("alice".to_string()),
            password: Some("s3cret".to_string()),
            mechanism_properties: Vec::new(),
        };
        let auth = PlainAuthenticator::new(credential);
        assert_eq!(auth.payload(), b"\0alice\0s3cret");
    }
}
