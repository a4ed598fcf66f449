//! MONGODB-X509: the client's TLS certificate subject stands in for a
//! password. A single `authenticate` command against `$external` either
//! succeeds or fails; there is no multi-step SASL conversation.

use bson::{doc, Document};

use super::{CommandChannel, Credential};
use crate::error::{Error, Result};

pub struct X509Authenticator {
    credential: Credential,
}

impl X509Authenticator {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    fn command(&self) -> Document {
        let mut command = doc! {
            "authenticate": 1i32,
            "mechanism": "MONGODB-X509",
        };
        if let Some(username) = &self.credential.username {
            command.insert("user", username);
        }
        command
    }

    pub fn speculative_auth_document(&mut self) -> Document {
        self.command()
    }

    pub fn accept_speculative_result(&mut self, reply: &Document) -> Result<bool> {
        let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
        Ok(ok == 1.0)
    }

    pub async fn authenticate(&mut self, channel: &mut dyn CommandChannel) -> Result<()> {
        let reply = channel.run_command("$external", self.command()).await?;
        let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
        if ok != 1.0 {
            let message = reply.get_str("errmsg").unwrap_or("X.509 authentication failed").to_string();
            return Err(Error::security(channel.address(), channel.connection_id(), message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Mechanism;

    #[test]
    fn command_includes_username_when_present() {
        let credential = Credential {
            mechanism: Mechanism::X509,
            source: "$external".to_string(),
            username: Some("CN=client,OU=test".to_string()),
            password: None,
            mechanism_properties: Vec::new(),
        };
        let mut auth = X509Authenticator::new(credential);
        let command = auth.speculative_auth_document();
        assert_eq!(command.get_str("user").unwrap(), "CN=client,OU=test");
        assert_eq!(command.get_str("mechanism").unwrap(), "MONGODB-X509");
    }

    #[test]
    fn command_omits_username_when_absent() {
        let credential = Credential {
            mechanism: Mechanism::X509,
            source: "$external".to_string(),
            username: None,
            password: None,
            mechanism_properties: Vec::new(),
        };
        let mut auth = X509Authenticator::new(credential);
        let command = auth.speculative_auth_document();
        assert!(command.get_str("user").is_err());
    }
}
