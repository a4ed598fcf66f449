//! GSSAPI (Kerberos). Real GSS context negotiation needs a system Kerberos
//! library binding outside this pack's dependency corpus, so the wire-level
//! state machine (saslStart/saslContinue loop, binary subtype 0 payloads,
//! step counting) is implemented here against an injected
//! [`GssapiContextProvider`] collaborator that owns the real GSS context.

use bson::{doc, Document};

use super::{CommandChannel, Credential};
use crate::connection::description::ConnectionDescription;
use crate::error::{Error, Result};

/// The four GSSAPI mechanism properties a credential can carry, gathered
/// into one value so a provider's `init` sees everything needed to build
/// the target service principal before the first token is requested.
#[derive(Debug, Clone)]
pub struct GssapiParams {
    pub username: String,
    pub service_name: String,
    /// `SERVICE_REALM`: overrides the realm implied by the username, for
    /// cross-realm deployments.
    pub service_realm: Option<String>,
    /// `CANONICALIZE_HOST_NAME`: resolve the server's hostname via DNS
    /// before building the principal, instead of using it as given.
    pub canonicalize_host_name: bool,
    /// `SERVICE_HOST`: overrides the hostname component of the principal
    /// outright, taking precedence over both the connection's address and
    /// `canonicalize_host_name`.
    pub service_host_name: Option<String>,
}

/// Supplies the GSS security-context steps this authenticator drives over
/// the wire. An embedding application backs this with its real Kerberos
/// binding; the core never touches GSS APIs directly.
pub trait GssapiContextProvider: Send {
    /// Called once before the first `step`, with every mechanism property
    /// the credential carries, so the provider can build the target service
    /// principal the same way for every call that follows.
    fn init(&mut self, params: &GssapiParams) -> Result<()>;

    /// Produces the next outbound token given the server's last challenge
    /// (empty on the first call). Returns `None` once the context is
    /// established and no further token is needed.
    fn step(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Wraps the final empty-challenge security-layer negotiation message,
    /// per RFC 4752 ?4.2. Most deployments only ever negotiate "no security
    /// layer", so a provider may return the 4-byte `[0x01, 0, 0, 0]`
    /// conventional response.
    fn wrap_security_layer(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

pub struct GssapiAuthenticator {
    credential: Credential,
    provider: Option<Box<dyn GssapiContextProvider>>,
}

impl GssapiAuthenticator {
    pub fn new(credential: Credential) -> Self {
        Self { credential, provider: None }
    }

    /// Installs the collaborator that drives real GSS context steps. Must
    /// be called before `authenticate`; omitting it fails authentication
    /// with a clear error rather than panicking.
    pub fn with_provider(mut self, provider: Box<dyn GssapiContextProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn service_name(&self) -> &str {
        self.credential.mechanism_property("SERVICE_NAME").unwrap_or("mongodb")
    }

    fn service_realm(&self) -> Option<String> {
        self.credential.mechanism_property("SERVICE_REALM").map(str::to_string)
    }

    fn canonicalize_host_name(&self) -> bool {
        self.credential.mechanism_property("CANONICALIZE_HOST_NAME").map(|v| v == "true").unwrap_or(false)
    }

    fn service_host_name(&self) -> Option<String> {
        self.credential.mechanism_property("SERVICE_HOST").map(str::to_string)
    }

    pub async fn authenticate(&mut self, channel: &mut dyn CommandChannel, _description: &ConnectionDescription) -> Result<()> {
        let address = channel.address().clone();
        let connection_id = channel.connection_id();
        let params = GssapiParams {
            username: self.credential.username.clone().unwrap_or_default(),
            service_name: self.service_name().to_string(),
            service_realm: self.service_realm(),
            canonicalize_host_name: self.canonicalize_host_name(),
            service_host_name: self.service_host_name(),
        };
        let provider = self
            .provider
            .as_mut()
            .ok_or_else(|| Error::security(&address, connection_id, "no GssapiContextProvider configured"))?;
        provider.init(&params)?;

        let first_token = provider.step(&[])?.unwrap_or_default();
        let command = doc! {
            "saslStart": 1i32,
            "mechanism": "GSSAPI",
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: first_token },
            "autoAuthorize": 1i32,
        };
        let reply = channel.run_command("$external", command).await?;
        let mut reply = require_ok(&address, connection_id, &reply)?;
        let mut conversation_id = reply.get_i32("conversationId").unwrap_or(1);

        loop {
            if reply.get_bool("done").unwrap_or(false) {
                break;
            }
            let challenge = reply
                .get_binary_generic("payload")
                .map_err(|_| Error::security(&address, connection_id, "saslContinue reply missing payload"))?
                .to_vec();

            let next_token = match provider.step(&challenge)? {
                Some(token) => token,
                None => provider.wrap_security_layer(&challenge)?,
            };

            let command = doc! {
                "saslContinue": 1i32,
                "conversationId": conversation_id,
                "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: next_token },
            };
            reply = channel.run_command("$external", command).await?;
            reply = require_ok(&address, connection_id, &reply)?;
            conversation_id = reply.get_i32("conversationId").unwrap_or(conversation_id);
        }

        Ok(())
    }
}

fn require_ok(address: &crate::identity::ServerAddress, connection_id: crate::error::ConnectionId, reply: &Document) -> Result<Document> {
    let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
    if ok != 1.0 {
        let message = reply.get_str("errmsg").unwrap_or("GSSAPI authentication failed").to_string();
        return Err(Error::security(address, connection_id, message));
    }
    Ok(reply.clone())
}
