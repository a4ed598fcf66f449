//! State machines for SCRAM-SHA-{1,256}, X509, PLAIN, GSSAPI, MONGODB-AWS,
//! and default-mechanism negotiation. Every mechanism runs as a sequence of
//! `saslStart`/`saslContinue` commands (or a single `authenticate` for
//! X509/PLAIN) against a [`CommandChannel`], the connection's thin
//! command-sending facade.

pub mod aws;
pub mod cache;
pub mod default;
pub mod gssapi;
pub mod plain;
pub mod scram;
pub mod x509;

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;

use crate::connection::description::ConnectionDescription;
use crate::error::{ConnectionId, Result};
use crate::identity::ServerAddress;

/// Command names whose documents must never appear unredacted in a
/// command-started/succeeded/failed event, because they carry credential
/// material. Centralized here per the redaction design note so every event
/// emission site applies the same list.
pub const SENSITIVE_COMMANDS: &[&str] = &[
    "authenticate",
    "saslstart",
    "saslcontinue",
    "copydbgetnonce",
    "copydbsaslstart",
    "copydb",
    "createuser",
    "updateuser",
];

/// `hello`/`isMaster` is sensitive only when it carries `speculativeAuthenticate`.
pub fn is_sensitive_command(name: &str, doc: &Document) -> bool {
    let lower = name.to_ascii_lowercase();
    if SENSITIVE_COMMANDS.contains(&lower.as_str()) {
        return true;
    }
    (lower == "hello" || lower == "ismaster") && doc.contains_key("speculativeAuthenticate")
}

/// The minimal surface an authenticator needs from a connection: send a
/// command on the credential's source database (or `$external` for X509)
/// and get the raw reply back. Authentication traffic is never compressed;
/// implementors must bypass the negotiated compressor for these calls.
#[async_trait]
pub trait CommandChannel: Send {
    async fn run_command(&mut self, db: &str, command: Document) -> Result<Document>;
    fn address(&self) -> &ServerAddress;
    fn connection_id(&self) -> ConnectionId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    ScramSha1,
    ScramSha256,
    X509,
    Plain,
    Gssapi,
    MongodbAws,
    /// Negotiated from the server's `saslSupportedMechs` during handshake.
    Default,
}

impl Mechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::ScramSha1 => "SCRAM-SHA-1",
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
            Mechanism::X509 => "MONGODB-X509",
            Mechanism::Plain => "PLAIN",
            Mechanism::Gssapi => "GSSAPI",
            Mechanism::MongodbAws => "MONGODB-AWS",
            Mechanism::Default => "DEFAULT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub mechanism: Mechanism,
    /// Source database; `$external` for X509/GSSAPI/AWS/PLAIN-against-LDAP.
    pub source: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Mechanism properties (GSSAPI service name/realm, AWS session token,
    /// etc.), kept as opaque key-value pairs rather than one field per
    /// mechanism.
    pub mechanism_properties: Vec<(String, String)>,
}

impl Credential {
    pub fn mechanism_property(&self, key: &str) -> Option<&str> {
        self.mechanism_properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Key for the SCRAM salted-password cache: every parameter that would
/// produce a different salted password if it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScramCacheKey {
    pub username: String,
    pub password: String,
    pub mechanism: &'static str,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// A credential plus the single-slot cache it amortizes SCRAM's PBKDF2
/// derivation through. Shared (via `Arc`) across every connection and
/// re-authentication for the same logical credential.
#[derive(Clone)]
pub struct CredentialWithCache {
    pub credential: Credential,
    pub scram_cache: Arc<cache::SingleSlotCache<ScramCacheKey, Vec<u8>>>,
}

impl CredentialWithCache {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            scram_cache: Arc::new(cache::SingleSlotCache::new()),
        }
    }
}

/// Per-connection, per-credential authentication state. A tagged union
/// rather than a trait object: the mechanism set is closed and each
/// variant's transient state (nonces, GSS context, cached speculative
/// result) differs enough that a shared vtable would buy nothing.
pub enum Authenticator {
    Scram(scram::ScramAuthenticator),
    X509(x509::X509Authenticator),
    Plain(plain::PlainAuthenticator),
    Gssapi(gssapi::GssapiAuthenticator),
    MongodbAws(aws::AwsAuthenticator),
}

impl Authenticator {
    /// Chooses the authenticator for a credential. `sasl_supported_mechs`
    /// supplies the server's advertised mechanisms for `Mechanism::Default`;
    /// see `auth::default::resolve`.
    pub fn for_credential(credential_with_cache: &CredentialWithCache, sasl_supported_mechs: &[String]) -> Self {
        let credential = &credential_with_cache.credential;
        let mechanism = match credential.mechanism {
            Mechanism::Default => default::resolve(sasl_supported_mechs),
            other => other,
        };
        match mechanism {
            Mechanism::ScramSha1 => Authenticator::Scram(scram::ScramAuthenticator::new(
                credential.clone(),
                scram::ScramMechanism::Sha1,
                credential_with_cache.scram_cache.clone(),
            )),
            Mechanism::ScramSha256 => Authenticator::Scram(scram::ScramAuthenticator::new(
                credential.clone(),
                scram::ScramMechanism::Sha256,
                credential_with_cache.scram_cache.clone(),
            )),
            Mechanism::X509 => Authenticator::X509(x509::X509Authenticator::new(credential.clone())),
            Mechanism::Plain => Authenticator::Plain(plain::PlainAuthenticator::new(credential.clone())),
            Mechanism::Gssapi => Authenticator::Gssapi(gssapi::GssapiAuthenticator::new(credential.clone())),
            Mechanism::MongodbAws => Authenticator::MongodbAws(aws::AwsAuthenticator::new(credential.clone())),
            Mechanism::Default => unreachable!("default::resolve never returns Default"),
        }
    }

    pub async fn authenticate(&mut self, channel: &mut dyn CommandChannel, description: &ConnectionDescription) -> Result<()> {
        match self {
            Authenticator::Scram(a) => a.authenticate(channel).await,
            Authenticator::X509(a) => a.authenticate(channel).await,
            Authenticator::Plain(a) => a.authenticate(channel).await,
            Authenticator::Gssapi(a) => a.authenticate(channel, description).await,
            Authenticator::MongodbAws(a) => a.authenticate(channel).await,
        }
    }

    /// Builds the mechanism-specific `speculativeAuthenticate` subdocument
    /// to embed in the handshake, if this mechanism supports it.
    pub fn speculative_auth_document(&mut self) -> Option<Document> {
        match self {
            Authenticator::Scram(a) => Some(a.speculative_auth_document()),
            Authenticator::X509(a) => Some(a.speculative_auth_document()),
            _ => None,
        }
    }

    /// Inspects the handshake reply's `speculativeAuthenticate` subdocument,
    /// if any, and returns whether authentication is already complete.
    pub async fn accept_speculative_result(&mut self, reply: Option<&Document>) -> Result<bool> {
        match (self, reply) {
            (Authenticator::Scram(a), Some(doc)) => a.accept_speculative_result(doc).await,
            (Authenticator::X509(a), Some(doc)) => a.accept_speculative_result(doc),
            _ => Ok(false),
        }
    }
}
