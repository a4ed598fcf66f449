//! SCRAM-SHA-1 / SCRAM-SHA-256 (RFC 5802), generalized over the digest the
//! mechanism name selects. Both share the same conversation shape; only the
//! hash/HMAC primitives and (for SHA-256) SASLPrep normalization differ.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bson::{doc, Document};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::cache::SingleSlotCache;
use super::{CommandChannel, Credential, ScramCacheKey};
use crate::error::{Error, Result};
use crate::identity::ServerAddress;

const CLIENT_NONCE_LEN: usize = 24;
const MIN_ITERATIONS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramMechanism {
    Sha1,
    Sha256,
}

impl ScramMechanism {
    fn name(self) -> &'static str {
        match self {
            ScramMechanism::Sha1 => "SCRAM-SHA-1",
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
        }
    }

    fn h(self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha1 => Sha1::digest(data).to_vec(),
            ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts a key of any length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            ScramMechanism::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts a key of any length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn pbkdf2(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            ScramMechanism::Sha1 => {
                let mut out = [0u8; 20];
                pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut out);
                out.to_vec()
            }
            ScramMechanism::Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
                out.to_vec()
            }
        }
    }

    /// SASLPrep normalization is mandated only for SCRAM-SHA-256; the
    /// SHA-1 mechanism predates it and uses the raw password bytes.
    fn normalize_password<'a>(self, address: &ServerAddress, password: &'a str) -> Result<std::borrow::Cow<'a, str>> {
        match self {
            ScramMechanism::Sha1 => Ok(std::borrow::Cow::Borrowed(password)),
            ScramMechanism::Sha256 => stringprep::saslprep(password)
                .map_err(|_| Error::security(address, None, "password contains invalid SASLPrep codepoints")),
        }
    }
}

fn placeholder_address() -> ServerAddress {
    ServerAddress::Tcp {
        host: String::new(),
        port: 0,
    }
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; CLIENT_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

pub struct ScramAuthenticator {
    credential: Credential,
    mechanism: ScramMechanism,
    cache: Arc<SingleSlotCache<ScramCacheKey, Vec<u8>>>,
    client_nonce: String,
    conversation_id: Option<i32>,
    auth_message: String,
    salted_password: Vec<u8>,
    speculative_conversation_started: bool,
}

impl ScramAuthenticator {
    pub fn new(credential: Credential, mechanism: ScramMechanism, cache: Arc<SingleSlotCache<ScramCacheKey, Vec<u8>>>) -> Self {
        Self {
            credential,
            mechanism,
            cache,
            client_nonce: generate_nonce(),
            conversation_id: None,
            auth_message: String::new(),
            salted_password: Vec::new(),
            speculative_conversation_started: false,
        }
    }

    fn username(&self) -> &str {
        self.credential.username.as_deref().unwrap_or_default()
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(self.username()), self.client_nonce)
    }

    fn sasl_start_document(&self) -> Document {
        let payload = format!("n,,{}", self.client_first_bare());
        doc! {
            "saslStart": 1i32,
            "mechanism": self.mechanism.name(),
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: payload.into_bytes() },
            "autoAuthorize": 1i32,
        }
    }

    /// Builds the `speculativeAuthenticate` subdocument for the handshake.
    pub fn speculative_auth_document(&mut self) -> Document {
        let mut document = self.sasl_start_document();
        document.insert("db", &self.credential.source);
        document
    }

    /// Inspects the handshake reply's `speculativeAuthenticate` subdocument.
    /// SCRAM never completes in a single round trip (it still needs
    /// saslContinue), so this only primes state for the subsequent
    /// `authenticate` call and always reports "not yet done".
    pub async fn accept_speculative_result(&mut self, reply: &Document) -> Result<bool> {
        let address = placeholder_address();
        let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
        if ok != 1.0 {
            return Ok(false);
        }
        let conversation_id = reply
            .get_i32("conversationId")
            .map_err(|_| Error::security(&address, None, "speculativeAuthenticate reply missing conversationId"))?;
        let payload = reply
            .get_binary_generic("payload")
            .map_err(|_| Error::security(&address, None, "speculativeAuthenticate reply missing payload"))?;
        let server_first = String::from_utf8_lossy(payload).to_string();
        self.conversation_id = Some(conversation_id);
        self.note_server_first(&address, &server_first).await?;
        self.speculative_conversation_started = true;
        Ok(false)
    }

    async fn note_server_first(&mut self, address: &ServerAddress, server_first: &str) -> Result<()> {
        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(r) = part.strip_prefix("r=") {
                server_nonce = Some(r.to_string());
            } else if let Some(s) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(s).map_err(|_| Error::security(address, None, "invalid base64 salt"))?);
            } else if let Some(i) = part.strip_prefix("i=") {
                iterations = Some(i.parse::<u32>().map_err(|_| Error::security(address, None, "invalid iteration count"))?);
            }
        }
        let server_nonce = server_nonce.ok_or_else(|| Error::security(address, None, "server-first missing nonce"))?;
        let salt = salt.ok_or_else(|| Error::security(address, None, "server-first missing salt"))?;
        let iterations = iterations.ok_or_else(|| Error::security(address, None, "server-first missing iteration count"))?;

        if iterations < MIN_ITERATIONS {
            return Err(Error::security(address, None, format!("SCRAM iteration count {iterations} below minimum {MIN_ITERATIONS}")));
        }
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(Error::security(address, None, "server nonce does not extend client nonce"));
        }

        let password = self.credential.password.clone().unwrap_or_default();
        let normalized = self.mechanism.normalize_password(address, &password)?.into_owned();
        let cache_key = ScramCacheKey {
            username: self.username().to_string(),
            password: normalized.clone(),
            mechanism: self.mechanism.name(),
            salt: salt.clone(),
            iterations,
        };
        let mechanism = self.mechanism;
        self.salted_password = self
            .cache
            .get_or_insert_with(cache_key, move || mechanism.pbkdf2(normalized.as_bytes(), &salt, iterations))
            .await;

        let client_final_without_proof = format!("c=biws,r={server_nonce}");
        self.auth_message = format!("{},{},{}", self.client_first_bare(), server_first, client_final_without_proof);
        Ok(())
    }

    fn build_client_final(&self) -> (String, Vec<u8>) {
        let client_key = self.mechanism.hmac(&self.salted_password, b"Client Key");
        let stored_key = self.mechanism.h(&client_key);
        let client_signature = self.mechanism.hmac(&stored_key, self.auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key.iter().zip(client_signature.iter()).map(|(a, b)| a ^ b).collect();
        let server_key = self.mechanism.hmac(&self.salted_password, b"Server Key");
        let server_signature = self.mechanism.hmac(&server_key, self.auth_message.as_bytes());

        let r = self.auth_message.split(',').find_map(|p| p.strip_prefix("r=")).unwrap_or_default();
        let message = format!("c=biws,r={},p={}", r, BASE64.encode(&client_proof));
        (message, server_signature)
    }

    fn verify_server_final(&self, address: &ServerAddress, server_final: &str, expected_signature: &[u8]) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::security(address, None, format!("server returned SCRAM error: {err}")));
        }
        let v = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::security(address, None, "server-final missing verifier"))?;
        let signature = BASE64.decode(v).map_err(|_| Error::security(address, None, "invalid base64 server signature"))?;
        if signature != expected_signature {
            return Err(Error::security(address, None, "server signature verification failed"));
        }
        Ok(())
    }

    pub async fn authenticate(&mut self, channel: &mut dyn CommandChannel) -> Result<()> {
        let db = self.credential.source.clone();

        let conversation_id = if let Some(id) = self.conversation_id.filter(|_| self.speculative_conversation_started) {
            id
        } else {
            let reply = channel.run_command(&db, self.sasl_start_document()).await?;
            let reply = require_ok(channel, &reply)?;
            let conversation_id = reply.get_i32("conversationId").unwrap_or(1);
            let payload = reply
                .get_binary_generic("payload")
                .map_err(|_| Error::security(channel.address(), channel.connection_id(), "saslStart reply missing payload"))?;
            let server_first = String::from_utf8_lossy(payload).to_string();
            self.note_server_first(channel.address(), &server_first).await?;
            conversation_id
        };

        let (client_final, expected_server_signature) = self.build_client_final();
        let command = doc! {
            "saslContinue": 1i32,
            "conversationId": conversation_id,
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: client_final.into_bytes() },
        };
        let reply = channel.run_command(&db, command).await?;
        let reply = require_ok(channel, &reply)?;
        let payload = reply
            .get_binary_generic("payload")
            .map_err(|_| Error::security(channel.address(), channel.connection_id(), "saslContinue reply missing payload"))?;
        let server_final = String::from_utf8_lossy(payload).to_string();
        self.verify_server_final(channel.address(), &server_final, &expected_server_signature)?;

        if !reply.get_bool("done").unwrap_or(false) {
            let command = doc! {
                "saslContinue": 1i32,
                "conversationId": conversation_id,
                "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: Vec::new() },
            };
            let reply = channel.run_command(&db, command).await?;
            require_ok(channel, &reply)?;
        }

        Ok(())
    }
}

fn require_ok(channel: &dyn CommandChannel, reply: &Document) -> Result<Document> {
    let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
    if ok != 1.0 {
        let message = reply.get_str("errmsg").unwrap_or("SASL step failed").to_string();
        return Err(Error::security(channel.address(), channel.connection_id(), message));
    }
    Ok(reply.clone())
}
