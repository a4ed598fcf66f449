//! MONGODB-AWS: the client proves identity by having the server relay a
//! SigV4-signed STS `GetCallerIdentity` request, which only resolves to a
//! caller when signed with valid AWS credentials. Credential *sourcing* is
//! explicitly out of scope beyond explicit/environment variables (see
//! [`CredentialSource`]); this module only implements the wire exchange and
//! the signature itself.

use bson::{doc, Document};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{CommandChannel, Credential};
use crate::error::{Error, Result};
use crate::identity::ServerAddress;

const CLIENT_NONCE_LEN: usize = 32;
const STS_SERVICE: &str = "sts";

/// AWS credentials used to sign the STS request.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Where AWS credentials come from. Per the explicit non-goal on credential
/// source configuration, only explicit and environment-variable sources
/// ship with the core; container/instance-metadata sourcing is left to an
/// embedding application implementing this trait.
pub trait CredentialSource: Send {
    fn credentials(&self) -> Result<AwsCredentials>;
}

/// Credentials supplied directly on the `Credential` (username = access key
/// id, password = secret access key, `AWS_SESSION_TOKEN` mechanism property
/// for temporary credentials).
pub struct ExplicitCredentialSource {
    credential: Credential,
}

impl CredentialSource for ExplicitCredentialSource {
    fn credentials(&self) -> Result<AwsCredentials> {
        let address = placeholder_address();
        let access_key_id = self
            .credential
            .username
            .clone()
            .ok_or_else(|| Error::security(&address, None, "MONGODB-AWS credential missing access key id"))?;
        let secret_access_key = self
            .credential
            .password
            .clone()
            .ok_or_else(|| Error::security(&address, None, "MONGODB-AWS credential missing secret access key"))?;
        let session_token = self.credential.mechanism_property("AWS_SESSION_TOKEN").map(str::to_string);
        Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Reads the standard `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`/
/// `AWS_SESSION_TOKEN` environment variables.
pub struct EnvironmentCredentialSource;

impl CredentialSource for EnvironmentCredentialSource {
    fn credentials(&self) -> Result<AwsCredentials> {
        let address = placeholder_address();
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::security(&address, None, "AWS_ACCESS_KEY_ID not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::security(&address, None, "AWS_SECRET_ACCESS_KEY not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

fn placeholder_address() -> ServerAddress {
    ServerAddress::Tcp {
        host: String::new(),
        port: 0,
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Signs the canonical `GetCallerIdentity` request per AWS SigV4, returning
/// the `Authorization` header value.
fn sign_get_caller_identity(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    amz_date: &str,
    date_stamp: &str,
    nonce_b64: &str,
) -> String {
    let body = "Action=GetCallerIdentity&Version=2011-06-15";
    let canonical_headers = format!(
        "content-length:{}\ncontent-type:application/x-www-form-urlencoded\nhost:{}\nx-amz-date:{}\nx-mongodb-gs2-cb-flag:n\nx-mongodb-server-nonce:{}\n",
        body.len(),
        host,
        amz_date,
        nonce_b64,
    );
    let signed_headers = "content-length;content-type;host;x-amz-date;x-mongodb-gs2-cb-flag;x-mongodb-server-nonce";
    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers,
        signed_headers,
        sha256_hex(body.as_bytes())
    );

    let credential_scope = format!("{date_stamp}/{region}/{STS_SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", credentials.secret_access_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, STS_SERVICE.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    )
}

fn region_from_host(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 4 && labels[0] == "sts" {
        labels[1].to_string()
    } else {
        "us-east-1".to_string()
    }
}

pub struct AwsAuthenticator {
    credential: Credential,
    source: Box<dyn CredentialSource>,
}

impl AwsAuthenticator {
    pub fn new(credential: Credential) -> Self {
        let source: Box<dyn CredentialSource> = if credential.username.is_some() {
            Box::new(ExplicitCredentialSource { credential: credential.clone() })
        } else {
            Box::new(EnvironmentCredentialSource)
        };
        Self { credential, source }
    }

    pub fn with_source(mut self, source: Box<dyn CredentialSource>) -> Self {
        self.source = source;
        self
    }

    pub async fn authenticate(&mut self, channel: &mut dyn CommandChannel) -> Result<()> {
        let address = channel.address().clone();
        let connection_id = channel.connection_id();

        let mut client_nonce = [0u8; CLIENT_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut client_nonce);
        let client_first = doc! {
            "r": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: client_nonce.to_vec() },
            "p": 110i32,
        };
        let mut buf = Vec::new();
        client_first.to_writer(&mut buf).map_err(|e| Error::security(&address, connection_id, e.to_string()))?;

        let command = doc! {
            "saslStart": 1i32,
            "mechanism": "MONGODB-AWS",
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: buf },
        };
        let reply = channel.run_command("$external", command).await?;
        let reply = require_ok(&address, connection_id, &reply)?;
        let conversation_id = reply.get_i32("conversationId").unwrap_or(1);
        let server_first_bytes = reply
            .get_binary_generic("payload")
            .map_err(|_| Error::security(&address, connection_id, "saslStart reply missing payload"))?;
        let server_first = Document::from_reader(server_first_bytes.as_slice())
            .map_err(|_| Error::security(&address, connection_id, "saslStart reply payload is not a BSON document"))?;

        let server_nonce = server_first
            .get_binary_generic("s")
            .map_err(|_| Error::security(&address, connection_id, "server-first missing nonce"))?;
        if !server_nonce.starts_with(&client_nonce) {
            return Err(Error::security(&address, connection_id, "server nonce does not extend client nonce"));
        }
        let host = server_first
            .get_str("h")
            .map_err(|_| Error::security(&address, connection_id, "server-first missing sts host"))?;

        let credentials = self.source.credentials()?;
        let region = region_from_host(host);
        let now = chrono::Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let nonce_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, server_nonce);
        let authorization = sign_get_caller_identity(&credentials, &region, host, &amz_date, &date_stamp, &nonce_b64);

        let mut client_final = doc! {
            "a": authorization,
            "d": amz_date,
        };
        if let Some(token) = &credentials.session_token {
            client_final.insert("t", token);
        }
        let mut buf = Vec::new();
        client_final.to_writer(&mut buf).map_err(|e| Error::security(&address, connection_id, e.to_string()))?;

        let command = doc! {
            "saslContinue": 1i32,
            "conversationId": conversation_id,
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: buf },
        };
        let reply = channel.run_command("$external", command).await?;
        let reply = require_ok(&address, connection_id, &reply)?;
        if !reply.get_bool("done").unwrap_or(false) {
            return Err(Error::security(&address, connection_id, "MONGODB-AWS exchange did not complete"));
        }
        let _ = &self.credential;
        Ok(())
    }
}

fn require_ok(address: &ServerAddress, connection_id: crate::error::ConnectionId, reply: &Document) -> Result<Document> {
    let ok = reply.get_f64("ok").unwrap_or_else(|_| reply.get_i32("ok").unwrap_or(0) as f64);
    if ok != 1.0 {
        let message = reply.get_str("errmsg").unwrap_or("MONGODB-AWS authentication failed").to_string();
        return Err(Error::security(address, connection_id, message));
    }
    Ok(reply.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_from_regional_sts_host() {
        assert_eq!(region_from_host("sts.eu-west-1.amazonaws.com"), "eu-west-1");
    }

    #[test]
    fn region_defaults_when_host_unrecognized() {
        assert_eq!(region_from_host("sts.amazonaws.com"), "us-east-1");
    }

    #[test]
    fn signature_is_deterministic_for_fixed_inputs() {
        let credentials = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        };
        let a = sign_get_caller_identity(&credentials, "us-east-1", "sts.amazonaws.com", "20250101T000000Z", "20250101", "bm9uY2U=");
        let b = sign_get_caller_identity(&credentials, "us-east-1", "sts.amazonaws.com", "20250101T000000Z", "20250101", "bm9uY2U=");
        assert_eq!(a, b);
        assert!(a.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
    }
}
