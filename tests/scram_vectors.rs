//! Drives `ScramAuthenticator` against an in-test fake server that runs the
//! server side of RFC 5802 independently (not by calling back into the
//! authenticator's own math), so a correctness regression on either side
//! can't cancel itself out.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bson::{doc, Document};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use mongo_core::auth::cache::SingleSlotCache;
use mongo_core::auth::scram::{ScramAuthenticator, ScramMechanism};
use mongo_core::auth::{CommandChannel, Credential, Mechanism};
use mongo_core::error::{ConnectionId, Result};
use mongo_core::identity::ServerAddress;

const USERNAME: &str = "user";
const PASSWORD: &str = "pencil";
const SALT: &[u8] = b"deadbeefdeadbeef";
const ITERATIONS: u32 = 4096;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

struct FakeScramServer {
    address: ServerAddress,
    client_first_bare: Option<String>,
    combined_nonce: Option<String>,
    salted_password: Vec<u8>,
    auth_message: Option<String>,
    wrong_password: bool,
}

impl FakeScramServer {
    fn new(wrong_password: bool) -> Self {
        Self {
            address: ServerAddress::Tcp { host: "fake".to_string(), port: 0 },
            client_first_bare: None,
            combined_nonce: None,
            salted_password: Vec::new(),
            auth_message: None,
            wrong_password,
        }
    }
}

#[async_trait]
impl CommandChannel for FakeScramServer {
    async fn run_command(&mut self, _db: &str, command: Document) -> Result<Document> {
        if command.contains_key("saslStart") {
            let payload = command.get_binary_generic("payload").unwrap();
            let payload = String::from_utf8(payload.to_vec()).unwrap();
            let client_first_bare = payload.trim_start_matches("n,,").to_string();
            let client_nonce = client_first_bare.split(',').find_map(|p| p.strip_prefix("r=")).unwrap().to_string();
            let server_nonce = format!("{client_nonce}SERVERNONCE");

            let password = if self.wrong_password { "wrong" } else { PASSWORD };
            let mut derived = [0u8; 32];
            pbkdf2_hmac::<Sha256>(password.as_bytes(), SALT, ITERATIONS, &mut derived);
            self.salted_password = derived.to_vec();

            let server_first = format!("r={server_nonce},s={},i={ITERATIONS}", BASE64.encode(SALT));
            self.client_first_bare = Some(client_first_bare);
            self.combined_nonce = Some(server_nonce);

            return Ok(doc! {
                "ok": 1.0,
                "conversationId": 1i32,
                "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: server_first.into_bytes() },
                "done": false,
            });
        }

        let payload = command.get_binary_generic("payload").unwrap();
        if payload.is_empty() {
            return Ok(doc! { "ok": 1.0, "done": true });
        }
        let payload = String::from_utf8(payload.to_vec()).unwrap();

        let client_first_bare = self.client_first_bare.clone().unwrap();
        let server_nonce = self.combined_nonce.clone().unwrap();
        let client_final_without_proof = payload.split(",p=").next().unwrap();
        let server_first = format!("r={server_nonce},s={},i={ITERATIONS}", BASE64.encode(SALT));
        let auth_message = format!("{client_first_bare},{server_first},{client_final_without_proof}");
        self.auth_message = Some(auth_message.clone());

        let client_key = hmac_sha256(&self.salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key).to_vec();
        let expected_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof_b64 = payload.rsplit("p=").next().unwrap();
        let client_proof = BASE64.decode(client_proof_b64).unwrap();
        let received_client_key: Vec<u8> = client_proof.iter().zip(expected_signature.iter()).map(|(a, b)| a ^ b).collect();
        let received_stored_key = Sha256::digest(&received_client_key).to_vec();

        if received_stored_key != stored_key {
            return Ok(doc! { "ok": 0.0, "errmsg": "authentication failed" });
        }

        let server_key = hmac_sha256(&self.salted_password, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", BASE64.encode(server_signature));
        Ok(doc! {
            "ok": 1.0,
            "payload": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: server_final.into_bytes() },
            "done": true,
        })
    }

    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn connection_id(&self) -> ConnectionId {
        None
    }
}

fn credential() -> Credential {
    Credential {
        mechanism: Mechanism::ScramSha256,
        source: "admin".to_string(),
        username: Some(USERNAME.to_string()),
        password: Some(PASSWORD.to_string()),
        mechanism_properties: Vec::new(),
    }
}

#[tokio::test]
async fn correct_password_completes_full_exchange_and_verifies_server_signature() {
    let cache = std::sync::Arc::new(SingleSlotCache::new());
    let mut authenticator = ScramAuthenticator::new(credential(), ScramMechanism::Sha256, cache);
    let mut server = FakeScramServer::new(false);
    authenticator.authenticate(&mut server).await.unwrap();
}

#[tokio::test]
async fn wrong_password_is_rejected_by_the_server() {
    let cache = std::sync::Arc::new(SingleSlotCache::new());
    let mut authenticator = ScramAuthenticator::new(credential(), ScramMechanism::Sha256, cache);
    let mut server = FakeScramServer::new(true);
    let err = authenticator.authenticate(&mut server).await.unwrap_err();
    assert!(matches!(err, mongo_core::error::Error::Security { .. }));
}
