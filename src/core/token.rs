//! Guest identifiers, key material and scannable tokens.
//!
//! The token cipher sits behind [`TokenCipher`]. The default
//! [`KeypairCipher`] encrypts the identifier with AES-256-GCM under a key
//! derived from the server's Ed25519 private key and signs the result, so a
//! token can only be produced by this server and reveals nothing about the
//! identifier it carries.

use crate::errors::{AppError, AppResult};
use crate::models::guest::{GUEST_ID_LEN, GuestId, Token};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use ed25519_dalek::{SIGNATURE_LENGTH, Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

const TOKEN_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const ID_RANDOM_BYTES: usize = GUEST_ID_LEN / 4 * 3;
const MAX_ID_ATTEMPTS: usize = 8;
const AES_KEY_CONTEXT: &[u8] = b"rguestlog/token-aes/v1";

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Server keypair. The private half is never serialized anywhere except the
/// configured private key file.
pub struct KeyMaterial {
    signing: SigningKey,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public", &BASE64.encode(self.public().as_bytes()))
            .finish()
    }
}

impl KeyMaterial {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Load the keypair from disk, creating it when neither file exists.
    ///
    /// A half-present pair, or a public key that does not belong to the
    /// private key, is refused rather than silently regenerated: regenerating
    /// would invalidate every token already handed out.
    pub fn load_or_generate(private_path: &Path, public_path: &Path) -> AppResult<Self> {
        match (private_path.exists(), public_path.exists()) {
            (true, true) => Self::load(private_path, public_path),
            (false, false) => {
                let keys = Self::generate();
                keys.persist(private_path, public_path)?;
                info!(
                    private = %private_path.display(),
                    public = %public_path.display(),
                    "generated new token keypair"
                );
                Ok(keys)
            }
            (true, false) => Err(AppError::KeyMaterial(format!(
                "public key {} is missing",
                public_path.display()
            ))),
            (false, true) => Err(AppError::KeyMaterial(format!(
                "private key {} is missing",
                private_path.display()
            ))),
        }
    }

    fn load(private_path: &Path, public_path: &Path) -> AppResult<Self> {
        let secret = decode_key_file(private_path)?;
        let public = decode_key_file(public_path)?;

        let signing = SigningKey::from_bytes(&secret);
        if signing.verifying_key().as_bytes() != &public {
            return Err(AppError::KeyMaterial(format!(
                "public key {} does not match private key {}",
                public_path.display(),
                private_path.display()
            )));
        }
        Ok(Self { signing })
    }

    fn persist(&self, private_path: &Path, public_path: &Path) -> AppResult<()> {
        for path in [private_path, public_path] {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
        }

        let mut private = create_private_file(private_path)?;
        private.write_all(BASE64.encode(self.signing.to_bytes()).as_bytes())?;
        private.sync_all()?;
        fs::write(public_path, BASE64.encode(self.public().as_bytes()))?;
        Ok(())
    }
}

fn decode_key_file(path: &Path) -> AppResult<[u8; 32]> {
    let raw = fs::read_to_string(path)?;
    let bytes = BASE64
        .decode(raw.trim())
        .map_err(|e| AppError::KeyMaterial(format!("{}: {}", path.display(), e)))?;
    bytes
        .try_into()
        .map_err(|_| AppError::KeyMaterial(format!("{}: expected 32 key bytes", path.display())))
}

/// Open the private key file owner-only before any key byte is written.
#[cfg(unix)]
fn create_private_file(path: &Path) -> AppResult<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies to files this call creates
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> AppResult<fs::File> {
    Ok(fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

// ---------------------------------------------------------------------------
// Cipher boundary
// ---------------------------------------------------------------------------

/// Pluggable protection for token payloads. `open` must reject anything `seal`
/// did not produce.
pub trait TokenCipher: Send + Sync + fmt::Debug {
    fn seal(&self, plaintext: &[u8]) -> AppResult<Vec<u8>>;
    fn open(&self, sealed: &[u8]) -> AppResult<Vec<u8>>;
}

/// `version || nonce || AES-256-GCM(ciphertext) || Ed25519 signature`.
pub struct KeypairCipher {
    aead: Aes256Gcm,
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl fmt::Debug for KeypairCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairCipher").finish_non_exhaustive()
    }
}

impl KeypairCipher {
    pub fn new(keys: &KeyMaterial) -> AppResult<Self> {
        let mut hasher = Sha256::new();
        hasher.update(AES_KEY_CONTEXT);
        hasher.update(keys.signing.to_bytes());
        let aes_key = hasher.finalize();

        let aead = Aes256Gcm::new_from_slice(&aes_key)
            .map_err(|_| AppError::KeyMaterial("cannot derive token key".into()))?;

        Ok(Self {
            aead,
            signing: keys.signing.clone(),
            verifying: keys.public(),
        })
    }
}

impl TokenCipher for KeypairCipher {
    fn seal(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| AppError::KeyMaterial("token encryption failed".into()))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len() + SIGNATURE_LENGTH);
        out.push(TOKEN_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        let signature = self.signing.sign(&out);
        out.extend_from_slice(&signature.to_bytes());
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> AppResult<Vec<u8>> {
        if sealed.len() <= 1 + NONCE_LEN + SIGNATURE_LENGTH || sealed[0] != TOKEN_VERSION {
            return Err(AppError::InvalidToken);
        }

        let (body, sig_bytes) = sealed.split_at(sealed.len() - SIGNATURE_LENGTH);
        let signature = Signature::from_slice(sig_bytes).map_err(|_| AppError::InvalidToken)?;
        self.verifying
            .verify(body, &signature)
            .map_err(|_| AppError::InvalidToken)?;

        let (nonce_bytes, ciphertext) = body[1..].split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AppError::InvalidToken)
    }
}

// ---------------------------------------------------------------------------
// Token service
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TokenService {
    cipher: Box<dyn TokenCipher>,
}

impl TokenService {
    pub fn new(cipher: Box<dyn TokenCipher>) -> Self {
        Self { cipher }
    }

    pub fn from_keys(keys: &KeyMaterial) -> AppResult<Self> {
        Ok(Self::new(Box::new(KeypairCipher::new(keys)?)))
    }

    /// Draw a fresh random identifier, retrying while `taken` reports a
    /// collision with an existing or retired one.
    pub fn generate_identifier<F>(&self, mut taken: F) -> AppResult<GuestId>
    where
        F: FnMut(&GuestId) -> AppResult<bool>,
    {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let candidate = random_identifier();
            if !taken(&candidate)? {
                return Ok(candidate);
            }
            warn!(attempt, "guest identifier collision, drawing again");
        }
        Err(AppError::Validation(
            "could not allocate a unique guest identifier".into(),
        ))
    }

    pub fn issue_token(&self, id: &GuestId) -> AppResult<Token> {
        let sealed = self.cipher.seal(id.as_str().as_bytes())?;
        Ok(Token(URL_SAFE_NO_PAD.encode(sealed)))
    }

    /// Recover the identifier carried by a token. Only checks integrity and
    /// shape; whether the guest exists is the ledger's business.
    pub fn decode_token(&self, token: &str) -> AppResult<GuestId> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| AppError::InvalidToken)?;
        let plain = self.cipher.open(&sealed)?;
        let raw = String::from_utf8(plain).map_err(|_| AppError::InvalidToken)?;
        GuestId::parse(&raw).map_err(|_| AppError::InvalidToken)
    }
}

fn random_identifier() -> GuestId {
    let mut bytes = [0u8; ID_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    GuestId::from_db(URL_SAFE_NO_PAD.encode(bytes))
}
