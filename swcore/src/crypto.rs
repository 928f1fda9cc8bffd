use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::prelude::*;
use log::debug;
use sodiumoxide::crypto::hash::sha256;
use sodiumoxide::crypto::sign;
use thiserror::Error;

pub const SECRET_KEY_FILE: &str = "swpkg.sec";
pub const PUBLIC_KEY_FILE: &str = "swpkg.pub";
pub const CERTIFICATE_FILE: &str = "certificate.der";

/// Output width of every supported signature algorithm.
pub const SIGNATURE_WIDTH: usize = sign::SIGNATUREBYTES;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error("failed to initialise libsodium")]
    Init,
    #[error("invalid {0} key material")]
    Invalid(&'static str),
    #[error("no secret key in key store {0:?}")]
    MissingSecret(PathBuf),
    #[error("no public key in key store {0:?}")]
    MissingPublic(PathBuf),
}

pub fn init() -> Result<(), KeyError> {
    sodiumoxide::init().map_err(|_| KeyError::Init)
}

pub trait Signer {
    fn width(&self) -> usize;
    fn sign(&self, digest: &[u8]) -> Vec<u8>;
}

pub trait Verifier {
    fn verify(&self, signature: &[u8], digest: &[u8]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgorithm {
    None,
    Ed25519,
}

impl FromStr for SignAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SignAlgorithm::None),
            "ed25519" => Ok(SignAlgorithm::Ed25519),
            x => Err(format!("unknown signature algorithm: {}", x)),
        }
    }
}

impl fmt::Display for SignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignAlgorithm::None => write!(f, "none"),
            SignAlgorithm::Ed25519 => write!(f, "ed25519"),
        }
    }
}

// Zero filled signatures that always verify
pub struct NullSigner;

impl Signer for NullSigner {
    fn width(&self) -> usize {
        SIGNATURE_WIDTH
    }

    fn sign(&self, _digest: &[u8]) -> Vec<u8> {
        vec![0; SIGNATURE_WIDTH]
    }
}

impl Verifier for NullSigner {
    fn verify(&self, _signature: &[u8], _digest: &[u8]) -> bool {
        true
    }
}

pub struct Ed25519Signer(sign::SecretKey);

impl Signer for Ed25519Signer {
    fn width(&self) -> usize {
        SIGNATURE_WIDTH
    }

    fn sign(&self, digest: &[u8]) -> Vec<u8> {
        sign::sign_detached(digest, &self.0).to_bytes().to_vec()
    }
}

pub struct Ed25519Verifier(sign::PublicKey);

impl Verifier for Ed25519Verifier {
    fn verify(&self, signature: &[u8], digest: &[u8]) -> bool {
        match sign::Signature::try_from(signature) {
            Ok(signature) => sign::verify_detached(&signature, digest, &self.0),
            Err(_) => false,
        }
    }
}

/// Signing material found in a key store directory.
pub struct KeyStore {
    location: PathBuf,
    secret: Option<sign::SecretKey>,
    public: Option<sign::PublicKey>,
    certificate: Option<Vec<u8>>,
}

impl KeyStore {
    pub fn load(dir: &Path) -> Result<KeyStore, KeyError> {
        let secret = match read_key(&dir.join(SECRET_KEY_FILE))? {
            None => None,
            Some(bytes) => Some(sign::SecretKey::from_slice(&bytes).ok_or(KeyError::Invalid("secret"))?),
        };

        let public = match read_key(&dir.join(PUBLIC_KEY_FILE))? {
            None => None,
            Some(bytes) => Some(sign::PublicKey::from_slice(&bytes).ok_or(KeyError::Invalid("public"))?),
        };

        let cert_path = dir.join(CERTIFICATE_FILE);
        let certificate = if cert_path.exists() {
            Some(fs::read(&cert_path)?)
        } else {
            None
        };

        debug!(
            "key store {}: secret: {}, public: {}, certificate: {:?}",
            dir.display(),
            secret.is_some(),
            public.is_some(),
            certificate.as_ref().map(|c| c.len()),
        );

        Ok(KeyStore {
            location: dir.to_path_buf(),
            secret,
            public,
            certificate,
        })
    }

    pub fn from_keys(
        public: Option<sign::PublicKey>,
        secret: Option<sign::SecretKey>,
        certificate: Option<Vec<u8>>,
    ) -> KeyStore {
        KeyStore {
            location: PathBuf::from("<memory>"),
            secret,
            public,
            certificate,
        }
    }

    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }

    pub fn signer(&self, alg: SignAlgorithm) -> Result<Box<dyn Signer>, KeyError> {
        match alg {
            SignAlgorithm::None => Ok(Box::new(NullSigner)),
            SignAlgorithm::Ed25519 => match &self.secret {
                Some(sk) => Ok(Box::new(Ed25519Signer(sk.clone()))),
                None => Err(KeyError::MissingSecret(self.location.clone())),
            },
        }
    }

    pub fn verifier(&self, alg: SignAlgorithm) -> Result<Box<dyn Verifier>, KeyError> {
        match alg {
            SignAlgorithm::None => Ok(Box::new(NullSigner)),
            SignAlgorithm::Ed25519 => match self.public_key()? {
                Some(pk) => Ok(Box::new(Ed25519Verifier(pk))),
                None => Err(KeyError::MissingPublic(self.location.clone())),
            },
        }
    }

    // An ed25519 secret key is seed || public key
    fn public_key(&self) -> Result<Option<sign::PublicKey>, KeyError> {
        if let Some(pk) = &self.public {
            return Ok(Some(pk.clone()));
        }
        match &self.secret {
            Some(sk) => sign::PublicKey::from_slice(&sk.0[sign::SEEDBYTES..])
                .map(Some)
                .ok_or(KeyError::Invalid("public")),
            None => Ok(None),
        }
    }
}

/// Sign SHA-256(certificate) so the embedded certificate is bound to the signer.
pub fn sign_certificate(signer: &dyn Signer, certificate: &[u8]) -> Vec<u8> {
    signer.sign(&sha256::hash(certificate).0)
}

fn read_key(path: &Path) -> Result<Option<Vec<u8>>, KeyError> {
    if !path.exists() {
        return Ok(None);
    }
    let encoded = fs::read_to_string(path)?;
    Ok(Some(BASE64_STANDARD.decode(encoded.trim())?))
}
