//! Authentication hook for peer-to-peer calls.
//!
//! Outbound calls attach `credential()` in the [`CREDENTIAL_HEADER`]; inbound
//! peer endpoints reject requests whose credential fails `verify()`.
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::auth_error;
use crate::clock::{millis, Clock};
use crate::error::Result;

pub const CREDENTIAL_HEADER: &str = "x-collective-credential";

type HmacSha256 = Hmac<Sha256>;

pub trait Authenticator: Send + Sync {
    /// Credential for the next outbound call, if any
    fn credential(&self) -> Result<Option<String>>;

    fn verify(&self, credential: Option<&str>) -> Result<()>;
}

/// Accepts everything and signs nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn credential(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn verify(&self, _credential: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Time-boxed HMAC-SHA256 credentials from a secret shared by every node.
///
/// A credential is `<expiry millis>.<hex signature of the expiry>`. It is valid
/// until the expiry and never for longer than `validity` from now.
pub struct SharedSecretAuth {
    secret: Vec<u8>,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl SharedSecretAuth {
    pub fn new(secret: impl AsRef<[u8]>, validity: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if secret.as_ref().is_empty() {
            return Err(crate::config_error!("shared secret must not be empty"));
        }
        Ok(Self {
            secret: secret.as_ref().to_vec(),
            validity,
            clock,
        })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| auth_error!("invalid key: {}", e))
    }

    fn sign(&self, expiry: i64) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(expiry.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for SharedSecretAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretAuth")
            .field("validity", &self.validity)
            .finish()
    }
}

impl Authenticator for SharedSecretAuth {
    fn credential(&self) -> Result<Option<String>> {
        let expiry = self.clock.now_millis() + millis(self.validity);
        Ok(Some(format!("{}.{}", expiry, self.sign(expiry)?)))
    }

    fn verify(&self, credential: Option<&str>) -> Result<()> {
        let credential = credential.ok_or_else(|| auth_error!("missing credential"))?;
        let (expiry, signature) = credential
            .split_once('.')
            .ok_or_else(|| auth_error!("malformed credential"))?;
        let expiry: i64 = expiry
            .parse()
            .map_err(|_| auth_error!("malformed credential expiry"))?;

        let now = self.clock.now_millis();
        if expiry <= now {
            return Err(auth_error!("credential expired"));
        }
        if expiry > now + millis(self.validity) {
            return Err(auth_error!("credential validity exceeds the allowed window"));
        }

        let signature = hex::decode(signature).map_err(|_| auth_error!("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(expiry.to_string().as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| auth_error!("signature mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn auth(secret: &str, clock: Arc<ManualClock>) -> SharedSecretAuth {
        SharedSecretAuth::new(secret, Duration::from_secs(30), clock).unwrap()
    }

    #[test]
    fn test_round_trip_and_expiry() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let auth = auth("s3cret", clock.clone());

        let credential = auth.credential().unwrap().unwrap();
        assert!(auth.verify(Some(&credential)).is_ok());

        clock.advance(Duration::from_secs(31));
        assert!(auth.verify(Some(&credential)).is_err());
    }

    #[test]
    fn test_rejects_foreign_secret_and_missing_credential() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ours = auth("s3cret", clock.clone());
        let theirs = auth("other", clock);

        let credential = theirs.credential().unwrap().unwrap();
        assert!(ours.verify(Some(&credential)).is_err());
        assert!(ours.verify(None).is_err());
        assert!(ours.verify(Some("garbage")).is_err());
    }

    #[test]
    fn test_rejects_overlong_validity() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let issuer = SharedSecretAuth::new("s3cret", Duration::from_secs(3600), clock.clone()).unwrap();
        let verifier = auth("s3cret", clock);
        let credential = issuer.credential().unwrap().unwrap();
        assert!(verifier.verify(Some(&credential)).is_err());
    }

    #[test]
    fn test_empty_secret_is_config_error() {
        let clock = Arc::new(ManualClock::new(0));
        assert!(SharedSecretAuth::new("", Duration::from_secs(1), clock).is_err());
    }

    #[test]
    fn test_no_auth() {
        assert!(NoAuth.credential().unwrap().is_none());
        assert!(NoAuth.verify(None).is_ok());
    }
}
