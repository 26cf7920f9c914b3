use crate::error::ShortenerError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use snip_core::UserId;

type HmacSha256 = Hmac<Sha256>;

const USER_ID_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;

/// Signs user ids into opaque tokens and checks them on the way back.
///
/// A token is `hex(be_u64(user) || HMAC-SHA256(secret, be_u64(user)))`,
/// 80 hex characters in total. The id is readable by anyone; the
/// signature only stops callers from claiming someone else's id.
#[derive(Clone)]
pub struct UserTokenSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for UserTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTokenSigner").finish_non_exhaustive()
    }
}

impl UserTokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, ShortenerError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(ShortenerError::InvalidSecret(
                "secret key cannot be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ShortenerError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    pub fn sign(&self, user: UserId) -> String {
        let id = user.to_be_bytes();
        let mut mac = self.mac.clone();
        mac.update(&id);

        let mut token = Vec::with_capacity(USER_ID_LEN + SIGNATURE_LEN);
        token.extend_from_slice(&id);
        token.extend_from_slice(&mac.finalize().into_bytes());
        hex::encode(token)
    }

    /// Returns the user id carried by a token with a valid signature.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        let data = hex::decode(token).ok()?;
        if data.len() != USER_ID_LEN + SIGNATURE_LEN {
            return None;
        }
        let (id, signature) = data.split_at(USER_ID_LEN);

        let mut mac = self.mac.clone();
        mac.update(id);
        mac.verify_slice(signature).ok()?;

        let id: [u8; USER_ID_LEN] = id.try_into().ok()?;
        Some(UserId::from_be_bytes(id))
    }
}
