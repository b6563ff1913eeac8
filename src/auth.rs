use crate::error::ServiceError;
use crate::schemas::MemberId;
use actix_web::{dev::Payload, http::header::HeaderValue, web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::num::ParseIntError;

type HmacSha256 = Hmac<Sha256>;

/// Key the member tokens are signed with. Derived from the configured secret
/// so that secrets of any length produce a full-size key.
#[derive(Clone)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn new(secret: &str) -> Self {
        let mut sha256_hasher = Sha256::new();
        sha256_hasher.update(secret.as_bytes());
        SessionKey(sha256_hasher.finalize().to_vec())
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.0).expect("HMAC can take key of any size")
    }

    /// Issues the `Authorization` header value identifying `member`:
    /// `<member>:<hex hmac>`.
    pub fn sign(&self, member: &str) -> String {
        let mut hmac_hasher = self.mac();
        hmac_hasher.update(member.as_bytes());
        let signature = hmac_hasher
            .finalize()
            .into_bytes()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        format!("{member}:{signature}")
    }

    pub fn verify(&self, token: &str) -> Option<MemberId> {
        let (member, signature) = token.rsplit_once(':')?;
        if member.is_empty() || signature.len() % 2 != 0 {
            return None;
        }
        let signature = signature
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                let pair = std::str::from_utf8(pair).unwrap_or("zz");
                u8::from_str_radix(pair, 16)
            })
            .collect::<Result<Vec<u8>, ParseIntError>>()
            .ok()?;
        let mut hmac_hasher = self.mac();
        hmac_hasher.update(member.as_bytes());
        hmac_hasher.verify_slice(&signature).ok()?;
        Some(member.to_string())
    }
}

/// The member acting on a request. Handlers receive it explicitly instead of
/// reading shared session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub member: MemberId,
}

pub fn check_authorization(request: &HttpRequest) -> Result<RequestContext, ServiceError> {
    let key = request
        .app_data::<web::Data<SessionKey>>()
        .ok_or(ServiceError::Unauthorized)?;
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)
        .and_then(Result::ok)
        .ok_or(ServiceError::Unauthorized)?;
    match key.verify(authorization) {
        Some(member) => Ok(RequestContext { member }),
        None => {
            tracing::warn!(path = request.path(), "rejected request with invalid signature");
            Err(ServiceError::Unauthorized)
        }
    }
}

impl FromRequest for RequestContext {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(request: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(check_authorization(request))
    }
}
