//! Control-stream authentication
//!
//! A client proves knowledge of its secret by presenting a token derived
//! from the TLS session it is authenticating, so a token captured from one
//! connection is useless on any other. The token is 32 bytes of exported
//! keying material with the client UUID as label and the secret as context.

use std::time::Duration;

use constant_time_eq::constant_time_eq_32;
use juicity_proto::{Authenticate, CommandHead, CommandType, VERSION_0};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::credentials::CredentialStore;
use crate::error::AuthError;

/// Authentication must finish within this window, measured from the start
/// of the authentication task.
pub const AUTHENTICATE_TIMEOUT: Duration = Duration::from_secs(10);

pub type Token = [u8; 32];

/// Source of TLS exporter output for one live session.
pub trait KeyingMaterialExporter {
    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: &[u8],
    ) -> Result<(), AuthError>;
}

impl KeyingMaterialExporter for quinn::Connection {
    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: &[u8],
    ) -> Result<(), AuthError> {
        quinn::Connection::export_keying_material(self, output, label, context)
            .map_err(|_| AuthError::KeyingMaterial)
    }
}

/// Derive the token a client with `id` and `secret` must present on `session`.
pub fn derive_token<S>(session: &S, id: &Uuid, secret: &str) -> Result<Token, AuthError>
where
    S: KeyingMaterialExporter + ?Sized,
{
    let mut token = [0u8; 32];
    session.export_keying_material(&mut token, id.as_bytes(), secret.as_bytes())?;
    Ok(token)
}

/// True iff `presented` was derived from exactly this session, id and secret.
pub fn verify_token<S>(
    session: &S,
    id: &Uuid,
    secret: &str,
    presented: &Token,
) -> Result<bool, AuthError>
where
    S: KeyingMaterialExporter + ?Sized,
{
    let expected = derive_token(session, id, secret)?;
    Ok(constant_time_eq_32(&expected, presented))
}

/// Read the authenticate command from a control stream.
pub async fn read_authenticate<R>(r: &mut R) -> Result<Authenticate, AuthError>
where
    R: AsyncRead + Unpin,
{
    let version = r.read_u8().await.map_err(juicity_proto::ProtoError::from)?;
    if version != VERSION_0 {
        return Err(AuthError::UnexpectedVersion(version));
    }
    let head = CommandHead::read_after_version(version, r).await?;
    if head.kind != CommandType::Authenticate {
        return Err(AuthError::UnexpectedCmdType(head.kind));
    }
    Ok(Authenticate::read_body(r).await?)
}

/// Run the authentication protocol over an accepted control stream and
/// return the authenticated client identity.
///
/// An unknown identifier and a wrong token fail the same way so that the
/// client cannot tell which one it got wrong.
pub async fn authenticate<R, S>(
    r: &mut R,
    session: &S,
    credentials: &CredentialStore,
) -> Result<Uuid, AuthError>
where
    R: AsyncRead + Unpin,
    S: KeyingMaterialExporter + ?Sized,
{
    let auth = read_authenticate(r).await?;
    let Some(secret) = credentials.secret(&auth.uuid) else {
        return Err(AuthError::AuthenticationFailed(auth.uuid));
    };
    if verify_token(session, &auth.uuid, secret, &auth.token)? {
        Ok(auth.uuid)
    } else {
        Err(AuthError::AuthenticationFailed(auth.uuid))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use sha2::{Digest, Sha256};

    /// Stand-in for a TLS session: the exporter output is a hash over the
    /// session secret, label and context.
    pub(crate) struct FakeSession(pub [u8; 32]);

    impl KeyingMaterialExporter for FakeSession {
        fn export_keying_material(
            &self,
            output: &mut [u8],
            label: &[u8],
            context: &[u8],
        ) -> Result<(), AuthError> {
            let mut hasher = Sha256::new();
            hasher.update(self.0);
            hasher.update((label.len() as u32).to_be_bytes());
            hasher.update(label);
            hasher.update(context);
            output.copy_from_slice(&hasher.finalize()[..output.len()]);
            Ok(())
        }
    }

    fn store(id: Uuid, secret: &str) -> CredentialStore {
        [(id, secret.to_string())].into_iter().collect()
    }

    #[tokio::test]
    async fn test_accepts_correct_token() {
        let session = FakeSession([1; 32]);
        let id = Uuid::from_u128(1);
        let token = derive_token(&session, &id, "S1").unwrap();
        let wire = Authenticate { uuid: id, token }.encode();

        let got = authenticate(&mut wire.as_slice(), &session, &store(id, "S1"))
            .await
            .unwrap();
        assert_eq!(got, id);
    }

    #[tokio::test]
    async fn test_rejects_wrong_secret() {
        let session = FakeSession([1; 32]);
        let id = Uuid::from_u128(1);
        let token = derive_token(&session, &id, "wrong").unwrap();
        let wire = Authenticate { uuid: id, token }.encode();

        let err = authenticate(&mut wire.as_slice(), &session, &store(id, "S1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed(u) if u == id));
    }

    #[tokio::test]
    async fn test_rejects_unknown_user() {
        let session = FakeSession([1; 32]);
        let id = Uuid::from_u128(2);
        let token = derive_token(&session, &id, "S1").unwrap();
        let wire = Authenticate { uuid: id, token }.encode();

        let err = authenticate(&mut wire.as_slice(), &session, &store(Uuid::from_u128(1), "S1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("authentication failed: {}", id));
    }

    #[tokio::test]
    async fn test_token_bound_to_session() {
        let id = Uuid::from_u128(1);
        let token = derive_token(&FakeSession([1; 32]), &id, "S1").unwrap();
        let wire = Authenticate { uuid: id, token }.encode();

        let err = authenticate(&mut wire.as_slice(), &FakeSession([2; 32]), &store(id, "S1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_unexpected_version() {
        let mut wire = Authenticate { uuid: Uuid::nil(), token: [0; 32] }.encode();
        wire[0] = 0x05;
        let err = authenticate(&mut wire.as_slice(), &FakeSession([0; 32]), &CredentialStore::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnexpectedVersion(0x05)));
    }

    #[tokio::test]
    async fn test_unexpected_cmd_type() {
        let wire = [VERSION_0, 0x04];
        let err = authenticate(&mut &wire[..], &FakeSession([0; 32]), &CredentialStore::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnexpectedCmdType(CommandType::Heartbeat)));
    }

    #[tokio::test]
    async fn test_truncated_command() {
        let wire = Authenticate { uuid: Uuid::nil(), token: [0; 32] }.encode();
        let err = authenticate(&mut &wire[..20], &FakeSession([0; 32]), &CredentialStore::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Protocol(ref e) if e.is_eof()));
    }

    /// Property: the token is a pure function of (session, id, secret), and
    /// verification succeeds only for the exact triple it was derived from.
    #[test]
    fn prop_token_verification() {
        proptest!(|(
            session_a in any::<[u8; 32]>(),
            session_b in any::<[u8; 32]>(),
            id_a in any::<u128>(),
            id_b in any::<u128>(),
            secret_a in "[ -~]{0,32}",
            secret_b in "[ -~]{0,32}",
        )| {
            let (sa, sb) = (FakeSession(session_a), FakeSession(session_b));
            let (ia, ib) = (Uuid::from_u128(id_a), Uuid::from_u128(id_b));

            let token = derive_token(&sa, &ia, &secret_a).unwrap();
            prop_assert_eq!(token, derive_token(&sa, &ia, &secret_a).unwrap());
            prop_assert!(verify_token(&sa, &ia, &secret_a, &token).unwrap());

            prop_assert_eq!(
                verify_token(&sb, &ia, &secret_a, &token).unwrap(),
                session_a == session_b
            );
            prop_assert_eq!(verify_token(&sa, &ib, &secret_a, &token).unwrap(), id_a == id_b);
            prop_assert_eq!(
                verify_token(&sa, &ia, &secret_b, &token).unwrap(),
                secret_a == secret_b
            );
        });
    }
}
