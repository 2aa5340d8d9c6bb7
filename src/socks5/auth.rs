use crate::socks5::protocol::{AuthMethod, AuthStatus, USERPASS_VERSION, Version};
use anyhow::{Result, bail};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// CredentialStore validates a username/password pair
pub trait CredentialStore: Send + Sync {
    fn valid(&self, username: &str, password: &str) -> bool;
}

/// StaticCredentials is a fixed username -> password map
#[derive(Clone, Default)]
pub struct StaticCredentials(HashMap<String, String>);

impl StaticCredentials {
    /// single builds a store holding exactly one user
    pub fn single(username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut creds = HashMap::new();
        creds.insert(username.into(), password.into());
        Self(creds)
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, username: &str, password: &str) -> bool {
        self.0.get(username).is_some_and(|p| p == password)
    }
}

/// Authenticator is one authentication method the server is willing
/// to negotiate
#[derive(Clone)]
pub enum Authenticator {
    NoAuth,
    UserPass(Arc<dyn CredentialStore>),
}

impl Authenticator {
    /// user_pass builds a username/password authenticator over a store
    pub fn user_pass(store: impl CredentialStore + 'static) -> Self {
        Authenticator::UserPass(Arc::new(store))
    }

    /// method returns the wire code for this authenticator
    pub fn method(&self) -> AuthMethod {
        match self {
            Authenticator::NoAuth => AuthMethod::NoAuth,
            Authenticator::UserPass(_) => AuthMethod::UserPass,
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credentials are never printed
        match self {
            Authenticator::NoAuth => f.write_str("NoAuth"),
            Authenticator::UserPass(_) => f.write_str("UserPass"),
        }
    }
}

/// negotiate_auth handles authentication negotiation between the SOCKS server and client
pub async fn negotiate_auth<S>(stream: &mut S, authenticators: &[Authenticator]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    // Instantiate handshake buffer & read
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    // Parse version and client methods from handshake
    let version = buf[0];
    let n_methods = buf[1];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        bail!("[ERR] not SOCKS5");
    }

    let mut methods = vec![0u8; n_methods as usize];
    stream.read_exact(&mut methods).await?;

    // Retrieve desired authenticator
    let selected = select_authenticator(&methods, authenticators);
    let method = selected
        .as_ref()
        .map_or(AuthMethod::NoAcceptable, Authenticator::method);

    // Write response to client with selected method
    stream.write_all(&[Version::SOCKS5 as u8, method as u8]).await?;
    stream.flush().await?;

    // Route to appropriate auth handler
    match selected {
        Some(Authenticator::UserPass(store)) => authenticate_userpass(stream, store.as_ref()).await,
        Some(Authenticator::NoAuth) => Ok(()),
        None => bail!("[ERR] no acceptable authentication method offered"),
    }
}

/// authenticate_userpass handles username/password authentication according to the RFC1929
async fn authenticate_userpass<S>(stream: &mut S, store: &dyn CredentialStore) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+

    // Get subnegotiation version -> 0x01 expected
    let ver = stream.read_u8().await?;
    if ver != USERPASS_VERSION {
        bail!("[ERR] invalid username/password subnegotiation version");
    }

    let username_len = stream.read_u8().await?;
    let mut username = vec![0u8; username_len as usize];
    stream.read_exact(&mut username).await?;

    let password_len = stream.read_u8().await?;
    let mut password = vec![0u8; password_len as usize];
    stream.read_exact(&mut password).await?;

    // Non-UTF-8 credentials can never match a configured String
    let status = match (std::str::from_utf8(&username), std::str::from_utf8(&password)) {
        (Ok(u), Ok(p)) if store.valid(u, p) => AuthStatus::Success,
        _ => AuthStatus::Failure,
    };

    // Username/Password Server response
    // +----+--------+
    // |VER | STATUS |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    stream.write_all(&[USERPASS_VERSION, status as u8]).await?;
    stream.flush().await?;

    match status {
        AuthStatus::Success => Ok(()),
        AuthStatus::Failure => bail!("[ERR] authentication failed"),
    }
}

/// select_authenticator picks the first configured authenticator the
/// client offered. An empty configuration means no authentication.
fn select_authenticator(
    client_methods: &[u8],
    authenticators: &[Authenticator],
) -> Option<Authenticator> {
    if authenticators.is_empty() {
        return client_methods
            .contains(&(AuthMethod::NoAuth as u8))
            .then_some(Authenticator::NoAuth);
    }

    authenticators
        .iter()
        .find(|a| client_methods.contains(&(a.method() as u8)))
        .cloned()
}
