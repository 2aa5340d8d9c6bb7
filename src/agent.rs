//! Agent: the end of the tunnel inside the restricted network
//!
//! Dials out to the relay, then serves SOCKS5 on every stream the relay
//! opens. When the session ends the agent reconnects according to a
//! [`RetryPolicy`].

use crate::{
    retry::RetryPolicy,
    session::Session,
    socks5::{Authenticator, Socks5Config, Socks5Server, StaticCredentials},
    transport::TlsDialer,
};
use anyhow::{Context, Result, bail};
use std::{fmt, net::SocketAddr};
use tracing::{debug, error, info, warn};

/// AgentConfig holds the relay address and optional SOCKS5 credentials
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub relay_addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AgentConfig {
    pub fn new(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// socks5_config requires username/password only when both are set
    /// and non-empty
    pub fn socks5_config(&self) -> Socks5Config {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Socks5Config {
                auth_methods: vec![Authenticator::user_pass(StaticCredentials::single(u, p))],
            },
            _ => Socks5Config::default(),
        }
    }
}

/// Agent connects to a relay and serves SOCKS5 over the tunnel
pub struct Agent {
    relay_addr: String,
    dialer: TlsDialer,
    socks: Socks5Server,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let socks5 = config.socks5_config();
        if !socks5.auth_methods.is_empty() {
            info!("SOCKS5 authentication enabled");
        }
        let socks = Socks5Server::new(socks5);

        Ok(Self {
            relay_addr: config.relay_addr,
            dialer: TlsDialer::new()?,
            socks,
        })
    }

    /// connect dials the relay and starts the session in the initiating role
    pub async fn connect(&self) -> Result<Session> {
        let (tls, remote_addr) = self.dialer.dial(&self.relay_addr).await?;
        info!(remote_addr = %remote_addr, "connected to relay");
        Ok(Session::client(tls, remote_addr))
    }

    /// serve hands every stream the relay opens to the SOCKS5 engine.
    /// Only returns once the session fails.
    pub async fn serve(&self, session: &Session) -> Result<()> {
        loop {
            let stream = session
                .accept_stream()
                .await
                .context("failed to accept stream")?;

            let socks = self.socks.clone();
            tokio::spawn(async move {
                // Health-check probes end here too, right after the greeting
                if let Err(e) = socks.serve_connection(stream).await {
                    debug!("SOCKS5 stream ended: {e:#}");
                }
            });
        }
    }

    /// run_once performs one dial and serves the session until it fails.
    /// Once the relay has accepted the session, the error carries a
    /// [`SessionEnded`] context.
    pub async fn run_once(&self) -> Result<()> {
        let session = self.connect().await?;
        self.serve(&session)
            .await
            .context(SessionEnded(session.remote_addr()))
    }

    /// run keeps the agent connected, waiting between attempts as the
    /// policy says. Errors only when the policy gives up.
    pub async fn run<P: RetryPolicy>(&self, mut policy: P) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            match self.run_once().await {
                Err(e) if e.downcast_ref::<SessionEnded>().is_some() => {
                    attempt = 0;
                    warn!("{e:#}");
                }
                Err(e) => error!("{e:#}"),
                Ok(()) => attempt = 0,
            }

            attempt = attempt.saturating_add(1);
            let Some(delay) = policy.next_delay(attempt) else {
                bail!("giving up on relay {} after {attempt} attempt(s)", self.relay_addr);
            };

            info!("reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}

/// SessionEnded marks a failure after the relay accepted the session
#[derive(Debug)]
pub struct SessionEnded(pub SocketAddr);

impl fmt::Display for SessionEnded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session with relay {} ended", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedDelay;
    use crate::socks5::protocol::AuthMethod;
    use crate::transport::RelayTls;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn credentials_need_both_parts() {
        let none = AgentConfig::new("relay:1");
        assert!(none.socks5_config().auth_methods.is_empty());

        let empty_password = AgentConfig::new("relay:1").with_credentials("alice", "");
        assert!(empty_password.socks5_config().auth_methods.is_empty());

        let both = AgentConfig::new("relay:1").with_credentials("alice", "s3cret");
        let methods = both.socks5_config().auth_methods;
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].method(), AuthMethod::UserPass);
    }

    #[tokio::test]
    async fn run_gives_up_when_policy_says_so() {
        // Nothing listens here once the listener is dropped
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let agent = Agent::new(AgentConfig::new(addr.to_string())).unwrap();
        let policy = FixedDelay::new(Duration::from_millis(1)).with_max_attempts(3);

        let err = tokio::time::timeout(Duration::from_secs(5), agent.run(policy))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("3 attempt"));
    }

    #[tokio::test]
    async fn run_once_fails_on_unreachable_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let agent = Agent::new(AgentConfig::new(addr.to_string())).unwrap();
        let err = agent.run_once().await.unwrap_err();
        assert!(err.downcast_ref::<SessionEnded>().is_none());
    }

    #[tokio::test]
    async fn run_once_reports_end_of_established_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tls = RelayTls::load(None, None).unwrap();

        // Relay side: accept one agent, then close its session
        tokio::spawn(async move {
            let (tcp, remote) = listener.accept().await.unwrap();
            let stream = tls.accept(tcp).await.unwrap();
            let session = Session::server(stream, remote);
            session.close();
            session.closed().await;
        });

        let agent = Agent::new(AgentConfig::new(addr.to_string())).unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), agent.run_once())
            .await
            .unwrap()
            .unwrap_err();
        let ended = err.downcast_ref::<SessionEnded>().unwrap();
        assert_eq!(ended.0, addr);
    }
}
