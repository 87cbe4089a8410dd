//! IMAP implementation of [`MailboxSession`]
//!
//! Wraps an `async-imap` session over TLS and drives each command to
//! completion on the calling thread. Mailboxes are opened with `EXAMINE`, so
//! ingestion never changes flags on the server.

use anyhow::{Context, Result};
use async_imap::types::{Fetch, Name};
use async_native_tls::TlsConnector;
use futures_util::TryStreamExt;
use log::{debug, info, warn};
use std::fmt;

use super::protocol::{FetchedHeaders, MailboxInfo, MailboxSession};
use crate::error::ConfigError;

type TcpStream = async_io::Async<std::net::TcpStream>;

/// TLS stream under the IMAP session
pub type TlsStream = async_native_tls::TlsStream<TcpStream>;

/// Logged-in IMAP connection
pub type ImapConnection = async_imap::Session<TlsStream>;

/// Credentials for logging in; acquiring them is the caller's job
#[derive(Clone)]
pub enum ImapCredentials {
    /// `LOGIN` with an account or app password
    Password { user: String, password: String },
    /// `AUTHENTICATE XOAUTH2` with a pre-issued access token
    OAuth2 { user: String, access_token: String },
}

impl ImapCredentials {
    pub fn user(&self) -> &str {
        match self {
            ImapCredentials::Password { user, .. } | ImapCredentials::OAuth2 { user, .. } => user,
        }
    }
}

impl fmt::Debug for ImapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ImapCredentials::Password { .. } => "Password",
            ImapCredentials::OAuth2 { .. } => "OAuth2",
        };
        f.debug_struct(kind)
            .field("user", &self.user())
            .finish_non_exhaustive()
    }
}

/// SASL XOAUTH2 initial response; the client library base64-encodes it
struct XOAuth2 {
    response: String,
}

impl XOAuth2 {
    fn new(user: &str, access_token: &str) -> Self {
        Self {
            response: format!("user={}\x01auth=Bearer {}\x01\x01", user, access_token),
        }
    }
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

/// Mailbox session backed by a live IMAP connection
pub struct ImapSession {
    session: ImapConnection,
}

impl ImapSession {
    /// Wrap a connection that is already logged in
    pub fn new(session: ImapConnection) -> Self {
        Self { session }
    }

    /// Connect over TLS to `host:port` and log in
    ///
    /// A rejected login is a [`ConfigError::Credentials`].
    pub fn connect(host: &str, port: u16, credentials: &ImapCredentials) -> Result<Self> {
        async_io::block_on(open(host, port, credentials)).map(Self::new)
    }
}

async fn open(host: &str, port: u16, credentials: &ImapCredentials) -> Result<ImapConnection> {
    let addr = format!("{}:{}", host, port);
    info!("Connecting to IMAP server at {}", addr);

    let stream = std::net::TcpStream::connect(&addr)
        .with_context(|| format!("Failed to connect to {}", addr))?;
    let stream = async_io::Async::new(stream).context("Failed to register socket")?;
    let tls = TlsConnector::new()
        .connect(host, stream)
        .await
        .with_context(|| format!("TLS handshake with {} failed", host))?;

    let client = async_imap::Client::new(tls);
    let session = match credentials {
        ImapCredentials::Password { user, password } => client.login(user, password).await,
        ImapCredentials::OAuth2 { user, access_token } => {
            client
                .authenticate("XOAUTH2", XOAuth2::new(user, access_token))
                .await
        }
    };

    let session = session.map_err(|(e, _)| {
        ConfigError::Credentials(format!("IMAP login for {} rejected: {}", credentials.user(), e))
    })?;
    info!("Logged in as {}", credentials.user());
    Ok(session)
}

async fn list_names(session: &mut ImapConnection) -> Result<Vec<String>> {
    let names: Vec<Name> = session.list(Some(""), Some("*")).await?.try_collect().await?;
    Ok(names.iter().map(|name| name.name().to_string()).collect())
}

async fn examine(session: &mut ImapConnection, mailbox: &str) -> Result<MailboxInfo> {
    let state = session.examine(mailbox).await?;
    let uid_validity = state
        .uid_validity
        .context("Server did not report UIDVALIDITY")?;
    Ok(MailboxInfo {
        exists: state.exists,
        uid_validity,
    })
}

async fn search(session: &mut ImapConnection, criteria: &str) -> Result<Vec<u32>> {
    let uids = session.uid_search(criteria).await?;
    Ok(uids.into_iter().collect())
}

async fn fetch_headers(
    session: &mut ImapConnection,
    uid_set: &str,
    items: &str,
) -> Result<Vec<FetchedHeaders>> {
    let query = format!("(UID {})", items);
    let fetches: Vec<Fetch> = session.uid_fetch(uid_set, &query).await?.try_collect().await?;

    let mut headers = Vec::with_capacity(fetches.len());
    for fetch in &fetches {
        // HEADER.FIELDS sections arrive as the header part
        match (fetch.uid, fetch.header().or_else(|| fetch.body())) {
            (Some(uid), Some(header)) => headers.push(FetchedHeaders {
                uid,
                header: header.to_vec(),
            }),
            _ => warn!("Fetch response #{} carried no UID or header", fetch.message),
        }
    }
    Ok(headers)
}

impl MailboxSession for ImapSession {
    fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        async_io::block_on(list_names(&mut self.session)).context("LIST failed")
    }

    fn select(&mut self, mailbox: &str) -> Result<MailboxInfo> {
        async_io::block_on(examine(&mut self.session, mailbox))
            .with_context(|| format!("EXAMINE {} failed", mailbox))
    }

    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        async_io::block_on(search(&mut self.session, criteria))
            .with_context(|| format!("UID SEARCH {} failed", criteria))
    }

    fn uid_fetch(&mut self, uid_set: &str, items: &str) -> Result<Vec<FetchedHeaders>> {
        debug!("UID FETCH {}", uid_set);
        async_io::block_on(fetch_headers(&mut self.session, uid_set, items))
            .with_context(|| format!("UID FETCH {} failed", uid_set))
    }

    fn logout(&mut self) -> Result<()> {
        async_io::block_on(self.session.logout()).context("LOGOUT failed")
    }
}
