// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! rustls configuration loading and blocking session setup.

use std::fs::File;
use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection, StreamOwned};

use crate::connection::{Connection, StreamReader};

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("invalid certificate in {}: {e}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates found in {}", path.display()));
    }
    Ok(certs)
}

/// Loads a rustls server config from PEM certificate chain and key files.
pub fn load_rustls_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<ServerConfig>> {
    let certs = read_certs(cert_path.as_ref())?;
    let key_path = key_path.as_ref();
    let mut key_reader = BufReader::new(
        File::open(key_path).with_context(|| format!("cannot open {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| anyhow!("invalid private key in {}: {e}", key_path.display()))?
        .ok_or_else(|| anyhow!("no private keys found in {}", key_path.display()))?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context("unsupported TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build tls config")?;
    Ok(Arc::new(config))
}

/// Builds a client config trusting the CA certificates in `ca_path`.
pub fn load_rustls_client_config(ca_path: impl AsRef<Path>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(ca_path.as_ref())? {
        roots.add(cert).context("rejected CA certificate")?;
    }
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context("unsupported TLS protocol versions")?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Server side of an accepted TLS connection. The handshake completes on
/// the first read.
pub(crate) fn accept_session(
    stream: TcpStream,
    peer: SocketAddr,
    config: &Arc<ServerConfig>,
    poll: Duration,
) -> Result<(Arc<Connection>, StreamReader)> {
    let session = ServerConnection::new(config.clone()).context("tls session setup")?;
    let socket = stream.try_clone()?;
    let owned = StreamOwned::new(session, stream);
    Ok(Connection::tls(socket, Box::new(owned), peer, poll)?)
}

/// Client side of an outbound TLS connection, verified against the peer IP.
///
/// The handshake runs to completion here, bounded by `handshake_timeout`,
/// before the short poll timeout is applied to the socket.
pub(crate) fn connect_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: &Arc<ClientConfig>,
    poll: Duration,
    handshake_timeout: Duration,
) -> Result<(Arc<Connection>, StreamReader)> {
    let name = ServerName::from(peer.ip());
    let mut session = ClientConnection::new(config.clone(), name).context("tls session setup")?;

    stream.set_read_timeout(Some(handshake_timeout))?;
    stream.set_write_timeout(Some(handshake_timeout))?;
    let deadline = Instant::now() + handshake_timeout;
    while session.is_handshaking() {
        if Instant::now() >= deadline {
            bail!("TLS handshake with {} timed out", peer);
        }
        session
            .complete_io(&mut stream)
            .with_context(|| format!("TLS handshake with {} failed", peer))?;
    }
    stream.set_write_timeout(None)?;

    let socket = stream.try_clone()?;
    let owned = StreamOwned::new(session, stream);
    Ok(Connection::tls(socket, Box::new(owned), peer, poll)?)
}
