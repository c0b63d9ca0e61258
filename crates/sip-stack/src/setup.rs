// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stack configuration.
//!
//! Every field has a default, so a JSON file only lists what it changes:
//!
//! ```
//! use sip_stack::StackSetup;
//!
//! let setup = StackSetup::from_json_str(r#"{ "udp_port": 5070, "t1_ms": 250 }"#).unwrap();
//! assert_eq!(setup.udp_port, Some(5070));
//! assert_eq!(setup.timer_defaults().t1.as_millis(), 250);
//! assert_eq!(setup.tcp_port, None);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use serde::{Deserialize, Deserializer};
use sip_core::{TransportKind, DEFAULT_MAX_MESSAGE_SIZE};
use sip_observe::log::DEFAULT_LOG_FILE_SIZE;
use sip_observe::LogLevel;
use sip_transaction::TimerDefaults;
use sip_transport::{load_rustls_client_config, load_rustls_server_config, TransportSetup};

use crate::error::StackError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StackSetup {
    /// Address every listener binds to.
    pub local_ip: IpAddr,
    /// Host written into generated Via headers. Defaults to `local_ip`.
    pub advertised_host: Option<String>,
    /// `None` disables the transport. Port 0 binds an ephemeral port.
    pub udp_port: Option<u16>,
    pub tcp_port: Option<u16>,
    pub tls_port: Option<u16>,
    /// Used when neither the Request-URI nor a Route selects a transport.
    #[serde(deserialize_with = "transport_from_str")]
    pub default_transport: TransportKind,

    pub udp_threads: usize,
    pub max_stream_threads: usize,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_message_size: usize,
    /// Stream connections unused this long are closed by the idle sweep.
    pub idle_timeout_secs: u64,

    /// When false no timer thread runs and only explicit `execute` calls
    /// drive transaction timers.
    pub drive_timers: bool,
    pub tick_interval_ms: u64,
    /// The idle sweep runs once every this many ticks.
    pub idle_sweep_ticks: u32,

    /// Capacity of each transaction list.
    pub max_transactions: usize,
    pub t1_ms: u64,
    pub t2_ms: u64,
    pub t4_ms: u64,
    pub timer_c_ms: u64,
    pub timer_d_ms: u64,

    pub user_agent: Option<String>,

    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    /// CA bundle for outbound TLS, used unless `tls_client_config` is set.
    pub tls_ca_path: Option<PathBuf>,
    #[serde(skip)]
    pub tls_client_config: Option<Arc<ClientConfig>>,

    /// Directory for the rotating log files; `None` disables the file sink.
    pub log_dir: Option<PathBuf>,
    /// [`LogLevel`] bits.
    pub log_level: u32,
    pub log_max_size: u64,
}

impl Default for StackSetup {
    fn default() -> Self {
        let timers = TimerDefaults::default();
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertised_host: None,
            udp_port: Some(5060),
            tcp_port: None,
            tls_port: None,
            default_transport: TransportKind::Udp,
            udp_threads: 2,
            max_stream_threads: sip_transport::DEFAULT_MAX_STREAM_THREADS,
            poll_interval_ms: sip_transport::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            connect_timeout_ms: sip_transport::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout_secs: 300,
            drive_timers: true,
            tick_interval_ms: 20,
            idle_sweep_ticks: 500,
            max_transactions: 10_000,
            t1_ms: timers.t1.as_millis() as u64,
            t2_ms: timers.t2.as_millis() as u64,
            t4_ms: timers.t4.as_millis() as u64,
            timer_c_ms: timers.timer_c.as_millis() as u64,
            timer_d_ms: timers.timer_d.as_millis() as u64,
            user_agent: Some(format!("siphon-rs/{}", env!("CARGO_PKG_VERSION"))),
            tls_cert_path: None,
            tls_key_path: None,
            tls_ca_path: None,
            tls_client_config: None,
            log_dir: None,
            log_level: (LogLevel::ERROR | LogLevel::INFO | LogLevel::SYSTEM).bits(),
            log_max_size: DEFAULT_LOG_FILE_SIZE,
        }
    }
}

fn transport_from_str<'de, D>(deserializer: D) -> Result<TransportKind, D::Error>
where
    D: Deserializer<'de>,
{
    let token = String::deserialize(deserializer)?;
    TransportKind::parse(&token)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown transport {:?}", token)))
}

impl StackSetup {
    pub fn from_json_str(json: &str) -> Result<Self, StackError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StackError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| StackError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Rejects settings the stack cannot run with.
    pub fn validate(&self) -> Result<(), StackError> {
        let invalid = |msg: &str| Err(StackError::Config(msg.to_string()));
        if self.udp_port.is_none() && self.tcp_port.is_none() && self.tls_port.is_none() {
            return invalid("no transport enabled");
        }
        if self.udp_port.is_some() && self.udp_threads == 0 {
            return invalid("udp_threads must be at least 1");
        }
        if (self.tcp_port.is_some() || self.tls_port.is_some()) && self.max_stream_threads == 0 {
            return invalid("max_stream_threads must be at least 1");
        }
        if self.tls_port.is_some() && (self.tls_cert_path.is_none() || self.tls_key_path.is_none()) {
            return invalid("tls_port requires tls_cert_path and tls_key_path");
        }
        if self.t1_ms == 0 {
            return invalid("t1_ms must be positive");
        }
        if self.t1_ms > self.t2_ms {
            return invalid("t1_ms must not exceed t2_ms");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive");
        }
        if self.drive_timers && self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be positive");
        }
        if self.idle_sweep_ticks == 0 {
            return invalid("idle_sweep_ticks must be at least 1");
        }
        if self.max_transactions == 0 {
            return invalid("max_transactions must be at least 1");
        }
        if self.max_message_size < 512 {
            return invalid("max_message_size is too small for a SIP message");
        }
        Ok(())
    }

    pub fn timer_defaults(&self) -> TimerDefaults {
        TimerDefaults {
            t1: Duration::from_millis(self.t1_ms),
            t2: Duration::from_millis(self.t2_ms),
            t4: Duration::from_millis(self.t4_ms),
            timer_c: Duration::from_millis(self.timer_c_ms),
            timer_d: Duration::from_millis(self.timer_d_ms),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_bits(self.log_level)
    }

    /// Host for generated Via headers.
    pub fn via_host(&self) -> String {
        match &self.advertised_host {
            Some(host) => host.clone(),
            None => self.local_ip.to_string(),
        }
    }

    /// Listener layout for the transport layer, loading TLS material from
    /// disk.
    pub fn transport_setup(&self) -> Result<TransportSetup, StackError> {
        let bind = |port: Option<u16>| port.map(|port| SocketAddr::new(self.local_ip, port));
        let tls_server_config = match (&self.tls_port, &self.tls_cert_path, &self.tls_key_path) {
            (Some(_), Some(cert), Some(key)) => {
                Some(load_rustls_server_config(cert, key).map_err(StackError::from)?)
            }
            _ => None,
        };
        let tls_client_config = match (&self.tls_client_config, &self.tls_ca_path) {
            (Some(config), _) => Some(config.clone()),
            (None, Some(ca)) => Some(load_rustls_client_config(ca).map_err(StackError::from)?),
            (None, None) => None,
        };
        Ok(TransportSetup {
            udp_bind: bind(self.udp_port),
            tcp_bind: bind(self.tcp_port),
            tls_bind: bind(self.tls_port),
            tls_server_config,
            tls_client_config,
            udp_threads: self.udp_threads,
            max_stream_threads: self.max_stream_threads,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_message_size: self.max_message_size,
        })
    }
}
