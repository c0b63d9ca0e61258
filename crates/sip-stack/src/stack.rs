// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The stack context: transaction lists, dialog map, callbacks and the
//! transport layer, tied together.
//!
//! Lists never perform I/O. Every list call returns [`TransactionEffect`]s
//! that the core carries out after the list mutex has been released, so
//! callbacks and socket writes never run under a list lock.
//! The dialog map is always consulted before a transaction list is entered.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use sip_core::{
    generate_branch_id, generate_tag, parse_message_with_limit, Method, Request, Response,
    SipMessage, SipUri, TransportKind, ViaHeader,
};
use sip_observe::{LogLayer, LogSink, TransportCounters, TransportMetrics, SYSTEM_TARGET};
use sip_transaction::{
    EntryReport, IctList, IstList, ListKind, NictList, NistList, Termination, TransactionEffect,
    TransactionError, TransactionKey, TransactionMetrics, TransportContext,
};
use sip_transport::{InboundHandler, InboundPacket, TransportLayer};
use smol_str::SmolStr;
use tracing::{debug, info, trace, warn};

use crate::callback::{CallbackId, CallbackRegistry, StackCallback, STACK_THREAD_ID};
use crate::clock::{Clock, SystemClock};
use crate::dialog::{Dialog, DialogMap, Direction};
use crate::error::StackError;
use crate::setup::StackSetup;
use crate::status::StackStatus;

/// A SIP stack instance. Stopped on drop.
///
/// ```no_run
/// use sip_stack::{SipStack, StackSetup};
///
/// let stack = SipStack::new(StackSetup::default())?;
/// stack.start()?;
/// println!("{}", stack.status());
/// stack.stop();
/// # Ok::<(), sip_stack::StackError>(())
/// ```
pub struct SipStack {
    core: Arc<StackCore>,
}

impl SipStack {
    pub fn new(setup: StackSetup) -> Result<Self, StackError> {
        Self::with_clock(setup, Arc::new(SystemClock))
    }

    /// Builds a stack whose transaction deadlines follow `clock`.
    pub fn with_clock(setup: StackSetup, clock: Arc<dyn Clock>) -> Result<Self, StackError> {
        setup.validate()?;
        let log_sink = match &setup.log_dir {
            Some(dir) => {
                let sink = LogSink::open(dir)?;
                sink.set_level(setup.log_level());
                sink.set_max_size(setup.log_max_size);
                Some(Arc::new(sink))
            }
            None => None,
        };
        let defaults = setup.timer_defaults();
        let metrics = TransactionMetrics::new();
        let limit = setup.max_transactions;
        let core = StackCore {
            ict: IctList::new(limit, defaults, metrics.clone()),
            nict: NictList::new(limit, defaults, metrics.clone()),
            ist: IstList::new(limit, defaults, metrics.clone()),
            nist: NistList::new(limit, defaults, metrics.clone()),
            metrics,
            dialogs: DialogMap::new(),
            callbacks: CallbackRegistry::default(),
            counters: Arc::new(TransportCounters::default()),
            transport: RwLock::new(None),
            timer: Mutex::new(None),
            timer_stop: (Mutex::new(false), Condvar::new()),
            lifecycle: Mutex::new(()),
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            log_sink,
            clock,
            setup,
        };
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Binds the configured transports and starts the timer thread.
    pub fn start(&self) -> Result<(), StackError> {
        StackCore::start(&self.core)
    }

    /// Stops every thread and drops all live transactions and dialogs.
    /// Idempotent. Must not be called from inside a callback.
    pub fn stop(&self) {
        self.core.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    pub fn add_callback(&self, callback: Arc<dyn StackCallback>) -> CallbackId {
        self.core.callbacks.add(callback)
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.core.callbacks.remove(id)
    }

    /// Sends a request or response.
    ///
    /// Requests go to their top Route, else their Request-URI, and start a
    /// client transaction (ACK is sent as is). Responses go through the
    /// server transaction that matches them, or statelessly to the top Via.
    /// With `check` set the message is validated and missing stack headers
    /// are filled in first.
    pub fn send(&self, message: impl Into<SipMessage>, check: bool) -> Result<(), StackError> {
        match message.into() {
            SipMessage::Request(request) => self.core.send_request(request, None, check),
            SipMessage::Response(response) => self.core.send_response(response, None, check),
        }
    }

    /// Like [`send`](Self::send) with an explicit next hop.
    pub fn send_to(
        &self,
        message: impl Into<SipMessage>,
        transport: TransportKind,
        peer: SocketAddr,
        check: bool,
    ) -> Result<(), StackError> {
        let dest = Some(TransportContext::new(transport, peer));
        match message.into() {
            SipMessage::Request(request) => self.core.send_request(request, dest, check),
            SipMessage::Response(response) => self.core.send_response(response, dest, check),
        }
    }

    /// Feeds raw bytes as if a transport had read them.
    pub fn recv_message(&self, thread_id: u32, packet: InboundPacket) {
        self.core.recv_message(thread_id, packet);
    }

    pub fn recv_request(&self, thread_id: u32, request: Request, ctx: TransportContext) {
        self.core.recv_request(thread_id, request, ctx);
    }

    pub fn recv_response(&self, thread_id: u32, response: Response) {
        self.core.recv_response(thread_id, response);
    }

    /// Fires every transaction timer due at `now`. The timer thread calls
    /// this every tick; with `drive_timers` off it is the only driver.
    pub fn execute(&self, now: Instant) {
        self.core.execute(now);
    }

    pub fn status(&self) -> StackStatus {
        self.core.status()
    }

    /// Live client INVITE transactions.
    pub fn ict_report(&self) -> Vec<EntryReport> {
        self.core.ict.report(self.core.clock.now())
    }

    pub fn dialog(&self, call_id: &str) -> Option<Dialog> {
        self.core.dialogs.get(call_id)
    }

    /// Bound address of a running transport. Reports the real port when
    /// the setup asked for port 0.
    pub fn local_addr(&self, kind: TransportKind) -> Option<SocketAddr> {
        self.core.transport.read().as_ref()?.local_addr(kind)
    }

    /// A `tracing` layer writing into the configured log directory, if any.
    pub fn log_layer(&self) -> Option<LogLayer> {
        self.core.log_sink.clone().map(LogLayer::new)
    }

    pub fn transaction_metrics(&self) -> TransactionMetrics {
        self.core.metrics.clone()
    }

    pub fn setup(&self) -> &StackSetup {
        &self.core.setup
    }
}

impl Drop for SipStack {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}

struct StackCore {
    setup: StackSetup,
    clock: Arc<dyn Clock>,
    ict: IctList,
    nict: NictList,
    ist: IstList,
    nist: NistList,
    metrics: TransactionMetrics,
    dialogs: DialogMap,
    callbacks: CallbackRegistry,
    counters: Arc<TransportCounters>,
    transport: RwLock<Option<Arc<TransportLayer>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    timer_stop: (Mutex<bool>, Condvar),
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
    running: AtomicBool,
    ticks: AtomicU64,
    log_sink: Option<Arc<LogSink>>,
}

/// Transport-facing handle. Holds the core weakly so the transport threads
/// never keep a dropped stack alive.
struct CoreHandler(Weak<StackCore>);

impl InboundHandler for CoreHandler {
    fn on_packet(&self, thread_id: u32, packet: InboundPacket) {
        if let Some(core) = self.0.upgrade() {
            core.recv_message(thread_id, packet);
        }
    }

    fn on_connection_closed(&self, thread_id: u32, transport: TransportKind, peer: SocketAddr) {
        if let Some(core) = self.0.upgrade() {
            core.connection_closed(thread_id, transport, peer);
        }
    }

    fn on_thread_end(&self, thread_id: u32) {
        if let Some(core) = self.0.upgrade() {
            core.callbacks.thread_end(thread_id);
        }
    }
}

impl StackCore {
    fn start(core: &Arc<StackCore>) -> Result<(), StackError> {
        let _lifecycle = core.lifecycle.lock();
        if core.running.load(Ordering::Acquire) {
            return Err(StackError::AlreadyRunning);
        }
        core.setup.validate()?;
        let transport_setup = core.setup.transport_setup()?;
        let handler: Arc<dyn InboundHandler> = Arc::new(CoreHandler(Arc::downgrade(core)));
        let metrics: Arc<dyn TransportMetrics> = core.counters.clone();
        let layer = Arc::new(TransportLayer::start(transport_setup, handler, metrics)?);

        *core.timer_stop.0.lock() = false;
        if core.setup.drive_timers {
            let timer_core = core.clone();
            let spawned = thread::Builder::new()
                .name("sip-timer".to_string())
                .spawn(move || timer_core.run_timer());
            match spawned {
                Ok(handle) => *core.timer.lock() = Some(handle),
                Err(e) => {
                    layer.stop();
                    return Err(StackError::Transport(
                        anyhow::Error::new(e).context("failed to spawn timer thread"),
                    ));
                }
            }
        }

        info!(
            target: SYSTEM_TARGET,
            udp = ?layer.udp_addr(),
            tcp = ?layer.tcp_addr(),
            tls = ?layer.tls_addr(),
            drive_timers = core.setup.drive_timers,
            "stack started"
        );
        *core.transport.write() = Some(layer);
        core.running.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        {
            let (flag, signal) = &self.timer_stop;
            *flag.lock() = true;
            signal.notify_all();
        }
        if let Some(handle) = self.timer.lock().take() {
            if handle.join().is_err() {
                warn!(target: SYSTEM_TARGET, "timer thread panicked");
            }
        }

        let layer = self.transport.write().take();
        if let Some(layer) = layer {
            layer.stop();
        }

        let transactions =
            self.ict.clear() + self.nict.clear() + self.ist.clear() + self.nist.clear();
        let dialogs = self.dialogs.clear();
        info!(target: SYSTEM_TARGET, transactions, dialogs, "stack stopped");
    }

    fn run_timer(&self) {
        let interval = self.setup.tick_interval();
        debug!(target: SYSTEM_TARGET, ?interval, "timer thread started");
        loop {
            {
                let (flag, signal) = &self.timer_stop;
                let mut stop = flag.lock();
                if !*stop {
                    signal.wait_for(&mut stop, interval);
                }
                if *stop {
                    break;
                }
            }
            self.execute(self.clock.now());
        }
        self.callbacks.thread_end(STACK_THREAD_ID);
    }

    fn layer(&self) -> Result<Arc<TransportLayer>, StackError> {
        self.transport.read().clone().ok_or(StackError::NotRunning)
    }

    // ---- outbound ----

    fn send_request(
        &self,
        mut request: Request,
        dest: Option<TransportContext>,
        check: bool,
    ) -> Result<(), StackError> {
        let layer = self.layer()?;
        let ctx = match dest {
            Some(ctx) => ctx,
            None => self.resolve(&request)?,
        };
        if ctx.transport == TransportKind::Udp && layer.udp_addr().is_none() {
            return Err(StackError::TransportDisabled(TransportKind::Udp));
        }
        if check {
            self.complete_request(&mut request, ctx.transport, &layer)?;
        }

        let now = self.clock.now();
        let request = Arc::new(request);
        match request.method().clone() {
            Method::Ack => {
                layer.send(ctx.transport, ctx.peer, &request.to_bytes())?;
                match self.ict.attach_ack(&request, now) {
                    Ok(key) => trace!(branch = %key.branch, "ACK attached to client transaction"),
                    Err(err) => trace!(%err, "ACK sent outside any transaction"),
                }
                Ok(())
            }
            Method::Invite => {
                let call_id = request.call_id().map(SmolStr::new);
                let tracked = match &call_id {
                    Some(id) => self.dialogs.insert(Dialog::new(
                        id.clone(),
                        request.clone(),
                        Direction::Outbound,
                        now,
                    )),
                    None => false,
                };
                match self.ict.admit(request, ctx, now) {
                    Ok((key, effects)) => {
                        debug!(branch = %key.branch, peer = %ctx.peer, "INVITE sent");
                        self.perform(STACK_THREAD_ID, effects)
                    }
                    Err(err) => {
                        if let (true, Some(id)) = (tracked, &call_id) {
                            self.dialogs.take(id, now);
                        }
                        Err(err.into())
                    }
                }
            }
            method => {
                if method == Method::Bye {
                    if let Some(call_id) = request.call_id() {
                        self.dialogs.take(call_id, now);
                    }
                }
                let (key, effects) = self.nict.admit(request, ctx, now)?;
                debug!(branch = %key.branch, method = %key.method, peer = %ctx.peer, "request sent");
                self.perform(STACK_THREAD_ID, effects)
            }
        }
    }

    /// Next hop of a request: the first Route entry, else the Request-URI.
    fn resolve(&self, request: &Request) -> Result<TransportContext, StackError> {
        let target = match request.headers.get("Route") {
            Some(route) => route.split(',').next().unwrap_or(route.as_str()).trim().to_string(),
            None => request.uri().to_string(),
        };
        let uri = SipUri::parse(&target).ok_or_else(|| StackError::Unresolvable(target.clone()))?;
        let transport = uri.transport().unwrap_or(self.setup.default_transport);
        let port = uri.port_or_default(transport);
        let peer = resolve_host(&uri.host, port).ok_or(StackError::Unresolvable(target))?;
        Ok(TransportContext::new(transport, peer))
    }

    fn complete_request(
        &self,
        request: &mut Request,
        transport: TransportKind,
        layer: &TransportLayer,
    ) -> Result<(), StackError> {
        for name in ["From", "To", "Call-ID", "CSeq"] {
            if !request.headers.contains(name) {
                return Err(StackError::InvalidMessage(format!("request has no {} header", name)));
            }
        }
        let cseq = request
            .cseq()
            .ok_or_else(|| StackError::InvalidMessage("malformed CSeq header".to_string()))?;
        if cseq.method != *request.method() {
            return Err(StackError::InvalidMessage(format!(
                "CSeq method {} does not match {}",
                cseq.method,
                request.method()
            )));
        }

        match request.top_via() {
            None => {
                let port = layer
                    .local_addr(transport)
                    .map(|addr| addr.port())
                    .unwrap_or_else(|| transport.default_port());
                let via = ViaHeader::new(transport, &self.setup.via_host(), port, &generate_branch_id());
                request.headers.push_front("Via", via.to_string());
            }
            Some(mut via) if via.branch().map_or(true, str::is_empty) => {
                via.set_param("branch", Some(generate_branch_id().as_str()));
                request.headers.set("Via", via.to_string());
            }
            Some(_) => {}
        }
        if !request.headers.contains("Max-Forwards") {
            request.headers.push("Max-Forwards", "70");
        }
        if let Some(agent) = &self.setup.user_agent {
            if !request.headers.contains("User-Agent") {
                request.headers.push("User-Agent", agent.as_str());
            }
        }
        Ok(())
    }

    fn send_response(
        &self,
        response: Response,
        dest: Option<TransportContext>,
        check: bool,
    ) -> Result<(), StackError> {
        let layer = self.layer()?;
        if check {
            for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
                if !response.headers.contains(name) {
                    return Err(StackError::InvalidMessage(format!(
                        "response has no {} header",
                        name
                    )));
                }
            }
        }

        let now = self.clock.now();
        let is_invite = response.method().map_or(false, |m| m.is_invite());
        let code = response.code();
        if is_invite && code > 100 {
            if let Some(call_id) = response.call_id() {
                if let Some(tag) = response.to_tag() {
                    self.dialogs.set_local_tag(call_id, tag);
                }
                if response.is_success() {
                    self.dialogs.mark_started(call_id, now);
                } else if code >= 300 {
                    self.dialogs.take_unanswered(call_id, now);
                }
            }
        }

        let routed = if is_invite {
            self.ist.send_response(&response, now)
        } else {
            self.nist.send_response(&response, now)
        };
        match routed {
            Ok(effects) => self.perform(STACK_THREAD_ID, effects),
            Err(TransactionError::NoMatch(_))
            | Err(TransactionError::MissingBranch)
            | Err(TransactionError::WrongMethod(_)) => {
                self.send_stateless(&layer, &response, dest)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn send_stateless(
        &self,
        layer: &TransportLayer,
        response: &Response,
        dest: Option<TransportContext>,
    ) -> Result<(), StackError> {
        let ctx = match dest {
            Some(ctx) => ctx,
            None => {
                let via = response
                    .top_via()
                    .ok_or_else(|| StackError::InvalidMessage("response has no Via".to_string()))?;
                let transport = via.transport_kind().unwrap_or(self.setup.default_transport);
                let (host, port) = via.response_target();
                let peer = resolve_host(&host, port).ok_or(StackError::Unresolvable(host))?;
                TransportContext::new(transport, peer)
            }
        };
        debug!(code = response.code(), peer = %ctx.peer, "sending response statelessly");
        layer.send(ctx.transport, ctx.peer, &response.to_bytes())?;
        Ok(())
    }

    // ---- inbound ----

    fn recv_message(&self, thread_id: u32, packet: InboundPacket) {
        let message = match parse_message_with_limit(&packet.payload, self.setup.max_message_size) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    transport = %packet.transport,
                    peer = %packet.peer,
                    error = %err,
                    "discarding unparsable message"
                );
                return;
            }
        };
        let ctx = TransportContext::new(packet.transport, packet.peer);
        match message {
            SipMessage::Request(mut request) => {
                stamp_received(&mut request, packet.peer);
                self.recv_request(thread_id, request, ctx);
            }
            SipMessage::Response(response) => self.recv_response(thread_id, response),
        }
    }

    fn recv_request(&self, thread_id: u32, request: Request, ctx: TransportContext) {
        if request.call_id().is_none() || request.cseq().is_none() {
            debug!(method = %request.method(), peer = %ctx.peer, "discarding request without Call-ID or CSeq");
            return;
        }
        let now = self.clock.now();
        let request = Arc::new(request);
        let outcome = match request.method().clone() {
            Method::Ack => match self.ist.on_ack(request.clone(), ctx, now) {
                Err(TransactionError::NoMatch(_)) => {
                    trace!(peer = %ctx.peer, "ACK matches no server transaction");
                    self.callbacks.request(thread_id, &request);
                    return;
                }
                other => other,
            },
            Method::Cancel => return self.recv_cancel(thread_id, request, ctx, now),
            Method::Invite => self.ist.on_request(request.clone(), ctx, now).map(|effects| {
                if effects.iter().any(is_delivery) {
                    if let Some(call_id) = request.call_id() {
                        self.dialogs.insert(Dialog::new(
                            call_id,
                            request.clone(),
                            Direction::Inbound,
                            now,
                        ));
                    }
                }
                effects
            }),
            _ => self.nist.on_request(request.clone(), ctx, now),
        };
        match outcome {
            Ok(effects) => self.perform_logged(thread_id, effects),
            Err(TransactionError::Capacity { list, limit }) => {
                warn!(list, limit, method = %request.method(), "transaction list full, rejecting request");
                self.reject_overload(&request, ctx);
            }
            Err(err) => debug!(method = %request.method(), error = %err, "discarding request"),
        }
    }

    /// Answers a CANCEL with 200 and, when it hits an unanswered inbound
    /// INVITE, ends that INVITE with 487. The call end is reported as 200,
    /// the status of the CANCEL transaction.
    fn recv_cancel(&self, thread_id: u32, cancel: Arc<Request>, ctx: TransportContext, now: Instant) {
        let effects = match self.nist.on_request(cancel.clone(), ctx, now) {
            Ok(effects) => effects,
            Err(TransactionError::Capacity { list, limit }) => {
                warn!(list, limit, "transaction list full, rejecting CANCEL");
                self.reject_overload(&cancel, ctx);
                return;
            }
            Err(err) => {
                debug!(error = %err, "discarding CANCEL");
                return;
            }
        };
        let first = effects.iter().any(is_delivery);
        let effects = effects.into_iter().filter(|e| !is_delivery(e)).collect();
        self.perform_logged(thread_id, effects);
        if !first {
            return;
        }
        let Some(call_id) = cancel.call_id() else {
            return;
        };

        let dialog = self.dialogs.take_cancellable(call_id, now);
        let tag = dialog
            .as_ref()
            .and_then(|d| d.local_tag.clone())
            .unwrap_or_else(generate_tag);

        match cancel.create_response(200, Some(tag.as_str())) {
            Ok(ok) => match self.nist.send_response(&ok, now) {
                Ok(effects) => self.perform_logged(thread_id, effects),
                Err(err) => debug!(error = %err, "CANCEL already answered"),
            },
            Err(err) => warn!(error = %err, "cannot build 200 for CANCEL"),
        }

        let Some(dialog) = dialog else {
            debug!(call_id, "CANCEL matches no cancellable call");
            return;
        };
        match dialog.invite.create_response(487, Some(tag.as_str())) {
            Ok(terminated) => match self.ist.send_response(&terminated, now) {
                Ok(effects) => self.perform_logged(thread_id, effects),
                Err(err) => debug!(call_id, error = %err, "INVITE already answered"),
            },
            Err(err) => warn!(call_id, error = %err, "cannot build 487 for INVITE"),
        }
        info!(call_id, "call cancelled");
        self.callbacks.call_end(call_id, 200);
    }

    fn recv_response(&self, thread_id: u32, response: Response) {
        let now = self.clock.now();
        let response = Arc::new(response);
        let is_invite = response.method().map_or(false, |m| m.is_invite());
        let outcome = if is_invite {
            self.ict.on_response(response.clone(), now)
        } else {
            self.nict.on_response(response.clone(), now)
        };
        match outcome {
            Ok(effects) => self.perform_logged(thread_id, effects),
            Err(err) => debug!(code = response.code(), error = %err, "discarding response"),
        }
    }

    /// Stateless 503 for a request no list could admit.
    fn reject_overload(&self, request: &Request, ctx: TransportContext) {
        if *request.method() == Method::Ack {
            return;
        }
        let sent = request
            .create_response(503, Some(generate_tag().as_str()))
            .map_err(StackError::from)
            .and_then(|response| {
                self.layer()?
                    .send(ctx.transport, ctx.peer, &response.to_bytes())
                    .map_err(StackError::from)
            });
        if let Err(err) = sent {
            debug!(peer = %ctx.peer, error = %err, "cannot send 503");
        }
    }

    fn connection_closed(&self, thread_id: u32, transport: TransportKind, peer: SocketAddr) {
        let now = self.clock.now();
        let mut effects = self.ict.fail_peer(transport, peer, now);
        effects.extend(self.nict.fail_peer(transport, peer, now));
        effects.extend(self.ist.fail_peer(transport, peer, now));
        effects.extend(self.nist.fail_peer(transport, peer, now));
        if !effects.is_empty() {
            debug!(%transport, %peer, "connection closed under live transactions");
        }
        self.perform_logged(thread_id, effects);
    }

    // ---- timers ----

    fn execute(&self, now: Instant) {
        let mut effects = self.ict.tick(now);
        effects.extend(self.nict.tick(now));
        effects.extend(self.ist.tick(now));
        effects.extend(self.nist.tick(now));
        self.perform_logged(STACK_THREAD_ID, effects);

        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks % u64::from(self.setup.idle_sweep_ticks) == 0 {
            if let Some(layer) = self.transport.read().clone() {
                let closed = layer.cleanup_idle(self.setup.idle_timeout());
                if closed > 0 {
                    debug!(closed, "closed idle connections");
                }
            }
        }
    }

    // ---- effects ----

    fn perform_logged(&self, thread_id: u32, effects: Vec<TransactionEffect>) {
        if let Err(err) = self.perform(thread_id, effects) {
            debug!(error = %err, "transmit failed");
        }
    }

    /// Carries out list effects in order. A failed transmit fails its
    /// transaction; the first such error is returned once every effect,
    /// including the ones the failure produced, has run.
    fn perform(&self, thread_id: u32, effects: Vec<TransactionEffect>) -> Result<(), StackError> {
        let mut queue: VecDeque<TransactionEffect> = effects.into();
        let mut first_error = None;
        while let Some(effect) = queue.pop_front() {
            match effect {
                TransactionEffect::Transmit { key, ctx, payload } => {
                    let sent = self.layer().and_then(|layer| {
                        layer
                            .send(ctx.transport, ctx.peer, &payload)
                            .map_err(StackError::from)
                    });
                    if let Err(err) = sent {
                        warn!(branch = %key.branch, peer = %ctx.peer, error = %err, "transmit failed");
                        queue.extend(self.fail(&key));
                        first_error.get_or_insert(err);
                    }
                }
                TransactionEffect::DeliverRequest { request, .. } => {
                    self.deliver_request(thread_id, &request);
                }
                TransactionEffect::DeliverResponse { key, response } => {
                    self.deliver_response(thread_id, &key, &response);
                }
                TransactionEffect::Terminated {
                    key,
                    request,
                    reason,
                } => self.terminated(thread_id, &key, &request, reason),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn fail(&self, key: &TransactionKey) -> Vec<TransactionEffect> {
        let now = self.clock.now();
        match ListKind::for_key(key) {
            ListKind::Ict => self.ict.fail(key, now),
            ListKind::Nict => self.nict.fail(key, now),
            ListKind::Ist => self.ist.fail(key, now),
            ListKind::Nist => self.nist.fail(key, now),
        }
    }

    fn deliver_request(&self, thread_id: u32, request: &Request) {
        let consumed = self.callbacks.request(thread_id, request);
        trace!(method = %request.method(), consumed, "request delivered");
        if *request.method() == Method::Bye {
            if let Some(call_id) = request.call_id() {
                if self.dialogs.take(call_id, self.clock.now()).is_some() {
                    self.callbacks.call_end(call_id, 200);
                }
            }
        }
    }

    fn deliver_response(&self, thread_id: u32, key: &TransactionKey, response: &Response) {
        let mut ended = None;
        if ListKind::for_key(key) == ListKind::Ict {
            if let Some(call_id) = response.call_id() {
                let now = self.clock.now();
                if response.is_success() {
                    self.dialogs.mark_started(call_id, now);
                } else if response.code() >= 300 {
                    ended = self.dialogs.take_unanswered(call_id, now);
                }
            }
        }
        let consumed = self.callbacks.response(thread_id, response);
        trace!(code = response.code(), branch = %key.branch, consumed, "response delivered");
        if let Some(dialog) = ended {
            self.callbacks.call_end(&dialog.call_id, response.code());
        }
    }

    fn terminated(&self, thread_id: u32, key: &TransactionKey, request: &Request, reason: Termination) {
        let is_ict = ListKind::for_key(key) == ListKind::Ict;
        match reason {
            Termination::Completed => {
                trace!(branch = %key.branch, method = %key.method, "transaction completed");
            }
            Termination::Timeout(timer) => {
                info!(branch = %key.branch, method = %key.method, ?timer, "transaction timed out");
                self.callbacks.timeout(thread_id, request);
                if is_ict {
                    if let Some(call_id) = request.call_id() {
                        if self.dialogs.take_unanswered(call_id, self.clock.now()).is_some() {
                            self.callbacks.call_end(call_id, 408);
                        }
                    }
                }
            }
            Termination::TransportError => {
                info!(branch = %key.branch, method = %key.method, "transaction failed on transport");
                self.callbacks.transport_error(thread_id, request);
                if is_ict {
                    if let Some(call_id) = request.call_id() {
                        self.dialogs.take_unanswered(call_id, self.clock.now());
                    }
                }
            }
        }
    }

    fn status(&self) -> StackStatus {
        let layer = self.transport.read().clone();
        StackStatus {
            running: self.running.load(Ordering::Acquire),
            ict: self.ict.len(),
            nict: self.nict.len(),
            ist: self.ist.len(),
            nist: self.nist.len(),
            dialogs: self.dialogs.len(),
            callbacks: self.callbacks.len(),
            udp_threads: layer.as_ref().map_or(0, |l| l.udp_threads_live()),
            stream_threads: layer.as_ref().map_or(0, |l| l.stream_threads_live()),
            connections: layer.as_ref().map_or(0, |l| l.connection_count()),
            ticks: self.ticks.load(Ordering::Relaxed),
            transport: self.counters.snapshot(),
            transactions: self.metrics.snapshot(),
        }
    }
}

fn is_delivery(effect: &TransactionEffect) -> bool {
    matches!(effect, TransactionEffect::DeliverRequest { .. })
}

/// Records where a request really came from on its top Via (RFC 3261
/// §18.2.1, RFC 3581).
fn stamp_received(request: &mut Request, peer: SocketAddr) {
    let Some(mut via) = request.top_via() else {
        return;
    };
    let peer_ip = peer.ip().to_string();
    let mut changed = false;
    if via.host() != peer_ip {
        via.set_param("received", Some(peer_ip.as_str()));
        changed = true;
    }
    if matches!(via.param("rport"), Some(None)) {
        via.set_param("rport", Some(peer.port().to_string().as_str()));
        changed = true;
    }
    if changed {
        request.headers.set("Via", via.to_string());
    }
}

fn resolve_host(host: &str, port: u16) -> Option<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    (host, port).to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn received_and_rport_are_stamped() {
        let mut req = Request::new(Method::Options, "sip:bob@example.com");
        req.headers.push("Via", "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKs1;rport");
        stamp_received(&mut req, "192.0.2.10:40000".parse().unwrap());
        let via = req.top_via().unwrap();
        assert_eq!(via.param("received"), Some(&Some(SmolStr::new("192.0.2.10"))));
        assert_eq!(via.response_target(), ("192.0.2.10".to_string(), 40000));
    }

    #[test]
    fn matching_host_is_left_alone() {
        let mut req = Request::new(Method::Options, "sip:bob@example.com");
        req.headers.push("Via", "SIP/2.0/UDP 192.0.2.10:5060;branch=z9hG4bKs2");
        let before = req.headers.clone();
        stamp_received(&mut req, "192.0.2.10:5060".parse().unwrap());
        assert_eq!(req.headers, before);
    }

    #[test]
    fn literal_hosts_resolve_without_dns() {
        assert_eq!(
            resolve_host("127.0.0.1", 5070),
            Some("127.0.0.1:5070".parse().unwrap())
        );
        assert_eq!(resolve_host("[::1]", 5060), Some("[::1]:5060".parse().unwrap()));
    }

    #[test]
    fn route_wins_over_request_uri() {
        let stack = SipStack::new(StackSetup::default()).unwrap();
        let mut req = Request::new(Method::Options, "sip:bob@192.0.2.1");
        req.headers.push("Route", "<sip:127.0.0.1:5070;transport=tcp;lr>");
        let ctx = stack.core.resolve(&req).unwrap();
        assert_eq!(ctx.transport, TransportKind::Tcp);
        assert_eq!(ctx.peer, "127.0.0.1:5070".parse().unwrap());

        let plain = Request::new(Method::Options, "sips:bob@127.0.0.1");
        let ctx = stack.core.resolve(&plain).unwrap();
        assert_eq!(ctx.transport, TransportKind::Tls);
        assert_eq!(ctx.peer.port(), 5061);
    }

    #[test]
    fn sending_before_start_fails() {
        let stack = SipStack::new(StackSetup::default()).unwrap();
        let req = Request::new(Method::Options, "sip:bob@127.0.0.1");
        assert!(matches!(stack.send(req, false), Err(StackError::NotRunning)));
    }
}
