// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP stack core.
//!
//! [`SipStack`] owns the four transaction lists, the dialog map used to
//! answer CANCEL, the registered [`StackCallback`]s and a running
//! [`sip_transport::TransportLayer`]. Received messages are matched to
//! transactions on the transport thread that read them; transaction timers
//! are driven by a single timer thread, or by explicit
//! [`SipStack::execute`] calls when `drive_timers` is off.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sip_core::Request;
//! use sip_stack::{SipStack, StackCallback, StackSetup};
//!
//! struct Answer(std::sync::Weak<SipStack>);
//!
//! impl StackCallback for Answer {
//!     fn on_recv_request(&self, _thread_id: u32, request: &Request) -> bool {
//!         if let (Some(stack), Ok(ok)) = (self.0.upgrade(), request.create_response(200, None)) {
//!             let _ = stack.send(ok, true);
//!         }
//!         true
//!     }
//! }
//!
//! let stack = Arc::new(SipStack::new(StackSetup::default())?);
//! stack.add_callback(Arc::new(Answer(Arc::downgrade(&stack))));
//! stack.start()?;
//! # Ok::<(), sip_stack::StackError>(())
//! ```

mod callback;
mod clock;
mod dialog;
mod error;
mod setup;
mod stack;
mod status;

pub use callback::{CallbackId, StackCallback, STACK_THREAD_ID};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dialog::{Dialog, DialogMap, Direction};
pub use error::StackError;
pub use setup::StackSetup;
pub use stack::SipStack;
pub use status::StackStatus;

pub use sip_transaction::TransportContext;
pub use sip_transport::InboundPacket;
