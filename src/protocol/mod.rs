//! # Perf Protocol State Machines
//!
//! - **Initiator**: issues overlapping perf requests and times their replies
//! - **Responder**: answers each request with a reply of the agreed size
//! - **Pending**: the initiator's table of outstanding requests
//! - **Binding**: attaches either role to an open stream
//!
//! The two roles are separate capability types. Only the initiator can
//! `measure()`.

pub mod binding;
pub mod initiator;
pub mod pending;
pub mod responder;

pub use binding::{
    Activation, InitiatorHandle, PerfController, PerfProtocol, ResponderHandle, Role, StreamTask,
};
pub use initiator::{Initiator, Measurement};
pub use responder::Responder;
