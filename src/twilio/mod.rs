pub mod client;
pub mod signature;
pub mod twiml;

pub use client::{CarrierError, TwilioClient};
pub use signature::{compute_signature, validate_signature};
pub use twiml::{GatherOptions, TwimlResponse, escape_xml};
