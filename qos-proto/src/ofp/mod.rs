pub mod action;
pub mod header;
pub mod message;
pub mod oxm;
pub mod packet;

pub use action::Action;
pub use header::{OfpHeader, OfpType, OFP_HEADER_LEN, OFP_VERSION};
pub use message::OfpMessage;
pub use oxm::{MatchField, OxmMatch};
