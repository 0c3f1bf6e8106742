//! Protocol module containing the frame codec and traffic counters.

pub mod codec;
pub mod counters;

pub use codec::{decode_frame, encode_frame, is_valid_topic_name, CodecError, Frame, SEPARATOR};
pub use counters::{Counter, TrafficCounters, TrafficSnapshot};
