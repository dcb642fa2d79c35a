//! Protocol module containing message types, the JSON codec, and the lock
//! generation counter.

pub mod codec;
pub mod generation;
pub mod messages;

pub use codec::{
    decode_client_message, decode_server_event, encode_client_message, encode_event, ProtocolError,
};
pub use generation::GenerationCounter;
pub use messages::*;
