//! Tandem collaboration protocol
//!
//! One JSON object per event, internally tagged by `type`.
//!
//! ## Message Format
//! ```text
//! {"type": "collab.init", "version": 3, "client_id": "c1", "data": {...}, ...}
//! {"type": "collab.update_key", "path": "a.b", "value": 1, "update_awareness": true}
//! {"type": "collab.update_text", "path": "a.text", "updates": [{"changes": [4, [0, "E"]]}]}
//! {"type": "ping"}
//! ```
//!
//! ## Polling
//! ```text
//! POST {"version": 3, "client_id": "c1", "messages": [...]}
//!   -> {"version": 5, "messages": [...], "clients": [...]}
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod poll;

pub use codec::{decode, decode_slice, encode, MAX_MESSAGE_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    Awareness, Connect, Create, Delete, Disconnect, Init, Message, Permissions, Sort, TextUpdate,
    UpdateKey, UpdateText,
};
pub use poll::{PollRequest, PollResponse};
