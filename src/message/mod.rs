//! Message-related types (`Msg`, `MsgFlags`, `Blob`).

mod blob;
mod flags;
mod msg;

pub use blob::{Blob, MAX_IDENTITY_LEN};
pub use flags::{MsgFlags, RecvFlags, SendFlags};
pub use msg::Msg;
