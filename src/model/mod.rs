//! Chat domain entities.

mod conversation;
mod message;
mod user;

pub use conversation::Conversation;
pub use message::{Message, MessageKind};
pub use user::User;
