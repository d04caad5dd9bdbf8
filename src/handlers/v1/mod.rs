//! V1 API handlers.

mod sessions;

pub use sessions::{create_session, delete_session, get_messages, get_session, send_message};
