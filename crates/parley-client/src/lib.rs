pub mod view;

pub use view::{ConversationView, FetchTicket, SendTicket};
