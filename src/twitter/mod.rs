pub mod api;
pub mod client;
pub mod session;
pub mod types;

pub use api::SocialApi;
pub use client::TwitterClient;
pub use session::{Session, SessionStore};
