pub mod auth;
pub mod client;
pub mod conversation;
pub mod credentials;
pub mod db;
pub mod error;
pub mod friend;
pub mod listener;
pub mod message;
pub mod presence;
pub mod profile;
pub mod push;
pub mod realtime;
pub mod serialization;
pub mod state;
pub mod types;

pub use client::{ChatClient, ClientConfig};
pub use state::{ChatState, StoreChange, StoreCommand, StoreHandle};
