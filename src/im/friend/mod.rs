//! 联系人（好友）模块

pub mod api;
pub mod listener;
pub mod models;
pub mod service;

pub use api::FriendApi;
pub use listener::{EmptyFriendListener, FriendListener};
pub use models::{FriendRequest, FriendRequestStatus};
pub use service::FriendService;
