pub mod alliances;
pub mod content;
pub mod error;
pub mod feed;
pub mod guilds;
pub mod membership;
pub mod middleware;
pub mod notifications;
pub mod state;
