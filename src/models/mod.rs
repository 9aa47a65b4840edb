pub mod circuit_breaker;
pub mod delivery;
pub mod health;
pub mod message;
pub mod record;
pub mod response;
pub mod retry;
pub mod template;
pub mod user;
