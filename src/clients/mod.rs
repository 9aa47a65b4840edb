pub mod circuit_breaker;
pub mod database;
pub mod dispatcher;
pub mod health;
pub mod rbmq;
pub mod sendgrid;
pub mod smtp;
pub mod template;
pub mod user;
