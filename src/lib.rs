//! Multi-tenant bucket/folder/file store with an asynchronous, cascading
//! trash lifecycle.
//!
//! User calls flip state synchronously ([`services`]); cascade events
//! ([`events`]) carry that state down folder trees in bounded batches, one
//! delivery at a time, through the [`dispatcher`].

pub mod activity;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod messaging;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod storage;
