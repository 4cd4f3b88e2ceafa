//! Keeps the TLS certificates of admission webhooks and the CA bundles of their
//! registrations up to date.

pub mod certificate_secret;
pub mod certs;
pub mod client;
pub mod config;
pub mod controller;
pub mod event_filter;
pub mod resource_retriever;
pub mod webhook_config;

pub const OPERATOR_NAME: &str = "webhook-cert-manager.dev";
