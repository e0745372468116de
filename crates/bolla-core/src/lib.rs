//! Bolla Core Library
//!
//! Normalization, formatting, and upload orchestration for carrier shipment
//! records built from manually-typed Italian addresses.
//!
//! The pipeline is a chain of narrow stages:
//!
//! raw row -> [`layout`] (defaults) -> [`normalize`] (validated address)
//! -> [`abbreviate`] (field-safe address) -> [`builder`] (shipment record)
//! -> [`ledger`] (admit/skip) -> [`uploader`] (remote outcome) ->
//! [`ledger`] (commit outcome).
//!
//! The geocoding provider and the carrier label service are collaborators
//! behind the [`geocode::GeocodeProvider`] and [`carrier::CarrierClient`]
//! traits; HTTP adapters for both live next to the traits. Spreadsheet
//! parsing, GUI, and credential storage are out of scope: the core consumes
//! already-parsed [`model::InputRow`] sequences.

pub mod abbreviate;
pub mod builder;
pub mod carrier;
pub mod config;
pub mod geocode;
pub mod layout;
pub mod ledger;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod uploader;

pub use bolla_common::{BollaError, Fingerprint, Result};
pub use layout::LayoutKind;
pub use model::{InputRow, ShipmentRecord};
pub use pipeline::{Pipeline, RunSummary};
