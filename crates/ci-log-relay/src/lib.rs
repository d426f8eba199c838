// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CI log relay.
//!
//! Turns CI/CD completion events into compact diagnostic digests and delivers them to an
//! analysis service, falling back to local storage when the service cannot be reached.
//!
//! # Modules
//!
//! - [`event`]: normalizes GitLab pipeline hooks and Jenkins build notifications into a
//!   [`model::PipelineRun`]
//! - [`filter`]: selects the units whose logs are worth retrieving
//! - [`retriever`]: bounded tail-then-stream log retrieval
//! - [`extractor`]: diagnostic section extraction
//! - [`reliability`]: retry with backoff and per-target circuit breakers
//! - [`delivery`]: payload assembly, API delivery and file storage
//! - [`processor`] / [`service`]: per-run pipeline and the background relay service
//! - [`platform`]: GitLab and Jenkins HTTP clients
//! - [`monitor`]: per-run reports

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod event;
pub mod extractor;
pub mod filter;
pub mod http;
pub mod logger;
pub mod model;
pub mod monitor;
pub mod platform;
pub mod processor;
pub mod reliability;
pub mod retriever;
pub mod service;
