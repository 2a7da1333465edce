//! capstan-lib: Core types and logic for Capstan
//!
//! This crate implements the release-management pipeline:
//! - `resource`: manifest documents with typed annotation metadata
//! - `classify`: desired state diffed against the live cluster
//! - `stage` / `plan`: deterministic rollout ordering and plan building
//! - `exec`: checkpointed plan execution against cluster and storage
//! - `action`: the deploy, rollback and uninstall flows

pub mod action;
pub mod classify;
pub mod depend;
pub mod exec;
pub mod kube;
pub mod plan;
pub mod release;
pub mod render;
pub mod resource;
pub mod stage;
pub mod storage;
