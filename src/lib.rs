//! Retargets resource pack archives to other game versions by rewriting the
//! `pack_format` in `pack.mcmeta`.

pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod versions;
