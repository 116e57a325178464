//! Pure decision core of the progression engine.
//!
//! Everything in this module is synchronous and side-effect free:
//! scoring, attempt lifecycle policy, monotonic progress merges, module
//! gating and enrollment rollup all operate over typed in-memory
//! records. Persistence, caching and serialization live in
//! `crate::services`.

pub mod attempt;
pub mod enrollment;
pub mod module_gate;
pub mod part_progress;
pub mod scoring;
