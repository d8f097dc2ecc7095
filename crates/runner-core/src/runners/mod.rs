//! Concrete `AgentRunner` adapters. The scheduler and worker never import
//! this module directly — they depend on `contracts::AgentRunner` and see a
//! concrete backend only through `contracts::RunnerRegistry`.

pub mod subprocess;
