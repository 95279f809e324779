pub mod audit_log;
pub mod cipher;
pub mod policy;
pub mod refresh;
pub mod session;
pub mod token_cache;
