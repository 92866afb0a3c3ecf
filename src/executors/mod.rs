//! HTTP request construction and dispatch (C5). The only protocol this engine
//! speaks is REST over HTTP, so — unlike the plugin-style executor registry
//! this module once hosted — there is exactly one implementer and no
//! `can_handle` dispatch is needed.

pub mod http;
