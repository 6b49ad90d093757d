//! Command handlers grouped by concern.

pub(crate) mod login;
pub(crate) mod logout;
pub(crate) mod request;
pub(crate) mod session;
