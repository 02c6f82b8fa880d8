//! Built-in convergence tasks: local users, sshd hardening and fail2ban jails.
pub mod catalog;
pub mod fail2ban;
pub mod root_login;
pub mod script;
pub mod ssh_password_auth;
pub mod sshd;
pub mod users;

pub use catalog::{builtin_keys, builtins};
