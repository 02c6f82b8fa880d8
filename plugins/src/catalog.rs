use settled_core::plan::TaskSpec;

use crate::{fail2ban, root_login, ssh_password_auth, users};

/// Every built-in task spec, in execution order. Accounts come before the sshd lockdown.
pub fn builtins() -> Vec<TaskSpec> {
    vec![
        users::spec(),
        root_login::spec(),
        ssh_password_auth::spec(),
        fail2ban::spec(),
    ]
}

/// The built-in keys, in the same order as [`builtins`].
pub fn builtin_keys() -> Vec<String> {
    builtins().into_iter().map(|s| s.key).collect()
}
