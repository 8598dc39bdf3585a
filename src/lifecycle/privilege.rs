//! Privilege de-escalation (group first, then user).

use thiserror::Error;

use crate::config::UserConfig;

/// Errors raised while switching group or user.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("Unknown group '{0}'")]
    UnknownGroup(String),
    #[error("Unknown user '{0}'")]
    UnknownUser(String),
    #[error("Failed to set {what} to '{target}': {reason}")]
    Switch {
        what: &'static str,
        target: String,
        reason: String,
    },
    #[error("Privilege switching is not supported on this platform")]
    Unsupported,
}

/// Performs the group and user switch.
pub trait PrivilegeDropper: Send + Sync {
    fn set_group(&self, group: &str) -> Result<(), PrivilegeError>;
    fn set_user(&self, user: &str) -> Result<(), PrivilegeError>;
}

/// Switch to `target`: group first, then user.
pub fn drop_privileges(
    dropper: &dyn PrivilegeDropper,
    target: &UserConfig,
) -> Result<(), PrivilegeError> {
    dropper.set_group(&target.group)?;
    dropper.set_user(&target.user)?;
    tracing::info!(group = %target.group, user = %target.user, "Privileges dropped");
    Ok(())
}

/// Switches the real process credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPrivileges;

#[cfg(unix)]
impl PrivilegeDropper for OsPrivileges {
    fn set_group(&self, group: &str) -> Result<(), PrivilegeError> {
        use nix::unistd::{setgid, Gid, Group};

        let gid = match group.parse::<u32>() {
            Ok(raw) => Gid::from_raw(raw),
            Err(_) => match Group::from_name(group) {
                Ok(Some(found)) => found.gid,
                Ok(None) => return Err(PrivilegeError::UnknownGroup(group.to_string())),
                Err(e) => return Err(switch_error("group", group, e)),
            },
        };
        setgid(gid).map_err(|e| switch_error("group", group, e))
    }

    fn set_user(&self, user: &str) -> Result<(), PrivilegeError> {
        use nix::unistd::{setuid, Uid, User};

        let uid = match user.parse::<u32>() {
            Ok(raw) => Uid::from_raw(raw),
            Err(_) => match User::from_name(user) {
                Ok(Some(found)) => found.uid,
                Ok(None) => return Err(PrivilegeError::UnknownUser(user.to_string())),
                Err(e) => return Err(switch_error("user", user, e)),
            },
        };
        setuid(uid).map_err(|e| switch_error("user", user, e))
    }
}

#[cfg(unix)]
fn switch_error(what: &'static str, target: &str, err: nix::Error) -> PrivilegeError {
    PrivilegeError::Switch {
        what,
        target: target.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(not(unix))]
impl PrivilegeDropper for OsPrivileges {
    fn set_group(&self, _group: &str) -> Result<(), PrivilegeError> {
        Err(PrivilegeError::Unsupported)
    }

    fn set_user(&self, _user: &str) -> Result<(), PrivilegeError> {
        Err(PrivilegeError::Unsupported)
    }
}
