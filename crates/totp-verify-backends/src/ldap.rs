//! Remote directory bind, implemented by shelling out to the standard
//! `ldapsearch`/`ldapwhoami` command-line tools rather than linking an LDAP
//! client library — the same choice the teacher's own `auth.rs` makes
//! (there: "in production, would use ldap3 crate"), just synchronous
//! (`std::process::Command`) instead of `tokio::process::Command` to match
//! this crate's blocking trait surface.

use std::process::Command;

use serde::{Deserialize, Serialize};

use totp_verify_core::backend::PincodeBackend;
use totp_verify_core::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapBindConfig {
    pub server: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    pub user_search_filter: String,
}

pub struct LdapDirectoryBind {
    config: LdapBindConfig,
}

impl LdapDirectoryBind {
    pub fn new(config: LdapBindConfig) -> Self {
        LdapDirectoryBind { config }
    }

    fn search_user_dn(&self, username: &str) -> Result<String, Error> {
        let filter = self.config.user_search_filter.replace("%s", username);

        let output = Command::new("ldapsearch")
            .args([
                "-H",
                &self.config.server,
                "-D",
                &self.config.bind_dn,
                "-w",
                &self.config.bind_password,
                "-b",
                &self.config.base_dn,
                &filter,
                "dn",
            ])
            .output()
            .map_err(|e| Error::verify_failed(format!("LDAP bind failed: {e}")))?;

        if !output.status.success() {
            tracing::warn!(%username, "LDAP search bind failed");
            return Err(Error::verify_failed("LDAP bind failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .find_map(|line| line.strip_prefix("dn:"))
            .map(|dn| dn.trim().to_string())
            .ok_or_else(|| Error::user_not_found(format!("no LDAP entry for {username}")))
    }
}

impl PincodeBackend for LdapDirectoryBind {
    /// Treats `candidate` as the user's directory password: resolves the
    /// user's DN, then attempts to bind as that DN with the supplied
    /// password. Any bind failure, including a simple wrong password, is a
    /// hard error here rather than a plain pincode mismatch — directory
    /// auth failures are reported as `"LDAP bind failed"`, distinct from
    /// the local-hash backends' `"Pincode did not match"`.
    fn verify_pincode(&self, username: &str, candidate: &str) -> Result<bool, Error> {
        let user_dn = self.search_user_dn(username)?;

        let output = Command::new("ldapwhoami")
            .args(["-H", &self.config.server, "-D", &user_dn, "-w", candidate])
            .output()
            .map_err(|e| Error::verify_failed(format!("LDAP bind failed: {e}")))?;

        if !output.status.success() {
            tracing::warn!(%username, "LDAP bind failed");
            return Err(Error::user_pincode("LDAP bind failed"));
        }

        Ok(true)
    }
}
