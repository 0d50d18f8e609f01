//! Concrete storage backends for the verification engine: flat files, SQL
//! (via `sqlx`/SQLite), and a remote directory bind for pincode checking.

pub mod crypto;
pub mod file;
pub mod ldap;
pub mod sql;

pub use crypto::{Argon2AesGcmDecryptor, SecretDecryptor};
pub use file::{
    FilePincodeBackend, FilePincodeBackendConfig, FileSecretBackend, FileSecretBackendConfig,
    FileStateBackend, FileStateBackendConfig,
};
pub use ldap::{LdapBindConfig, LdapDirectoryBind};
pub use sql::{SqlBackendConfig, SqlPincodeBackend, SqlSecretBackend, SqlStateBackend};
