//! Flat-file storage backends: `<secrets_dir>/<username>.totp` secrets, a
//! `pincodes` text file with an optional `pincodes.db` sidecar, and
//! per-user JSON state files under an advisory lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use totp_verify_core::backend::{PincodeBackend, SecretBackend, StateBackend, StateGuard};
use totp_verify_core::{Error, RateLimit, Secret, UserState};

use crate::crypto::{Argon2AesGcmDecryptor, SecretDecryptor};

fn secret_path(dir: &Path, username: &str) -> PathBuf {
    dir.join(format!("{username}.totp"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSecretBackendConfig {
    pub secrets_dir: PathBuf,
}

pub struct FileSecretBackend {
    secrets_dir: PathBuf,
    decryptor: Argon2AesGcmDecryptor,
}

impl FileSecretBackend {
    pub fn new(config: FileSecretBackendConfig) -> Self {
        FileSecretBackend {
            secrets_dir: config.secrets_dir,
            decryptor: Argon2AesGcmDecryptor,
        }
    }
}

fn parse_rate_limit(value: &str) -> Option<RateLimit> {
    let (attempts, seconds) = value.split_once(',')?;
    Some(RateLimit {
        max_attempts: attempts.trim().parse().ok()?,
        window_seconds: seconds.trim().parse().ok()?,
    })
}

impl SecretBackend for FileSecretBackend {
    fn load_secret(&self, username: &str, pincode: Option<&str>) -> Result<Secret, Error> {
        let path = secret_path(&self.secrets_dir, username);
        let body = fs::read_to_string(&path).map_err(|_| {
            tracing::warn!(%username, path = %path.display(), "secret file backend load failed");
            Error::user_secret(format!("{username}.totp does not exist"))
        })?;

        let mut lines = body.lines();
        let first_line = lines
            .next()
            .ok_or_else(|| Error::user_secret("empty secret file"))?;

        let mut rate_limit = RateLimit::default();
        let mut window_size = 0i64;
        let mut scratch_tokens = Vec::new();
        let mut encrypted = false;

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "ENCRYPTED" {
                encrypted = true;
            } else if let Some(value) = line.strip_prefix("RATE_LIMIT=") {
                if let Some(rl) = parse_rate_limit(value) {
                    rate_limit = rl;
                }
            } else if let Some(value) = line.strip_prefix("WINDOW_SIZE=") {
                window_size = value.trim().parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("SCRATCH_TOKENS=") {
                scratch_tokens = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }

        let totp_key = if encrypted {
            let pincode = pincode
                .ok_or_else(|| Error::user_secret("Could not decrypt: no pincode supplied"))?;
            let sealed = base64::decode(first_line.trim())
                .map_err(|_| Error::user_secret("malformed encrypted secret"))?;
            self.decryptor.decrypt(&sealed, pincode)?
        } else {
            first_line.trim().to_string()
        };

        let mut secret = Secret::new(totp_key)
            .with_rate_limit(rate_limit.max_attempts, rate_limit.window_seconds)
            .with_window_size(window_size);

        if !encrypted {
            secret = secret.with_scratch_tokens(scratch_tokens);
        }

        Ok(secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePincodeBackendConfig {
    pub pincode_file: PathBuf,
}

pub struct FilePincodeBackend {
    pincode_file: PathBuf,
}

impl FilePincodeBackend {
    pub fn new(config: FilePincodeBackendConfig) -> Self {
        FilePincodeBackend {
            pincode_file: config.pincode_file,
        }
    }

    fn db_path(&self) -> PathBuf {
        let mut path = self.pincode_file.clone().into_os_string();
        path.push(".db");
        PathBuf::from(path)
    }

    /// Mirrors the original `anydbm` sidecar: a serialized `username ->
    /// hash` map, consulted instead of a linear scan when it is at least as
    /// fresh as the text file.
    fn lookup_via_db(&self, username: &str) -> Result<Option<String>, Error> {
        let db_path = self.db_path();
        let (db_meta, text_meta) = match (fs::metadata(&db_path), fs::metadata(&self.pincode_file)) {
            (Ok(d), Ok(t)) => (d, t),
            _ => return Ok(None),
        };
        let db_mtime = db_meta.modified().map_err(|e| Error::user_pincode(e.to_string()))?;
        let text_mtime = text_meta.modified().map_err(|e| Error::user_pincode(e.to_string()))?;
        if db_mtime < text_mtime {
            return Ok(None);
        }

        let raw = fs::read_to_string(&db_path).map_err(|e| Error::user_pincode(e.to_string()))?;
        let map: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| Error::user_pincode(e.to_string()))?;
        Ok(map.get(username).cloned())
    }

    fn lookup_via_scan(&self, username: &str) -> Result<Option<String>, Error> {
        let body = fs::read_to_string(&self.pincode_file)
            .map_err(|_| Error::user_not_found("pincodes file not found"))?;

        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(3, ':');
            let (Some(record_user), Some(hash)) = (parts.next(), parts.next()) else {
                continue;
            };
            if record_user == username {
                return Ok(Some(hash.to_string()));
            }
        }
        Ok(None)
    }

    fn hashcode_for(&self, username: &str) -> Result<Option<String>, Error> {
        if let Some(hash) = self.lookup_via_db(username)? {
            return Ok(Some(hash));
        }
        self.lookup_via_scan(username)
    }

    /// Rewrites the `.db` sidecar atomically. Used by provisioning tools;
    /// the verify path only reads it.
    pub fn rebuild_db(&self) -> Result<(), Error> {
        let body = fs::read_to_string(&self.pincode_file)
            .map_err(|_| Error::user_not_found("pincodes file not found"))?;

        let mut map = HashMap::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(3, ':');
            if let (Some(user), Some(hash)) = (parts.next(), parts.next()) {
                map.insert(user.to_string(), hash.to_string());
            }
        }

        let serialized =
            serde_json::to_string(&map).map_err(|e| Error::user_pincode(e.to_string()))?;
        let tmp_path = self.db_path().with_extension("db.tmp");
        fs::write(&tmp_path, serialized).map_err(|e| Error::user_pincode(e.to_string()))?;
        fs::rename(&tmp_path, self.db_path()).map_err(|e| Error::user_pincode(e.to_string()))?;
        Ok(())
    }
}

impl PincodeBackend for FilePincodeBackend {
    fn verify_pincode(&self, username: &str, candidate: &str) -> Result<bool, Error> {
        let hash = self.hashcode_for(username)?.ok_or_else(|| {
            tracing::debug!(%username, "no pincode record on file for user");
            Error::user_pincode("Pincode did not match")
        })?;
        totp_verify_core::hash::verify_pincode(candidate, &hash)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStateBackendConfig {
    pub state_dir: PathBuf,
}

pub struct FileStateBackend {
    state_dir: PathBuf,
}

impl FileStateBackend {
    pub fn new(config: FileStateBackendConfig) -> Self {
        FileStateBackend {
            state_dir: config.state_dir,
        }
    }

    fn state_path(&self, username: &str) -> PathBuf {
        self.state_dir.join(format!("{username}.json"))
    }
}

impl StateBackend for FileStateBackend {
    fn acquire(&self, username: &str) -> Result<Box<dyn StateGuard>, Error> {
        fs::create_dir_all(&self.state_dir)
            .map_err(|e| Error::verify_failed(format!("cannot create state dir: {e}")))?;

        let path = self.state_path(username);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| {
                tracing::warn!(%username, error = %e, "state file backend failed to open");
                Error::verify_failed(format!("cannot open state file: {e}"))
            })?;

        file.lock_exclusive()
            .map_err(|e| Error::verify_failed(format!("cannot lock state file: {e}")))?;

        let state = read_state(&file)?;
        tracing::debug!(%username, "acquired per-user file state lock");

        Ok(Box::new(FileStateGuard {
            file,
            path,
            state,
        }))
    }
}

fn read_state(mut file: &File) -> Result<UserState, Error> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| Error::verify_failed(format!("cannot read state file: {e}")))?;
    if contents.trim().is_empty() {
        return Ok(UserState::default());
    }
    serde_json::from_str(&contents)
        .map_err(|e| Error::verify_failed(format!("corrupt state file: {e}")))
}

struct FileStateGuard {
    file: File,
    path: PathBuf,
    state: UserState,
}

impl StateGuard for FileStateGuard {
    fn state(&self) -> &UserState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut UserState {
        &mut self.state
    }

    fn commit(mut self: Box<Self>, state: UserState) -> Result<(), Error> {
        use std::io::{Seek, SeekFrom};
        let serialized =
            serde_json::to_string(&state).map_err(|e| Error::verify_failed(e.to_string()))?;
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(serialized.as_bytes()))
            .map_err(|e| Error::verify_failed(format!("cannot write state file: {e}")))?;
        self.file
            .unlock()
            .map_err(|e| Error::verify_failed(format!("cannot unlock state file: {e}")))
    }

    fn abort(self: Box<Self>) -> Result<(), Error> {
        self.file
            .unlock()
            .map_err(|e| Error::verify_failed(format!("cannot unlock state file: {e}")))
    }

    fn delete(self: Box<Self>) -> Result<(), Error> {
        self.file
            .unlock()
            .map_err(|e| Error::verify_failed(format!("cannot unlock state file: {e}")))?;
        let _ = fs::remove_file(&self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn loads_plain_secret_with_header() {
        let dir = tempdir().unwrap();
        let path = secret_path(dir.path(), "valid");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "VN7J5UVLZEP7ZAGM\n\nRATE_LIMIT=4,40\nWINDOW_SIZE=18\nSCRATCH_TOKENS=88709766,11488461"
        )
        .unwrap();

        let backend = FileSecretBackend::new(FileSecretBackendConfig {
            secrets_dir: dir.path().to_path_buf(),
        });
        let secret = backend.load_secret("valid", None).unwrap();

        assert_eq!(secret.totp_key, "VN7J5UVLZEP7ZAGM");
        assert_eq!(secret.rate_limit.max_attempts, 4);
        assert_eq!(secret.rate_limit.window_seconds, 40);
        assert!(secret.scratch_tokens.contains("88709766"));
    }

    #[test]
    fn missing_secret_file_is_reported_by_name() {
        let dir = tempdir().unwrap();
        let backend = FileSecretBackend::new(FileSecretBackendConfig {
            secrets_dir: dir.path().to_path_buf(),
        });
        let err = backend.load_secret("bupkis", None).unwrap_err();
        assert!(matches!(err, Error::UserSecretError(m) if m.contains("bupkis.totp does not exist")));
    }

    #[test]
    fn missing_pincode_file_is_user_not_found() {
        let dir = tempdir().unwrap();
        let backend = FilePincodeBackend::new(FilePincodeBackendConfig {
            pincode_file: dir.path().join("pincodes"),
        });
        let err = backend.verify_pincode("valid", "1234").unwrap_err();
        assert!(matches!(err, Error::UserNotFound(m) if m == "pincodes file not found"));
    }

    #[test]
    fn scans_pincode_file_ignoring_third_field() {
        let dir = tempdir().unwrap();
        let pincode_path = dir.path().join("pincodes");
        fs::write(&pincode_path, "valid:wakkawakka:junk\n").unwrap();

        let backend = FilePincodeBackend::new(FilePincodeBackendConfig {
            pincode_file: pincode_path,
        });
        assert!(backend.verify_pincode("valid", "wakkawakka").unwrap());
        assert!(!backend.verify_pincode("valid", "wrong").unwrap());
    }

    #[test]
    fn stale_db_sidecar_is_ignored_in_favor_of_text_file() {
        let dir = tempdir().unwrap();
        let pincode_path = dir.path().join("pincodes");
        fs::write(&pincode_path, "valid:freshpincode\n").unwrap();

        let backend = FilePincodeBackend::new(FilePincodeBackendConfig {
            pincode_file: pincode_path.clone(),
        });
        backend.rebuild_db().unwrap();

        // now make the text file newer again, as in the original test's
        // "fallback to pincodes" scenario
        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(&pincode_path, "valid:freshpincode\n").unwrap();

        assert!(backend.verify_pincode("valid", "freshpincode").unwrap());
    }

    #[test]
    fn state_round_trips_through_commit() {
        let dir = tempdir().unwrap();
        let backend = FileStateBackend::new(FileStateBackendConfig {
            state_dir: dir.path().to_path_buf(),
        });

        let guard = backend.acquire("valid").unwrap();
        assert_eq!(guard.state().fail_timestamps.len(), 0);
        let mut state = guard.state().clone();
        state.fail_timestamps.push(42);
        guard.commit(state).unwrap();

        let guard = backend.acquire("valid").unwrap();
        assert_eq!(guard.state().fail_timestamps, vec![42]);
        guard.abort().unwrap();
    }
}
