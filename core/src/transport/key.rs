//! Private key validation, run before any connection is attempted.
//!
//! libssh2 only reports a bad key once the session is up, and by then the failure looks like
//! any other rejected method. Decoding the key here turns a broken file into `KeyParse`.
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::TransportError;

const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";
const OPENSSH_LABEL: &str = "OPENSSH PRIVATE KEY";
const PEM_LABELS: &[&str] = &["RSA PRIVATE KEY", "EC PRIVATE KEY", "DSA PRIVATE KEY", "PRIVATE KEY"];
const ENCRYPTED: &str = "passphrase-protected keys are not supported";
const DER_SEQUENCE: u8 = 0x30;

/// Checks that `contents` holds one usable, unencrypted private key and returns it in the
/// form handed to libssh2.
pub(crate) fn parse_private_key(path: &Path, contents: &str) -> Result<String, TransportError> {
    validate(contents).map_err(|reason| TransportError::KeyParse {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(format!("{}\n", contents.trim()))
}

fn validate(contents: &str) -> Result<(), String> {
    let block = unarmor(contents)?;
    match block.label {
        OPENSSH_LABEL => check_openssh(&block.body),
        "ENCRYPTED PRIVATE KEY" => Err(ENCRYPTED.to_string()),
        label if PEM_LABELS.contains(&label) => {
            let encrypted = block
                .headers
                .iter()
                .any(|(name, value)| name.eq_ignore_ascii_case("Proc-Type") && value.contains("ENCRYPTED"));
            if encrypted {
                return Err(ENCRYPTED.to_string());
            }
            if block.body.first() != Some(&DER_SEQUENCE) {
                return Err(format!("{label} body is not a DER sequence"));
            }
            Ok(())
        }
        other => Err(format!("unsupported key block {other:?}")),
    }
}

struct Armored<'a> {
    label: &'a str,
    headers: Vec<(&'a str, &'a str)>,
    body: Vec<u8>,
}

fn unarmor(contents: &str) -> Result<Armored<'_>, String> {
    let mut lines = contents.trim().lines().map(str::trim);
    let label = lines
        .next()
        .and_then(|line| line.strip_prefix("-----BEGIN "))
        .and_then(|line| line.strip_suffix("-----"))
        .ok_or("no PEM or OpenSSH private key block found")?;

    let mut headers = Vec::new();
    let mut encoded = String::new();
    let mut closed = false;
    for line in lines {
        if let Some(end) = line
            .strip_prefix("-----END ")
            .and_then(|line| line.strip_suffix("-----"))
        {
            if end != label {
                return Err(format!("BEGIN {label} closed by END {end}"));
            }
            closed = true;
            break;
        }
        if encoded.is_empty() {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim(), value.trim()));
                continue;
            }
        }
        encoded.push_str(line);
    }

    if !closed {
        return Err(format!("missing END {label} line"));
    }
    if encoded.is_empty() {
        return Err("key block is empty".to_string());
    }
    let body = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| format!("key body is not valid base64: {e}"))?;

    Ok(Armored {
        label,
        headers,
        body,
    })
}

/// Walks the `openssh-key-v1` container far enough to know the key is whole and unencrypted.
fn check_openssh(body: &[u8]) -> Result<(), String> {
    let rest = body
        .strip_prefix(OPENSSH_MAGIC)
        .ok_or("missing openssh-key-v1 header")?;
    let mut outer = Reader::new(rest);

    let cipher = outer.string()?;
    let kdf = outer.string()?;
    outer.string()?;
    if cipher != b"none" || kdf != b"none" {
        return Err(ENCRYPTED.to_string());
    }

    let count = outer.u32()?;
    if count != 1 {
        return Err(format!("expected one key, found {count}"));
    }
    let public = outer.string()?;
    let private = outer.string()?;

    let public_type = Reader::new(public).string()?;
    let mut inner = Reader::new(private);
    if inner.u32()? != inner.u32()? {
        return Err("private section check bytes differ".to_string());
    }
    if inner.string()? != public_type {
        return Err("public and private key types differ".to_string());
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        if self.buf.len() < len {
            return Err("truncated key data".to_string());
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<&'a [u8], String> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

/// Armored `openssh-key-v1` ed25519 key with placeholder key bytes.
#[cfg(test)]
pub(crate) fn openssh_fixture(cipher: &str) -> String {
    fn put(buf: &mut Vec<u8>, bytes: &[u8]) {
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(bytes);
    }

    let mut public = Vec::new();
    put(&mut public, b"ssh-ed25519");
    put(&mut public, &[7; 32]);

    let mut private = Vec::new();
    private.extend_from_slice(&0x5e77_1edu32.to_be_bytes());
    private.extend_from_slice(&0x5e77_1edu32.to_be_bytes());
    put(&mut private, b"ssh-ed25519");
    put(&mut private, &[7; 32]);
    put(&mut private, &[9; 64]);
    put(&mut private, b"deploy@test");
    let mut pad = 1u8;
    while private.len() % 8 != 0 {
        private.push(pad);
        pad += 1;
    }

    let kdf: &[u8] = if cipher == "none" { b"none" } else { b"bcrypt" };
    let mut blob = OPENSSH_MAGIC.to_vec();
    put(&mut blob, cipher.as_bytes());
    put(&mut blob, kdf);
    put(&mut blob, &[]);
    blob.extend_from_slice(&1u32.to_be_bytes());
    put(&mut blob, &public);
    put(&mut blob, &private);

    let encoded = STANDARD.encode(blob);
    let mut armored = format!("-----BEGIN {OPENSSH_LABEL}-----\n");
    for chunk in encoded.as_bytes().chunks(70) {
        armored.push_str(&String::from_utf8_lossy(chunk));
        armored.push('\n');
    }
    armored.push_str(&format!("-----END {OPENSSH_LABEL}-----\n"));
    armored
}
