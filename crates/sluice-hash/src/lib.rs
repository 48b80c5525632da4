//! Streaming digest registry shared by the sluice server and client.
//!
//! Every algorithm the upload surface speaks is registered here by its wire
//! name. Digest output is always lowercase hex: 8 digits for CRC-32, 16 for
//! CRC-64 and XXH64, the usual widths for the cryptographic trio.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// CRC-64 with the reflected ECMA polynomial (the parameter set Go's
/// `hash/crc64` calls ECMA; the crc crate catalogs it as CRC-64/XZ).
static CRC64: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_XZ);

/// Algorithms known to the upload surface, keyed by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
    Crc32,
    Crc64,
    Xxh64,
}

impl HashAlgo {
    pub const ALL: [HashAlgo; 6] = [
        HashAlgo::Md5,
        HashAlgo::Sha1,
        HashAlgo::Sha256,
        HashAlgo::Crc32,
        HashAlgo::Crc64,
        HashAlgo::Xxh64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Md5 => "md5",
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Crc32 => "crc32",
            HashAlgo::Crc64 => "crc64",
            HashAlgo::Xxh64 => "xxh64",
        }
    }

    pub fn from_name(name: &str) -> Option<HashAlgo> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    /// Start a fresh streaming digest for this algorithm.
    pub fn hasher(self) -> HashState {
        let inner = match self {
            HashAlgo::Md5 => Inner::Md5(md5::Md5::new()),
            HashAlgo::Sha1 => Inner::Sha1(sha1::Sha1::new()),
            HashAlgo::Sha256 => Inner::Sha256(sha2::Sha256::new()),
            HashAlgo::Crc32 => Inner::Crc32(crc32fast::Hasher::new()),
            HashAlgo::Crc64 => Inner::Crc64(CRC64.digest()),
            HashAlgo::Xxh64 => Inner::Xxh64(xxhash_rust::xxh64::Xxh64::new(0)),
        };
        HashState { inner }
    }
}

/// One in-progress digest. `update` streams bytes in, `finish` renders the
/// lowercase-hex result.
pub struct HashState {
    inner: Inner,
}

enum Inner {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Crc32(crc32fast::Hasher),
    Crc64(crc::Digest<'static, u64>),
    Xxh64(xxhash_rust::xxh64::Xxh64),
}

impl HashState {
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Md5(h) => h.update(data),
            Inner::Sha1(h) => h.update(data),
            Inner::Sha256(h) => h.update(data),
            Inner::Crc32(h) => h.update(data),
            Inner::Crc64(h) => h.update(data),
            Inner::Xxh64(h) => h.update(data),
        }
    }

    pub fn finish(self) -> String {
        match self.inner {
            Inner::Md5(h) => hex::encode(h.finalize()),
            Inner::Sha1(h) => hex::encode(h.finalize()),
            Inner::Sha256(h) => hex::encode(h.finalize()),
            Inner::Crc32(h) => format!("{:08x}", h.finalize()),
            Inner::Crc64(h) => format!("{:016x}", h.finalize()),
            Inner::Xxh64(h) => format!("{:016x}", h.digest()),
        }
    }
}

/// Read-only name → lowercase-hex map, the shape hash results travel in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashView(BTreeMap<String, String>);

impl HashView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, algo: HashAlgo, hexdigest: String) {
        self.0.insert(algo.name().to_string(), hexdigest);
    }

    pub fn get(&self, algo: HashAlgo) -> Option<&str> {
        self.0.get(algo.name()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

/// Fan-out sink: every write is broadcast to all member digest states, so a
/// single read loop can feed a file and several hashes in lockstep.
pub struct MultiHasher {
    states: Vec<(HashAlgo, HashState)>,
}

impl MultiHasher {
    pub fn new(algos: &[HashAlgo]) -> Self {
        Self {
            states: algos.iter().map(|&a| (a, a.hasher())).collect(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, state) in &mut self.states {
            state.update(data);
        }
    }

    pub fn finish(self) -> HashView {
        let mut view = HashView::new();
        for (algo, state) in self.states {
            view.insert(algo, state.finish());
        }
        view
    }
}

impl Write for MultiHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stream a reader through one digest and return the hex result.
pub fn hash_reader(algo: HashAlgo, mut reader: impl Read) -> io::Result<String> {
    let mut state = algo.hasher();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        state.update(&buf[..n]);
    }
    Ok(state.finish())
}
