//! Twelve-byte document identifiers and the strategies that generate them.
//!
//! # Layout
//!
//! | bytes     | segment           | encoding                                   |
//! |-----------|-------------------|--------------------------------------------|
//! | `[0..4)`  | creation time     | big-endian seconds since the Unix epoch    |
//! | `[4..7)`  | process group     | random 24-bit value chosen once per process |
//! | `[7..9)`  | process sequence  | host process id, truncated to 16 bits      |
//! | `[9..12)` | counter           | big-endian, wraps modulo 2^24              |
//!
//! Identifiers generated in the same process and second differ only in the counter.
//!
//! # Example
//!
//! ```ignore
//! use docwire_core::id::DocumentId;
//!
//! let id = DocumentId::new();
//! let parsed = DocumentId::from_hex(id.to_hex())?;
//! assert_eq!(id, parsed);
//! ```

use bson::{Bson, oid::ObjectId};
use chrono::{DateTime, Utc};
use once_cell::sync::{Lazy, OnceCell};
use std::{
    cmp::Ordering as CmpOrdering,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::{CommandError, CommandResult};

/// Length of a raw identifier in bytes.
pub const ID_LENGTH: usize = 12;

/// Length of the textual (hex) form of an identifier.
pub const HEX_LENGTH: usize = ID_LENGTH * 2;

const SEGMENT_MASK: u32 = 0x00FF_FFFF;

static PROCESS_GROUP: Lazy<u32> = Lazy::new(|| rand::random::<u32>() & SEGMENT_MASK);

static PROCESS_COUNTER: Lazy<Arc<IdCounter>> = Lazy::new(|| Arc::new(IdCounter::new(0)));

static PROCESS_GENERATOR: Lazy<ObjectIdGenerator> = Lazy::new(ObjectIdGenerator::new);

/// A 12-byte document identifier.
///
/// Equality, ordering and hashing only look at the raw bytes. The hex form is
/// computed lazily and cached on the instance.
#[derive(Clone)]
pub struct DocumentId {
    bytes: [u8; ID_LENGTH],
    hex: OnceCell<String>,
}

impl DocumentId {
    /// Generates a new identifier with the process-wide generator.
    pub fn new() -> Self {
        PROCESS_GENERATOR.generate()
    }

    /// Assembles an identifier from its four segments.
    ///
    /// `process_group` and `counter` are truncated to 24 bits.
    pub fn from_parts(timestamp: u32, process_group: u32, process_sequence: u16, counter: u32) -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..7].copy_from_slice(&(process_group & SEGMENT_MASK).to_be_bytes()[1..4]);
        bytes[7..9].copy_from_slice(&process_sequence.to_be_bytes());
        bytes[9..12].copy_from_slice(&(counter & SEGMENT_MASK).to_be_bytes()[1..4]);

        Self::from_array(bytes)
    }

    /// Creates a time-only identifier: every segment after the timestamp is zero.
    ///
    /// These are not unique. They exist for range queries over creation time
    /// and for deterministic tests.
    pub fn from_time(timestamp: u32) -> Self {
        Self::from_parts(timestamp, 0, 0, 0)
    }

    /// Wraps a raw 12-byte array.
    pub fn from_array(bytes: [u8; ID_LENGTH]) -> Self {
        Self { bytes, hex: OnceCell::new() }
    }

    /// Creates an identifier from exactly 12 raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> CommandResult<Self> {
        let array: [u8; ID_LENGTH] = bytes.try_into().map_err(|_| {
            CommandError::Validation(format!(
                "identifier must be {} raw bytes, got {}",
                ID_LENGTH,
                bytes.len(),
            ))
        })?;

        Ok(Self::from_array(array))
    }

    /// Parses the 24-character hex form.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] unless `hex` is exactly 24 hex characters.
    pub fn from_hex(hex: &str) -> CommandResult<Self> {
        if hex.len() != HEX_LENGTH || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CommandError::Validation(format!(
                "identifier must be a string of {} hex characters, got {:?}",
                HEX_LENGTH, hex,
            )));
        }

        let mut bytes = [0u8; ID_LENGTH];
        for (index, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16)
                .map_err(|e| CommandError::Validation(e.to_string()))?;
        }

        Ok(Self::from_array(bytes))
    }

    /// Parses either textual form: 24 hex characters or a 12-byte string.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] for every other input.
    pub fn parse(input: &str) -> CommandResult<Self> {
        match input.len() {
            HEX_LENGTH => Self::from_hex(input),
            ID_LENGTH => Self::from_bytes(input.as_bytes()),
            len => Err(CommandError::Validation(format!(
                "identifier must be {} raw bytes or {} hex characters, got length {}",
                ID_LENGTH, HEX_LENGTH, len,
            ))),
        }
    }

    /// Returns the raw bytes.
    pub fn bytes(&self) -> [u8; ID_LENGTH] {
        self.bytes
    }

    /// Returns the lowercase hex form. Computed once per instance.
    pub fn to_hex(&self) -> &str {
        self.hex.get_or_init(|| {
            self.bytes
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect()
        })
    }

    /// Seconds since the Unix epoch stored in the first four bytes.
    pub fn generation_time(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    /// The instant this identifier was created.
    pub fn creation_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.generation_time()), 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// The 24-bit process-group segment.
    pub fn process_group(&self) -> u32 {
        u32::from_be_bytes([0, self.bytes[4], self.bytes[5], self.bytes[6]])
    }

    /// The 16-bit process-sequence segment.
    pub fn process_sequence(&self) -> u16 {
        u16::from_be_bytes([self.bytes[7], self.bytes[8]])
    }

    /// The 24-bit counter segment.
    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([0, self.bytes[9], self.bytes[10], self.bytes[11]])
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        DocumentId::new()
    }
}

impl PartialEq for DocumentId {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for DocumentId {}

impl PartialEq<str> for DocumentId {
    fn eq(&self, other: &str) -> bool {
        DocumentId::from_hex(other)
            .map(|id| id.bytes == self.bytes)
            .unwrap_or(false)
    }
}

impl PartialEq<&str> for DocumentId {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<ObjectId> for DocumentId {
    fn eq(&self, other: &ObjectId) -> bool {
        self.bytes == other.bytes()
    }
}

impl Hash for DocumentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for DocumentId {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocumentId {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.to_hex())
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_hex())
    }
}

impl FromStr for DocumentId {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentId::parse(s)
    }
}

impl From<DocumentId> for ObjectId {
    fn from(id: DocumentId) -> Self {
        ObjectId::from_bytes(id.bytes)
    }
}

impl From<ObjectId> for DocumentId {
    fn from(oid: ObjectId) -> Self {
        DocumentId::from_array(oid.bytes())
    }
}

impl From<DocumentId> for Bson {
    fn from(id: DocumentId) -> Self {
        Bson::ObjectId(id.into())
    }
}

/// A process-wide counter that wraps modulo 2^24.
///
/// Increments are a single atomic fetch-add, so concurrent generators never
/// observe the same value until the counter wraps.
#[derive(Debug)]
pub struct IdCounter {
    next: AtomicU32,
}

impl IdCounter {
    /// Creates a counter whose first value is `start` (truncated to 24 bits).
    pub const fn new(start: u32) -> Self {
        Self { next: AtomicU32::new(start & SEGMENT_MASK) }
    }

    /// Returns the current value and advances the counter.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed) & SEGMENT_MASK
    }
}

/// Strategy for assigning identifiers to documents that lack one.
///
/// Each collection carries its own generator, so callers can plug in a
/// deterministic implementation for tests.
pub trait IdGenerator: Send + Sync + Debug {
    /// Produces the next identifier.
    fn generate(&self) -> DocumentId;
}

impl<G: IdGenerator + ?Sized> IdGenerator for Arc<G> {
    fn generate(&self) -> DocumentId {
        (**self).generate()
    }
}

/// The default identifier generator.
///
/// [`ObjectIdGenerator::new`] shares the process-wide counter and process group.
/// [`ObjectIdGenerator::with_parts`] builds an isolated generator whose clock,
/// segments and counter are all injected.
#[derive(Debug, Clone)]
pub struct ObjectIdGenerator {
    process_group: u32,
    process_sequence: u16,
    counter: Arc<IdCounter>,
    clock: fn() -> u32,
}

impl ObjectIdGenerator {
    /// Creates a generator bound to the process-wide state.
    pub fn new() -> Self {
        Self {
            process_group: *PROCESS_GROUP,
            process_sequence: std::process::id() as u16,
            counter: Arc::clone(&PROCESS_COUNTER),
            clock: unix_seconds,
        }
    }

    /// Creates a generator from explicit parts.
    pub fn with_parts(
        process_group: u32,
        process_sequence: u16,
        counter: Arc<IdCounter>,
        clock: fn() -> u32,
    ) -> Self {
        Self {
            process_group: process_group & SEGMENT_MASK,
            process_sequence,
            counter,
            clock,
        }
    }

    /// The process-group segment this generator writes.
    pub fn process_group(&self) -> u32 {
        self.process_group
    }

    /// The process-sequence segment this generator writes.
    pub fn process_sequence(&self) -> u16 {
        self.process_sequence
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        ObjectIdGenerator::new()
    }
}

impl IdGenerator for ObjectIdGenerator {
    fn generate(&self) -> DocumentId {
        DocumentId::from_parts(
            (self.clock)(),
            self.process_group,
            self.process_sequence,
            self.counter.next(),
        )
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_seconds() -> u32 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as u32,
        Err(e) => {
            tracing::warn!("system clock is before the Unix epoch: {}", e);
            0
        }
    }
}
